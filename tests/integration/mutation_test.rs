// tests/integration/mutation_test.rs

//! Integration tests for writes, field edits, expiry, renames, deletes and flushes.

use super::fake_server::{FakeNode, FakeValue};
use super::test_helpers::{FakeConnector, TestContext};
use bytes::Bytes;
use keydeck::Browser;
use keydeck::config::Config;
use keydeck::core::KeydeckError;
use keydeck::core::browser::{FieldEdit, SetKeyParam, ValueCodec};
use keydeck::core::convert::EncodedBytes;
use keydeck::core::events::{BatchEmitter, EventSink};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn set_param(key: &str, key_type: &str, value: Value, ttl: i64) -> SetKeyParam {
    SetKeyParam {
        server: "local".to_string(),
        db: 0,
        key: key.into(),
        key_type: key_type.to_string(),
        value,
        ttl,
        format: String::new(),
        decode: String::new(),
    }
}

fn b(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

// ===== Whole-key writes =====

#[tokio::test]
async fn test_set_string_with_ttl() {
    let ctx = TestContext::standalone(10);

    ctx.browser
        .set_key_value(set_param("greeting", "string", json!("hello"), 60))
        .await
        .unwrap();

    assert_eq!(ctx.node().get(0, "greeting"), Some(FakeValue::Str(b("hello"))));
    assert_eq!(ctx.node().ttl_of(0, "greeting"), Some(60));
    assert_eq!(ctx.node().calls("MULTI"), 1);
    assert_eq!(ctx.node().calls("EXEC"), 1);
}

#[tokio::test]
async fn test_set_list_replaces_previous_value() {
    let ctx = TestContext::standalone(10);
    ctx.node()
        .seed(0, "queue", FakeValue::List(vec![b("old1"), b("old2")]));

    ctx.browser
        .set_key_value(set_param("queue", "list", json!(["a", "b", "c"]), 0))
        .await
        .unwrap();

    assert_eq!(
        ctx.node().get(0, "queue"),
        Some(FakeValue::List(vec![b("a"), b("b"), b("c")]))
    );
    assert_eq!(ctx.node().ttl_of(0, "queue"), None);
}

#[tokio::test]
async fn test_set_hash_set_and_zset() {
    let ctx = TestContext::standalone(10);

    ctx.browser
        .set_key_value(set_param("h", "hash", json!({"name": "ada", "lang": "en"}), 0))
        .await
        .unwrap();
    ctx.browser
        .set_key_value(set_param("s", "set", json!(["x", "y", "x"]), 0))
        .await
        .unwrap();
    ctx.browser
        .set_key_value(set_param("z", "zset", json!({"low": 1, "high": 9.5}), 0))
        .await
        .unwrap();

    assert_eq!(
        ctx.node().get(0, "h"),
        Some(FakeValue::Hash(vec![(b("name"), b("ada")), (b("lang"), b("en"))]))
    );
    assert_eq!(
        ctx.node().get(0, "s"),
        Some(FakeValue::Set(BTreeSet::from([b("x"), b("y")])))
    );
    assert_eq!(
        ctx.node().get(0, "z"),
        Some(FakeValue::ZSet(vec![(b("low"), 1.0), (b("high"), 9.5)]))
    );
}

#[tokio::test]
async fn test_set_stream() {
    let ctx = TestContext::standalone(10);

    ctx.browser
        .set_key_value(set_param(
            "log",
            "stream",
            json!([
                {"id": "5-0", "value": {"level": "info"}},
                {"id": "6-0", "value": {"level": "warn"}}
            ]),
            0,
        ))
        .await
        .unwrap();

    let Some(FakeValue::Stream(entries)) = ctx.node().get(0, "log") else {
        panic!("expected a stream");
    };
    let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, ["5-0", "6-0"]);
    assert_eq!(entries[1].1, vec![(b("level"), b("warn"))]);
}

#[tokio::test]
async fn test_set_value_with_codec() {
    let ctx = TestContext::standalone(10);

    let mut param = set_param("packed", "string", json!("hello"), 0);
    param.decode = "base64".to_string();
    ctx.browser.set_key_value(param).await.unwrap();

    assert_eq!(
        ctx.node().get(0, "packed"),
        Some(FakeValue::Str(b("aGVsbG8=")))
    );
}

#[tokio::test]
async fn test_set_value_shape_mismatch() {
    let ctx = TestContext::standalone(10);

    let err = ctx
        .browser
        .set_key_value(set_param("h", "hash", json!(["not", "a", "map"]), 0))
        .await
        .unwrap_err();
    assert!(matches!(err, KeydeckError::Validation(_)), "got {err:?}");

    let err = ctx
        .browser
        .set_key_value(set_param("h", "geo", json!("x"), 0))
        .await
        .unwrap_err();
    assert!(matches!(err, KeydeckError::Validation(_)), "got {err:?}");

    // Nothing reached the server.
    assert_eq!(ctx.node().calls("MULTI"), 0);
}

#[tokio::test]
async fn test_set_value_on_cluster_routes_by_key() {
    let ctx = TestContext::cluster(3, 10);

    for i in 0..10 {
        let key = format!("user:{i}");
        let mut param = set_param(&key, "string", json!("v"), 0);
        param.server = "cluster".to_string();
        ctx.browser.set_key_value(param).await.unwrap();
        assert!(ctx.owner(&key).get(0, &key).is_some());
    }
}

// ===== Field edits =====

#[tokio::test]
async fn test_remove_list_item_by_index() {
    let ctx = TestContext::standalone(10);
    ctx.node()
        .seed(0, "l", FakeValue::List(vec![b("a"), b("b"), b("c")]));

    let outcome = ctx
        .browser
        .update_field(
            "local",
            0,
            &"l".into(),
            FieldEdit::ListItem {
                index: 1,
                value: None,
            },
            ValueCodec::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.affected, 1);
    assert_eq!(
        ctx.node().get(0, "l"),
        Some(FakeValue::List(vec![b("a"), b("c")]))
    );
}

#[tokio::test]
async fn test_set_list_item() {
    let ctx = TestContext::standalone(10);
    ctx.node()
        .seed(0, "l", FakeValue::List(vec![b("a"), b("b")]));

    ctx.browser
        .update_field(
            "local",
            0,
            &"l".into(),
            FieldEdit::ListItem {
                index: -1,
                value: Some("z".to_string()),
            },
            ValueCodec::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        ctx.node().get(0, "l"),
        Some(FakeValue::List(vec![b("a"), b("z")]))
    );
}

#[tokio::test]
async fn test_rename_hash_field() {
    let ctx = TestContext::standalone(10);
    ctx.node()
        .seed(0, "h", FakeValue::Hash(vec![(b("old"), b("1")), (b("keep"), b("2"))]));

    ctx.browser
        .update_field(
            "local",
            0,
            &"h".into(),
            FieldEdit::Hash {
                field: "old".into(),
                new_field: "new".into(),
                value: "3".to_string(),
            },
            ValueCodec::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        ctx.node().get(0, "h"),
        Some(FakeValue::Hash(vec![(b("keep"), b("2")), (b("new"), b("3"))]))
    );
}

#[tokio::test]
async fn test_remove_hash_field() {
    let ctx = TestContext::standalone(10);
    ctx.node()
        .seed(0, "h", FakeValue::Hash(vec![(b("a"), b("1")), (b("b"), b("2"))]));

    let outcome = ctx
        .browser
        .update_field(
            "local",
            0,
            &"h".into(),
            FieldEdit::Hash {
                field: "a".into(),
                new_field: EncodedBytes::from(""),
                value: String::new(),
            },
            ValueCodec::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.affected, 1);
    assert_eq!(
        ctx.node().get(0, "h"),
        Some(FakeValue::Hash(vec![(b("b"), b("2"))]))
    );
}

#[tokio::test]
async fn test_set_member_edits() {
    let ctx = TestContext::standalone(10);
    ctx.node()
        .seed(0, "s", FakeValue::Set(BTreeSet::from([b("a"), b("b")])));

    let outcome = ctx
        .browser
        .update_field(
            "local",
            0,
            &"s".into(),
            FieldEdit::SetMembers {
                remove: false,
                members: vec!["c".into(), "a".into()],
            },
            ValueCodec::default(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.affected, 1);

    ctx.browser
        .update_field(
            "local",
            0,
            &"s".into(),
            FieldEdit::SetMember {
                value: "b".into(),
                new_value: "d".to_string(),
            },
            ValueCodec::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        ctx.node().get(0, "s"),
        Some(FakeValue::Set(BTreeSet::from([b("a"), b("c"), b("d")])))
    );
}

#[tokio::test]
async fn test_zset_member_replace_and_rescore() {
    let ctx = TestContext::standalone(10);
    ctx.node().seed(
        0,
        "z",
        FakeValue::ZSet(vec![(b("a"), 1.0), (b("b"), 2.0)]),
    );

    ctx.browser
        .update_field(
            "local",
            0,
            &"z".into(),
            FieldEdit::ZSetMember {
                value: "a".into(),
                new_value: "a".to_string(),
                score: 5.0,
            },
            ValueCodec::default(),
        )
        .await
        .unwrap();
    ctx.browser
        .update_field(
            "local",
            0,
            &"z".into(),
            FieldEdit::ZSetMember {
                value: "b".into(),
                new_value: "c".to_string(),
                score: 0.5,
            },
            ValueCodec::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        ctx.node().get(0, "z"),
        Some(FakeValue::ZSet(vec![(b("c"), 0.5), (b("a"), 5.0)]))
    );
}

#[tokio::test]
async fn test_stream_add_and_remove() {
    let ctx = TestContext::standalone(10);

    let added = ctx
        .browser
        .update_field(
            "local",
            0,
            &"log".into(),
            FieldEdit::StreamAdd {
                id: String::new(),
                fields: vec![("msg".to_string(), "hi".to_string())],
            },
            ValueCodec::default(),
        )
        .await
        .unwrap();
    let id = added.id.expect("XADD returns the new id");
    assert_eq!(id, "1-0");

    let err = ctx
        .browser
        .update_field(
            "local",
            0,
            &"log".into(),
            FieldEdit::StreamAdd {
                id: String::new(),
                fields: vec![],
            },
            ValueCodec::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, KeydeckError::Validation(_)), "got {err:?}");

    let removed = ctx
        .browser
        .update_field(
            "local",
            0,
            &"log".into(),
            FieldEdit::StreamRemove { ids: vec![id] },
            ValueCodec::default(),
        )
        .await
        .unwrap();
    assert_eq!(removed.affected, 1);
    assert_eq!(ctx.node().get(0, "log"), None);
}

// ===== Expiry and renames =====

#[tokio::test]
async fn test_set_key_ttl() {
    let ctx = TestContext::standalone(10);
    ctx.node().seed_strings(0, ["k".to_string()]);

    ctx.browser.set_key_ttl("local", 0, &"k".into(), 30).await.unwrap();
    assert_eq!(ctx.node().ttl_of(0, "k"), Some(30));

    ctx.browser.set_key_ttl("local", 0, &"k".into(), -1).await.unwrap();
    assert_eq!(ctx.node().ttl_of(0, "k"), None);

    let err = ctx
        .browser
        .set_key_ttl("local", 0, &"k".into(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, KeydeckError::Validation(_)), "got {err:?}");

    let err = ctx
        .browser
        .set_key_ttl("local", 0, &"missing".into(), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, KeydeckError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn test_rename_key() {
    let ctx = TestContext::standalone(10);
    ctx.node().seed_strings(0, ["before".to_string()]);

    ctx.browser
        .rename_key("local", 0, &"before".into(), &"after".into())
        .await
        .unwrap();
    assert_eq!(ctx.node().keys(0), ["after"]);
}

#[tokio::test]
async fn test_rename_key_unsupported_on_cluster() {
    let ctx = TestContext::cluster(2, 10);
    ctx.owner("before").seed_strings(0, ["before".to_string()]);

    let err = ctx
        .browser
        .rename_key("cluster", 0, &"before".into(), &"after".into())
        .await
        .unwrap_err();
    assert!(matches!(err, KeydeckError::Unsupported(_)), "got {err:?}");
    assert!(ctx.nodes.iter().all(|n| n.calls("RENAME") == 0));
}

// ===== Deletes =====

#[tokio::test]
async fn test_delete_single_key() {
    let ctx = TestContext::standalone(10);
    ctx.node().seed_strings(0, ["a".to_string(), "b".to_string()]);

    let result = ctx
        .browser
        .delete_key("local", 0, &"a".into(), false)
        .await
        .unwrap();
    assert_eq!(result.deleted_count, 1);
    assert_eq!(result.deleted, vec![EncodedBytes::from("a")]);
    assert_eq!(ctx.node().keys(0), ["b"]);
    assert_eq!(ctx.node().calls("DEL"), 1);
}

#[tokio::test]
async fn test_delete_by_pattern() {
    let ctx = TestContext::standalone(10);
    ctx.node().seed_strings(0, (0..30).map(|i| format!("tmp:{i}")));
    ctx.node().seed_strings(0, ["keep".to_string()]);

    let result = ctx
        .browser
        .delete_key("local", 0, &"tmp:*".into(), false)
        .await
        .unwrap();
    assert_eq!(result.deleted_count, 30);
    assert_eq!(ctx.node().keys(0), ["keep"]);
}

#[tokio::test]
async fn test_async_delete_falls_back_to_del_once() {
    let ctx = TestContext::standalone_with(10, 1000);
    ctx.node().disable_unlink();
    ctx.node().seed_strings(0, (0..65).map(|i| format!("tmp:{i}")));

    let result = ctx
        .browser
        .delete_key("local", 0, &"tmp:*".into(), true)
        .await
        .unwrap();

    assert_eq!(result.deleted_count, 65);
    assert_eq!(ctx.node().key_count(0), 0);
    // Four batches of at most twenty; only the first tries UNLINK.
    assert_eq!(ctx.node().calls("UNLINK"), 1);
    assert_eq!(ctx.node().calls("DEL"), 4);
}

#[tokio::test]
async fn test_async_delete_uses_unlink() {
    let ctx = TestContext::standalone_with(10, 1000);
    ctx.node().seed_strings(0, (0..25).map(|i| format!("tmp:{i}")));

    ctx.browser
        .delete_key("local", 0, &"tmp:*".into(), true)
        .await
        .unwrap();
    assert_eq!(ctx.node().calls("UNLINK"), 2);
    assert_eq!(ctx.node().calls("DEL"), 0);
}

#[tokio::test]
async fn test_delete_keys_on_cluster() {
    let ctx = TestContext::cluster(3, 10);
    let keys: Vec<String> = (0..30).map(|i| format!("k{i}")).collect();
    for key in &keys {
        ctx.owner(key).seed_strings(0, [key.clone()]);
    }

    let targets: Vec<EncodedBytes> = keys[..20].iter().map(|k| k.as_str().into()).collect();
    let result = ctx
        .browser
        .delete_keys("cluster", 0, &targets, false)
        .await
        .unwrap();

    assert_eq!(result.deleted_count, 20);
    let remaining: usize = ctx.nodes.iter().map(|n| n.key_count(0)).sum();
    assert_eq!(remaining, 10);
    for key in &keys[20..] {
        assert!(ctx.owner(key).get(0, key).is_some());
    }
}

#[tokio::test]
async fn test_delete_by_pattern_on_cluster() {
    let ctx = TestContext::cluster(3, 10);
    for i in 0..40 {
        let key = format!("session:{i}");
        ctx.owner(&key).seed_strings(0, [key.clone()]);
    }

    let result = ctx
        .browser
        .delete_key("cluster", 0, &"session:*".into(), true)
        .await
        .unwrap();
    assert_eq!(result.deleted_count, 40);
    assert!(ctx.nodes.iter().all(|n| n.key_count(0) == 0));
}

#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<(String, Vec<Value>)>>,
}

impl EventSink for RecordingSink {
    fn deliver(&self, channel: &str, batch: Vec<Value>) {
        self.batches.lock().push((channel.to_string(), batch));
    }
}

#[tokio::test]
async fn test_delete_reports_progress() {
    let sink = Arc::new(RecordingSink::default());
    let emitter = Arc::new(BatchEmitter::spawn(
        sink.clone(),
        Duration::from_millis(10),
        100,
    ));
    let mut ctx = TestContext::standalone_with(10, 1000);
    ctx.browser = ctx.browser.with_events(emitter);
    ctx.node().seed_strings(0, (0..45).map(|i| format!("tmp:{i}")));

    ctx.browser
        .delete_key("local", 0, &"tmp:*".into(), false)
        .await
        .unwrap();
    ctx.browser.shutdown().await;

    let batches = sink.batches.lock();
    let messages: Vec<&Value> = batches
        .iter()
        .filter(|(channel, _)| channel == "delete:local")
        .flat_map(|(_, batch)| batch)
        .collect();
    let counts: Vec<u64> = messages
        .iter()
        .map(|m| m["count"].as_u64().unwrap_or(0))
        .collect();
    assert_eq!(counts, [20, 20, 5]);
}

#[tokio::test]
async fn test_configured_event_batching() {
    let config = Config::from_toml(
        r#"
        delete_batch_size = 1

        [events]
        flush_interval = "1h"
        max_batch = 2

        [[connections]]
        name = "local"
        addr = "127.0.0.1:6379"
        "#,
    )
    .unwrap();
    let node = Arc::new(FakeNode::new("127.0.0.1:6379"));
    node.seed_strings(0, (0..3).map(|i| format!("k{i}")));
    let connector = Arc::new(FakeConnector::default());
    connector.add(node.clone());
    let sink = Arc::new(RecordingSink::default());
    let browser = Browser::from_config(&config, connector, Some(sink.clone()));

    let keys: Vec<EncodedBytes> = ["k0", "k1", "k2"].into_iter().map(Into::into).collect();
    let result = browser.delete_keys("local", 0, &keys, false).await.unwrap();
    assert_eq!(result.deleted_count, 3);
    assert_eq!(node.calls("DEL"), 3);

    // Two pending messages force a delivery; the hour-long interval never fires.
    for _ in 0..100 {
        if !sink.batches.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    let sizes: Vec<usize> = sink.batches.lock().iter().map(|(_, b)| b.len()).collect();
    assert_eq!(sizes, [2]);

    browser.shutdown().await;
    let sizes: Vec<usize> = sink.batches.lock().iter().map(|(_, b)| b.len()).collect();
    assert_eq!(sizes, [2, 1]);
}

// ===== Flushes =====

#[tokio::test]
async fn test_flush_async_falls_back_to_sync() {
    let ctx = TestContext::standalone(10);
    ctx.node().disable_flush_async();
    ctx.node().seed_strings(0, (0..5).map(|i| format!("k{i}")));

    ctx.browser.flush_db("local", 0, true).await.unwrap();
    assert_eq!(ctx.node().key_count(0), 0);
    assert_eq!(ctx.node().calls("FLUSHDB"), 2);
    assert_eq!(
        ctx.node()
            .log()
            .iter()
            .filter(|l| l.starts_with("FLUSHDB"))
            .cloned()
            .collect::<Vec<_>>(),
        ["FLUSHDB ASYNC", "FLUSHDB"]
    );
}

#[tokio::test]
async fn test_flush_leaves_other_databases() {
    let ctx = TestContext::standalone(10);
    ctx.node().seed_strings(0, ["a".to_string()]);
    ctx.node().seed_strings(1, ["b".to_string()]);

    ctx.browser.flush_db("local", 0, false).await.unwrap();
    assert_eq!(ctx.node().key_count(0), 0);
    assert_eq!(ctx.node().keys(1), ["b"]);
}

#[tokio::test]
async fn test_cluster_flush_retries_every_shard() {
    let ctx = TestContext::cluster(3, 10);
    for i in 0..30 {
        let key = format!("k{i}");
        ctx.owner(&key).seed_strings(0, [key.clone()]);
    }
    ctx.nodes[2].disable_flush_async();

    ctx.browser.flush_db("cluster", 0, true).await.unwrap();

    assert!(ctx.nodes.iter().all(|n| n.key_count(0) == 0));
    assert_eq!(ctx.nodes[2].calls("FLUSHDB"), 2);
    for node in &ctx.nodes {
        assert!(node.log().iter().any(|l| l == "FLUSHDB"));
    }
}
