// tests/property/scan_consistency_test.rs

//! Property-based tests for incremental key scanning.

use crate::test_helpers::TestContext;
use keydeck::core::convert::EncodedBytes;
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Pages through `server`/0 until the scan reports its end.
async fn page_through(ctx: &TestContext, server: &str) -> Vec<String> {
    ctx.browser.open_database(server, 0).await.unwrap();
    let mut seen = Vec::new();
    for _ in 0..1000 {
        let page = ctx.browser.load_next_keys(server, 0, "*", "").await.unwrap();
        seen.extend(page.keys.iter().map(EncodedBytes::display));
        if page.end {
            return seen;
        }
    }
    panic!("scan of {server} did not terminate");
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 30, // Each case drives a full scan
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_standalone_scan_returns_every_key_once(
        key_count in 0usize..120,
        page_size in 1usize..40,
        scan_size in 1usize..25
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = TestContext::standalone_with(page_size, scan_size);
            let expected: BTreeSet<String> = (0..key_count).map(|i| format!("k:{i}")).collect();
            ctx.node().seed_strings(0, expected.iter().cloned());

            let seen = page_through(&ctx, "local").await;
            let unique: BTreeSet<String> = seen.iter().cloned().collect();
            assert_eq!(unique.len(), seen.len(), "a key was returned twice");
            assert_eq!(unique, expected);
        });
    }

    #[test]
    fn test_cluster_scan_returns_every_key_once(
        key_count in 0usize..120,
        shards in 1usize..5,
        page_size in 1usize..40
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = TestContext::cluster(shards, page_size);
            let expected: BTreeSet<String> = (0..key_count).map(|i| format!("k:{i}")).collect();
            for key in &expected {
                ctx.owner(key).seed_strings(0, [key.clone()]);
            }

            let seen = page_through(&ctx, "cluster").await;
            let unique: BTreeSet<String> = seen.iter().cloned().collect();
            assert_eq!(unique.len(), seen.len(), "a key was returned twice");
            assert_eq!(unique, expected);
        });
    }
}
