// src/core/browser/mutation.rs

//! Write, edit, expire, rename, delete and flush operations.

use super::types::{DeleteResult, KeyType, ValueCodec};
use crate::core::KeydeckError;
use crate::core::client::NodeHandle;
use crate::core::convert::EncodedBytes;
use crate::core::protocol::{Cmd, RespFrame};
use crate::core::session::ConnectionSession;
use bytes::Bytes;
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Written over a list element before it is removed, since lists can only be
/// trimmed by value.
const LIST_TOMBSTONE: &str = "---VALUE_REMOVED_BY_KEYDECK---";

/// The default number of keys removed per delete command.
pub const DEFAULT_DELETE_BATCH: usize = 20;

/// A whole-key value, by type.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    String(String),
    List(Vec<String>),
    Hash(Vec<(String, String)>),
    Set(Vec<String>),
    ZSet(Vec<(String, f64)>),
    /// `(id, field/value pairs)`; an id of `*` lets the server choose.
    Stream(Vec<(String, Vec<(String, String)>)>),
}

impl KeyValue {
    /// Validates a loosely typed payload against the declared key type.
    ///
    /// Accepted shapes: a string for strings; an array of strings for lists and
    /// sets; an object of strings for hashes; an object of numbers for sorted sets;
    /// an array of `{"id": .., "value": {..}}` objects for streams.
    pub fn from_json(key_type: KeyType, value: Value) -> Result<Self, KeydeckError> {
        let mismatch = || {
            KeydeckError::Validation(format!("value does not have the shape of a {key_type}"))
        };
        match (key_type, value) {
            (KeyType::String, Value::String(s)) => Ok(KeyValue::String(s)),
            (KeyType::String, Value::Number(n)) => Ok(KeyValue::String(n.to_string())),
            (KeyType::List | KeyType::Set, Value::Array(items)) => {
                let items = items
                    .into_iter()
                    .map(|v| match v {
                        Value::String(s) => Ok(s),
                        _ => Err(mismatch()),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if key_type == KeyType::List {
                    KeyValue::List(items)
                } else {
                    KeyValue::Set(items)
                })
            }
            (KeyType::Hash, Value::Object(map)) => map
                .into_iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k, s)),
                    _ => Err(mismatch()),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(KeyValue::Hash),
            (KeyType::ZSet, Value::Object(map)) => map
                .into_iter()
                .map(|(k, v)| v.as_f64().map(|score| (k, score)).ok_or_else(mismatch))
                .collect::<Result<Vec<_>, _>>()
                .map(KeyValue::ZSet),
            (KeyType::Stream, Value::Array(items)) => {
                let mut entries = Vec::with_capacity(items.len());
                for item in items {
                    let Value::Object(mut entry) = item else {
                        return Err(mismatch());
                    };
                    let id = match entry.remove("id") {
                        Some(Value::String(id)) => id,
                        None => "*".to_string(),
                        Some(_) => return Err(mismatch()),
                    };
                    let Some(Value::Object(fields)) = entry.remove("value") else {
                        return Err(mismatch());
                    };
                    let fields = fields
                        .into_iter()
                        .map(|(k, v)| match v {
                            Value::String(s) => Ok((k, s)),
                            _ => Err(mismatch()),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    if fields.is_empty() {
                        return Err(mismatch());
                    }
                    entries.push((id, fields));
                }
                Ok(KeyValue::Stream(entries))
            }
            _ => Err(mismatch()),
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            KeyValue::String(_) => KeyType::String,
            KeyValue::List(_) => KeyType::List,
            KeyValue::Hash(_) => KeyType::Hash,
            KeyValue::Set(_) => KeyType::Set,
            KeyValue::ZSet(_) => KeyType::ZSet,
            KeyValue::Stream(_) => KeyType::Stream,
        }
    }
}

/// Replaces the whole value of `key`, optionally setting a TTL in seconds, in one
/// transaction. Collection values are rewritten from scratch.
pub async fn set_key_value(
    session: &ConnectionSession,
    key: &[u8],
    value: KeyValue,
    ttl: i64,
    codec: ValueCodec,
) -> Result<(), KeydeckError> {
    let mut cmds = Vec::new();
    let key = Bytes::copy_from_slice(key);
    match value {
        KeyValue::String(s) => {
            cmds.push(Cmd::new("SET").arg(key.clone()).arg(codec.save(&s)?));
        }
        KeyValue::List(items) => {
            cmds.push(Cmd::new("DEL").arg(key.clone()));
            if !items.is_empty() {
                let mut push = Cmd::new("RPUSH").arg(key.clone());
                for item in items {
                    push = push.arg(codec.save(&item)?);
                }
                cmds.push(push);
            }
        }
        KeyValue::Hash(fields) => {
            cmds.push(Cmd::new("DEL").arg(key.clone()));
            if !fields.is_empty() {
                let mut hset = Cmd::new("HSET").arg(key.clone());
                for (field, value) in fields {
                    hset = hset.arg(field).arg(codec.save(&value)?);
                }
                cmds.push(hset);
            }
        }
        KeyValue::Set(members) => {
            cmds.push(Cmd::new("DEL").arg(key.clone()));
            if !members.is_empty() {
                let mut sadd = Cmd::new("SADD").arg(key.clone());
                for member in members {
                    sadd = sadd.arg(codec.save(&member)?);
                }
                cmds.push(sadd);
            }
        }
        KeyValue::ZSet(members) => {
            cmds.push(Cmd::new("DEL").arg(key.clone()));
            if !members.is_empty() {
                let mut zadd = Cmd::new("ZADD").arg(key.clone());
                for (member, score) in members {
                    zadd = zadd.arg_float(score).arg(codec.save(&member)?);
                }
                cmds.push(zadd);
            }
        }
        KeyValue::Stream(entries) => {
            cmds.push(Cmd::new("DEL").arg(key.clone()));
            for (id, fields) in entries {
                let mut xadd = Cmd::new("XADD").arg(key.clone()).arg(id);
                for (field, value) in fields {
                    xadd = xadd.arg(field).arg(value);
                }
                cmds.push(xadd);
            }
        }
    }
    if ttl > 0 {
        cmds.push(Cmd::new("EXPIRE").arg(key.clone()).arg_int(ttl));
    }
    session.transaction(&key, cmds).await
}

/// A change to one entry of a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEdit {
    /// Adds (`field` empty), removes (`new_field` empty), replaces or renames a
    /// hash field.
    Hash {
        field: EncodedBytes,
        new_field: EncodedBytes,
        value: String,
    },
    /// Sets the element at `index`, or removes it when `value` is `None`.
    ListItem { index: i64, value: Option<String> },
    /// Adds or removes set members as stored.
    SetMembers {
        remove: bool,
        members: Vec<EncodedBytes>,
    },
    /// Replaces one set member with another.
    SetMember {
        value: EncodedBytes,
        new_value: String,
    },
    /// Adds (`value` empty), removes (`new_value` empty), rescores or replaces a
    /// sorted-set member.
    ZSetMember {
        value: EncodedBytes,
        new_value: String,
        score: f64,
    },
    StreamAdd {
        id: String,
        fields: Vec<(String, String)>,
    },
    StreamRemove { ids: Vec<String> },
}

/// What a field edit did: the count the server reported and, for stream adds, the
/// new entry id.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct EditOutcome {
    pub affected: i64,
    pub id: Option<String>,
}

impl EditOutcome {
    fn count(affected: i64) -> Self {
        Self { affected, id: None }
    }
}

pub async fn edit_field(
    session: &ConnectionSession,
    key: &[u8],
    edit: FieldEdit,
    codec: ValueCodec,
) -> Result<EditOutcome, KeydeckError> {
    let key = Bytes::copy_from_slice(key);
    match edit {
        FieldEdit::Hash {
            field,
            new_field,
            value,
        } => {
            let (field, new_field) = (field.to_bytes(), new_field.to_bytes());
            if new_field.is_empty() {
                let removed = session
                    .execute(Cmd::new("HDEL").arg(key).arg(field))
                    .await?
                    .into_int()?;
                return Ok(EditOutcome::count(removed));
            }
            let hset = Cmd::new("HSET")
                .arg(key.clone())
                .arg(new_field.clone())
                .arg(codec.save(&value)?);
            if field.is_empty() || field == new_field {
                let added = session.execute(hset).await?.into_int()?;
                return Ok(EditOutcome::count(added));
            }
            session
                .transaction(&key, vec![Cmd::new("HDEL").arg(key.clone()).arg(field), hset])
                .await?;
            Ok(EditOutcome::count(1))
        }
        FieldEdit::ListItem { index, value } => match value {
            Some(value) => {
                session
                    .execute(
                        Cmd::new("LSET")
                            .arg(key)
                            .arg_int(index)
                            .arg(codec.save(&value)?),
                    )
                    .await?
                    .into_ok()?;
                Ok(EditOutcome::count(1))
            }
            None => {
                session
                    .transaction(
                        &key,
                        vec![
                            Cmd::new("LSET")
                                .arg(key.clone())
                                .arg_int(index)
                                .arg(LIST_TOMBSTONE),
                            Cmd::new("LREM").arg(key.clone()).arg_int(1).arg(LIST_TOMBSTONE),
                        ],
                    )
                    .await?;
                Ok(EditOutcome::count(1))
            }
        },
        FieldEdit::SetMembers { remove, members } => {
            if members.is_empty() {
                return Ok(EditOutcome::default());
            }
            let mut cmd = Cmd::new(if remove { "SREM" } else { "SADD" }).arg(key);
            for member in &members {
                cmd = cmd.arg(member.to_bytes());
            }
            let affected = session.execute(cmd).await?.into_int()?;
            Ok(EditOutcome::count(affected))
        }
        FieldEdit::SetMember { value, new_value } => {
            session
                .transaction(
                    &key,
                    vec![
                        Cmd::new("SREM").arg(key.clone()).arg(value.to_bytes()),
                        Cmd::new("SADD")
                            .arg(key.clone())
                            .arg(codec.save(&new_value)?),
                    ],
                )
                .await?;
            Ok(EditOutcome::count(1))
        }
        FieldEdit::ZSetMember {
            value,
            new_value,
            score,
        } => {
            let old = value.to_bytes();
            if new_value.is_empty() {
                let removed = session
                    .execute(Cmd::new("ZREM").arg(key).arg(old))
                    .await?
                    .into_int()?;
                return Ok(EditOutcome::count(removed));
            }
            let new = Bytes::from(codec.save(&new_value)?);
            let zadd = Cmd::new("ZADD")
                .arg(key.clone())
                .arg_float(score)
                .arg(new.clone());
            if old.is_empty() || old == new {
                let added = session.execute(zadd).await?.into_int()?;
                return Ok(EditOutcome::count(added));
            }
            session
                .transaction(&key, vec![Cmd::new("ZREM").arg(key.clone()).arg(old), zadd])
                .await?;
            Ok(EditOutcome::count(1))
        }
        FieldEdit::StreamAdd { id, fields } => {
            if fields.is_empty() {
                return Err(KeydeckError::Validation(
                    "a stream entry needs at least one field".to_string(),
                ));
            }
            let id = if id.is_empty() { "*".to_string() } else { id };
            let mut xadd = Cmd::new("XADD").arg(key).arg(id);
            for (field, value) in fields {
                xadd = xadd.arg(field).arg(value);
            }
            let id = session.execute(xadd).await?.into_text()?;
            Ok(EditOutcome {
                affected: 1,
                id: Some(id),
            })
        }
        FieldEdit::StreamRemove { ids } => {
            if ids.is_empty() {
                return Ok(EditOutcome::default());
            }
            let mut xdel = Cmd::new("XDEL").arg(key);
            for id in ids {
                xdel = xdel.arg(id);
            }
            let removed = session.execute(xdel).await?.into_int()?;
            Ok(EditOutcome::count(removed))
        }
    }
}

/// Sets a TTL in seconds; a negative TTL removes the expiry.
pub async fn set_key_ttl(
    session: &ConnectionSession,
    key: &[u8],
    ttl: i64,
) -> Result<(), KeydeckError> {
    if ttl < 0 {
        session
            .execute(Cmd::new("PERSIST").arg_slice(key))
            .await?
            .into_int()?;
        return Ok(());
    }
    if ttl == 0 {
        return Err(KeydeckError::Validation(
            "TTL must be positive, or negative to persist".to_string(),
        ));
    }
    let applied = session
        .execute(Cmd::new("EXPIRE").arg_slice(key).arg_int(ttl))
        .await?
        .into_int()?;
    if applied == 0 {
        return Err(KeydeckError::NotFound(format!(
            "key '{}' does not exist",
            String::from_utf8_lossy(key)
        )));
    }
    Ok(())
}

pub async fn rename_key(
    session: &ConnectionSession,
    key: &[u8],
    new_key: &[u8],
) -> Result<(), KeydeckError> {
    if session.is_cluster() {
        return Err(KeydeckError::Unsupported(
            "renaming keys is not supported in cluster mode".to_string(),
        ));
    }
    session
        .execute(Cmd::new("RENAME").arg_slice(key).arg_slice(new_key))
        .await?
        .into_ok()
}

/// Reports each batch of deleted keys as it completes.
pub type DeleteProgress<'a> = &'a (dyn Fn(&[Bytes]) + Send + Sync);

/// Per-operation delete settings. `use_async` starts true when non-blocking
/// deletion was requested and drops to false, for the rest of the operation, the
/// first time the server rejects it.
pub struct BulkDelete<'a> {
    pub batch_size: usize,
    use_async: AtomicBool,
    progress: Option<DeleteProgress<'a>>,
}

impl<'a> BulkDelete<'a> {
    pub fn new(async_mode: bool, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            use_async: AtomicBool::new(async_mode),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: DeleteProgress<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_async(&self) -> bool {
        self.use_async.load(Ordering::Acquire)
    }

    /// Deletes `keys`, which must all live on `node`.
    async fn delete_batch(
        &self,
        session: &ConnectionSession,
        node: &NodeHandle,
        keys: &[Bytes],
    ) -> Result<(), KeydeckError> {
        if keys.is_empty() {
            return Ok(());
        }
        if self.is_async() {
            match self.run_delete(session, node, "UNLINK", keys).await {
                Ok(()) => {
                    self.report(keys);
                    return Ok(());
                }
                Err(KeydeckError::Server(msg)) => {
                    warn!("UNLINK rejected ({msg}), falling back to DEL");
                    self.use_async.store(false, Ordering::Release);
                }
                Err(e) => return Err(e),
            }
        }
        self.run_delete(session, node, "DEL", keys).await?;
        self.report(keys);
        Ok(())
    }

    /// One multi-key command on a standalone server. A cluster node rejects
    /// multi-key commands across slots, so there each key gets its own command,
    /// pipelined.
    async fn run_delete(
        &self,
        session: &ConnectionSession,
        node: &NodeHandle,
        command: &'static str,
        keys: &[Bytes],
    ) -> Result<(), KeydeckError> {
        if session.is_cluster() {
            let cmds = keys
                .iter()
                .map(|k| Cmd::new(command).arg(k.clone()))
                .collect();
            for reply in session.execute_batch_on(node, cmds).await? {
                reply.into_int()?;
            }
        } else {
            let mut cmd = Cmd::new(command);
            for key in keys {
                cmd = cmd.arg(key.clone());
            }
            session.execute_on(node, cmd).await?.into_int()?;
        }
        Ok(())
    }

    fn report(&self, keys: &[Bytes]) {
        if let Some(progress) = self.progress {
            progress(keys);
        }
    }
}

/// Deletes one key, or every key matching it when it ends with `*`.
pub async fn delete_key(
    session: &ConnectionSession,
    key: &[u8],
    bulk: &BulkDelete<'_>,
) -> Result<DeleteResult, KeydeckError> {
    if key.ends_with(b"*") {
        return delete_by_pattern(session, key, bulk).await;
    }
    let key = Bytes::copy_from_slice(key);
    let node = session.client().node_for_key(&key)?;
    bulk.delete_batch(session, node, std::slice::from_ref(&key))
        .await?;
    Ok(DeleteResult {
        deleted: vec![EncodedBytes::encode(&key)],
        deleted_count: 1,
    })
}

/// Scans every shard for keys matching `pattern` and deletes them in batches.
async fn delete_by_pattern(
    session: &ConnectionSession,
    pattern: &[u8],
    bulk: &BulkDelete<'_>,
) -> Result<DeleteResult, KeydeckError> {
    let deleted: Mutex<Vec<Bytes>> = Mutex::new(Vec::new());
    let shards = session.client().masters().iter().map(|node| {
        let deleted = &deleted;
        async move {
            let mut cursor = 0;
            loop {
                let page = session
                    .execute_on(
                        node,
                        Cmd::new("SCAN")
                            .arg_uint(cursor)
                            .arg("MATCH")
                            .arg_slice(pattern)
                            .arg("COUNT")
                            .arg_uint(session.scan_size() as u64),
                    )
                    .await?
                    .into_scan_page()?;
                for batch in page.items.chunks(bulk.batch_size) {
                    bulk.delete_batch(session, node, batch).await?;
                    deleted.lock().extend_from_slice(batch);
                }
                cursor = page.cursor;
                if cursor == 0 {
                    break;
                }
            }
            Ok::<_, KeydeckError>(())
        }
    });
    try_join_all(shards).await?;

    let deleted = deleted.into_inner();
    info!(
        "Deleted {} keys matching '{}'",
        deleted.len(),
        String::from_utf8_lossy(pattern)
    );
    Ok(DeleteResult {
        deleted_count: deleted.len(),
        deleted: deleted.iter().map(|k| EncodedBytes::encode(k)).collect(),
    })
}

/// Deletes an explicit list of keys in batches, grouped by owning node.
pub async fn delete_keys(
    session: &ConnectionSession,
    keys: &[EncodedBytes],
    bulk: &BulkDelete<'_>,
) -> Result<DeleteResult, KeydeckError> {
    let mut groups: Vec<(&NodeHandle, Vec<Bytes>)> = Vec::new();
    for key in keys {
        let key = key.to_bytes();
        let node = session.client().node_for_key(&key)?;
        match groups.iter().position(|(n, _)| n.addr() == node.addr()) {
            Some(i) => groups[i].1.push(key),
            None => groups.push((node, vec![key])),
        }
    }

    let deleted: Mutex<Vec<Bytes>> = Mutex::new(Vec::new());
    let shards = groups.iter().map(|(node, group)| {
        let deleted = &deleted;
        async move {
            for batch in group.chunks(bulk.batch_size) {
                bulk.delete_batch(session, node, batch).await?;
                deleted.lock().extend_from_slice(batch);
            }
            Ok::<_, KeydeckError>(())
        }
    });
    try_join_all(shards).await?;

    let deleted = deleted.into_inner();
    debug!("Deleted {} of {} requested keys", deleted.len(), keys.len());
    Ok(DeleteResult {
        deleted_count: deleted.len(),
        deleted: deleted.iter().map(|k| EncodedBytes::encode(k)).collect(),
    })
}

/// Flushes the selected database on every master. If the non-blocking flush fails
/// anywhere, the whole flush is repeated with the blocking form.
pub async fn flush_db(session: &ConnectionSession, async_mode: bool) -> Result<(), KeydeckError> {
    let flush_all = |async_mode: bool| {
        try_join_all(session.client().masters().iter().map(move |node| async move {
            let mut cmd = Cmd::new("FLUSHDB");
            if async_mode {
                cmd = cmd.arg("ASYNC");
            }
            session.execute_on(node, cmd).await.and_then(RespFrame::into_ok)
        }))
    };

    if async_mode {
        match flush_all(true).await {
            Ok(_) => return Ok(()),
            Err(e) => warn!("FLUSHDB ASYNC failed ({e}), retrying synchronously"),
        }
    }
    flush_all(false).await?;
    Ok(())
}
