// src/core/browser/mod.rs

//! The browser facade: every operation a front end drives, by server name and
//! database index.
//!
//! Each call resolves (or opens) the server's session through the `SessionStore`,
//! selects the database on standalone servers, and delegates to the scanner,
//! entry loader, summary or mutation modules.

pub mod entries;
pub mod mutation;
pub mod scanner;
pub mod summary;
pub mod types;

pub use entries::EntryRequest;
pub use mutation::{
    BulkDelete, DEFAULT_DELETE_BATCH, DeleteProgress, EditOutcome, FieldEdit, KeyValue,
};
pub use types::*;

use crate::config::Config;
use crate::core::KeydeckError;
use crate::core::client::Connector;
use crate::core::convert::{self, DecodeResult, EncodedBytes};
use crate::core::events::{BatchEmitter, EventSink};
use crate::core::history::{CmdHistoryItem, CommandHistory, SlowLogItem};
use crate::core::protocol::Cmd;
use crate::core::session::{DbSession, ProfileProvider, SessionSettings, SessionStore};
use bytes::Bytes;
use futures::future::try_join_all;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Parameters for replacing a key's whole value.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SetKeyParam {
    pub server: String,
    pub db: u32,
    pub key: EncodedBytes,
    #[serde(rename = "type")]
    pub key_type: String,
    pub value: serde_json::Value,
    /// Seconds; zero or negative leaves the key without expiry.
    #[serde(default)]
    pub ttl: i64,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub decode: String,
}

pub struct Browser {
    sessions: Arc<SessionStore>,
    history: Arc<CommandHistory>,
    events: Option<Arc<BatchEmitter>>,
    delete_batch_size: usize,
}

impl Browser {
    pub fn new(
        profiles: Arc<dyn ProfileProvider>,
        connector: Arc<dyn Connector>,
        settings: SessionSettings,
        history: Arc<CommandHistory>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(
            profiles,
            connector,
            history.clone(),
            settings,
        ));
        Self {
            sessions,
            history,
            events: None,
            delete_batch_size: DEFAULT_DELETE_BATCH,
        }
    }

    /// Builds a browser from the configuration file's settings and connections.
    ///
    /// With a `sink`, a `BatchEmitter` is started on the current runtime using the
    /// `[events]` flush interval and batch size.
    pub fn from_config(
        config: &Config,
        connector: Arc<dyn Connector>,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Self {
        let history = Arc::new(CommandHistory::new(config.history_limit));
        let browser = Self::new(
            Arc::new(config.profiles()),
            connector,
            config.session_settings(),
            history,
        )
        .with_delete_batch_size(config.delete_batch_size);
        match sink {
            Some(sink) => browser.with_events(Arc::new(BatchEmitter::spawn(
                sink,
                config.events.flush_interval,
                config.events.max_batch,
            ))),
            None => browser,
        }
    }

    /// Reports bulk delete progress on the `delete:{server}` channel.
    pub fn with_events(mut self, events: Arc<BatchEmitter>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_delete_batch_size(mut self, size: usize) -> Self {
        self.delete_batch_size = size.max(1);
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    async fn session(&self, server: &str, db: u32) -> Result<DbSession, KeydeckError> {
        self.sessions.get_session(server, i64::from(db)).await
    }

    /// Opens (or reuses) the session and lists the server's databases.
    pub async fn open_connection(&self, server: &str) -> Result<Vec<DatabaseItem>, KeydeckError> {
        let session = self.sessions.get_session(server, -1).await?;
        summary::list_databases(&session).await
    }

    pub fn close_connection(&self, server: &str) {
        self.sessions.close_session(server);
    }

    /// Selects `db`, restarts its key enumeration, and returns its key count.
    pub async fn open_database(&self, server: &str, db: u32) -> Result<i64, KeydeckError> {
        let session = self.session(server, db).await?;
        session.reset_key_cursor(db);
        summary::db_size(&session).await
    }

    /// Returns the next page of keys, resuming where the previous call stopped.
    pub async fn load_next_keys(
        &self,
        server: &str,
        db: u32,
        pattern: &str,
        key_type: &str,
    ) -> Result<KeysPage, KeydeckError> {
        let session = self.session(server, db).await?;
        let key_type = parse_type_filter(key_type)?;
        let cursor = session.key_cursor(db);
        let (keys, next) = scanner::scan_keys(
            &session,
            scan_pattern(pattern),
            key_type,
            &cursor,
            session.page_size(),
        )
        .await?;
        let end = next.is_zero();
        session.set_key_cursor(db, next);

        Ok(KeysPage {
            keys: keys.iter().map(|k| EncodedBytes::encode(k)).collect(),
            end,
            max_keys: summary::db_size(&session).await?,
        })
    }

    /// Returns every matching key. The stored key cursor is reset afterwards.
    pub async fn load_all_keys(
        &self,
        server: &str,
        db: u32,
        pattern: &str,
        key_type: &str,
    ) -> Result<KeysPage, KeydeckError> {
        let session = self.session(server, db).await?;
        let key_type = parse_type_filter(key_type)?;
        let result = scanner::scan_keys(
            &session,
            scan_pattern(pattern),
            key_type,
            &Default::default(),
            0,
        )
        .await;
        session.reset_key_cursor(db);
        let (keys, _) = result?;

        Ok(KeysPage {
            keys: keys.iter().map(|k| EncodedBytes::encode(k)).collect(),
            end: true,
            max_keys: summary::db_size(&session).await?,
        })
    }

    pub async fn get_key_summary(
        &self,
        server: &str,
        db: u32,
        key: &EncodedBytes,
    ) -> Result<KeySummary, KeydeckError> {
        let session = self.session(server, db).await?;
        summary::key_summary(&session, key.as_bytes()).await
    }

    pub async fn get_key_detail(&self, param: &KeyDetailParam) -> Result<KeyDetail, KeydeckError> {
        let decode = convert::parse_decode_hint(&param.decode)?;
        let format = convert::parse_format_hint(&param.format)?;
        let session = self.session(&param.server, param.db).await?;
        let req = EntryRequest {
            db: param.db,
            key: param.key.as_bytes(),
            pattern: &param.match_pattern,
            full: param.full,
            decode,
            format,
        };
        entries::load_entries(&session, &req).await
    }

    /// Runs a value through the conversion pipeline without touching any server.
    pub fn convert_value(
        &self,
        value: &EncodedBytes,
        decode: &str,
        format: &str,
    ) -> Result<DecodeResult, KeydeckError> {
        let decode = convert::parse_decode_hint(decode)?;
        let format = convert::parse_format_hint(format)?;
        Ok(convert::convert_to(value.as_bytes(), decode, format))
    }

    pub async fn set_key_value(&self, param: SetKeyParam) -> Result<(), KeydeckError> {
        let key_type = KeyType::from_str(&param.key_type).map_err(|_| {
            KeydeckError::Validation(format!("unknown key type '{}'", param.key_type))
        })?;
        let value = KeyValue::from_json(key_type, param.value)?;
        let codec = ValueCodec::from_hints(&param.format, &param.decode)?;
        let session = self.session(&param.server, param.db).await?;
        mutation::set_key_value(&session, param.key.as_bytes(), value, param.ttl, codec).await
    }

    /// Applies a change to one entry of a collection.
    pub async fn update_field(
        &self,
        server: &str,
        db: u32,
        key: &EncodedBytes,
        edit: FieldEdit,
        codec: ValueCodec,
    ) -> Result<EditOutcome, KeydeckError> {
        let session = self.session(server, db).await?;
        mutation::edit_field(&session, key.as_bytes(), edit, codec).await
    }

    pub async fn set_key_ttl(
        &self,
        server: &str,
        db: u32,
        key: &EncodedBytes,
        ttl: i64,
    ) -> Result<(), KeydeckError> {
        let session = self.session(server, db).await?;
        mutation::set_key_ttl(&session, key.as_bytes(), ttl).await
    }

    pub async fn rename_key(
        &self,
        server: &str,
        db: u32,
        key: &EncodedBytes,
        new_key: &EncodedBytes,
    ) -> Result<(), KeydeckError> {
        let session = self.session(server, db).await?;
        mutation::rename_key(&session, key.as_bytes(), new_key.as_bytes()).await
    }

    /// Deletes a key, or every matching key if it ends with `*`.
    pub async fn delete_key(
        &self,
        server: &str,
        db: u32,
        key: &EncodedBytes,
        async_mode: bool,
    ) -> Result<DeleteResult, KeydeckError> {
        let session = self.session(server, db).await?;
        let progress = self.delete_progress(server);
        let mut bulk = BulkDelete::new(async_mode, self.delete_batch_size);
        if let Some(progress) = &progress {
            bulk = bulk.with_progress(progress);
        }
        mutation::delete_key(&session, key.as_bytes(), &bulk).await
    }

    pub async fn delete_keys(
        &self,
        server: &str,
        db: u32,
        keys: &[EncodedBytes],
        async_mode: bool,
    ) -> Result<DeleteResult, KeydeckError> {
        let session = self.session(server, db).await?;
        let progress = self.delete_progress(server);
        let mut bulk = BulkDelete::new(async_mode, self.delete_batch_size);
        if let Some(progress) = &progress {
            bulk = bulk.with_progress(progress);
        }
        mutation::delete_keys(&session, keys, &bulk).await
    }

    fn delete_progress(&self, server: &str) -> Option<impl Fn(&[Bytes]) + Send + Sync> {
        let events = self.events.clone()?;
        let channel = format!("delete:{server}");
        Some(move |keys: &[Bytes]| {
            let keys: Vec<EncodedBytes> = keys.iter().map(|k| EncodedBytes::encode(k)).collect();
            events.emit(&channel, json!({ "deleted": keys, "count": keys.len() }));
        })
    }

    /// Removes every key of `db`, resetting its cursors.
    pub async fn flush_db(&self, server: &str, db: u32, async_mode: bool) -> Result<(), KeydeckError> {
        let session = self.session(server, db).await?;
        mutation::flush_db(&session, async_mode).await?;
        session.reset_key_cursor(db);
        session.reset_entry_cursor(db);
        info!("Flushed db {} on '{}'", db, server);
        Ok(())
    }

    /// Returns the newest `count` slow log entries, across every master.
    pub async fn get_slow_logs(
        &self,
        server: &str,
        count: usize,
    ) -> Result<Vec<SlowLogItem>, KeydeckError> {
        let session = self.sessions.get_session(server, -1).await?;
        let per_node = try_join_all(session.client().masters().iter().map(|node| {
            let session = &session;
            async move {
                session
                    .execute_on(node, Cmd::new("SLOWLOG").arg("GET").arg_uint(count as u64))
                    .await?
                    .into_array()?
                    .into_iter()
                    .map(SlowLogItem::from_frame)
                    .collect::<Result<Vec<_>, _>>()
            }
        }))
        .await?;

        let mut items: Vec<SlowLogItem> = per_node.into_iter().flatten().collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items.truncate(count);
        Ok(items)
    }

    /// One page of the command history, newest first.
    pub fn get_cmd_history(&self, page_no: usize, page_size: usize) -> Vec<CmdHistoryItem> {
        self.history.page(page_no, page_size)
    }

    pub fn clean_cmd_history(&self) {
        self.history.clear();
    }

    /// Closes every session and flushes pending events.
    pub async fn shutdown(&self) {
        self.sessions.close_all();
        if let Some(events) = &self.events {
            events.close().await;
        }
    }
}

fn scan_pattern(pattern: &str) -> &str {
    if pattern.is_empty() { "*" } else { pattern }
}

fn parse_type_filter(key_type: &str) -> Result<Option<KeyType>, KeydeckError> {
    if key_type.is_empty() {
        return Ok(None);
    }
    KeyType::from_str(key_type)
        .map(Some)
        .map_err(|_| KeydeckError::Validation(format!("unknown key type '{key_type}'")))
}
