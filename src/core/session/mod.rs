// src/core/session/mod.rs

//! The connection session store: one long-lived client per named server, with
//! the cursors that make key and entry loading resumable.

pub mod cursor;
pub mod profile;

pub use cursor::{EntryCursor, EntryPosition, ScanCursor};
pub use profile::{ConnectionProfile, ProfileProvider, StaticProfiles};

use crate::core::KeydeckError;
use crate::core::client::{Client, Connector, NodeHandle, ObservedConnector, Topology};
use crate::core::history::CommandSink;
use crate::core::protocol::{Cmd, RespFrame};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session-wide sizing knobs taken from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Default page size when the profile does not set one.
    pub load_size: usize,
    /// `COUNT` hint sent with every scan-family command.
    pub scan_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            load_size: 10_000,
            scan_size: 3_000,
        }
    }
}

/// One live handle to a named server.
pub struct ConnectionSession {
    name: String,
    client: Client,
    cancel: CancellationToken,
    page_size: usize,
    scan_size: usize,
    key_cursors: Mutex<HashMap<u32, ScanCursor>>,
    entry_cursors: Mutex<HashMap<u32, EntryCursor>>,
    /// Held from `SELECT` until the db-scoped operation completes.
    db_lock: Arc<AsyncMutex<()>>,
}

impl ConnectionSession {
    pub fn new(name: impl Into<String>, client: Client, page_size: usize, scan_size: usize) -> Self {
        Self {
            name: name.into(),
            client,
            cancel: CancellationToken::new(),
            page_size: page_size.max(1),
            scan_size: scan_size.max(1),
            key_cursors: Mutex::new(HashMap::new()),
            entry_cursors: Mutex::new(HashMap::new()),
            db_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn topology(&self) -> Topology {
        self.client.topology()
    }

    pub fn is_cluster(&self) -> bool {
        self.client.is_cluster()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn scan_size(&self) -> usize {
        self.scan_size
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sends a key-addressed command to the node that owns its key.
    pub async fn execute(&self, cmd: Cmd) -> Result<RespFrame, KeydeckError> {
        let node = self.client.route(&cmd)?;
        self.execute_on(node, cmd).await
    }

    /// Sends a command whose key is not its first argument to the node owning `key`.
    pub async fn execute_for(&self, key: &[u8], cmd: Cmd) -> Result<RespFrame, KeydeckError> {
        let node = self.client.node_for_key(key)?;
        self.execute_on(node, cmd).await
    }

    /// Sends a command to a specific node, aborting if the session is closed.
    pub async fn execute_on(&self, node: &NodeHandle, cmd: Cmd) -> Result<RespFrame, KeydeckError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(KeydeckError::Cancelled(self.name.clone())),
            reply = node.execute(cmd) => reply,
        }
    }

    /// Sends a batch of commands to a specific node, aborting if the session is closed.
    pub async fn execute_batch_on(
        &self,
        node: &NodeHandle,
        cmds: Vec<Cmd>,
    ) -> Result<Vec<RespFrame>, KeydeckError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(KeydeckError::Cancelled(self.name.clone())),
            replies = node.execute_batch(cmds) => replies,
        }
    }

    /// Runs `commands` on the node owning `key` inside `MULTI`/`EXEC`, failing with
    /// the first error reply.
    pub async fn transaction(&self, key: &[u8], commands: Vec<Cmd>) -> Result<(), KeydeckError> {
        let node = self.client.node_for_key(key)?;
        let mut batch = Vec::with_capacity(commands.len() + 2);
        batch.push(Cmd::new("MULTI"));
        batch.extend(commands);
        batch.push(Cmd::new("EXEC"));

        let mut replies = self.execute_batch_on(node, batch).await?;
        let exec = replies
            .pop()
            .ok_or_else(|| KeydeckError::Protocol("missing EXEC reply".to_string()))?;
        for reply in replies {
            reply.into_result()?;
        }
        for reply in exec.into_array()? {
            reply.into_result()?;
        }
        Ok(())
    }

    /// Selects `db` and returns a handle that keeps it selected until dropped.
    ///
    /// On a standalone server the handle owns the session's database lock, so
    /// callers working in other databases wait for it. Clusters have one implicit
    /// database and are never locked.
    pub async fn select(self: &Arc<Self>, db: u32) -> Result<DbSession, KeydeckError> {
        if self.is_cluster() {
            return Ok(DbSession {
                session: Arc::clone(self),
                _db_guard: None,
            });
        }
        let guard = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(KeydeckError::Cancelled(self.name.clone())),
            guard = Arc::clone(&self.db_lock).lock_owned() => guard,
        };
        let node = self.client.route(&Cmd::new("SELECT"))?;
        self.execute_on(node, Cmd::new("SELECT").arg_uint(db as u64))
            .await?
            .into_ok()?;
        Ok(DbSession {
            session: Arc::clone(self),
            _db_guard: Some(guard),
        })
    }

    pub fn key_cursor(&self, db: u32) -> ScanCursor {
        self.key_cursors.lock().get(&db).cloned().unwrap_or_default()
    }

    pub fn set_key_cursor(&self, db: u32, cursor: ScanCursor) {
        let mut cursors = self.key_cursors.lock();
        if cursor.is_zero() {
            cursors.remove(&db);
        } else {
            cursors.insert(db, cursor);
        }
    }

    pub fn reset_key_cursor(&self, db: u32) {
        self.key_cursors.lock().remove(&db);
    }

    /// Returns where paging through `key` (filtered by `pattern`) should resume. A
    /// cached cursor for another key or pattern is discarded and paging starts over.
    pub fn entry_position(&self, db: u32, key: &[u8], pattern: &str) -> EntryPosition {
        let mut cursors = self.entry_cursors.lock();
        match cursors.get(&db) {
            Some(cached) if cached.matches(key, pattern) => cached.position.clone(),
            Some(cached) => {
                debug!(
                    "Discarding stale entry cursor for key '{}' in db {}",
                    String::from_utf8_lossy(&cached.key),
                    db
                );
                cursors.remove(&db);
                EntryPosition::default()
            }
            None => EntryPosition::default(),
        }
    }

    pub fn set_entry_position(&self, db: u32, key: &[u8], pattern: &str, position: EntryPosition) {
        self.entry_cursors.lock().insert(
            db,
            EntryCursor {
                db,
                key: Bytes::copy_from_slice(key),
                pattern: pattern.to_string(),
                position,
            },
        );
    }

    pub fn reset_entry_cursor(&self, db: u32) {
        self.entry_cursors.lock().remove(&db);
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

/// A session handed out for one operation. Dereferences to the session; a
/// standalone server's selected database cannot change while it is alive.
pub struct DbSession {
    session: Arc<ConnectionSession>,
    _db_guard: Option<OwnedMutexGuard<()>>,
}

impl DbSession {
    fn unscoped(session: Arc<ConnectionSession>) -> Self {
        Self {
            session,
            _db_guard: None,
        }
    }
}

impl Deref for DbSession {
    type Target = ConnectionSession;

    fn deref(&self) -> &ConnectionSession {
        &self.session
    }
}

/// Owns every open session. Sessions are created lazily on first use of a server
/// name and live until closed.
pub struct SessionStore {
    sessions: DashMap<String, Arc<ConnectionSession>>,
    profiles: Arc<dyn ProfileProvider>,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn CommandSink>,
    settings: SessionSettings,
    /// Serializes session creation so two callers never dial the same server twice.
    open_lock: tokio::sync::Mutex<()>,
}

impl SessionStore {
    pub fn new(
        profiles: Arc<dyn ProfileProvider>,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn CommandSink>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            profiles,
            connector,
            sink,
            settings,
            open_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the session for `name`, opening it if needed. A non-negative `db`
    /// is selected on standalone servers and stays selected for the lifetime of the
    /// returned handle; a negative `db` is for database-independent commands.
    pub async fn get_session(&self, name: &str, db: i64) -> Result<DbSession, KeydeckError> {
        let existing = self.sessions.get(name).map(|s| Arc::clone(s.value()));
        let session = match existing {
            Some(session) => session,
            None => self.open(name).await?,
        };
        if db < 0 {
            return Ok(DbSession::unscoped(session));
        }
        let db = u32::try_from(db)
            .map_err(|_| KeydeckError::Validation(format!("invalid database index {db}")))?;
        session.select(db).await
    }

    async fn open(&self, name: &str) -> Result<Arc<ConnectionSession>, KeydeckError> {
        let _guard = self.open_lock.lock().await;
        if let Some(session) = self.sessions.get(name) {
            return Ok(Arc::clone(session.value()));
        }

        let profile = self.profiles.resolve(name)?;
        let connector = ObservedConnector::new(
            Arc::clone(&self.connector),
            name,
            Arc::clone(&self.sink),
        );
        let client = Client::connect(&connector, &profile)
            .await
            .map_err(|e| match e {
                KeydeckError::Connection(_) => e,
                other => KeydeckError::Connection(other.to_string()),
            })?;

        for node in client.masters() {
            let ping = node
                .execute(Cmd::new("PING"))
                .await
                .and_then(RespFrame::into_result);
            if let Err(e) = ping {
                warn!("Liveness check to {} failed: {}", node.addr(), e);
                return Err(KeydeckError::Connection(format!(
                    "liveness check to {} failed: {e}",
                    node.addr()
                )));
            }
        }

        let page_size = profile.load_size.unwrap_or(self.settings.load_size);
        let session = Arc::new(ConnectionSession::new(
            name,
            client,
            page_size,
            self.settings.scan_size,
        ));
        self.sessions.insert(name.to_string(), Arc::clone(&session));
        info!(
            "Opened {} session '{}' (page size {})",
            session.topology(),
            name,
            page_size
        );
        Ok(session)
    }

    /// Closes a session, aborting its in-flight commands. Unknown names are a no-op.
    pub fn close_session(&self, name: &str) {
        if let Some((_, session)) = self.sessions.remove(name) {
            session.close();
            info!("Closed session '{}'", name);
        }
    }

    /// Closes every session, for process shutdown.
    pub fn close_all(&self) {
        let names: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for name in names {
            self.close_session(&name);
        }
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }
}
