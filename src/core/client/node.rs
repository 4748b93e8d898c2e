// src/core/client/node.rs

//! A single TCP connection to one server node.

use super::{Connector, Executor, NodeHandle};
use crate::core::KeydeckError;
use crate::core::protocol::{Cmd, RespFrame, RespFrameCodec};
use crate::core::session::ConnectionProfile;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// A client for one node. Commands are serialized over a single connection; a batch
/// is written in one flush and its replies read back in order under the same lock.
pub struct NodeClient {
    addr: String,
    conn: Mutex<Framed<TcpStream, RespFrameCodec>>,
    exec_timeout: Duration,
    /// Set once a reply was lost to a timeout or I/O error; the stream can no longer
    /// be matched to requests.
    broken: AtomicBool,
}

impl NodeClient {
    /// Dials `addr`, then authenticates if the profile carries credentials.
    pub async fn connect(addr: &str, profile: &ConnectionProfile) -> Result<Self, KeydeckError> {
        let stream = tokio::time::timeout(profile.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| KeydeckError::Connection(format!("timed out dialing {addr}")))?
            .map_err(|e| KeydeckError::Connection(format!("failed to dial {addr}: {e}")))?;
        stream.set_nodelay(true)?;

        let client = Self {
            addr: addr.to_string(),
            conn: Mutex::new(Framed::new(stream, RespFrameCodec)),
            exec_timeout: profile.exec_timeout,
            broken: AtomicBool::new(false),
        };

        if let Some(password) = &profile.password {
            let mut auth = Cmd::new("AUTH");
            if let Some(user) = &profile.username {
                auth = auth.arg(user.clone());
            }
            client
                .execute(auth.arg(password.clone()))
                .await?
                .into_ok()
                .map_err(|e| KeydeckError::Connection(format!("authentication failed: {e}")))?;
        }

        debug!("Connected to {}", addr);
        Ok(client)
    }

    async fn round_trip(&self, cmds: Vec<Cmd>) -> Result<Vec<RespFrame>, KeydeckError> {
        if self.broken.load(Ordering::Acquire) {
            return Err(KeydeckError::Connection(format!(
                "connection to {} is broken; reopen the session",
                self.addr
            )));
        }

        let mut conn = self.conn.lock().await;
        let count = cmds.len();
        let result = async {
            for cmd in cmds {
                SinkExt::<Cmd>::feed(&mut *conn, cmd).await?;
            }
            tokio::time::timeout(self.exec_timeout, SinkExt::<Cmd>::flush(&mut *conn))
                .await
                .map_err(|_| KeydeckError::Timeout(format!("writing to {}", self.addr)))??;

            let mut replies = Vec::with_capacity(count);
            for _ in 0..count {
                match tokio::time::timeout(self.exec_timeout, conn.next()).await {
                    Ok(Some(reply)) => replies.push(reply?),
                    Ok(None) => {
                        return Err(KeydeckError::Connection(format!(
                            "connection closed by {}",
                            self.addr
                        )));
                    }
                    Err(_) => {
                        return Err(KeydeckError::Timeout(format!(
                            "waiting for a reply from {}",
                            self.addr
                        )));
                    }
                }
            }
            Ok(replies)
        }
        .await;

        if result.is_err() {
            warn!("Marking connection to {} as broken", self.addr);
            self.broken.store(true, Ordering::Release);
        }
        result
    }
}

#[async_trait]
impl Executor for NodeClient {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn execute(&self, cmd: Cmd) -> Result<RespFrame, KeydeckError> {
        let mut replies = self.round_trip(vec![cmd]).await?;
        replies
            .pop()
            .ok_or_else(|| KeydeckError::Protocol("missing reply".to_string()))
    }

    async fn execute_batch(&self, cmds: Vec<Cmd>) -> Result<Vec<RespFrame>, KeydeckError> {
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        self.round_trip(cmds).await
    }
}

/// Dials real servers over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        addr: &str,
        profile: &ConnectionProfile,
    ) -> Result<NodeHandle, KeydeckError> {
        Ok(Arc::new(NodeClient::connect(addr, profile).await?))
    }
}
