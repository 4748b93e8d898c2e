// src/core/client/observer.rs

//! The command observation hook: every command that passes through an observed
//! node is reported to a `CommandSink` with its cost.

use super::{Connector, Executor, NodeHandle};
use crate::core::KeydeckError;
use crate::core::history::CommandSink;
use crate::core::protocol::{Cmd, RespFrame};
use crate::core::session::ConnectionProfile;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Wraps a node and records each command after it completes, successful or not.
pub struct ObservedNode {
    inner: NodeHandle,
    server: String,
    sink: Arc<dyn CommandSink>,
}

impl ObservedNode {
    pub fn new(inner: NodeHandle, server: impl Into<String>, sink: Arc<dyn CommandSink>) -> Self {
        Self {
            inner,
            server: server.into(),
            sink,
        }
    }
}

#[async_trait]
impl Executor for ObservedNode {
    fn addr(&self) -> &str {
        self.inner.addr()
    }

    async fn execute(&self, cmd: Cmd) -> Result<RespFrame, KeydeckError> {
        let text = cmd.to_string();
        let start = Instant::now();
        let result = self.inner.execute(cmd).await;
        self.sink
            .record(&self.server, text, start.elapsed().as_millis() as i64);
        result
    }

    /// The batch's round trip is shared evenly among its commands, so the recorded
    /// costs add up to at most the time actually spent.
    async fn execute_batch(&self, cmds: Vec<Cmd>) -> Result<Vec<RespFrame>, KeydeckError> {
        let texts: Vec<String> = cmds.iter().map(ToString::to_string).collect();
        let start = Instant::now();
        let result = self.inner.execute_batch(cmds).await;
        let share = start.elapsed() / texts.len().max(1) as u32;
        let cost = share.as_millis() as i64;
        for text in texts {
            self.sink.record(&self.server, text, cost);
        }
        result
    }
}

/// A connector whose nodes are all observed on behalf of one named server.
pub struct ObservedConnector {
    inner: Arc<dyn Connector>,
    server: String,
    sink: Arc<dyn CommandSink>,
}

impl ObservedConnector {
    pub fn new(
        inner: Arc<dyn Connector>,
        server: impl Into<String>,
        sink: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            inner,
            server: server.into(),
            sink,
        }
    }
}

#[async_trait]
impl Connector for ObservedConnector {
    async fn connect(
        &self,
        addr: &str,
        profile: &ConnectionProfile,
    ) -> Result<NodeHandle, KeydeckError> {
        let node = self.inner.connect(addr, profile).await?;
        Ok(Arc::new(ObservedNode::new(
            node,
            self.server.clone(),
            Arc::clone(&self.sink),
        )))
    }
}
