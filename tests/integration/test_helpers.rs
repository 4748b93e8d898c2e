// tests/integration/test_helpers.rs

//! Test helpers: a connector over fake nodes, and a ready-made browser.

use super::fake_server::FakeNode;
use async_trait::async_trait;
use keydeck::Browser;
use keydeck::core::KeydeckError;
use keydeck::core::protocol::{Cmd, RespFrame};
use keydeck::core::client::{Connector, Executor, NodeHandle};
use keydeck::core::history::CommandHistory;
use keydeck::core::session::{ConnectionProfile, SessionSettings, StaticProfiles};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Hands out fake nodes by address; unknown addresses fail to dial.
#[derive(Default)]
pub struct FakeConnector {
    nodes: Mutex<HashMap<String, Arc<FakeNode>>>,
    dials: Mutex<usize>,
    yielding: Mutex<bool>,
}

impl FakeConnector {
    pub fn add(&self, node: Arc<FakeNode>) {
        self.nodes.lock().insert(node.addr().to_string(), node);
    }

    pub fn dials(&self) -> usize {
        *self.dials.lock()
    }

    /// Nodes dialed from now on yield to the scheduler before every command, so
    /// concurrent callers interleave as they would over a real network.
    pub fn yield_before_commands(&self) {
        *self.yielding.lock() = true;
    }
}

struct YieldingNode(Arc<FakeNode>);

#[async_trait]
impl Executor for YieldingNode {
    fn addr(&self) -> &str {
        self.0.addr()
    }

    async fn execute(&self, cmd: Cmd) -> Result<RespFrame, KeydeckError> {
        tokio::task::yield_now().await;
        self.0.execute(cmd).await
    }

    async fn execute_batch(&self, cmds: Vec<Cmd>) -> Result<Vec<RespFrame>, KeydeckError> {
        tokio::task::yield_now().await;
        self.0.execute_batch(cmds).await
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        addr: &str,
        _profile: &ConnectionProfile,
    ) -> Result<NodeHandle, KeydeckError> {
        *self.dials.lock() += 1;
        let node = self
            .nodes
            .lock()
            .get(addr)
            .cloned()
            .ok_or_else(|| KeydeckError::Connection(format!("connection refused: {addr}")))?;
        if *self.yielding.lock() {
            return Ok(Arc::new(YieldingNode(node)));
        }
        Ok(node as NodeHandle)
    }
}

/// A browser wired to fake nodes.
pub struct TestContext {
    pub browser: Browser,
    pub connector: Arc<FakeConnector>,
    pub history: Arc<CommandHistory>,
    pub nodes: Vec<Arc<FakeNode>>,
}

impl TestContext {
    /// One standalone server named `local` with the given page size.
    pub fn standalone(page_size: usize) -> Self {
        Self::standalone_with(page_size, 4)
    }

    /// A standalone server with an explicit `COUNT` hint for scans.
    pub fn standalone_with(page_size: usize, scan_size: usize) -> Self {
        let node = Arc::new(FakeNode::new("127.0.0.1:6379"));
        Self::build(
            vec![node],
            ConnectionProfile::new("local", "127.0.0.1:6379").with_load_size(page_size),
            scan_size,
        )
    }

    /// A cluster of `shards` masters named `cluster`, with the slot space split
    /// evenly between them.
    pub fn cluster(shards: usize, page_size: usize) -> Self {
        let addrs: Vec<String> = (0..shards).map(|i| format!("10.0.0.{}:7000", i + 1)).collect();
        let per_shard = 16384 / shards;
        let slots: Vec<(u16, u16, String)> = addrs
            .iter()
            .enumerate()
            .map(|(i, addr)| {
                let start = i * per_shard;
                let end = if i + 1 == shards {
                    16383
                } else {
                    (i + 1) * per_shard - 1
                };
                (start as u16, end as u16, addr.clone())
            })
            .collect();

        let nodes: Vec<Arc<FakeNode>> = addrs
            .iter()
            .map(|addr| {
                let node = FakeNode::new(addr);
                node.set_cluster_slots(slots.clone());
                Arc::new(node)
            })
            .collect();
        Self::build(
            nodes,
            ConnectionProfile::new("cluster", addrs[0].clone()).with_load_size(page_size),
            4,
        )
    }

    fn build(nodes: Vec<Arc<FakeNode>>, profile: ConnectionProfile, scan_size: usize) -> Self {
        init_tracing();
        let connector = Arc::new(FakeConnector::default());
        for node in &nodes {
            connector.add(node.clone());
        }
        let history = Arc::new(CommandHistory::new(1000));
        let settings = SessionSettings {
            load_size: 10_000,
            scan_size,
        };
        let browser = Browser::new(
            Arc::new(StaticProfiles::new([profile])),
            connector.clone(),
            settings,
            history.clone(),
        );
        Self {
            browser,
            connector,
            history,
            nodes,
        }
    }

    pub fn node(&self) -> &FakeNode {
        &self.nodes[0]
    }

    /// The fake node that owns `key`'s hash slot.
    pub fn owner(&self, key: &str) -> &FakeNode {
        let slot = keydeck::core::client::slot::key_slot(key.as_bytes()) as usize;
        let per_shard = 16384 / self.nodes.len();
        let index = (slot / per_shard).min(self.nodes.len() - 1);
        &self.nodes[index]
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
