// src/core/client/mod.rs

//! The client layer: the `Executor` seam every command goes through, node and
//! cluster clients, and topology detection.

pub mod cluster;
pub mod node;
pub mod observer;
pub mod slot;

pub use cluster::{ClusterClient, SlotRange};
pub use node::{NodeClient, TcpConnector};
pub use observer::{ObservedConnector, ObservedNode};

use crate::core::KeydeckError;
use crate::core::protocol::{Cmd, RespFrame};
use crate::core::session::ConnectionProfile;
use async_trait::async_trait;
use std::sync::Arc;
use strum_macros::Display;
use tracing::info;

/// Something that can run commands against one server node.
///
/// Error replies are returned as `Ok(RespFrame::Error)`; only transport failures are
/// `Err`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// The `host:port` this executor talks to.
    fn addr(&self) -> &str;

    async fn execute(&self, cmd: Cmd) -> Result<RespFrame, KeydeckError>;

    /// Sends several commands back to back on the same connection and returns the
    /// replies in order. Nothing else is interleaved on that connection meanwhile.
    async fn execute_batch(&self, cmds: Vec<Cmd>) -> Result<Vec<RespFrame>, KeydeckError> {
        let mut replies = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            replies.push(self.execute(cmd).await?);
        }
        Ok(replies)
    }
}

pub type NodeHandle = Arc<dyn Executor>;

/// Opens node connections. The TCP implementation is `TcpConnector`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        addr: &str,
        profile: &ConnectionProfile,
    ) -> Result<NodeHandle, KeydeckError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Topology {
    Standalone,
    Cluster,
}

/// A client handle: a single node, or every master of a cluster.
pub enum Client {
    Standalone(NodeHandle),
    Cluster(ClusterClient),
}

impl Client {
    /// Connects to the profile's address and detects the topology. A node that
    /// answers `CLUSTER INFO` with a cluster state is treated as a cluster seed.
    pub async fn connect(
        connector: &dyn Connector,
        profile: &ConnectionProfile,
    ) -> Result<Self, KeydeckError> {
        let seed = connector.connect(&profile.addr, profile).await?;

        let cluster_mode = match seed.execute(Cmd::new("CLUSTER").arg("INFO")).await? {
            RespFrame::BulkString(info) => {
                let info = String::from_utf8_lossy(&info);
                info.lines().any(|l| l.starts_with("cluster_state:"))
                    && !info.lines().any(|l| l.trim() == "cluster_enabled:0")
            }
            _ => false,
        };

        if cluster_mode {
            let cluster = ClusterClient::discover(seed, connector, profile).await?;
            Ok(Client::Cluster(cluster))
        } else {
            info!("Connected to standalone server at {}", profile.addr);
            Ok(Client::Standalone(seed))
        }
    }

    pub fn topology(&self) -> Topology {
        match self {
            Client::Standalone(_) => Topology::Standalone,
            Client::Cluster(_) => Topology::Cluster,
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, Client::Cluster(_))
    }

    /// Every node that owns data: the single node, or each cluster master.
    pub fn masters(&self) -> &[NodeHandle] {
        match self {
            Client::Standalone(node) => std::slice::from_ref(node),
            Client::Cluster(cluster) => cluster.masters(),
        }
    }

    /// The node a command addressing `key` must be sent to.
    pub fn node_for_key(&self, key: &[u8]) -> Result<&NodeHandle, KeydeckError> {
        match self {
            Client::Standalone(node) => Ok(node),
            Client::Cluster(cluster) => cluster.node_for_key(key),
        }
    }

    /// The node a command must be sent to: by first key on a cluster, or the first
    /// master for keyless commands.
    pub fn route(&self, cmd: &Cmd) -> Result<&NodeHandle, KeydeckError> {
        match (self, cmd.first_key()) {
            (Client::Cluster(cluster), Some(key)) => cluster.node_for_key(key),
            _ => self
                .masters()
                .first()
                .ok_or_else(|| KeydeckError::Connection("client has no nodes".to_string())),
        }
    }
}
