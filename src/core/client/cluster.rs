// src/core/client/cluster.rs

//! A client for a sharded cluster: one node handle per master, plus the slot map
//! used to route key-addressed commands.

use super::slot::key_slot;
use super::{Connector, NodeHandle};
use crate::core::KeydeckError;
use crate::core::protocol::{Cmd, RespFrame};
use crate::core::session::ConnectionProfile;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A contiguous range of slots served by one master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    /// Index into `ClusterClient::masters`.
    pub node: usize,
}

pub struct ClusterClient {
    masters: Vec<NodeHandle>,
    slots: Vec<SlotRange>,
}

impl ClusterClient {
    /// Builds the topology from a seed node: reads `CLUSTER SLOTS`, then connects to
    /// every master it names, reusing the seed's connection where addresses match.
    pub async fn discover(
        seed: NodeHandle,
        connector: &dyn Connector,
        profile: &ConnectionProfile,
    ) -> Result<Self, KeydeckError> {
        let reply = seed.execute(Cmd::new("CLUSTER").arg("SLOTS")).await?;
        let seed_host = seed
            .addr()
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_default();
        let ranges = parse_cluster_slots(reply, &seed_host)?;
        if ranges.is_empty() {
            return Err(KeydeckError::Connection(
                "cluster reports no assigned slots".to_string(),
            ));
        }

        let mut masters: Vec<NodeHandle> = Vec::new();
        let mut index_by_addr: HashMap<String, usize> = HashMap::new();
        let mut slots = Vec::with_capacity(ranges.len());
        for (start, end, addr) in ranges {
            let node = match index_by_addr.get(&addr) {
                Some(&i) => i,
                None => {
                    let handle = if addr == seed.addr() {
                        Arc::clone(&seed)
                    } else {
                        connector.connect(&addr, profile).await?
                    };
                    masters.push(handle);
                    index_by_addr.insert(addr.clone(), masters.len() - 1);
                    masters.len() - 1
                }
            };
            slots.push(SlotRange { start, end, node });
        }
        slots.sort_by_key(|r| r.start);

        info!(
            "Discovered cluster with {} masters and {} slot ranges",
            masters.len(),
            slots.len()
        );
        Ok(Self { masters, slots })
    }

    /// Builds a client from an already known topology.
    pub fn from_parts(masters: Vec<NodeHandle>, mut slots: Vec<SlotRange>) -> Self {
        slots.sort_by_key(|r| r.start);
        Self { masters, slots }
    }

    pub fn masters(&self) -> &[NodeHandle] {
        &self.masters
    }

    /// Returns the master that owns `key`'s hash slot.
    pub fn node_for_key(&self, key: &[u8]) -> Result<&NodeHandle, KeydeckError> {
        let slot = key_slot(key);
        let idx = self.slots.partition_point(|r| r.end < slot);
        match self.slots.get(idx) {
            Some(range) if range.start <= slot && slot <= range.end => {
                debug!("Routing slot {} to {}", slot, self.masters[range.node].addr());
                Ok(&self.masters[range.node])
            }
            _ => Err(KeydeckError::Connection(format!(
                "hash slot {slot} is not served by any node"
            ))),
        }
    }
}

/// Parses a `CLUSTER SLOTS` reply into `(start, end, master-addr)` triples.
/// Each element is `[start, end, [host, port, id?], replicas...]`; an empty host
/// means "the node you asked".
pub fn parse_cluster_slots(
    reply: RespFrame,
    seed_host: &str,
) -> Result<Vec<(u16, u16, String)>, KeydeckError> {
    let mut ranges = Vec::new();
    for entry in reply.into_array()? {
        let mut parts = entry.into_array()?.into_iter();
        let (Some(start), Some(end), Some(master)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(KeydeckError::Protocol(
                "malformed CLUSTER SLOTS entry".to_string(),
            ));
        };
        let mut master = master.into_array()?.into_iter();
        let (Some(host), Some(port)) = (master.next(), master.next()) else {
            return Err(KeydeckError::Protocol(
                "CLUSTER SLOTS entry has no master address".to_string(),
            ));
        };
        let host = host.into_text()?;
        let host = if host.is_empty() { seed_host.to_string() } else { host };
        let to_slot = |v: i64| {
            u16::try_from(v).map_err(|_| KeydeckError::Protocol(format!("invalid slot {v}")))
        };
        ranges.push((
            to_slot(start.into_int()?)?,
            to_slot(end.into_int()?)?,
            format!("{host}:{}", port.into_int()?),
        ));
    }
    Ok(ranges)
}
