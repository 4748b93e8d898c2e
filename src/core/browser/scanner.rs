// src/core/browser/scanner.rs

//! Incremental key enumeration over one node or every shard of a cluster.

use super::types::KeyType;
use crate::core::KeydeckError;
use crate::core::client::NodeHandle;
use crate::core::protocol::Cmd;
use crate::core::session::{ConnectionSession, ScanCursor};
use bytes::Bytes;
use futures::future::try_join_all;
use parking_lot::Mutex;
use tracing::debug;

/// Scans keys matching `pattern` (and `key_type`, if given) starting from `cursor`.
///
/// Every shard runs the same loop: at least one `SCAN` round, then more until the
/// shard's cursor comes back to zero or more than `page_size` keys have been
/// gathered. A `page_size` of 0 scans to exhaustion. Shards are scanned
/// concurrently and any shard failure fails the whole call.
pub async fn scan_keys(
    session: &ConnectionSession,
    pattern: &str,
    key_type: Option<KeyType>,
    cursor: &ScanCursor,
    page_size: usize,
) -> Result<(Vec<Bytes>, ScanCursor), KeydeckError> {
    let masters = session.client().masters();
    let shard_count = masters.len();
    let collected: Mutex<Vec<Bytes>> = Mutex::new(Vec::new());

    let shards = masters.iter().enumerate().map(|(index, node)| {
        let collected = &collected;
        async move {
            let Some(start) = cursor.position(index, shard_count) else {
                return Ok::<_, KeydeckError>(None);
            };
            let (keys, next) =
                scan_node(session, node, pattern, key_type, start, page_size).await?;
            collected.lock().extend(keys);
            Ok(Some(next))
        }
    });
    let positions = try_join_all(shards).await?;

    let next = ScanCursor::from_positions(positions);
    let keys = collected.into_inner();
    debug!(
        "Scanned {} keys matching '{}' across {} shard(s), finished: {}",
        keys.len(),
        pattern,
        shard_count,
        next.is_zero()
    );
    Ok((keys, next))
}

async fn scan_node(
    session: &ConnectionSession,
    node: &NodeHandle,
    pattern: &str,
    key_type: Option<KeyType>,
    start: u64,
    page_size: usize,
) -> Result<(Vec<Bytes>, u64), KeydeckError> {
    let mut keys = Vec::new();
    let mut cursor = start;
    loop {
        let mut cmd = Cmd::new("SCAN")
            .arg_uint(cursor)
            .arg("MATCH")
            .arg_slice(pattern.as_bytes())
            .arg("COUNT")
            .arg_uint(session.scan_size() as u64);
        if let Some(key_type) = key_type {
            cmd = cmd.arg("TYPE").arg(key_type.to_string());
        }

        let page = session.execute_on(node, cmd).await?.into_scan_page()?;
        keys.extend(page.items);
        cursor = page.cursor;
        if cursor == 0 || (page_size > 0 && keys.len() > page_size) {
            break;
        }
    }
    Ok((keys, cursor))
}
