// src/core/session/cursor.rs

//! Resume tokens for key enumeration and for paging through one key's entries.

use bytes::Bytes;

/// Resume token for enumerating a database's keys.
///
/// It holds one position per shard. A shard whose scan came back to zero is
/// exhausted and is skipped on later rounds. The empty cursor is the zero sentinel:
/// it means both "not started" and "finished", and a scan started from it begins
/// every shard at position zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanCursor {
    shards: Vec<Option<u64>>,
}

impl ScanCursor {
    pub const fn zero() -> Self {
        Self { shards: Vec::new() }
    }

    pub fn is_zero(&self) -> bool {
        self.shards.is_empty()
    }

    /// Where shard `index` of `shard_count` should resume, or `None` if it is
    /// exhausted. A cursor recorded against a different shard count restarts.
    pub fn position(&self, index: usize, shard_count: usize) -> Option<u64> {
        if self.shards.len() != shard_count {
            return Some(0);
        }
        self.shards[index]
    }

    /// Builds a cursor from the positions returned by each shard, where a returned
    /// zero marks that shard exhausted. All-exhausted collapses to the sentinel.
    pub fn from_positions(positions: impl IntoIterator<Item = Option<u64>>) -> Self {
        let shards: Vec<Option<u64>> = positions
            .into_iter()
            .map(|p| p.filter(|&c| c != 0))
            .collect();
        if shards.iter().all(Option::is_none) {
            Self::zero()
        } else {
            Self { shards }
        }
    }
}

impl From<u64> for ScanCursor {
    fn from(cursor: u64) -> Self {
        Self::from_positions([Some(cursor)])
    }
}

/// Where paging through one key's entries stands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPosition {
    /// List offset or scan cursor; zero means "start".
    pub cursor: u64,
    /// Last stream id seen; empty means "start".
    pub last_stream_id: String,
}

impl EntryPosition {
    pub fn is_start(&self) -> bool {
        self.cursor == 0 && (self.last_stream_id.is_empty() || self.last_stream_id == "+")
    }
}

/// The entry cursor cached for one database: the key and match pattern it belongs
/// to, and the position reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCursor {
    pub db: u32,
    pub key: Bytes,
    pub pattern: String,
    pub position: EntryPosition,
}

impl EntryCursor {
    pub fn matches(&self, key: &[u8], pattern: &str) -> bool {
        self.key.as_ref() == key && self.pattern == pattern
    }
}
