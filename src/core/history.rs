// src/core/history.rs

//! The command history recorder and the slow log record type.
//!
//! Every command a session sends is observed by the client hook and appended here,
//! with its cost in milliseconds. The history is a bounded ring buffer and is only
//! cleared on request.

use crate::core::KeydeckError;
use crate::core::protocol::RespFrame;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

/// The default number of commands kept in the history.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// The maximum length of a recorded command line. Longer lines are truncated so a
/// large value does not pin memory in the history.
const MAX_COMMAND_TEXT_LEN: usize = 512;

/// Receives every command issued by a session, synchronously and inline.
pub trait CommandSink: Send + Sync {
    fn record(&self, server: &str, command: String, cost_ms: i64);
}

/// One observed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CmdHistoryItem {
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub server: String,
    pub cmd: String,
    pub cost: i64,
}

/// A bounded, append-only log of issued commands.
#[derive(Debug)]
pub struct CommandHistory {
    items: Mutex<VecDeque<CmdHistoryItem>>,
    limit: usize,
}

impl CommandHistory {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(limit.min(DEFAULT_HISTORY_LIMIT))),
            limit,
        }
    }

    /// Returns one page of history, newest first. Pages are numbered from 1;
    /// a `page_size` of 0 returns everything.
    pub fn page(&self, page_no: usize, page_size: usize) -> Vec<CmdHistoryItem> {
        let items = self.items.lock();
        if page_size == 0 {
            return items.iter().rev().cloned().collect();
        }
        let skip = page_no.saturating_sub(1).saturating_mul(page_size);
        items.iter().rev().skip(skip).take(page_size).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl CommandSink for CommandHistory {
    fn record(&self, server: &str, mut command: String, cost_ms: i64) {
        if command.len() > MAX_COMMAND_TEXT_LEN {
            let mut cut = MAX_COMMAND_TEXT_LEN;
            while !command.is_char_boundary(cut) {
                cut -= 1;
            }
            command.truncate(cut);
            command.push_str("... (truncated)");
        }

        let mut items = self.items.lock();
        if items.len() == self.limit {
            items.pop_front();
        }
        items.push_back(CmdHistoryItem {
            timestamp: Utc::now().timestamp_millis(),
            server: server.to_string(),
            cmd: command,
            cost: cost_ms,
        });
    }
}

/// One entry of a server's slow log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlowLogItem {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub client: String,
    pub addr: String,
    pub cmd: String,
    /// Execution time in milliseconds.
    pub cost: i64,
}

impl SlowLogItem {
    /// Parses one `SLOWLOG GET` element:
    /// `[id, timestamp, micros, [args...], client-addr, client-name]`.
    /// The last two fields are absent on old servers.
    pub fn from_frame(frame: RespFrame) -> Result<Self, KeydeckError> {
        let mut fields = frame.into_array()?.into_iter();
        let (Some(_id), Some(timestamp), Some(micros), Some(args)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(KeydeckError::Protocol(
                "slow log entry has fewer than four fields".to_string(),
            ));
        };
        let addr = match fields.next() {
            Some(f) => f.into_text()?,
            None => String::new(),
        };
        let client = match fields.next() {
            Some(f) => f.into_text()?,
            None => String::new(),
        };
        let cmd = args
            .into_bytes_vec()?
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Self {
            timestamp: timestamp.into_int()?,
            client,
            addr,
            cmd,
            cost: micros.into_int()? / 1000,
        })
    }
}
