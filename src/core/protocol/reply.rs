// src/core/protocol/reply.rs

//! Typed accessors over reply frames. Every accessor turns an error reply into
//! `KeydeckError::Server` carrying the server's text verbatim, and an unexpected
//! shape into `KeydeckError::Protocol`; none of them panic.

use super::RespFrame;
use crate::core::KeydeckError;
use bytes::Bytes;

/// One page of a SCAN-family reply: the next cursor and the returned elements.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage {
    pub cursor: u64,
    pub items: Vec<Bytes>,
}

impl RespFrame {
    /// Fails with the server's message if this is an error reply.
    pub fn into_result(self) -> Result<RespFrame, KeydeckError> {
        match self {
            RespFrame::Error(msg) => Err(KeydeckError::Server(msg)),
            other => Ok(other),
        }
    }

    /// Expects `+OK` (or any simple string).
    pub fn into_ok(self) -> Result<(), KeydeckError> {
        match self.into_result()? {
            RespFrame::SimpleString(_) => Ok(()),
            other => Err(unexpected("a status reply", &other)),
        }
    }

    pub fn into_int(self) -> Result<i64, KeydeckError> {
        match self.into_result()? {
            RespFrame::Integer(i) => Ok(i),
            RespFrame::BulkString(b) => parse_int(&b),
            RespFrame::SimpleString(s) => parse_int(s.as_bytes()),
            // Commands such as MEMORY USAGE answer nil for missing keys.
            RespFrame::Null => Ok(0),
            other => Err(unexpected("an integer", &other)),
        }
    }

    /// Returns the payload of a bulk or simple string; `None` for nil.
    pub fn into_opt_bytes(self) -> Result<Option<Bytes>, KeydeckError> {
        match self.into_result()? {
            RespFrame::BulkString(b) => Ok(Some(b)),
            RespFrame::SimpleString(s) => Ok(Some(Bytes::from(s))),
            RespFrame::Integer(i) => Ok(Some(Bytes::from(i.to_string()))),
            RespFrame::Null => Ok(None),
            other => Err(unexpected("a string", &other)),
        }
    }

    pub fn into_bytes(self) -> Result<Bytes, KeydeckError> {
        self.into_opt_bytes()?
            .ok_or_else(|| KeydeckError::Protocol("expected a string, got nil".to_string()))
    }

    /// Returns the payload as text, replacing invalid UTF-8.
    pub fn into_text(self) -> Result<String, KeydeckError> {
        Ok(String::from_utf8_lossy(&self.into_bytes()?).into_owned())
    }

    /// Returns the elements of an array reply; nil arrays are empty.
    pub fn into_array(self) -> Result<Vec<RespFrame>, KeydeckError> {
        match self.into_result()? {
            RespFrame::Array(items) => Ok(items),
            RespFrame::NullArray | RespFrame::Null => Ok(Vec::new()),
            other => Err(unexpected("an array", &other)),
        }
    }

    /// Returns an array of strings, dropping nil elements.
    pub fn into_bytes_vec(self) -> Result<Vec<Bytes>, KeydeckError> {
        let mut out = Vec::new();
        for item in self.into_array()? {
            if let Some(b) = item.into_opt_bytes()? {
                out.push(b);
            }
        }
        Ok(out)
    }

    /// Parses a `[cursor, [elements...]]` SCAN-family reply.
    pub fn into_scan_page(self) -> Result<ScanPage, KeydeckError> {
        let mut parts = self.into_array()?.into_iter();
        let (Some(cursor), Some(items), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(KeydeckError::Protocol(
                "scan reply must have exactly two elements".to_string(),
            ));
        };
        let cursor = parse_uint(&cursor.into_bytes()?)?;
        Ok(ScanPage {
            cursor,
            items: items.into_bytes_vec()?,
        })
    }
}

fn parse_int(raw: &[u8]) -> Result<i64, KeydeckError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            KeydeckError::Protocol(format!(
                "expected an integer, got '{}'",
                String::from_utf8_lossy(raw)
            ))
        })
}

fn parse_uint(raw: &[u8]) -> Result<u64, KeydeckError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| {
            KeydeckError::Protocol(format!(
                "invalid scan cursor '{}'",
                String::from_utf8_lossy(raw)
            ))
        })
}

fn unexpected(expected: &str, got: &RespFrame) -> KeydeckError {
    KeydeckError::Protocol(format!("expected {expected}, got {got:?}"))
}
