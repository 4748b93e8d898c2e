// src/core/browser/types.rs

//! Request and result types of the browser operations.

use crate::core::KeydeckError;
use crate::core::convert::{DecodeKind, EncodedBytes, FormatKind};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString};

/// The declared type of a key, as reported by `TYPE`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    String,
    List,
    Hash,
    Set,
    ZSet,
    Stream,
}

impl KeyType {
    /// Interprets a `TYPE` reply. `none` means the key does not exist.
    pub fn from_reply(reply: &str, key: &EncodedBytes) -> Result<Self, KeydeckError> {
        if reply == "none" {
            return Err(KeydeckError::NotFound(format!(
                "key '{}' does not exist",
                key.display()
            )));
        }
        KeyType::from_str(reply)
            .map_err(|_| KeydeckError::Unsupported(format!("unsupported key type '{reply}'")))
    }
}

/// One database of a standalone server, with the counts from `INFO keyspace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseItem {
    pub db: u32,
    pub keys: i64,
    pub expires: i64,
    pub avg_ttl: i64,
}

/// One page of keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeysPage {
    pub keys: Vec<EncodedBytes>,
    pub end: bool,
    /// Total keys in the database, as an estimate for progress display.
    pub max_keys: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeySummary {
    #[serde(rename = "type")]
    pub key_type: KeyType,
    /// Seconds to live; `-1` when the key does not expire.
    pub ttl: i64,
    /// Memory used by the key in bytes; `0` if the server cannot tell.
    pub size: i64,
    /// String length or number of entries.
    pub length: i64,
}

/// Selects a key and how to page through and present its contents.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyDetailParam {
    pub server: String,
    pub db: u32,
    pub key: EncodedBytes,
    #[serde(default, rename = "match")]
    pub match_pattern: String,
    #[serde(default)]
    pub full: bool,
    /// Empty for auto-detection.
    #[serde(default)]
    pub decode: String,
    /// Empty for auto-detection.
    #[serde(default)]
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StringValue {
    pub value: EncodedBytes,
    pub display_value: String,
    pub decode: DecodeKind,
    pub format: FormatKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListEntry {
    pub index: u64,
    pub value: EncodedBytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HashEntry {
    pub field: EncodedBytes,
    pub value: EncodedBytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetEntry {
    pub value: EncodedBytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZSetEntry {
    pub value: EncodedBytes,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamField {
    pub field: EncodedBytes,
    pub value: EncodedBytes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEntry {
    pub id: String,
    /// Field/value pairs in server order.
    pub value: Vec<StreamField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
}

/// A key's contents, by type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum KeyEntries {
    String(StringValue),
    List(Vec<ListEntry>),
    Hash(Vec<HashEntry>),
    Set(Vec<SetEntry>),
    ZSet(Vec<ZSetEntry>),
    Stream(Vec<StreamEntry>),
}

impl KeyEntries {
    pub fn len(&self) -> usize {
        match self {
            KeyEntries::String(_) => 1,
            KeyEntries::List(v) => v.len(),
            KeyEntries::Hash(v) => v.len(),
            KeyEntries::Set(v) => v.len(),
            KeyEntries::ZSet(v) => v.len(),
            KeyEntries::Stream(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyDetail {
    pub entries: KeyEntries,
    #[serde(rename = "match")]
    pub match_pattern: String,
    /// True when this page is the last one.
    pub end: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteResult {
    pub deleted: Vec<EncodedBytes>,
    pub deleted_count: usize,
}

/// Decode and format hints for values written by a mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueCodec {
    pub format: Option<FormatKind>,
    pub decode: Option<DecodeKind>,
}

impl ValueCodec {
    /// Parses caller-supplied hints; empty strings mean "store as typed".
    pub fn from_hints(format: &str, decode: &str) -> Result<Self, KeydeckError> {
        Ok(Self {
            format: crate::core::convert::parse_format_hint(format)?,
            decode: crate::core::convert::parse_decode_hint(decode)?,
        })
    }

    pub fn save(&self, value: &str) -> Result<Vec<u8>, KeydeckError> {
        crate::core::convert::save_as(value, self.format, self.decode)
    }
}
