// src/core/convert/binary.rs

//! Binary detection, and the transport form for byte strings that are not printable.

use serde::{Deserialize, Serialize};

/// Returns true if `data` is not valid UTF-8 or contains control characters other
/// than tab, carriage return and newline.
pub fn contains_binary(data: &[u8]) -> bool {
    match std::str::from_utf8(data) {
        Ok(text) => text
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t')),
        Err(_) => true,
    }
}

/// A byte string as it crosses a JSON-style transport: printable values travel as
/// text, anything else as an array of byte values so it survives without corruption.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EncodedBytes {
    Text(String),
    Bytes(Vec<u8>),
}

impl EncodedBytes {
    pub fn encode(data: &[u8]) -> Self {
        if contains_binary(data) {
            EncodedBytes::Bytes(data.to_vec())
        } else {
            // `contains_binary` returned false, so the bytes are valid UTF-8.
            EncodedBytes::Text(String::from_utf8_lossy(data).into_owned())
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            EncodedBytes::Text(s) => s.as_bytes(),
            EncodedBytes::Bytes(b) => b,
        }
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::copy_from_slice(self.as_bytes())
    }

    /// A lossy printable rendering, for logs and error messages.
    pub fn display(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl From<&str> for EncodedBytes {
    fn from(s: &str) -> Self {
        EncodedBytes::Text(s.to_string())
    }
}

impl From<&[u8]> for EncodedBytes {
    fn from(b: &[u8]) -> Self {
        EncodedBytes::encode(b)
    }
}
