// src/core/convert/mod.rs

//! The value conversion pipeline.
//!
//! The read path (`convert_to`) decodes first and formats second; the write path
//! (`save_as`) parses the display format first and encodes second. Both are pure
//! functions and safe to share between threads without locking.

pub mod binary;
pub mod codec;
pub mod format;

pub use binary::{EncodedBytes, contains_binary};
pub use codec::DecodeKind;
pub use format::{FormatKind, auto_format};

use crate::core::KeydeckError;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde::Serialize;
use std::str::FromStr;

/// Purely numeric values are taken literally and never auto-decoded.
static NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("static regex"));

const BASE64_MIN_LEN: usize = 12;

/// The outcome of the read path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodeResult {
    pub value: String,
    pub decode: DecodeKind,
    pub format: FormatKind,
}

/// Parses a decode hint as supplied by a caller. An empty hint means auto-detect.
pub fn parse_decode_hint(hint: &str) -> Result<Option<DecodeKind>, KeydeckError> {
    if hint.is_empty() {
        return Ok(None);
    }
    DecodeKind::from_str(hint)
        .map(Some)
        .map_err(|_| KeydeckError::Validation(format!("unknown decode type '{hint}'")))
}

/// Parses a format hint as supplied by a caller. An empty hint means auto-detect.
pub fn parse_format_hint(hint: &str) -> Result<Option<FormatKind>, KeydeckError> {
    if hint.is_empty() {
        return Ok(None);
    }
    FormatKind::from_str(hint)
        .map(Some)
        .map_err(|_| KeydeckError::Validation(format!("unknown format type '{hint}'")))
}

/// Converts stored bytes into a display value.
///
/// `None` hints select auto-detection. An explicit decode that fails structurally
/// passes the bytes through with `DecodeKind::None`; an explicit format that cannot
/// render them falls back to `FormatKind::Raw`. The read path never fails.
pub fn convert_to(
    raw: &[u8],
    decode: Option<DecodeKind>,
    format: Option<FormatKind>,
) -> DecodeResult {
    let (decoded, decode_used) = match decode {
        None => auto_decode(raw),
        Some(kind) => match kind.decode(raw) {
            Ok(bytes) => (bytes, kind),
            Err(e) => {
                tracing::debug!("explicit {kind} decode failed, passing through: {e}");
                (raw.to_vec(), DecodeKind::None)
            }
        },
    };

    let (value, format_used) = match format {
        None => auto_format(&decoded),
        Some(kind) => match kind.render(&decoded) {
            Ok(text) => (text, kind),
            Err(_) => (String::from_utf8_lossy(&decoded).into_owned(), FormatKind::Raw),
        },
    };

    DecodeResult {
        value,
        decode: decode_used,
        format: format_used,
    }
}

/// Converts a display value back into the bytes to store. Auto hints save as raw
/// text without encoding. A JSON value saved as msgpack is stored as a msgpack
/// structure; everything else round-trips byte for byte.
pub fn save_as(
    value: &str,
    format: Option<FormatKind>,
    decode: Option<DecodeKind>,
) -> Result<Vec<u8>, KeydeckError> {
    let bytes = format.unwrap_or(FormatKind::Raw).parse(value)?;
    match (format, decode) {
        (Some(FormatKind::Json), Some(DecodeKind::Msgpack)) => {
            codec::msgpack_encode_json(&bytes)
        }
        _ => decode.unwrap_or(DecodeKind::None).encode(&bytes),
    }
}

/// Tries each auto-detectable codec in order and keeps the first whose output is
/// printable. Falls back to the raw bytes with `DecodeKind::None`.
pub fn auto_decode(raw: &[u8]) -> (Vec<u8>, DecodeKind) {
    if raw.is_empty() || NUMERIC.is_match(raw) {
        return (raw.to_vec(), DecodeKind::None);
    }
    for kind in DecodeKind::AUTO_ORDER {
        if kind == DecodeKind::Base64 && !plausible_base64(raw) {
            continue;
        }
        if let Ok(decoded) = kind.decode(raw)
            && !contains_binary(&decoded)
        {
            return (decoded, kind);
        }
    }
    (raw.to_vec(), DecodeKind::None)
}

/// Base64 candidates must be a multiple of four bytes, at least twelve long, and not
/// one repeated character.
fn plausible_base64(raw: &[u8]) -> bool {
    raw.len() % 4 == 0 && raw.len() >= BASE64_MIN_LEN && raw.iter().any(|&b| b != raw[0])
}
