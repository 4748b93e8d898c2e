// src/core/convert/format.rs

//! Presentation formats: how decoded bytes are rendered for display, and how an
//! edited display value is parsed back into bytes.

use super::binary::contains_binary;
use crate::core::KeydeckError;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum FormatKind {
    Raw,
    #[strum(serialize = "JSON")]
    #[serde(rename = "JSON")]
    Json,
    Hex,
    Binary,
}

impl FormatKind {
    /// Renders bytes in this format.
    pub fn render(self, data: &[u8]) -> Result<String, KeydeckError> {
        match self {
            FormatKind::Raw => Ok(String::from_utf8_lossy(data).into_owned()),
            FormatKind::Json => {
                let value: serde_json::Value = serde_json::from_slice(data)?;
                Ok(serde_json::to_string_pretty(&value)?)
            }
            FormatKind::Hex => {
                let digits = hex::encode(data);
                let mut out = String::with_capacity(digits.len() * 2);
                for pair in digits.as_bytes().chunks(2) {
                    out.push_str("\\x");
                    out.push(pair[0] as char);
                    out.push(pair[1] as char);
                }
                Ok(out)
            }
            FormatKind::Binary => {
                let mut out = String::with_capacity(data.len() * 8);
                for b in data {
                    out.push_str(&format!("{b:08b}"));
                }
                Ok(out)
            }
        }
    }

    /// Parses a display value in this format back into bytes.
    pub fn parse(self, text: &str) -> Result<Vec<u8>, KeydeckError> {
        match self {
            FormatKind::Raw => Ok(text.as_bytes().to_vec()),
            FormatKind::Json => {
                let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
                    KeydeckError::Conversion(format!("value is not valid JSON: {e}"))
                })?;
                Ok(serde_json::to_vec(&value)?)
            }
            FormatKind::Hex => parse_hex_escapes(text),
            FormatKind::Binary => parse_bit_string(text),
        }
    }
}

/// Picks a format for bytes nobody asked a specific format for: JSON if it looks like
/// a JSON document, hex if it contains non-printable bytes, raw otherwise.
pub fn auto_format(data: &[u8]) -> (String, FormatKind) {
    if looks_like_json(data)
        && let Ok(pretty) = FormatKind::Json.render(data)
    {
        return (pretty, FormatKind::Json);
    }
    if contains_binary(data) {
        // Rendering hex never fails.
        if let Ok(hex) = FormatKind::Hex.render(data) {
            return (hex, FormatKind::Hex);
        }
    }
    (String::from_utf8_lossy(data).into_owned(), FormatKind::Raw)
}

fn looks_like_json(data: &[u8]) -> bool {
    let trimmed = data.trim_ascii();
    matches!(
        (trimmed.first(), trimmed.last()),
        (Some(b'{'), Some(b'}')) | (Some(b'['), Some(b']'))
    )
}

/// Parses `\xNN` sequences. Whitespace between sequences is ignored.
fn parse_hex_escapes(text: &str) -> Result<Vec<u8>, KeydeckError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = compact.strip_prefix("\\x") else {
        return Err(KeydeckError::Conversion(
            "hex value must be a sequence of \\xNN escapes".to_string(),
        ));
    };
    let mut digits = String::with_capacity(rest.len());
    for part in rest.split("\\x") {
        if part.len() != 2 {
            return Err(KeydeckError::Conversion(format!(
                "invalid hex escape '\\x{part}'"
            )));
        }
        digits.push_str(part);
    }
    hex::decode(&digits).map_err(|e| KeydeckError::Conversion(format!("invalid hex value: {e}")))
}

/// Packs a string of `0`/`1` digits, eight per byte. Whitespace is ignored.
fn parse_bit_string(text: &str) -> Result<Vec<u8>, KeydeckError> {
    let bits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if bits.len() % 8 != 0 {
        return Err(KeydeckError::Conversion(format!(
            "binary value length {} is not a multiple of 8",
            bits.len()
        )));
    }
    bits.chunks(8)
        .map(|chunk| {
            chunk.iter().try_fold(0u8, |acc, &bit| match bit {
                b'0' => Ok(acc << 1),
                b'1' => Ok((acc << 1) | 1),
                other => Err(KeydeckError::Conversion(format!(
                    "invalid binary digit '{}'",
                    other as char
                ))),
            })
        })
        .collect()
}
