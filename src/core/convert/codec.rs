// src/core/convert/codec.rs

//! The compression and serialization codecs a stored value may be wrapped in.
//!
//! Every codec is a pure function pair over byte slices. Decoders bound their output
//! size so a hostile value cannot exhaust memory.

use crate::core::KeydeckError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// The largest output a decoder will produce before giving up.
pub const MAX_DECODED_SIZE: u64 = 64 * 1024 * 1024;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_QUALITY: u32 = 9;
const BROTLI_LG_WINDOW: u32 = 22;

/// A reversible byte transform applied to stored values.
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
pub enum DecodeKind {
    None,
    Base64,
    GZip,
    Deflate,
    ZStd,
    Brotli,
    Msgpack,
}

impl DecodeKind {
    /// The codecs tried, in order, when no decode kind is requested. Deflate and
    /// brotli are left out: their decoders accept too much arbitrary input.
    pub const AUTO_ORDER: [DecodeKind; 4] = [
        DecodeKind::Base64,
        DecodeKind::GZip,
        DecodeKind::ZStd,
        DecodeKind::Msgpack,
    ];

    /// Removes this codec's wrapping from `data`.
    pub fn decode(self, data: &[u8]) -> Result<Vec<u8>, KeydeckError> {
        match self {
            DecodeKind::None => Ok(data.to_vec()),
            DecodeKind::Base64 => STANDARD
                .decode(data)
                .map_err(|e| conversion(self, "decode", e)),
            DecodeKind::GZip => read_bounded(GzDecoder::new(data), self),
            DecodeKind::Deflate => read_bounded(DeflateDecoder::new(data), self),
            DecodeKind::ZStd => {
                let decoder = zstd::stream::read::Decoder::new(data)
                    .map_err(|e| conversion(self, "decode", e))?;
                read_bounded(decoder, self)
            }
            DecodeKind::Brotli => {
                read_bounded(brotli::Decompressor::new(data, BROTLI_BUFFER_SIZE), self)
            }
            DecodeKind::Msgpack => msgpack_decode(data),
        }
    }

    /// Wraps `data` with this codec.
    pub fn encode(self, data: &[u8]) -> Result<Vec<u8>, KeydeckError> {
        match self {
            DecodeKind::None => Ok(data.to_vec()),
            DecodeKind::Base64 => Ok(STANDARD.encode(data).into_bytes()),
            DecodeKind::GZip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(data)
                    .map_err(|e| conversion(self, "encode", e))?;
                encoder.finish().map_err(|e| conversion(self, "encode", e))
            }
            DecodeKind::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(data)
                    .map_err(|e| conversion(self, "encode", e))?;
                encoder.finish().map_err(|e| conversion(self, "encode", e))
            }
            DecodeKind::ZStd => zstd::encode_all(data, 0).map_err(|e| conversion(self, "encode", e)),
            DecodeKind::Brotli => {
                let mut out = Vec::new();
                {
                    let mut writer = brotli::CompressorWriter::new(
                        &mut out,
                        BROTLI_BUFFER_SIZE,
                        BROTLI_QUALITY,
                        BROTLI_LG_WINDOW,
                    );
                    writer
                        .write_all(data)
                        .map_err(|e| conversion(self, "encode", e))?;
                    writer.flush().map_err(|e| conversion(self, "encode", e))?;
                }
                Ok(out)
            }
            DecodeKind::Msgpack => msgpack_encode(data),
        }
    }
}

/// Drains a decoding reader, failing if it errors or exceeds `MAX_DECODED_SIZE`.
fn read_bounded<R: Read>(reader: R, kind: DecodeKind) -> Result<Vec<u8>, KeydeckError> {
    let mut out = Vec::new();
    reader
        .take(MAX_DECODED_SIZE + 1)
        .read_to_end(&mut out)
        .map_err(|e| conversion(kind, "decode", e))?;
    if out.len() as u64 > MAX_DECODED_SIZE {
        return Err(KeydeckError::Conversion(format!(
            "{kind} output exceeds {MAX_DECODED_SIZE} bytes"
        )));
    }
    Ok(out)
}

/// A msgpack string decodes to its text and a bin to its bytes; maps and arrays
/// decode to compact JSON. The whole input must be consumed by a single value.
fn msgpack_decode(data: &[u8]) -> Result<Vec<u8>, KeydeckError> {
    if let Some(bytes) = msgpack_bin(data)? {
        return Ok(bytes.to_vec());
    }
    let mut cursor = Cursor::new(data);
    let value: serde_json::Value = {
        let mut de = rmp_serde::Deserializer::new(&mut cursor);
        serde::Deserialize::deserialize(&mut de)
            .map_err(|e| conversion(DecodeKind::Msgpack, "decode", e))?
    };
    if cursor.position() as usize != data.len() {
        return Err(KeydeckError::Conversion(
            "msgpack decode: trailing bytes after value".to_string(),
        ));
    }
    match value {
        serde_json::Value::String(s) => Ok(s.into_bytes()),
        v @ (serde_json::Value::Object(_) | serde_json::Value::Array(_)) => {
            Ok(serde_json::to_vec(&v)?)
        }
        other => Err(KeydeckError::Conversion(format!(
            "msgpack decode: unsupported top-level value {other}"
        ))),
    }
}

/// Text encodes as a msgpack string and anything else as a msgpack bin, so the
/// bytes read back unchanged.
fn msgpack_encode(data: &[u8]) -> Result<Vec<u8>, KeydeckError> {
    match std::str::from_utf8(data) {
        Ok(text) => {
            rmp_serde::to_vec(text).map_err(|e| conversion(DecodeKind::Msgpack, "encode", e))
        }
        Err(_) => msgpack_encode_bin(data),
    }
}

/// Encodes a JSON document as a msgpack structure. Documents that are not an
/// object or an array are stored as text.
pub fn msgpack_encode_json(data: &[u8]) -> Result<Vec<u8>, KeydeckError> {
    match serde_json::from_slice::<serde_json::Value>(data) {
        Ok(v @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
            rmp_serde::to_vec(&v).map_err(|e| conversion(DecodeKind::Msgpack, "encode", e))
        }
        _ => msgpack_encode(data),
    }
}

const MSGPACK_BIN8: u8 = 0xc4;
const MSGPACK_BIN16: u8 = 0xc5;
const MSGPACK_BIN32: u8 = 0xc6;

fn msgpack_encode_bin(data: &[u8]) -> Result<Vec<u8>, KeydeckError> {
    let len = data.len();
    let mut out = Vec::with_capacity(len + 5);
    if let Ok(n) = u8::try_from(len) {
        out.push(MSGPACK_BIN8);
        out.push(n);
    } else if let Ok(n) = u16::try_from(len) {
        out.push(MSGPACK_BIN16);
        out.extend_from_slice(&n.to_be_bytes());
    } else {
        let n = u32::try_from(len).map_err(|_| {
            conversion(DecodeKind::Msgpack, "encode", "value too large for a msgpack bin")
        })?;
        out.push(MSGPACK_BIN32);
        out.extend_from_slice(&n.to_be_bytes());
    }
    out.extend_from_slice(data);
    Ok(out)
}

/// Returns the payload if `data` is exactly one msgpack bin value.
fn msgpack_bin(data: &[u8]) -> Result<Option<&[u8]>, KeydeckError> {
    let header = match data.first() {
        Some(&MSGPACK_BIN8) => 1,
        Some(&MSGPACK_BIN16) => 2,
        Some(&MSGPACK_BIN32) => 4,
        _ => return Ok(None),
    };
    let Some(len_bytes) = data.get(1..1 + header) else {
        return Err(conversion(DecodeKind::Msgpack, "decode", "truncated bin header"));
    };
    let len = len_bytes
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    let payload = &data[1 + header..];
    if payload.len() != len {
        return Err(conversion(
            DecodeKind::Msgpack,
            "decode",
            format!("bin declares {len} bytes but {} follow", payload.len()),
        ));
    }
    Ok(Some(payload))
}

fn conversion(kind: DecodeKind, op: &str, e: impl std::fmt::Display) -> KeydeckError {
    KeydeckError::Conversion(format!("{kind} {op} failed: {e}"))
}
