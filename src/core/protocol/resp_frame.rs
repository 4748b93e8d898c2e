// src/core/protocol/resp_frame.rs

//! Implements the RESP frame structure, the command builder used by every client
//! operation, and the `Encoder`/`Decoder` pair used on the wire.

use crate::core::KeydeckError;
use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF sequence used to terminate lines in RESP.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Limits on what a reply may claim, so a corrupt reply cannot force huge allocations.
const MAX_FRAME_ELEMENTS: usize = 16 * 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;
const MAX_RECURSION_DEPTH: usize = 256;

/// A single frame in the RESP protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

/// A command ready to be sent to a server: a name followed by binary-safe arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Starts a new command with the given name.
    pub fn new(name: &'static str) -> Self {
        Self {
            args: vec![Bytes::from_static(name.as_bytes())],
        }
    }

    /// Appends a binary-safe argument.
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a borrowed argument, copying it.
    pub fn arg_slice(mut self, arg: &[u8]) -> Self {
        self.args.push(Bytes::copy_from_slice(arg));
        self
    }

    /// Appends an integer argument using its decimal representation.
    pub fn arg_int(mut self, value: i64) -> Self {
        let mut buf = itoa::Buffer::new();
        self.args.push(Bytes::copy_from_slice(buf.format(value).as_bytes()));
        self
    }

    /// Appends an unsigned integer argument (cursors, counts).
    pub fn arg_uint(mut self, value: u64) -> Self {
        let mut buf = itoa::Buffer::new();
        self.args.push(Bytes::copy_from_slice(buf.format(value).as_bytes()));
        self
    }

    /// Appends a float argument (sorted-set scores).
    pub fn arg_float(mut self, value: f64) -> Self {
        self.args.push(Bytes::from(value.to_string()));
        self
    }

    /// The upper-cased command name.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_ascii_uppercase()
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Returns the first key argument, used for cluster routing. Every command the
    /// engine routes by key takes the key as its first argument.
    pub fn first_key(&self) -> Option<&Bytes> {
        self.args.get(1)
    }
}

/// Renders a command as an operator would type it: arguments separated by spaces,
/// quoted when they contain spaces, quotes or non-printable bytes.
impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let needs_quotes = arg.is_empty()
                || arg
                    .iter()
                    .any(|&b| b == b' ' || b == b'"' || !(0x20..0x7f).contains(&b));
            if !needs_quotes {
                f.write_str(&String::from_utf8_lossy(arg))?;
                continue;
            }
            f.write_str("\"")?;
            for &b in arg.iter() {
                match b {
                    b'"' => f.write_str("\\\"")?,
                    b'\\' => f.write_str("\\\\")?,
                    0x20..=0x7e => write!(f, "{}", b as char)?,
                    _ => write!(f, "\\x{b:02x}")?,
                }
            }
            f.write_str("\"")?;
        }
        Ok(())
    }
}

impl From<Cmd> for RespFrame {
    fn from(cmd: Cmd) -> Self {
        RespFrame::Array(cmd.args.into_iter().map(RespFrame::BulkString).collect())
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
#[derive(Debug, Default)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = KeydeckError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut num = itoa::Buffer::new();
        match item {
            RespFrame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                dst.extend_from_slice(b":");
                dst.extend_from_slice(num.format(i).as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                dst.extend_from_slice(b"$");
                dst.extend_from_slice(num.format(b.len()).as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
            RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
            RespFrame::Array(arr) => {
                dst.extend_from_slice(b"*");
                dst.extend_from_slice(num.format(arr.len()).as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Encoder<Cmd> for RespFrameCodec {
    type Error = KeydeckError;

    fn encode(&mut self, item: Cmd, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<RespFrame>>::encode(self, item.into(), dst)
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = KeydeckError;

    /// Decodes one reply. A partial frame leaves the buffer untouched and yields `Ok(None)`.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut bytes = &src[..];
        match decode_frame(&mut bytes, 0) {
            Ok(frame) => {
                let consumed = src.len() - bytes.len();
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(KeydeckError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn decode_frame(bytes: &mut &[u8], depth: usize) -> Result<RespFrame, KeydeckError> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(KeydeckError::Protocol(
            "reply nesting exceeds the recursion limit".to_string(),
        ));
    }
    let Some(&prefix) = bytes.first() else {
        return Err(KeydeckError::IncompleteData);
    };
    *bytes = &bytes[1..];

    match prefix {
        b'+' => Ok(RespFrame::SimpleString(lossy(read_line(bytes)?))),
        b'-' => Ok(RespFrame::Error(lossy(read_line(bytes)?))),
        b':' => Ok(RespFrame::Integer(read_length(bytes)?)),
        b'$' => {
            let len = read_length(bytes)?;
            if len == -1 {
                return Ok(RespFrame::Null);
            }
            let len = checked_len(len, MAX_BULK_STRING_SIZE)?;
            if bytes.len() < len + CRLF_LEN {
                return Err(KeydeckError::IncompleteData);
            }
            if &bytes[len..len + CRLF_LEN] != CRLF {
                return Err(KeydeckError::Protocol(
                    "bulk string is not terminated by CRLF".to_string(),
                ));
            }
            let data = Bytes::copy_from_slice(&bytes[..len]);
            *bytes = &bytes[len + CRLF_LEN..];
            Ok(RespFrame::BulkString(data))
        }
        b'*' => {
            let len = read_length(bytes)?;
            if len == -1 {
                return Ok(RespFrame::NullArray);
            }
            let len = checked_len(len, MAX_FRAME_ELEMENTS)?;
            let mut frames = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                frames.push(decode_frame(bytes, depth + 1)?);
            }
            Ok(RespFrame::Array(frames))
        }
        other => Err(KeydeckError::Protocol(format!(
            "unexpected reply type byte 0x{other:02x}"
        ))),
    }
}

/// Reads up to the next CRLF and advances past it.
fn read_line<'a>(bytes: &mut &'a [u8]) -> Result<&'a [u8], KeydeckError> {
    let pos = bytes
        .windows(CRLF_LEN)
        .position(|window| window == CRLF)
        .ok_or(KeydeckError::IncompleteData)?;
    let line = &bytes[..pos];
    *bytes = &bytes[pos + CRLF_LEN..];
    Ok(line)
}

fn read_length(bytes: &mut &[u8]) -> Result<i64, KeydeckError> {
    let line = read_line(bytes)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| KeydeckError::Protocol(format!("invalid integer line '{}'", lossy(line))))
}

fn checked_len(len: i64, max: usize) -> Result<usize, KeydeckError> {
    usize::try_from(len)
        .ok()
        .filter(|&l| l <= max)
        .ok_or_else(|| KeydeckError::Protocol(format!("invalid length {len}")))
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}
