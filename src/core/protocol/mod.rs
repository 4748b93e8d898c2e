// src/core/protocol/mod.rs

//! The client side of RESP: command framing, reply decoding, and typed reply accessors.

pub mod reply;
pub mod resp_frame;
pub use reply::ScanPage;
pub use resp_frame::{Cmd, RespFrame, RespFrameCodec};
