// src/core/mod.rs

//! The engine: protocol and clients, sessions and cursors, the browser
//! operations, and the value conversion pipeline.

pub mod browser;
pub mod client;
pub mod convert;
pub mod errors;
pub mod events;
pub mod history;
pub mod protocol;
pub mod session;

pub use browser::Browser;
pub use errors::KeydeckError;
pub use protocol::{Cmd, RespFrame};
