//! RESP wire codec: incremental request decoding and reply encoding.
//!
//! This crate is pure byte manipulation. It owns no sockets and keeps no connection state
//! beyond what the caller threads through `parse_next_command`, so the connection processor
//! can treat it as a library.

pub mod decode;
pub mod encode;

pub use decode::{parse_next_command, Parsed};
