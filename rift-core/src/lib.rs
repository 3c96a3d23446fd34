//! Command layer: canonical frames and replies, the command registry, and keyspace dispatch.

pub mod command;
pub mod containers;
pub mod dispatch;
