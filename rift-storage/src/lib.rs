//! Storage layer: the process-wide keyspace shared by every connection.

pub mod keyspace;

pub use keyspace::Keyspace;
