//! Error model shared by every crate's public API.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type RiftResult<T> = Result<T, RiftError>;

/// High-level error categories used across the workspace.
///
/// Protocol violations are fatal to the offending connection; wake delivery failures are fatal
/// as well because the reactor can no longer be scheduled for that connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RiftError {
    /// A tunable was set to a value the runtime cannot honor.
    #[error("unusable configuration: {0}")]
    InvalidConfig(&'static str),

    /// An operation arrived while the runtime was in a state that cannot serve it.
    #[error("operation not allowed in current state: {0}")]
    InvalidState(&'static str),

    /// Bytes on the wire do not form a valid RESP frame.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A socket or filesystem operation failed underneath the runtime.
    #[error("i/o failure: {0}")]
    Io(String),

    /// Delivering a reactor wake-up failed; the connection must close.
    #[error("wake error: {0}")]
    Wake(String),
}
