//! Identifier types shared across the server runtime.

/// Monotonic logical connection id allocated on accept.
pub type ConnectionId = u64;
