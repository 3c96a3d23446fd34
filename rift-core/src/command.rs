//! Canonical command frame, reply, and parsed-command types.

use rift_protocol::encode;

use crate::dispatch::{CommandSpec, DispatchState};

/// Command payload representation produced by registry parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command name in uppercase canonical form (e.g. `SET`, `KEYS`).
    pub name: String,
    /// Raw byte arguments preserving wire-level payload, command name excluded.
    pub args: Vec<Vec<u8>>,
}

impl CommandFrame {
    /// Creates a command frame from a command name and argument list.
    #[must_use]
    pub fn new(name: impl Into<String>, args: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Canonical command reply representation.
///
/// The reply enum is protocol-neutral; encoding to RESP happens through `append_resp` so
/// executing code can build one contiguous output buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    /// `+OK` style replies.
    SimpleString(String),
    /// `$<len> ...` style binary-safe payload.
    BulkString(Vec<u8>),
    /// RESP null bulk string (`$-1`).
    Null,
    /// RESP integer reply (`:<n>`).
    Integer(i64),
    /// RESP array reply (`*<n> ...`).
    Array(Vec<CommandReply>),
    /// `-<msg>` reply; the message carries its error code (`ERR ...`).
    Error(String),
}

impl CommandReply {
    /// Appends the RESP encoding of this reply to `out`.
    pub fn append_resp(&self, out: &mut Vec<u8>) {
        match self {
            Self::SimpleString(value) => encode::append_simple(out, value),
            Self::BulkString(value) => encode::append_bulk(out, value),
            Self::Null => encode::append_null(out),
            Self::Integer(value) => encode::append_integer(out, *value),
            Self::Array(items) => {
                encode::append_array(out, items.len());
                for item in items {
                    item.append_resp(out);
                }
            }
            Self::Error(message) => encode::append_error(out, message),
        }
    }
}

/// One parsed protocol request as seen by the connection processor.
///
/// Error commands are first-class: an unknown name or bad arity produces a command that replies
/// with its error text when executed, and aborts a transaction during the queue phase.
#[derive(Debug, Clone)]
pub enum Command {
    /// A registered command bound to its table entry.
    Invoke {
        /// Registry entry resolved at parse time.
        spec: CommandSpec,
        /// Arguments for the handler.
        frame: CommandFrame,
    },
    /// A parse/lookup failure carrying its reply message.
    Error(String),
    /// An inline `+OK` acknowledgement (used by DISCARD).
    Ok,
}

impl Command {
    /// Whether this command must execute on the connection worker.
    #[must_use]
    pub fn is_worker(&self) -> bool {
        match self {
            Self::Invoke { spec, .. } => spec.is_worker,
            Self::Error(_) | Self::Ok => false,
        }
    }

    /// Whether this command is an error placeholder.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The reply message of an error command, without touching keyspace state.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            Self::Invoke { .. } | Self::Ok => None,
        }
    }

    /// Command name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Invoke { spec, .. } => spec.name,
            Self::Error(_) => "error",
            Self::Ok => "ok",
        }
    }

    /// Executes the command against `state` and appends its RESP reply to `out`.
    pub fn append_reply(&self, state: &mut DispatchState, out: &mut Vec<u8>) {
        match self {
            Self::Invoke { spec, frame } => (spec.handler)(frame, state).append_resp(out),
            Self::Error(message) => encode::append_error(out, message),
            Self::Ok => encode::append_ok(out),
        }
    }
}
