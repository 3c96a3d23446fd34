//! Command registration and dispatch.
//!
//! Protocol parsing produces raw argument lists; the registry resolves them into `Command`
//! values carrying their table entry, and handlers execute against the keyspace dispatch
//! state. The registry is built once at startup and shared immutably by every connection;
//! there is no process-global mutable command table.

use crate::command::{CommandFrame, CommandReply};

#[path = "dispatch/parse_numbers.rs"]
mod parse_numbers;
#[path = "dispatch/state.rs"]
mod state;
#[path = "dispatch/handlers_string.rs"]
mod handlers_string;
#[path = "dispatch/handlers_keyspace.rs"]
mod handlers_keyspace;
#[path = "dispatch/handlers_counter.rs"]
mod handlers_counter;
#[path = "dispatch/handlers_admin.rs"]
mod handlers_admin;
#[path = "dispatch/registry.rs"]
mod registry;

pub use registry::CommandRegistry;
pub use state::DispatchState;

/// Signature every registered command handler implements.
pub type CommandHandler = fn(&CommandFrame, &mut DispatchState) -> CommandReply;

/// Argument-count rule checked before a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandArity {
    /// The handler requires exactly this many arguments.
    Exact(usize),
    /// The handler accepts this many arguments or more.
    AtLeast(usize),
}

/// One entry in the command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Uppercase name clients use to invoke the command.
    pub name: &'static str,
    /// Argument-count rule applied at parse time.
    pub arity: CommandArity,
    /// Whether execution may be slow or blocking and must run off the reactor.
    pub is_worker: bool,
    /// Execution callback.
    pub handler: CommandHandler,
}

#[cfg(test)]
#[path = "dispatch/tests.rs"]
mod tests;
