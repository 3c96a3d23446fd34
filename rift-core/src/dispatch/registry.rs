use super::handlers_admin::handle_debug;
use super::handlers_counter::{handle_incr, handle_incrby};
use super::handlers_keyspace::{
    handle_dbsize, handle_del, handle_exists, handle_flushall, handle_keys,
};
use super::handlers_string::{
    handle_append, handle_echo, handle_get, handle_ping, handle_set, handle_strlen,
};
use super::{CommandArity, CommandSpec};
use crate::command::{Command, CommandFrame};
use crate::containers::FastMap;

/// Immutable name → command table shared by every connection.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    entries: FastMap<String, CommandSpec>,
}

impl CommandRegistry {
    /// Creates a registry with no entries.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: FastMap::new(),
        }
    }

    /// Builds a registry preloaded with the built-in command set.
    #[must_use]
    pub fn with_builtin_commands() -> Self {
        let mut registry = Self::new();
        registry.register_connection_commands();
        registry.register_string_commands();
        registry.register_keyspace_commands();
        registry.register_counter_commands();
        registry.register_admin_commands();
        registry
    }

    fn register_connection_commands(&mut self) {
        self.register(CommandSpec {
            name: "PING",
            arity: CommandArity::AtLeast(0),
            is_worker: false,
            handler: handle_ping,
        });
        self.register(CommandSpec {
            name: "ECHO",
            arity: CommandArity::Exact(1),
            is_worker: false,
            handler: handle_echo,
        });
    }

    fn register_string_commands(&mut self) {
        self.register(CommandSpec {
            name: "GET",
            arity: CommandArity::Exact(1),
            is_worker: false,
            handler: handle_get,
        });
        self.register(CommandSpec {
            name: "SET",
            arity: CommandArity::Exact(2),
            is_worker: false,
            handler: handle_set,
        });
        self.register(CommandSpec {
            name: "STRLEN",
            arity: CommandArity::Exact(1),
            is_worker: false,
            handler: handle_strlen,
        });
        self.register(CommandSpec {
            name: "APPEND",
            arity: CommandArity::Exact(2),
            is_worker: false,
            handler: handle_append,
        });
    }

    fn register_keyspace_commands(&mut self) {
        self.register(CommandSpec {
            name: "DEL",
            arity: CommandArity::AtLeast(1),
            is_worker: false,
            handler: handle_del,
        });
        self.register(CommandSpec {
            name: "EXISTS",
            arity: CommandArity::AtLeast(1),
            is_worker: false,
            handler: handle_exists,
        });
        self.register(CommandSpec {
            name: "DBSIZE",
            arity: CommandArity::Exact(0),
            is_worker: false,
            handler: handle_dbsize,
        });
        self.register(CommandSpec {
            name: "FLUSHALL",
            arity: CommandArity::Exact(0),
            is_worker: false,
            handler: handle_flushall,
        });
        self.register(CommandSpec {
            name: "KEYS",
            arity: CommandArity::Exact(1),
            is_worker: true,
            handler: handle_keys,
        });
    }

    fn register_counter_commands(&mut self) {
        self.register(CommandSpec {
            name: "INCR",
            arity: CommandArity::Exact(1),
            is_worker: false,
            handler: handle_incr,
        });
        self.register(CommandSpec {
            name: "INCRBY",
            arity: CommandArity::Exact(2),
            is_worker: false,
            handler: handle_incrby,
        });
    }

    fn register_admin_commands(&mut self) {
        self.register(CommandSpec {
            name: "DEBUG",
            arity: CommandArity::AtLeast(1),
            is_worker: true,
            handler: handle_debug,
        });
    }

    /// Adds `spec` to the table, replacing any entry with the same name.
    pub fn register(&mut self, spec: CommandSpec) {
        let _ = self.entries.insert(spec.name.to_owned(), spec);
    }

    /// Resolves a raw argument list (command name first) into an executable command.
    ///
    /// Lookup misses and arity violations yield error commands rather than failures: the
    /// connection stays usable and the error text becomes the command's reply.
    #[must_use]
    pub fn parse(&self, args: &[Vec<u8>]) -> Command {
        let Some(raw_name) = args.first() else {
            return Command::Error("ERR empty command".to_owned());
        };
        let name = String::from_utf8_lossy(raw_name).to_ascii_uppercase();
        let Some(spec) = self.entries.get(&name) else {
            return Command::Error(format!(
                "ERR command '{}' not found",
                String::from_utf8_lossy(raw_name)
            ));
        };

        let arg_count = args.len() - 1;
        let arity_ok = match spec.arity {
            CommandArity::Exact(expected) => arg_count == expected,
            CommandArity::AtLeast(minimum) => arg_count >= minimum,
        };
        if !arity_ok {
            return Command::Error(format!(
                "ERR wrong number of arguments for '{}' command",
                spec.name
            ));
        }

        Command::Invoke {
            spec: *spec,
            frame: CommandFrame::new(spec.name, args[1..].to_vec()),
        }
    }
}
