//! Process-level wiring: configuration, shared keyspace, command registry, bootstrap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rift_common::config::RuntimeConfig;
use rift_common::error::RiftResult;
use rift_core::dispatch::CommandRegistry;
use rift_storage::Keyspace;
use tracing::info;

use crate::conn::{CmdConn, ConnWaker};
use crate::network::ServerReactor;

/// Shared server state handed to the reactor.
pub struct ServerApp {
    config: RuntimeConfig,
    registry: Arc<CommandRegistry>,
    keyspace: Arc<Keyspace>,
    next_connection_id: AtomicU64,
}

impl ServerApp {
    /// Builds the app from process configuration.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            registry: Arc::new(CommandRegistry::with_builtin_commands()),
            keyspace: Arc::new(Keyspace::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Process configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Creates the command processor for one accepted connection.
    #[must_use]
    pub fn new_connection(&self, waker: Arc<dyn ConnWaker>) -> CmdConn {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        CmdConn::new(
            id,
            Arc::clone(&self.registry),
            Arc::clone(&self.keyspace),
            waker,
            self.config.normalized_backlog_cap(),
        )
    }

    /// One-line startup description for operator logs.
    #[must_use]
    pub fn startup_summary(&self) -> String {
        format!(
            "rift-server listening on port {}, backlog cap {} groups",
            self.config.resp_port,
            self.config.normalized_backlog_cap()
        )
    }
}

/// Starts the server process: bind, log, serve.
///
/// # Errors
///
/// Returns `RiftError::Io` when listener bootstrap or reactor polling fails.
pub fn run() -> RiftResult<()> {
    let config = RuntimeConfig::default();
    let bind_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.resp_port));
    let app = ServerApp::new(config);
    let mut reactor = ServerReactor::bind(bind_addr, &app)?;
    info!("{}", app.startup_summary());
    reactor.run(&app)
}
