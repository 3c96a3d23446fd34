//! Reactor-style network event loop for RESP ingress.
//!
//! One `mio::Poll` instance owns the listener and every accepted connection. Readiness events
//! advance per-connection parsing/execution through `CmdConn::on_data`; connection workers
//! signal readiness of background output through a `mio::Waker` plus a pending-token list,
//! which the reactor turns into empty `on_data` ticks.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use rift_common::error::{RiftError, RiftResult};
use tracing::debug;

use crate::app::ServerApp;
use crate::conn::{CmdConn, ConnAction, ConnWaker};

const RESP_LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const CONNECTION_TOKEN_START: usize = 2;
const READ_CHUNK_BYTES: usize = 8192;

/// Worker-side wake handle for one connection.
///
/// Pushes the connection token onto the shared pending list, then pokes the poll so the
/// reactor thread schedules an empty `on_data` tick for that connection.
struct PollWaker {
    connection_token: usize,
    pending: Arc<Mutex<Vec<usize>>>,
    poll_waker: Arc<Waker>,
}

impl ConnWaker for PollWaker {
    fn wake(&self) -> RiftResult<()> {
        match self.pending.lock() {
            Ok(mut pending) => pending.push(self.connection_token),
            Err(_poisoned) => {
                return Err(RiftError::Wake("reactor wake queue is poisoned".to_owned()));
            }
        }
        self.poll_waker
            .wake()
            .map_err(|error| RiftError::Wake(format!("deliver reactor wake failed: {error}")))
    }
}

/// Egress-buffer thresholds gating socket reads.
///
/// Once a connection buffers `pause_above` bytes of unflushed replies, its reads stop until
/// the buffer shrinks to `resume_below`; the kernel receive queue then applies TCP
/// backpressure on the peer.
#[derive(Debug, Clone, Copy)]
struct EgressLimits {
    pause_above: usize,
    resume_below: usize,
}

/// Where a connection stands in its life: serving traffic, flushing buffered replies ahead
/// of a close, closing unconditionally, or surrendering its socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnPhase {
    Serving,
    Draining,
    Closing,
    Detaching,
}

struct ReactorConnection {
    socket: TcpStream,
    processor: CmdConn,
    egress_buffer: Vec<u8>,
    phase: ConnPhase,
    read_gated: bool,
    interest: Interest,
}

impl ReactorConnection {
    fn new(socket: TcpStream, processor: CmdConn) -> Self {
        Self {
            socket,
            processor,
            egress_buffer: Vec::new(),
            phase: ConnPhase::Serving,
            read_gated: false,
            interest: Interest::READABLE,
        }
    }

    /// Schedules teardown once buffered replies have flushed. A connection already past
    /// `Serving` keeps its stronger phase.
    fn begin_drain(&mut self) {
        if self.phase == ConnPhase::Serving {
            self.phase = ConnPhase::Draining;
        }
    }

    /// Drops the connection at the next reap check, flushed or not.
    fn abort(&mut self) {
        self.phase = ConnPhase::Closing;
    }

    fn wants_read(&self) -> bool {
        self.phase == ConnPhase::Serving && !self.read_gated
    }

    fn ready_to_reap(&self) -> bool {
        match self.phase {
            ConnPhase::Closing => true,
            ConnPhase::Draining => self.egress_buffer.is_empty(),
            ConnPhase::Serving | ConnPhase::Detaching => false,
        }
    }

    /// Re-evaluates the read gate after the egress buffer grew or shrank.
    fn refresh_read_gate(&mut self, limits: EgressLimits) {
        let buffered = self.egress_buffer.len();
        self.read_gated = match (self.read_gated, buffered) {
            (true, len) if len <= limits.resume_below => false,
            (false, len) if len >= limits.pause_above => true,
            (gated, _) => gated,
        };
    }

    /// Poll interest matching the connection's current needs.
    fn desired_interest(&self) -> Interest {
        let mut wanted = if self.wants_read() {
            Interest::READABLE
        } else {
            Interest::WRITABLE
        };
        if !self.egress_buffer.is_empty() {
            wanted |= Interest::WRITABLE;
        }
        wanted
    }

    /// Folds one `on_data` result into the connection.
    fn absorb_pass(&mut self, out: Vec<u8>, action: ConnAction) {
        self.egress_buffer.extend_from_slice(&out);
        match action {
            ConnAction::Continue => {}
            ConnAction::Close => self.begin_drain(),
            ConnAction::Detach => self.phase = ConnPhase::Detaching,
        }
    }

    /// Writes as much buffered egress as the socket will take right now.
    fn flush_egress(&mut self, limits: EgressLimits) {
        let mut flushed = 0_usize;
        while flushed < self.egress_buffer.len() {
            match self.socket.write(&self.egress_buffer[flushed..]) {
                Ok(0) => {
                    self.abort();
                    break;
                }
                Ok(written) => flushed += written,
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_error) => {
                    self.abort();
                    break;
                }
            }
        }
        if flushed > 0 {
            let _ = self.egress_buffer.drain(..flushed);
        }
        self.refresh_read_gate(limits);
    }
}

/// Copyable snapshot of one poll event, taken so handlers can borrow the reactor freely.
#[derive(Debug, Clone, Copy)]
struct Readiness {
    token: Token,
    readable: bool,
    writable: bool,
    hangup: bool,
}

impl Readiness {
    fn from_event(event: &mio::event::Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            hangup: event.is_read_closed() || event.is_write_closed() || event.is_error(),
        }
    }
}

/// Single-threaded event loop owning the RESP listener, the wake channel, and every live
/// connection.
pub struct ServerReactor {
    poll: Poll,
    events: Events,
    ready: Vec<Readiness>,
    listener: TcpListener,
    pending_wakes: Arc<Mutex<Vec<usize>>>,
    poll_waker: Arc<Waker>,
    next_token: usize,
    egress_limits: EgressLimits,
    connections: HashMap<Token, ReactorConnection>,
}

impl ServerReactor {
    /// Binds the RESP listener and registers it plus the wake channel in the poller.
    ///
    /// # Errors
    ///
    /// Returns `RiftError::Io` when binding or poll registration fails, and
    /// `RiftError::InvalidConfig` for unusable watermarks.
    pub fn bind(addr: SocketAddr, app: &ServerApp) -> RiftResult<Self> {
        let poll =
            Poll::new().map_err(|error| RiftError::Io(format!("create reactor poll: {error}")))?;
        let (pause_above, resume_below) = app.config().normalized_watermarks()?;

        let mut listener = TcpListener::bind(addr)
            .map_err(|error| RiftError::Io(format!("bind RESP listener on {addr}: {error}")))?;
        poll.registry()
            .register(&mut listener, RESP_LISTENER_TOKEN, Interest::READABLE)
            .map_err(|error| RiftError::Io(format!("register RESP listener: {error}")))?;

        let poll_waker = Waker::new(poll.registry(), WAKER_TOKEN)
            .map_err(|error| RiftError::Io(format!("create reactor wake handle: {error}")))?;

        let max_events = app.config().max_events.max(8);
        Ok(Self {
            poll,
            events: Events::with_capacity(max_events),
            ready: Vec::with_capacity(max_events),
            listener,
            pending_wakes: Arc::new(Mutex::new(Vec::new())),
            poll_waker: Arc::new(poll_waker),
            next_token: CONNECTION_TOKEN_START,
            egress_limits: EgressLimits {
                pause_above,
                resume_below,
            },
            connections: HashMap::new(),
        })
    }

    /// Runs one poll cycle: accept new sockets, advance ready connections, service worker
    /// wakes. Returns how many events the cycle saw.
    ///
    /// # Errors
    ///
    /// Returns `RiftError::Io` if the poll wait or socket registration fails.
    pub fn poll_once(&mut self, app: &ServerApp, timeout: Option<Duration>) -> RiftResult<usize> {
        self.poll
            .poll(&mut self.events, timeout)
            .map_err(|error| RiftError::Io(format!("reactor poll wait: {error}")))?;
        self.ready.clear();
        for event in &self.events {
            self.ready.push(Readiness::from_event(event));
        }

        let cycle_events = self.ready.len();
        for index in 0..cycle_events {
            let readiness = self.ready[index];
            match readiness.token {
                RESP_LISTENER_TOKEN => self.accept_new_connections(app)?,
                WAKER_TOKEN => self.service_pending_wakes()?,
                _ => self.advance_connection(readiness)?,
            }
        }

        Ok(cycle_events)
    }

    /// Serves connections until polling fails.
    ///
    /// # Errors
    ///
    /// Propagates the first reactor-level failure.
    pub fn run(&mut self, app: &ServerApp) -> RiftResult<()> {
        loop {
            let _ = self.poll_once(app, None)?;
        }
    }

    /// Bound address of the RESP listener.
    ///
    /// # Errors
    ///
    /// Returns `RiftError::Io` when the listener address cannot be queried.
    pub fn local_addr(&self) -> RiftResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|error| RiftError::Io(format!("query listener address: {error}")))
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn accept_new_connections(&mut self, app: &ServerApp) -> RiftResult<()> {
        loop {
            let (mut socket, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(error) => {
                    return Err(RiftError::Io(format!("accept on RESP listener: {error}")));
                }
            };

            let token = self.next_connection_token();
            self.poll
                .registry()
                .register(&mut socket, token, Interest::READABLE)
                .map_err(|error| {
                    RiftError::Io(format!("register accepted socket {}: {error}", token.0))
                })?;
            let _ = socket.set_nodelay(true);
            let waker = Arc::new(PollWaker {
                connection_token: token.0,
                pending: Arc::clone(&self.pending_wakes),
                poll_waker: Arc::clone(&self.poll_waker),
            });
            let processor = app.new_connection(waker);
            debug!(token = token.0, %peer, "connection accepted");
            let _ = self
                .connections
                .insert(token, ReactorConnection::new(socket, processor));
        }
    }

    /// Turns queued worker wakes into empty `on_data` ticks on their connections.
    fn service_pending_wakes(&mut self) -> RiftResult<()> {
        let woken = match self.pending_wakes.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_poisoned) => Vec::new(),
        };
        for raw_token in woken {
            self.advance_connection(Readiness {
                token: Token(raw_token),
                readable: false,
                writable: true,
                hangup: false,
            })?;
        }
        Ok(())
    }

    fn advance_connection(&mut self, readiness: Readiness) -> RiftResult<()> {
        let Some(mut connection) = self.connections.remove(&readiness.token) else {
            return Ok(());
        };

        if readiness.hangup {
            connection.begin_drain();
        }

        // A wake arrives as writable-only readiness; the empty pass below collects whatever
        // the connection worker published.
        if connection.phase == ConnPhase::Serving && !readiness.readable {
            let (out, action) = connection.processor.on_data(&[]);
            connection.absorb_pass(out, action);
            connection.refresh_read_gate(self.egress_limits);
        }

        if readiness.readable && connection.wants_read() {
            Self::pump_socket_reads(&mut connection, self.egress_limits);
        }
        if readiness.writable && !connection.egress_buffer.is_empty() {
            connection.flush_egress(self.egress_limits);
        }

        if connection.phase == ConnPhase::Detaching {
            return self.release_detached(readiness.token, connection);
        }
        if connection.ready_to_reap() {
            return self.reap_connection(readiness.token, connection);
        }

        self.sync_poll_interest(readiness.token, &mut connection)?;
        let _ = self.connections.insert(readiness.token, connection);
        Ok(())
    }

    /// Reads socket bytes into the processor until the socket runs dry, the read gate arms,
    /// or the connection leaves the serving phase.
    fn pump_socket_reads(connection: &mut ReactorConnection, limits: EgressLimits) {
        let mut read_chunk = [0_u8; READ_CHUNK_BYTES];
        loop {
            match connection.socket.read(&mut read_chunk) {
                Ok(0) => {
                    connection.begin_drain();
                    return;
                }
                Ok(received) => {
                    let (out, action) = connection.processor.on_data(&read_chunk[..received]);
                    connection.absorb_pass(out, action);
                    connection.refresh_read_gate(limits);
                    if connection.phase != ConnPhase::Serving || connection.read_gated {
                        return;
                    }
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(_error) => {
                    connection.abort();
                    return;
                }
            }
        }
    }

    fn sync_poll_interest(
        &self,
        token: Token,
        connection: &mut ReactorConnection,
    ) -> RiftResult<()> {
        let wanted = connection.desired_interest();
        if wanted == connection.interest {
            return Ok(());
        }

        self.poll
            .registry()
            .reregister(&mut connection.socket, token, wanted)
            .map_err(|error| {
                RiftError::Io(format!(
                    "update poll interest for connection {}: {error}",
                    token.0
                ))
            })?;
        connection.interest = wanted;
        Ok(())
    }

    fn release_detached(&self, token: Token, mut connection: ReactorConnection) -> RiftResult<()> {
        self.poll
            .registry()
            .deregister(&mut connection.socket)
            .map_err(|error| {
                RiftError::Io(format!(
                    "unregister connection {} before detach: {error}",
                    token.0
                ))
            })?;
        let ReactorConnection {
            socket,
            mut processor,
            ..
        } = connection;
        debug!(token = token.0, "connection detached");
        processor.on_detach(socket);
        processor.on_closed();
        Ok(())
    }

    fn reap_connection(&self, token: Token, mut connection: ReactorConnection) -> RiftResult<()> {
        self.poll
            .registry()
            .deregister(&mut connection.socket)
            .map_err(|error| {
                RiftError::Io(format!(
                    "unregister connection {} on close: {error}",
                    token.0
                ))
            })?;
        if let Some(reason) = connection.processor.close_reason() {
            debug!(token = token.0, %reason, "connection closed");
        } else {
            debug!(token = token.0, "connection closed");
        }
        connection.processor.on_closed();
        Ok(())
    }

    fn next_connection_token(&mut self) -> Token {
        let assigned = Token(self.next_token);
        self.next_token += 1;
        assigned
    }
}

#[cfg(test)]
#[path = "network/tests.rs"]
mod tests;
