//! Per-connection command processor.
//!
//! Every command must happen in order and produce a single RESP reply, except MULTI groups
//! which additionally acknowledge each queued command. Commands classified as worker commands
//! must not run on the reactor thread, so each connection can own one background worker that
//! drains transferred command groups and wakes the reactor when output is ready.
//!
//! Two ownership states govern all mutation of the backlog, the group under construction, and
//! the output buffer being built:
//!
//! 1. `Reactor`: the event loop may parse, dispatch, and execute freely.
//! 2. `Worker`: execution happens in the background; the reactor only parses and appends.
//!
//! The ownership token is a single atomic; the only other cross-thread channels are two
//! single-writer SPSC queues (groups in, output buffers out) and the monotonic wake counters.
//! The worker hands ownership back with a release store before its final wake, so the
//! reactor's acquire load at entry observes the transfer.

use std::sync::atomic::{AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rift_common::error::{RiftError, RiftResult};
use rift_common::ids::ConnectionId;
use rift_common::spsc;
use rift_core::command::Command;
use rift_core::dispatch::CommandRegistry;
use rift_protocol::decode::{parse_next_command, Parsed};
use rift_protocol::encode;
use rift_storage::Keyspace;
use tracing::debug;

const OWNER_REACTOR: u8 = 0;
const OWNER_WORKER: u8 = 1;

/// What the reactor should do with the connection after an `on_data` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnAction {
    /// Keep serving the connection.
    #[default]
    Continue,
    /// Flush pending output, then close the socket.
    Close,
    /// Hand the raw stream to `on_detach`.
    Detach,
}

/// Reactor wake-up handle given to the connection worker.
///
/// `wake` must schedule an empty `on_data` tick for this connection on the reactor thread.
/// Failures are fatal to the connection.
pub trait ConnWaker: Send + Sync {
    /// Schedules the reactor to revisit this connection.
    ///
    /// # Errors
    ///
    /// Returns `RiftError::Wake` when the reactor can no longer be signalled.
    fn wake(&self) -> RiftResult<()>;
}

/// Per-connection counters, updated with relaxed atomics; readers may observe slight skew.
#[derive(Debug, Default)]
pub struct ConnStats {
    /// Reactor passes that observed at least one pending worker wake.
    pub wakes: AtomicU64,
    /// Commands executed (both owners).
    pub commands: AtomicU64,
    /// Commands executed on the worker.
    pub worker_commands: AtomicU64,
    /// Total worker execution time.
    pub worker_duration_ns: AtomicU64,
    /// Bytes received from the socket.
    pub ingress_bytes: AtomicU64,
    /// Bytes handed back to the reactor for egress.
    pub egress_bytes: AtomicU64,
}

/// An ordered batch of commands dispatched as one unit.
///
/// A group is either wholly reactor-run or wholly worker-run: one worker command taints the
/// whole group. MULTI groups additionally track how many `+QUEUED` acknowledgements have been
/// emitted (`qidx`, where `None` means even the leading `+OK` is still owed).
#[derive(Debug, Default)]
struct CmdGroup {
    is_multi: bool,
    is_worker: bool,
    qidx: Option<usize>,
    list: Vec<Command>,
}

impl CmdGroup {
    fn size(&self) -> usize {
        self.list.len()
    }

    fn clear(&mut self) {
        self.is_multi = false;
        self.is_worker = false;
        self.qidx = None;
        // Keep the allocation for reuse.
        self.list.clear();
    }

    fn begin_multi(&mut self) {
        self.is_multi = true;
        self.qidx = None;
    }

    fn push(&mut self, command: Command) {
        self.is_worker |= command.is_worker();
        self.list.push(command);
    }

    /// Emits the acknowledgements the MULTI contract requires before EXEC.
    ///
    /// Returns `false` when a queued error command aborts the transaction; the group is
    /// cleared and the dispatcher must skip it.
    fn append_queue_acks(&mut self, out: &mut Vec<u8>) -> bool {
        let mut index = match self.qidx {
            None => {
                encode::append_ok(out);
                0
            }
            Some(index) => index,
        };

        while index < self.list.len() {
            if let Some(message) = self.list[index].error_message() {
                encode::append_error(out, message);
                self.clear();
                return false;
            }
            encode::append_queued(out);
            index += 1;
        }
        self.qidx = Some(index);
        true
    }
}

/// Executes one group, appending every reply to `out`.
///
/// MULTI groups execute under one keyspace guard and wrap their replies in a single array;
/// plain groups lock per command so a slow member never starves other connections.
fn execute_group(keyspace: &Keyspace, stats: &ConnStats, group: &mut CmdGroup, out: &mut Vec<u8>) {
    if group.is_multi {
        if !group.append_queue_acks(out) {
            return;
        }
        encode::append_array(out, group.size());
        keyspace.with_state(|state| {
            for command in &group.list {
                command.append_reply(state, out);
            }
        });
    } else {
        execute_commands(keyspace, &group.list, out);
    }
    stats
        .commands
        .fetch_add(group.size() as u64, Ordering::Relaxed);
}

fn execute_commands(keyspace: &Keyspace, commands: &[Command], out: &mut Vec<u8>) {
    for command in commands {
        keyspace.with_state(|state| command.append_reply(state, out));
    }
}

enum WorkerMsg {
    Group(Box<CmdGroup>),
    Stop,
}

/// State shared between the reactor-side connection and its background worker.
#[derive(Debug)]
struct ConnShared {
    /// Which party may mutate connection state: `OWNER_REACTOR` or `OWNER_WORKER`.
    ownership: AtomicU8,
    /// Groups queued to the worker and not yet executed (stop sentinel included).
    counter: AtomicI32,
    /// Output buffers published and not yet drained by the reactor.
    out_count: AtomicI32,
    /// Monotonic count of worker wake signals.
    wakes: AtomicU64,
    /// Last `wakes` value the reactor has drained up to.
    wake_snapshot: AtomicU64,
    /// Unix nanos since the worker started waiting for work; zero while executing.
    waiting_since_ns: AtomicU64,
    stats: ConnStats,
    /// First wake delivery failure; fatal to the connection.
    wake_error: OnceLock<RiftError>,
}

impl ConnShared {
    fn new() -> Self {
        Self {
            ownership: AtomicU8::new(OWNER_REACTOR),
            counter: AtomicI32::new(0),
            out_count: AtomicI32::new(0),
            wakes: AtomicU64::new(0),
            wake_snapshot: AtomicU64::new(0),
            waiting_since_ns: AtomicU64::new(0),
            stats: ConnStats::default(),
            wake_error: OnceLock::new(),
        }
    }
}

/// Reactor-side handle on the lazily spawned background worker.
struct ConnWorker {
    open: bool,
    group_tx: Option<spsc::Sender<WorkerMsg>>,
    out_rx: Option<spsc::Receiver<Vec<u8>>>,
    join: Option<JoinHandle<()>>,
}

impl ConnWorker {
    fn idle() -> Self {
        Self {
            open: false,
            group_tx: None,
            out_rx: None,
            join: None,
        }
    }
}

/// One connection's command processor, driven by the reactor through `on_data`.
pub struct CmdConn {
    id: ConnectionId,
    registry: Arc<CommandRegistry>,
    keyspace: Arc<Keyspace>,
    waker: Arc<dyn ConnWaker>,
    max_backlog: usize,

    action: ConnAction,
    close_reason: Option<RiftError>,
    done: bool,

    /// Bytes of an incomplete frame carried to the next `on_data` call. Reactor-owned.
    leftovers: Vec<u8>,
    /// Groups awaiting dispatch, in arrival order.
    backlog: Vec<Box<CmdGroup>>,
    /// Group under construction by the current parse pass.
    next: Box<CmdGroup>,
    /// Argument scratch reused across parse iterations.
    args_scratch: Vec<Vec<u8>>,

    shared: Arc<ConnShared>,
    worker: ConnWorker,
}

impl CmdConn {
    /// Builds the processor for one accepted connection. Ownership starts at the reactor.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        registry: Arc<CommandRegistry>,
        keyspace: Arc<Keyspace>,
        waker: Arc<dyn ConnWaker>,
        max_backlog: usize,
    ) -> Self {
        Self {
            id,
            registry,
            keyspace,
            waker,
            max_backlog: max_backlog.max(1),
            action: ConnAction::Continue,
            close_reason: None,
            done: false,
            leftovers: Vec::new(),
            backlog: Vec::new(),
            next: Box::default(),
            args_scratch: Vec::new(),
            shared: Arc::new(ConnShared::new()),
            worker: ConnWorker::idle(),
        }
    }

    /// Per-connection statistics.
    #[must_use]
    pub fn stats(&self) -> &ConnStats {
        &self.shared.stats
    }

    /// Unix nanos since the worker began waiting for work; zero while it is executing or
    /// stopped. Observability only.
    #[must_use]
    pub fn worker_waiting_since_ns(&self) -> u64 {
        self.shared.waiting_since_ns.load(Ordering::Relaxed)
    }

    /// Reason recorded for a fatal close, if any.
    #[must_use]
    pub fn close_reason(&self) -> Option<&RiftError> {
        self.close_reason.as_ref()
    }

    /// Requests connection close from outside the reactor pass.
    ///
    /// # Errors
    ///
    /// Returns the wake delivery failure, which itself forces a close on the next pass.
    pub fn close(&mut self) -> RiftResult<()> {
        self.action = ConnAction::Close;
        self.waker.wake()
    }

    /// Requests a raw-stream detach.
    ///
    /// # Errors
    ///
    /// Returns the wake delivery failure, which forces a close instead.
    pub fn detach(&mut self) -> RiftResult<()> {
        self.action = ConnAction::Detach;
        self.waker.wake()
    }

    /// Consumes socket bytes (or an empty wake tick), returning reply bytes and the action
    /// the reactor must take. Not thread safe: only the reactor calls this.
    pub fn on_data(&mut self, input_bytes: &[u8]) -> (Vec<u8>, ConnAction) {
        let mut out = Vec::new();
        let mut action = self.action;

        if let Some(error) = self.shared.wake_error.get() {
            if self.close_reason.is_none() {
                self.close_reason = Some(error.clone());
            }
            self.action = ConnAction::Close;
            action = ConnAction::Close;
        }

        let carried = std::mem::take(&mut self.leftovers);
        let owned_input: Vec<u8>;
        let mut remaining: &[u8] = if input_bytes.is_empty() {
            // Wake tick: flush leftovers.
            owned_input = carried;
            &owned_input
        } else {
            self.shared
                .stats
                .ingress_bytes
                .fetch_add(input_bytes.len() as u64, Ordering::Relaxed);
            if carried.is_empty() {
                input_bytes
            } else {
                let mut joined = carried;
                joined.extend_from_slice(input_bytes);
                owned_input = joined;
                &owned_input
            }
        };

        self.drain_worker_output(&mut out);

        // Snapshot the working mode only after draining: consuming a wake synchronizes with
        // the worker's counter bump, so a caught-up hand-back that rode on this wake is
        // visible here. Loading earlier could swallow the final wake while still seeing
        // worker ownership, stranding the backlog with no wake left to drain it.
        let ownership = self.shared.ownership.load(Ordering::Acquire);

        if action == ConnAction::Close {
            return (out, action);
        }

        // Defer parsing entirely while the group backlog is at capacity; unread bytes stay in
        // `leftovers`, which is what pushes backpressure onto the TCP window.
        if !remaining.is_empty() && self.pending_group_count() < self.max_backlog {
            let mut scratch = std::mem::take(&mut self.args_scratch);
            loop {
                match parse_next_command(remaining, &mut scratch) {
                    Err(error) => {
                        encode::append_error(&mut out, &format!("ERR {error}"));
                        self.close_reason = Some(error);
                        self.action = ConnAction::Close;
                        self.args_scratch = scratch;
                        return (out, ConnAction::Close);
                    }
                    Ok(Parsed::Incomplete) => break,
                    Ok(Parsed::Complete { packet: _, tail }) => {
                        remaining = tail;
                        if scratch.is_empty() {
                            continue;
                        }
                        self.assemble_command(&scratch);
                    }
                }
            }
            self.args_scratch = scratch;
        }

        // Close out the group under construction.
        if self.next.size() > 0 && !self.next.is_multi {
            // Fast path: nothing queued anywhere and the group is reactor-runnable, so skip
            // the backlog allocation and execute in place. Requires reactor ownership or the
            // reply would overtake worker output still in flight.
            if ownership == OWNER_REACTOR && !self.next.is_worker && self.backlog.is_empty() {
                execute_group(&self.keyspace, &self.shared.stats, &mut self.next, &mut out);
                self.next.clear();
            } else {
                self.backlog.push(std::mem::take(&mut self.next));
            }
        }

        if ownership == OWNER_REACTOR {
            if self.backlog.is_empty() {
                if self.next.is_multi {
                    let _ = self.next.append_queue_acks(&mut out);
                }
            } else {
                let transfer_from = self.drain_backlog_on_reactor(&mut out);

                if let Some(from) = transfer_from {
                    // Hand over before the first enqueue becomes visible to the worker.
                    self.shared.ownership.store(OWNER_WORKER, Ordering::Release);

                    let mut transferred = self.backlog.split_off(from);
                    self.backlog.clear();
                    for group in transferred.drain(..) {
                        self.send_to_worker(group);
                    }
                } else {
                    self.backlog.clear();
                    if self.next.is_multi {
                        let _ = self.next.append_queue_acks(&mut out);
                    }
                }
            }
        }

        if !remaining.is_empty() {
            self.leftovers.extend_from_slice(remaining);
        }

        self.shared
            .stats
            .egress_bytes
            .fetch_add(out.len() as u64, Ordering::Relaxed);

        (out, action)
    }

    /// Reactor entry hook: collect buffers the worker published since the last pass.
    fn drain_worker_output(&mut self, out: &mut Vec<u8>) {
        let wake_snapshot = self.shared.wake_snapshot.load(Ordering::Acquire);
        let wakes = self.shared.wakes.load(Ordering::Acquire);
        if wake_snapshot >= wakes {
            return;
        }

        self.shared.stats.wakes.fetch_add(1, Ordering::Relaxed);
        self.shared.wake_snapshot.store(wakes, Ordering::Release);

        let published = self.shared.out_count.load(Ordering::Acquire);
        if published <= 0 {
            return;
        }
        let Some(out_rx) = self.worker.out_rx.as_mut() else {
            return;
        };
        // The counter is bumped only after its buffer is linked into the queue, so exactly
        // `published` receives succeed without waiting.
        for _ in 0..published {
            if let Some(buffer) = out_rx.try_recv() {
                out.extend_from_slice(&buffer);
            }
        }
        let _ = self.shared.out_count.fetch_sub(published, Ordering::AcqRel);
    }

    fn pending_group_count(&self) -> usize {
        let queued = self.shared.counter.load(Ordering::Relaxed);
        self.backlog.len() + usize::try_from(queued).unwrap_or(0)
    }

    /// Routes one parsed argument list into the group under construction, handling the
    /// transactional control words.
    fn assemble_command(&mut self, args: &[Vec<u8>]) {
        if args.len() == 1 {
            let token = args[0].as_slice();
            if token.eq_ignore_ascii_case(b"multi") {
                if self.next.is_multi {
                    self.next
                        .push(Command::Error("ERR multi cannot nest".to_owned()));
                } else {
                    if self.next.size() > 0 {
                        self.backlog.push(std::mem::take(&mut self.next));
                    }
                    self.next.begin_multi();
                }
                return;
            }
            if token.eq_ignore_ascii_case(b"exec") {
                if self.next.is_multi {
                    self.backlog.push(std::mem::take(&mut self.next));
                } else {
                    self.next
                        .push(Command::Error("ERR exec not expected".to_owned()));
                }
                return;
            }
            if token.eq_ignore_ascii_case(b"discard") {
                if self.next.is_multi {
                    self.next.clear();
                    self.next.push(Command::Ok);
                } else {
                    self.next
                        .push(Command::Error("ERR discard not expected".to_owned()));
                }
                return;
            }
        } else if args[1].first() == Some(&b'=') {
            // Variable-binding form (`$x = GET key`). Reserved: accepted here and resolved
            // through the registry like any other name until the binding design lands.
        }

        let command = self.registry.parse(args);
        self.next.push(command);
    }

    /// Walks the backlog in order, executing reactor-runnable groups. Returns the index of
    /// the first group that must transfer to the worker, with that group's reactor-runnable
    /// prefix already executed and trimmed.
    fn drain_backlog_on_reactor(&mut self, out: &mut Vec<u8>) -> Option<usize> {
        let mut index = 0;
        while index < self.backlog.len() {
            let group = &mut self.backlog[index];
            if group.is_worker {
                if group.is_multi {
                    if !group.append_queue_acks(out) {
                        // Aborted during the queue phase; the group is cleared.
                        index += 1;
                        continue;
                    }
                } else {
                    // Execute the non-worker prefix inline before surrendering ownership;
                    // those replies flush now instead of after the worker round trip.
                    let split = group
                        .list
                        .iter()
                        .position(Command::is_worker)
                        .unwrap_or(0);
                    if split > 0 {
                        execute_commands(&self.keyspace, &group.list[..split], out);
                        self.shared
                            .stats
                            .commands
                            .fetch_add(split as u64, Ordering::Relaxed);
                        let _ = group.list.drain(..split);
                    }
                }
                return Some(index);
            }

            if group.is_multi && !group.append_queue_acks(out) {
                index += 1;
                continue;
            }
            execute_group(&self.keyspace, &self.shared.stats, group, out);
            index += 1;
        }
        None
    }

    /// Queues one group for background execution, spawning the worker on first use.
    fn send_to_worker(&mut self, group: Box<CmdGroup>) {
        let _ = self.shared.counter.fetch_add(1, Ordering::AcqRel);
        self.ensure_worker();
        if let Some(group_tx) = self.worker.group_tx.as_mut() {
            group_tx.send(WorkerMsg::Group(group));
        }
    }

    fn ensure_worker(&mut self) {
        if self.worker.open {
            return;
        }
        // Only one background task may ever run for a connection; wait out a stopped
        // predecessor before spawning its replacement.
        if let Some(join) = self.worker.join.take() {
            let _ = join.join();
        }

        let (group_tx, group_rx) = spsc::channel::<WorkerMsg>();
        let (out_tx, out_rx) = spsc::channel::<Vec<u8>>();
        let shared = Arc::clone(&self.shared);
        let keyspace = Arc::clone(&self.keyspace);
        let waker = Arc::clone(&self.waker);

        let spawned = thread::Builder::new()
            .name(format!("rift-conn-worker-{}", self.id))
            .spawn(move || worker_thread_main(&shared, &keyspace, waker.as_ref(), group_rx, out_tx));
        match spawned {
            Ok(handle) => {
                debug!(connection = self.id, "connection worker started");
                self.worker.open = true;
                self.worker.group_tx = Some(group_tx);
                self.worker.out_rx = Some(out_rx);
                self.worker.join = Some(handle);
            }
            Err(error) => {
                self.close_reason = Some(RiftError::Io(format!(
                    "spawn connection worker failed: {error}"
                )));
                self.action = ConnAction::Close;
            }
        }
    }

    /// Stops the background worker and waits for it to exit. Safe to call repeatedly.
    pub fn stop_worker(&mut self) {
        if !self.worker.open {
            return;
        }
        let _ = self.shared.counter.fetch_add(1, Ordering::AcqRel);
        if let Some(group_tx) = self.worker.group_tx.as_mut() {
            group_tx.send(WorkerMsg::Stop);
        }
        self.worker.open = false;
        if let Some(join) = self.worker.join.take() {
            let _ = join.join();
        }
        self.worker.group_tx = None;
        self.worker.out_rx = None;
        debug!(connection = self.id, "connection worker stopped");
    }

    /// Socket-closed hook: tears down the worker. In-flight output is discarded.
    pub fn on_closed(&mut self) {
        self.done = true;
        self.action = ConnAction::Close;
        self.stop_worker();
    }

    /// Detach hook: the processor takes ownership of the raw stream and closes it.
    pub fn on_detach<Stream>(&mut self, stream: Stream) {
        drop(stream);
    }
}

impl Drop for CmdConn {
    fn drop(&mut self) {
        if !self.done {
            self.on_closed();
        }
    }
}

fn now_unix_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
}

/// Background loop: drain transferred groups, publish output, hand ownership back when
/// caught up, and wake the reactor at most once per undrained batch.
fn worker_thread_main(
    shared: &ConnShared,
    keyspace: &Keyspace,
    waker: &dyn ConnWaker,
    mut group_rx: spsc::Receiver<WorkerMsg>,
    mut out_tx: spsc::Sender<Vec<u8>>,
) {
    loop {
        shared
            .waiting_since_ns
            .store(now_unix_ns(), Ordering::Relaxed);
        let message = group_rx.recv();
        shared.waiting_since_ns.store(0, Ordering::Relaxed);

        let mut group = match message {
            WorkerMsg::Stop => {
                let _ = shared.counter.fetch_sub(1, Ordering::AcqRel);
                return;
            }
            WorkerMsg::Group(group) => group,
        };

        let group_size = group.size() as u64;
        let started = Instant::now();
        let mut buffer = Vec::new();
        execute_group(keyspace, &shared.stats, &mut group, &mut buffer);
        group.clear();

        shared
            .stats
            .worker_commands
            .fetch_add(group_size, Ordering::Relaxed);
        shared.stats.worker_duration_ns.fetch_add(
            u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );

        let queued_after = shared.counter.fetch_sub(1, Ordering::AcqRel) - 1;

        // Publish before bumping the counter so the reactor never waits on a receive.
        out_tx.send(buffer);
        let _ = shared.out_count.fetch_add(1, Ordering::Release);

        if queued_after == 0 {
            // Caught up: hand the connection back before the wake edge. The reactor loads
            // ownership after consuming the wake, so this store is guaranteed visible to
            // whichever pass drains this batch.
            shared.ownership.store(OWNER_REACTOR, Ordering::Release);
        }

        let wakes = shared.wakes.fetch_add(1, Ordering::AcqRel) + 1;

        // Skip the syscall when the reactor has not yet consumed the previous wake; its
        // pending pass will pick this batch up too.
        if shared.wake_snapshot.load(Ordering::Acquire) == wakes - 1 {
            if let Err(error) = waker.wake() {
                let _ = shared.wake_error.set(error);
            }
        }
    }
}
