use std::{
    collections::VecDeque,
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use io_uring::{cqueue, opcode, IoUring, Probe};
use nix::errno::Errno;

use crate::{
    completion::Completion,
    error::ServerError,
    io::{self as uring_io, Listener, Submissions, TcpStream},
    response::CannedResponse,
    shutdown::Shutdown,
    slab::{self, Reset, Slab},
    uring_id::ConnectionId,
    ServerConfig,
};

const RECV_BUF_LEN: usize = 1024;

/// Whether the running kernel lets us create a ring and supports every
/// operation a worker submits.
pub fn is_supported() -> bool {
    let ring = match IoUring::new(8) {
        Ok(ring) => ring,
        Err(err) => {
            tracing::debug!(message = "io_uring unavailable", error = %err);
            return false;
        }
    };
    let mut probe = Probe::new();
    if let Err(err) = ring.submitter().register_probe(&mut probe) {
        tracing::debug!(message = "io_uring probe failed", error = %err);
        return false;
    }
    [
        opcode::Accept::CODE,
        opcode::Recv::CODE,
        opcode::Send::CODE,
        opcode::PollAdd::CODE,
    ]
    .into_iter()
    .all(|code| probe.is_supported(code))
}

pub fn spawn(
    listener: &Arc<Listener>,
    config: &ServerConfig,
    response: &CannedResponse,
    shutdown: &Shutdown,
) -> Result<Vec<JoinHandle<Result<(), ServerError>>>, ServerError> {
    let workers = config.workers.max(1);
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        match spawn_worker(worker_id, listener, config, response, shutdown) {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                // Stop the workers that did start before reporting.
                let _ = shutdown.trigger();
                for handle in handles {
                    let _ = handle.join();
                }
                return Err(err);
            }
        }
    }
    Ok(handles)
}

fn spawn_worker(
    worker_id: usize,
    listener: &Arc<Listener>,
    config: &ServerConfig,
    response: &CannedResponse,
    shutdown: &Shutdown,
) -> Result<JoinHandle<Result<(), ServerError>>, ServerError> {
    // Set the ring up on the spawning thread so setup errors surface from
    // `spawn` instead of from a join later on.
    let ring = build_ring(config.ring_entries).map_err(ServerError::Ring)?;
    let worker = Worker {
        id: worker_id,
        ring,
        listener: Arc::clone(listener),
        shutdown: shutdown.clone(),
        response: response.clone(),
        connections: Slab::new(config.max_connections.max(1)),
        accepts_in_flight: config.accepts_in_flight.max(1),
    };

    thread::Builder::new()
        .name(format!("responder-uring-{worker_id}"))
        .spawn(move || worker.run())
        .map_err(ServerError::ThreadSpawn)
}

/// A connection slot. A slot is only released once it is closing and no
/// operation referencing it (or its buffer) is still in flight.
struct Connection {
    stream: Option<TcpStream>,
    written: u32,
    in_flight: u8,
    closing: bool,
    recv_buf: Box<[u8; RECV_BUF_LEN]>,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            stream: None,
            written: 0,
            in_flight: 0,
            closing: false,
            recv_buf: Box::new([0; RECV_BUF_LEN]),
        }
    }
}

impl Reset for Connection {
    fn reset(&mut self) {
        self.stream = None;
        self.written = 0;
        self.in_flight = 0;
        self.closing = false;
    }
}

impl Connection {
    fn is_releasable(&self) -> bool {
        self.closing && self.in_flight == 0
    }

    /// Accounts for a completed send. On a short write, returns the unsent
    /// tail of `response`; its resubmission is already counted in flight.
    fn record_send<'r>(&mut self, response: &'r CannedResponse, sent: u32) -> Option<&'r [u8]> {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.written = self.written.saturating_add(sent);
        let remaining = response.remaining(self.written);
        if remaining.is_empty() || self.stream.is_none() {
            return None;
        }
        self.in_flight += 1;
        Some(remaining)
    }
}

/// How many accepts to add so that `pending` reaches `wanted`, without
/// queueing more accepts than there are free slots.
fn accepts_to_arm(pending: usize, wanted: usize, in_use: usize, capacity: usize) -> usize {
    let free = capacity.saturating_sub(in_use + pending);
    wanted.saturating_sub(pending).min(free)
}

struct Worker {
    id: usize,
    ring: IoUring,
    listener: Arc<Listener>,
    shutdown: Shutdown,
    response: CannedResponse,
    connections: Slab<ConnectionId, Connection>,
    accepts_in_flight: usize,
}

/// Draining workers stop accepting and exit once every slot is released.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Mode {
    Serving,
    Draining,
}

struct EventLoop<'w> {
    listener: &'w Listener,
    response: &'w CannedResponse,
    connections: &'w mut Slab<ConnectionId, Connection>,
    backlog: VecDeque<io_uring::squeue::Entry>,
    pending_accepts: usize,
    accepts_in_flight: usize,
    mode: Mode,
}

impl Worker {
    fn run(self) -> Result<(), ServerError> {
        let Worker {
            id,
            mut ring,
            listener,
            shutdown,
            response,
            mut connections,
            accepts_in_flight,
        } = self;

        let span = tracing::info_span!("worker", id, backend = "uring");
        let _enter = span.enter();
        tracing::debug!(message = "Started worker", slots = connections.capacity());

        let event_loop = EventLoop {
            listener: &listener,
            response: &response,
            connections: &mut connections,
            backlog: VecDeque::new(),
            pending_accepts: 0,
            accepts_in_flight,
            mode: Mode::Serving,
        };
        let result = event_loop.drive(&mut ring, &shutdown);

        if let Err(err) = &result {
            tracing::error!(message = "Worker failed, stopping server", error = %err);
            let _ = shutdown.trigger();
            if connections.in_use() > 0 {
                // Receives may still be in flight; their buffers must
                // outlive the ring.
                drop(ring);
                std::mem::forget(connections);
            }
        }

        tracing::debug!(message = "Stopped worker", ok = result.is_ok());
        result
    }
}

fn build_ring(entries: u32) -> io::Result<IoUring> {
    match IoUring::builder().setup_coop_taskrun().build(entries) {
        // Kernels before 5.19 reject the flag.
        Err(ref err) if err.raw_os_error() == Some(libc::EINVAL) => IoUring::new(entries),
        result => result,
    }
}

impl<'w> EventLoop<'w> {
    fn drive(mut self, ring: &mut IoUring, shutdown: &Shutdown) -> Result<(), ServerError> {
        let (submitter, mut sq, mut cq) = ring.split();

        Submissions::new(&mut sq, &mut self.backlog)
            .add_unowned(uring_io::poll_readable(shutdown));
        self.arm_accepts(&mut sq);

        loop {
            uring_io::flush_backlog(&submitter, &mut sq, &mut self.backlog)
                .map_err(ServerError::Submit)?;
            if self.is_drained() {
                return Ok(());
            }

            sq.sync();
            match submitter.submit_and_wait(1) {
                Ok(_) => (),
                Err(ref err) if err.raw_os_error() == Some(libc::EBUSY) => (),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => return Err(ServerError::Submit(err)),
            }

            cq.sync();
            for cqe in &mut cq {
                self.on_completion(&cqe, &mut sq);
            }
            self.arm_accepts(&mut sq);
        }
    }

    fn is_drained(&self) -> bool {
        self.mode == Mode::Draining && self.connections.in_use() == 0 && self.backlog.is_empty()
    }

    /// Tops the queued accepts back up to `accepts_in_flight`. Every queued
    /// accept has a free slot waiting for it; with the table full, new
    /// clients wait in the listen backlog until a slot is released.
    fn arm_accepts(&mut self, sq: &mut io_uring::SubmissionQueue<'_>) {
        if self.mode != Mode::Serving {
            return;
        }
        let count = accepts_to_arm(
            self.pending_accepts,
            self.accepts_in_flight,
            self.connections.in_use(),
            self.connections.capacity(),
        );
        let mut submissions = Submissions::new(sq, &mut self.backlog);
        for _ in 0..count {
            submissions.add_unowned(self.listener.accept());
        }
        self.pending_accepts += count;
    }

    fn on_completion(&mut self, cqe: &cqueue::Entry, sq: &mut io_uring::SubmissionQueue<'_>) {
        let completion = match Completion::from_entry(cqe) {
            Ok(completion) => completion,
            Err(unknown) => {
                tracing::error!(
                    message = "Completion with unknown op code",
                    op = unknown.0,
                    user_data = cqe.user_data()
                );
                return;
            }
        };

        match completion {
            Completion::Accept(result) => {
                self.pending_accepts = self.pending_accepts.saturating_sub(1);
                match result {
                    Ok(stream) => self.on_connection(stream, sq),
                    // Cancelled accepts show up while the ring tears down.
                    Err(Errno::ECANCELED) => (),
                    Err(errno) => tracing::trace!(message = "Accept failed", %errno),
                }
            }
            Completion::Recv { connection_id, result } => self.on_recv(connection_id, result, sq),
            Completion::Send { connection_id, result } => self.on_send(connection_id, result, sq),
            Completion::Shutdown(_) => self.on_shutdown(),
        }
    }

    fn on_connection(&mut self, stream: TcpStream, sq: &mut io_uring::SubmissionQueue<'_>) {
        if self.mode == Mode::Draining {
            return;
        }

        let (connection_id, connection) = match self.connections.reserve() {
            Ok(reserved) => reserved,
            Err(slab::Error::StorageFull) => {
                // Unreachable while accepts are only armed for free slots.
                tracing::error!(message = "Accepted without a free slot", %stream);
                return;
            }
        };
        tracing::trace!(message = "Accepted connection", %stream, c_id = %connection_id);

        // Write without waiting for a request, and drain whatever arrives.
        let send = stream.send(self.response.as_bytes());
        let recv = stream.recv(&mut connection.recv_buf[..]);
        connection.stream = Some(stream);
        connection.in_flight = 2;

        Submissions::new(sq, &mut self.backlog).add_parallel(connection_id, [send, recv]);
    }

    fn on_recv(
        &mut self,
        connection_id: ConnectionId,
        result: Result<u32, Errno>,
        sq: &mut io_uring::SubmissionQueue<'_>,
    ) {
        let Some(connection) = self.connections.get_mut(connection_id) else {
            return;
        };
        connection.in_flight = connection.in_flight.saturating_sub(1);

        match result {
            Ok(read) if read > 0 && !connection.closing => {
                tracing::trace!(message = "Discarding received bytes", c_id = %connection_id, read);
                if let Some(stream) = &connection.stream {
                    let recv = stream.recv(&mut connection.recv_buf[..]);
                    connection.in_flight += 1;
                    Submissions::new(sq, &mut self.backlog).add(connection_id, recv);
                }
            }
            Ok(_) => {
                tracing::trace!(message = "Peer closed connection", c_id = %connection_id);
                connection.closing = true;
            }
            Err(errno) => {
                tracing::trace!(message = "Receive failed", c_id = %connection_id, %errno);
                connection.closing = true;
            }
        }

        self.release_if_done(connection_id);
    }

    fn on_send(
        &mut self,
        connection_id: ConnectionId,
        result: Result<u32, Errno>,
        sq: &mut io_uring::SubmissionQueue<'_>,
    ) {
        let Some(connection) = self.connections.get_mut(connection_id) else {
            return;
        };

        match result {
            Ok(sent) => {
                let remaining = connection.record_send(self.response, sent);
                if let (Some(remaining), Some(stream)) = (remaining, &connection.stream) {
                    tracing::trace!(
                        message = "Short write, resuming",
                        c_id = %connection_id,
                        written = connection.written
                    );
                    let send = stream.send(remaining);
                    Submissions::new(sq, &mut self.backlog).add(connection_id, send);
                }
            }
            // Swallowed. The receive side notices the broken socket and
            // closes the slot.
            Err(errno) => {
                connection.in_flight = connection.in_flight.saturating_sub(1);
                tracing::trace!(message = "Send failed", c_id = %connection_id, %errno);
            }
        }

        self.release_if_done(connection_id);
    }

    fn on_shutdown(&mut self) {
        if self.mode == Mode::Draining {
            return;
        }
        tracing::debug!(message = "Shutdown requested", live = self.connections.in_use());
        self.mode = Mode::Draining;

        for (connection_id, connection) in self.connections.iter_mut() {
            let Some(stream) = &connection.stream else {
                continue;
            };
            connection.closing = true;
            if let Err(err) = stream.shutdown() {
                tracing::trace!(
                    message = "Socket shutdown failed",
                    c_id = %connection_id,
                    error = %err
                );
            }
        }

        let releasable: Vec<ConnectionId> = self
            .connections
            .iter_mut()
            .filter(|(_, connection)| connection.stream.is_some() && connection.is_releasable())
            .map(|(connection_id, _)| connection_id)
            .collect();
        for connection_id in releasable {
            self.connections.release(connection_id);
        }
    }

    fn release_if_done(&mut self, connection_id: ConnectionId) {
        let releasable = self
            .connections
            .get_mut(connection_id)
            .is_some_and(|connection| connection.stream.is_some() && connection.is_releasable());
        if releasable {
            tracing::trace!(message = "Releasing connection", c_id = %connection_id);
            self.connections.release(connection_id);
        }
    }
}
