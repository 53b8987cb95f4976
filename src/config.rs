use std::{
    fmt::Display,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

pub const DEFAULT_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8080));

/// Which engine runs the accept-and-respond loop.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Backend {
    /// io_uring when the kernel supports it, tokio otherwise.
    #[default]
    Auto,
    IoUring,
    Tokio,
}

impl Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str_repr = match self {
            Backend::Auto => "auto",
            Backend::IoUring => "uring",
            Backend::Tokio => "tokio",
        };
        f.write_str(str_repr)
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub backend: Backend,
    /// Worker threads (io_uring rings, or tokio runtime threads).
    pub workers: usize,
    /// Accept operations each uring worker keeps queued on the listener.
    pub accepts_in_flight: usize,
    pub ring_entries: u32,
    /// Connection slots per uring worker, at least one. While every slot is
    /// taken the worker stops accepting and new clients wait in the listen
    /// backlog.
    pub max_connections: u16,
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR,
            backend: Backend::Auto,
            workers: num_cpus::get_physical().max(1),
            accepts_in_flight: 3,
            ring_entries: 256,
            max_connections: 4096,
            backlog: 1024,
        }
    }
}

impl ServerConfig {
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_max_connections(mut self, max_connections: u16) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }
}
