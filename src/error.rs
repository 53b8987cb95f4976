use std::{io, net::SocketAddr};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to inspect listener: {0}")]
    Listener(io::Error),
    #[error("failed to set up io_uring: {0}")]
    Ring(io::Error),
    #[error("io_uring submission failed: {0}")]
    Submit(io::Error),
    #[error("failed to build tokio runtime: {0}")]
    Runtime(io::Error),
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(io::Error),
    #[error("worker thread '{0}' panicked")]
    ThreadPanic(String),
    #[error("failed to signal shutdown: {0}")]
    Shutdown(io::Error),
}
