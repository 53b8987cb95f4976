use std::{net::SocketAddr, sync::Arc, thread::JoinHandle};

use crate::{
    backend::{self, tasks, uring},
    config::{Backend, ServerConfig},
    error::ServerError,
    io::Listener,
    response::CannedResponse,
    shutdown::Shutdown,
};

/// A bound, not yet running responder.
#[derive(Debug)]
pub struct Server {
    listener: Arc<Listener>,
    local_addr: SocketAddr,
    config: ServerConfig,
    response: CannedResponse,
}

/// The running responder. Owns the worker threads and, through them, the
/// listening socket, which is closed once every worker has been joined.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    backend: Backend,
    shutdown: Shutdown,
    workers: Vec<JoinHandle<Result<(), ServerError>>>,
    listener: Arc<Listener>,
}

impl Server {
    /// Binds and starts listening on `config.addr`. Fails if the address
    /// can't be bound; nothing is retried.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener =
            Listener::bind(config.addr, config.backlog).map_err(|source| ServerError::Bind {
                addr: config.addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServerError::Listener)?;
        tracing::info!(message = "Listening", addr = %local_addr);

        Ok(Self {
            listener: Arc::new(listener),
            local_addr,
            config,
            response: CannedResponse::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let backend = backend::resolve(self.config.backend);
        let shutdown = Shutdown::new().map_err(ServerError::Shutdown)?;

        let workers = match backend {
            Backend::IoUring => {
                uring::spawn(&self.listener, &self.config, &self.response, &shutdown)?
            }
            Backend::Tokio | Backend::Auto => {
                vec![tasks::spawn(&self.listener, &self.config, &self.response, &shutdown)?]
            }
        };
        tracing::info!(
            message = "Accepting connections",
            addr = %self.local_addr,
            %backend,
            workers = self.config.workers
        );

        Ok(ServerHandle {
            local_addr: self.local_addr,
            backend,
            shutdown,
            workers,
            listener: self.listener,
        })
    }

    /// Spawns the workers and blocks until they exit.
    pub fn run(self) -> Result<(), ServerError> {
        self.spawn()?.join()
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// A clone of the stop signal, e.g. for a signal handler thread.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Asks every worker to stop. Returns immediately; use
    /// [`ServerHandle::join`] to wait.
    pub fn shutdown(&self) -> Result<(), ServerError> {
        if self.shutdown.is_triggered() {
            tracing::debug!(message = "Already shutting down", addr = %self.local_addr);
            return Ok(());
        }
        tracing::info!(message = "Shutting down", addr = %self.local_addr);
        self.shutdown.trigger().map_err(ServerError::Shutdown)
    }

    /// Waits for every worker and reports the first failure.
    pub fn join(self) -> Result<(), ServerError> {
        let mut first_error = None;
        for worker in self.workers {
            let name = worker.thread().name().unwrap_or("responder-worker").to_owned();
            let result = match worker.join() {
                Ok(result) => result,
                Err(_) => Err(ServerError::ThreadPanic(name)),
            };
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }

        drop(self.listener);
        tracing::info!(message = "Stopped", addr = %self.local_addr);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
