use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::ReadHalf, TcpListener, TcpStream},
    runtime,
};

use crate::{
    error::ServerError, io::Listener, response::CannedResponse, shutdown::Shutdown, ServerConfig,
};

const RECV_BUF_LEN: usize = 1024;

/// Runs the accept loop on a multi-threaded tokio runtime, one task per
/// connection.
pub fn spawn(
    listener: &Arc<Listener>,
    config: &ServerConfig,
    response: &CannedResponse,
    shutdown: &Shutdown,
) -> Result<JoinHandle<Result<(), ServerError>>, ServerError> {
    let rt = runtime::Builder::new_multi_thread()
        .worker_threads(config.workers.max(1))
        .thread_name("responder-tokio-worker")
        .enable_io()
        .build()
        .map_err(ServerError::Runtime)?;

    let std_listener = listener.try_clone_std().map_err(ServerError::Listener)?;
    std_listener.set_nonblocking(true).map_err(ServerError::Listener)?;

    let response = response.clone();
    let shutdown = shutdown.clone();
    thread::Builder::new()
        .name("responder-tokio".to_owned())
        .spawn(move || {
            let span = tracing::info_span!("worker", backend = "tokio");
            let _enter = span.enter();
            tracing::debug!(message = "Started runtime");

            let result = rt.block_on(accept_loop(std_listener, response, shutdown));
            // Connection tasks still running are dropped with the runtime.
            rt.shutdown_background();

            tracing::debug!(message = "Stopped runtime", ok = result.is_ok());
            result
        })
        .map_err(ServerError::ThreadSpawn)
}

async fn accept_loop(
    std_listener: std::net::TcpListener,
    response: CannedResponse,
    shutdown: Shutdown,
) -> Result<(), ServerError> {
    let listener = TcpListener::from_std(std_listener).map_err(ServerError::Listener)?;
    let stop = shutdown.triggered();
    tokio::pin!(stop);

    loop {
        tokio::select! {
            result = &mut stop => {
                result.map_err(ServerError::Shutdown)?;
                tracing::debug!(message = "Shutdown requested");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::trace!(message = "Accepted connection", %peer);
                    tokio::spawn(serve(stream, response.clone()));
                }
                Err(err) => tracing::trace!(message = "Accept failed", error = %err),
            },
        }
    }
}

/// Writes the response and drains the read side until the peer goes away.
/// Errors end the task silently.
async fn serve(mut stream: TcpStream, response: CannedResponse) {
    let (reader, mut writer) = stream.split();
    let write = async {
        if let Err(err) = writer.write_all(&response).await {
            tracing::trace!(message = "Send failed", error = %err);
        }
    };
    let (_, drained) = futures::future::join(write, drain(reader)).await;
    if let Err(err) = drained {
        tracing::trace!(message = "Receive failed", error = %err);
    }
}

async fn drain(mut reader: ReadHalf<'_>) -> io::Result<u64> {
    let mut buf = [0u8; RECV_BUF_LEN];
    let mut total = 0u64;
    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            return Ok(total);
        }
        total += read as u64;
    }
}
