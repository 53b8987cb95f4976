use canned_responder::{Server, ServerConfig, ServerHandle};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let server = Server::bind(ServerConfig::default())?;
    let handle = server.spawn()?;

    wait_for_stop(&handle)?;
    handle.shutdown()?;
    handle.join()?;
    Ok(())
}

/// Blocks until SIGINT or SIGTERM arrives, or a worker stops the server on
/// its own.
fn wait_for_stop(handle: &ServerHandle) -> anyhow::Result<()> {
    let shutdown = handle.shutdown_signal();
    let rt = tokio::runtime::Builder::new_current_thread().enable_io().build()?;
    rt.block_on(async move {
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = sigterm.recv() => (),
            result = shutdown.triggered() => result?,
        }
        anyhow::Ok(())
    })
}
