//! A TCP responder for benchmarking accept and write throughput.
//!
//! Every accepted connection gets the same canned HTTP/1.0 response, written
//! without waiting for a request. Incoming bytes are drained and dropped,
//! per-connection errors are swallowed, and closing the connection is left
//! to the client.

mod backend;
mod completion;
pub mod config;
mod error;
mod io;
pub mod response;
mod server;
pub mod shutdown;
mod slab;
mod uring_id;

pub use config::{Backend, ServerConfig};
pub use error::ServerError;
pub use response::{CannedResponse, CANNED_RESPONSE};
pub use server::{Server, ServerHandle};
pub use shutdown::Shutdown;

/// Whether this kernel can run the io_uring backend.
pub fn io_uring_supported() -> bool {
    backend::uring::is_supported()
}
