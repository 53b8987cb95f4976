use std::{
    fmt::Display,
    io,
    net::SocketAddr,
    os::fd::{AsFd, AsRawFd as _, BorrowedFd, FromRawFd, OwnedFd, RawFd},
};

use io_uring::{opcode, types};
use socket2::{Domain, Protocol, SockRef, Type};

use super::{entry::CheckedEntry, OpCode};

/// The bound, listening socket shared by every worker.
#[derive(Debug)]
pub struct Listener(socket2::Socket);

/// An accepted connection. Dropping it closes the socket.
#[derive(Debug)]
pub struct TcpStream(OwnedFd);

impl Listener {
    pub fn bind(socket_addr: SocketAddr, backlog: i32) -> io::Result<Self> {
        let socket = socket2::Socket::new(
            Domain::for_address(socket_addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;

        // No SO_REUSEPORT: a second server on the same port has to fail.
        socket.set_reuse_address(true)?;
        socket.bind(&socket_addr.into())?;
        socket.listen(backlog)?;

        Ok(Self(socket))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()?.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "listener is not an inet socket")
        })
    }

    pub fn accept(&self) -> CheckedEntry {
        let fd = types::Fd(self.0.as_raw_fd());
        let entry = opcode::Accept::new(fd, std::ptr::null_mut(), std::ptr::null_mut())
            .flags(libc::SOCK_CLOEXEC)
            .build();
        CheckedEntry::new(entry, OpCode::Accept)
    }

    /// A second handle to the same listening socket, for runtimes that want
    /// to own a `std` listener.
    pub fn try_clone_std(&self) -> io::Result<std::net::TcpListener> {
        Ok(self.0.try_clone()?.into())
    }
}

impl TcpStream {
    /// Sends `buf`. The caller keeps `buf` alive until the completion
    /// arrives.
    pub fn send(&self, buf: &[u8]) -> CheckedEntry {
        let fd = types::Fd(self.0.as_raw_fd());
        let entry = opcode::Send::new(fd, buf.as_ptr(), buf.len() as _)
            .flags(libc::MSG_NOSIGNAL)
            .build();
        CheckedEntry::new(entry, OpCode::Send)
    }

    /// Receives into `buf`. The caller keeps `buf` alive and untouched until
    /// the completion arrives.
    pub fn recv(&self, buf: &mut [u8]) -> CheckedEntry {
        let fd = types::Fd(self.0.as_raw_fd());
        let entry = opcode::Recv::new(fd, buf.as_mut_ptr(), buf.len() as _).build();
        CheckedEntry::new(entry, OpCode::Recv)
    }

    /// Shuts down both directions so in-flight operations on the socket
    /// complete. The fd stays open until the stream is dropped.
    pub fn shutdown(&self) -> io::Result<()> {
        SockRef::from(self).shutdown(std::net::Shutdown::Both)
    }
}

impl AsFd for TcpStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Display for TcpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.as_raw_fd().fmt(f)
    }
}

impl FromRawFd for TcpStream {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        TcpStream(OwnedFd::from_raw_fd(fd))
    }
}

impl From<OwnedFd> for TcpStream {
    fn from(value: OwnedFd) -> Self {
        TcpStream(value)
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        tracing::trace!(stream = %self, "Dropping tcp stream");
    }
}
