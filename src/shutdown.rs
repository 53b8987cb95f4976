use std::{
    io,
    os::fd::{AsFd, AsRawFd, RawFd},
    sync::Arc,
};

use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags, PollTimeout},
    sys::eventfd::{EfdFlags, EventFd},
};
use tokio::io::{unix::AsyncFd, Interest};

/// Stop signal shared by every worker, backed by an eventfd.
///
/// The counter is never read back, so once triggered the fd stays readable
/// and any number of waiters (io_uring polls, tokio tasks) observe it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    fd: Arc<EventFd>,
}

impl Shutdown {
    pub fn new() -> io::Result<Self> {
        let flags = EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK;
        let fd = EventFd::from_value_and_flags(0, flags)?;
        Ok(Self { fd: Arc::new(fd) })
    }

    pub fn trigger(&self) -> io::Result<()> {
        match self.fd.write(1) {
            Ok(_) => Ok(()),
            // counter saturated, already triggered
            Err(Errno::EAGAIN) => Ok(()),
            Err(errno) => Err(errno.into()),
        }
    }

    pub fn is_triggered(&self) -> bool {
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(ready) => {
                ready > 0
                    && fds[0]
                        .revents()
                        .is_some_and(|revents| revents.contains(PollFlags::POLLIN))
            }
            Err(_) => false,
        }
    }

    /// Resolves once [`Shutdown::trigger`] has been called, from any thread.
    pub async fn triggered(&self) -> io::Result<()> {
        // one reactor registration per waiter, so each waits on its own dup
        let dup = self.fd.as_fd().try_clone_to_owned()?;
        let fd = AsyncFd::with_interest(dup, Interest::READABLE)?;
        let _guard = fd.readable().await?;
        Ok(())
    }
}

impl AsRawFd for Shutdown {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
