use std::{collections::VecDeque, io, os::fd::AsRawFd};

use entry::CheckedEntry;
use io_uring::{opcode, squeue, types, SubmissionQueue, Submitter};

use crate::uring_id::{ConnectionId, UringId};

mod entry;
mod net;
mod op_code;

pub use net::{Listener, TcpStream};
pub use op_code::OpCode;

/// Pushes entries to the submission queue, parking them in a backlog when
/// the queue is full. The backlog is drained by [`flush_backlog`] before
/// the next submit.
pub struct Submissions<'sq, 'a> {
    sq: &'a mut SubmissionQueue<'sq>,
    backlog: &'a mut VecDeque<squeue::Entry>,
}

impl<'sq, 'a> Submissions<'sq, 'a> {
    pub fn new(sq: &'a mut SubmissionQueue<'sq>, backlog: &'a mut VecDeque<squeue::Entry>) -> Self {
        Self { sq, backlog }
    }

    /// Submits an operation on behalf of a connection.
    pub fn add(&mut self, connection_id: ConnectionId, checked_entry: CheckedEntry) {
        let (entry, op_code) = checked_entry.into_tuple();
        self.push(UringId::new(connection_id, op_code).set_user_data(entry));
    }

    pub fn add_parallel<const N: usize>(
        &mut self,
        connection_id: ConnectionId,
        entries: [CheckedEntry; N],
    ) {
        for entry in entries {
            self.add(connection_id, entry);
        }
    }

    /// Submits an operation that belongs to no connection (accepts, the
    /// shutdown poll).
    pub fn add_unowned(&mut self, checked_entry: CheckedEntry) {
        let (entry, op_code) = checked_entry.into_tuple();
        self.push(UringId::listener(op_code).set_user_data(entry));
    }

    fn push(&mut self, entry: squeue::Entry) {
        // Buffers referenced by entries live in connection slots that are
        // only released once their operations have completed.
        unsafe {
            if self.sq.push(&entry).is_err() {
                self.backlog.push_back(entry);
            }
        }
    }
}

/// Moves parked entries into the submission queue, submitting whenever it
/// fills up. Stops early if the kernel is busy; the rest stay parked.
pub fn flush_backlog(
    submitter: &Submitter<'_>,
    sq: &mut SubmissionQueue<'_>,
    backlog: &mut VecDeque<squeue::Entry>,
) -> io::Result<()> {
    loop {
        if sq.is_full() {
            sq.sync();
            match submitter.submit() {
                Ok(_) => (),
                Err(ref err) if err.raw_os_error() == Some(libc::EBUSY) => break,
                Err(err) => return Err(err),
            }
            sq.sync();
        }

        match backlog.pop_front() {
            Some(entry) => unsafe {
                if sq.push(&entry).is_err() {
                    backlog.push_front(entry);
                    break;
                }
            },
            None => break,
        }
    }
    Ok(())
}

/// One-shot readiness poll, completes once `fd` is readable.
pub fn poll_readable(fd: &impl AsRawFd) -> CheckedEntry {
    let entry = opcode::PollAdd::new(types::Fd(fd.as_raw_fd()), libc::POLLIN as _).build();
    CheckedEntry::new(entry, OpCode::PollAdd)
}
