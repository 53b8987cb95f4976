use std::os::fd::FromRawFd;

use io_uring::cqueue;

use crate::{
    io::{OpCode, TcpStream},
    uring_id::{ConnectionId, UnknownOpCode, UringId},
};

/// A decoded completion queue entry.
#[derive(Debug)]
pub enum Completion {
    Accept(Result<TcpStream, nix::Error>),
    Recv {
        connection_id: ConnectionId,
        result: Result<u32, nix::Error>,
    },
    Send {
        connection_id: ConnectionId,
        result: Result<u32, nix::Error>,
    },
    Shutdown(Result<u32, nix::Error>),
}

impl Completion {
    pub fn from_entry(entry: &cqueue::Entry) -> Result<Completion, UnknownOpCode> {
        Self::decode(UringId::from_user_data(entry.user_data()), entry.result())
    }

    fn decode(uring_id: UringId, result: i32) -> Result<Completion, UnknownOpCode> {
        let connection_id = uring_id.connection_id();
        let completion = match uring_id.op_code()? {
            OpCode::Accept => {
                let result =
                    catch_nix_error(result).map(|_| unsafe { TcpStream::from_raw_fd(result) });
                Completion::Accept(result)
            }
            OpCode::Recv => Completion::Recv {
                connection_id,
                result: catch_nix_error(result),
            },
            OpCode::Send => Completion::Send {
                connection_id,
                result: catch_nix_error(result),
            },
            OpCode::PollAdd => Completion::Shutdown(catch_nix_error(result)),
        };
        Ok(completion)
    }
}

fn catch_nix_error(result: i32) -> Result<u32, nix::Error> {
    if result < 0 {
        return Err(nix::errno::Errno::from_raw(-result));
    }
    Ok(result as u32)
}

#[cfg(test)]
mod tests {
    use nix::errno::Errno;

    use super::*;

    #[test]
    fn negative_results_become_errnos() {
        assert_eq!(catch_nix_error(-libc::ECONNRESET), Err(Errno::ECONNRESET));
        assert_eq!(catch_nix_error(0), Ok(0));
        assert_eq!(catch_nix_error(42), Ok(42));
    }

    #[test]
    fn decodes_connection_operations() {
        let id = UringId::new(ConnectionId::from(9), OpCode::Recv);
        match Completion::decode(id, 0).unwrap() {
            Completion::Recv { connection_id, result } => {
                assert_eq!(connection_id, ConnectionId::from(9));
                assert_eq!(result, Ok(0));
            }
            other => panic!("unexpected completion {other:?}"),
        }

        let id = UringId::new(ConnectionId::from(3), OpCode::Send);
        match Completion::decode(id, -libc::EPIPE).unwrap() {
            Completion::Send { connection_id, result } => {
                assert_eq!(connection_id, ConnectionId::from(3));
                assert_eq!(result, Err(Errno::EPIPE));
            }
            other => panic!("unexpected completion {other:?}"),
        }
    }

    #[test]
    fn failed_accept_carries_errno() {
        let id = UringId::listener(OpCode::Accept);
        match Completion::decode(id, -libc::EMFILE).unwrap() {
            Completion::Accept(Err(errno)) => assert_eq!(errno, Errno::EMFILE),
            other => panic!("unexpected completion {other:?}"),
        }
    }

    #[test]
    fn shutdown_poll_is_recognised() {
        let id = UringId::listener(OpCode::PollAdd);
        assert!(matches!(
            Completion::decode(id, libc::POLLIN as i32),
            Ok(Completion::Shutdown(Ok(_)))
        ));
    }

    #[test]
    fn unknown_op_code_is_rejected() {
        assert!(Completion::decode(UringId::from_user_data(0xfe), 0).is_err());
    }
}
