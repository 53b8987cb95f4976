use std::fmt::Display;

use io_uring::opcode;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The io_uring operations the responder submits. The discriminants are the
/// kernel op codes, so they double as the low byte of a
/// [`UringId`](crate::uring_id::UringId).
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum OpCode {
    Accept = opcode::Accept::CODE,
    Recv = opcode::Recv::CODE,
    Send = opcode::Send::CODE,
    PollAdd = opcode::PollAdd::CODE,
}

impl Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str_repr = match self {
            OpCode::Accept => "Accept",
            OpCode::Recv => "Recv",
            OpCode::Send => "Send",
            OpCode::PollAdd => "PollAdd",
        };
        f.write_str(str_repr)
    }
}
