use std::fmt::Display;

use io_uring::squeue;

use crate::io::OpCode;

/// Index of a connection in a worker's slot table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConnectionId(u16);

impl From<u16> for ConnectionId {
    fn from(value: u16) -> Self {
        ConnectionId(value)
    }
}

impl From<ConnectionId> for u16 {
    fn from(value: ConnectionId) -> Self {
        value.0
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// This is the ID we use to associate `completion`s with `submission`s.
/// The upper 32 bits hold the connection the operation belongs to, the
/// lowest byte holds the [`OpCode`] that was submitted.
///
/// Accept and shutdown polls don't belong to a connection; they are told
/// apart by their op code alone and carry connection 0.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UringId(u64);

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownOpCode(pub u8);

impl UringId {
    pub fn new(connection_id: ConnectionId, op_code: OpCode) -> Self {
        let connection = u16::from(connection_id) as u64;
        UringId((connection << 32) | u8::from(op_code) as u64)
    }

    pub fn listener(op_code: OpCode) -> Self {
        Self::new(ConnectionId(0), op_code)
    }

    pub fn from_user_data(user_data: u64) -> Self {
        UringId(user_data)
    }

    pub fn user_data(self) -> u64 {
        self.0
    }

    pub fn connection_id(self) -> ConnectionId {
        ConnectionId((self.0 >> 32) as u16)
    }

    pub fn op_code(self) -> Result<OpCode, UnknownOpCode> {
        let raw = self.0 as u8;
        OpCode::try_from(raw).map_err(|_| UnknownOpCode(raw))
    }

    pub fn set_user_data(self, entry: squeue::Entry) -> squeue::Entry {
        entry.user_data(self.user_data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_and_op_code_round_trip() {
        let id = UringId::new(ConnectionId::from(513), OpCode::Send);
        let decoded = UringId::from_user_data(id.user_data());
        assert_eq!(decoded.connection_id(), ConnectionId::from(513));
        assert_eq!(decoded.op_code(), Ok(OpCode::Send));
    }

    #[test]
    fn fields_do_not_overlap() {
        let max = UringId::new(ConnectionId::from(u16::MAX), OpCode::Recv);
        assert_eq!(max.user_data() >> 32, u16::MAX as u64);
        assert_eq!(max.user_data() & 0xff, u8::from(OpCode::Recv) as u64);
        assert_eq!(max.user_data() & 0xffff_ff00, 0);
    }

    #[test]
    fn listener_ids_carry_no_connection() {
        let id = UringId::listener(OpCode::Accept);
        assert_eq!(id.connection_id(), ConnectionId::from(0));
        assert_eq!(id.op_code(), Ok(OpCode::Accept));
    }

    #[test]
    fn rejects_unknown_op_codes() {
        assert_eq!(UringId::from_user_data(0xfe).op_code(), Err(UnknownOpCode(0xfe)));
    }
}
