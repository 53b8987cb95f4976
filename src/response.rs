use std::{fmt, ops::Deref};

use bytes::Bytes;

/// The reply written to every accepted connection.
///
/// Date and Last-Modified are frozen so every run of the benchmark puts the
/// exact same bytes on the wire.
pub const CANNED_RESPONSE: &[u8] = b"HTTP/1.0 200 OK\r\n\
Date: Thu, 07 May 2020 12:49:30 GMT\r\n\
Connection: close\r\n\
Accept-Ranges: bytes\r\n\
Last-Modified: Thu, 07 May 2020 12:49:25 GMT\r\n\
Content-Length: 0\r\n\
\r\n";

/// Read-only handle to the response bytes. Cloning shares the same static
/// buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct CannedResponse(Bytes);

impl CannedResponse {
    pub fn new() -> Self {
        CannedResponse(Bytes::from_static(CANNED_RESPONSE))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The bytes still to be written once `written` bytes are on the wire.
    pub fn remaining(&self, written: u32) -> &[u8] {
        let written = (written as usize).min(self.0.len());
        &self.0[written..]
    }
}

impl Default for CannedResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for CannedResponse {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for CannedResponse {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CannedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CannedResponse")
            .field(&String::from_utf8_lossy(&self.0))
            .finish()
    }
}
