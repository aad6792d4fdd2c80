//! The built-in TEST protocol: a loopback used by diagnostics and the test
//! suite.
//!
//! Opening `N:TEST://host/?payload` seeds the session with the query bytes;
//! writes echo back into the pending data. A host named `unreachable`
//! refuses to open.

use tracing::trace;

use crate::error::NetworkError;
use crate::frame::CommandFrame;
use crate::status::NetworkStatus;
use crate::url::ParsedUrl;

use super::{ChannelBuffers, NetworkProtocol, ProtocolFlags};

pub struct TestProtocol {
    buffers: ChannelBuffers,
    flags: ProtocolFlags,
    pending: Vec<u8>,
    connected: bool,
    error: NetworkError,
}

impl TestProtocol {
    pub fn new(buffers: ChannelBuffers) -> Self {
        Self {
            buffers,
            flags: ProtocolFlags::default(),
            pending: Vec::new(),
            connected: false,
            error: NetworkError::NONE,
        }
    }
}

impl NetworkProtocol for TestProtocol {
    fn open(&mut self, url: &ParsedUrl, _frame: &CommandFrame) -> bool {
        if url.host == "unreachable" {
            self.error = NetworkError::DEVICE_ERROR;
            return true;
        }
        self.pending = url.query.as_bytes().to_vec();
        self.connected = true;
        trace!(seed = self.pending.len(), "test protocol open");
        false
    }

    fn close(&mut self) -> bool {
        self.connected = false;
        self.pending.clear();
        false
    }

    fn read(&mut self, n: usize) -> bool {
        let take = n.min(self.pending.len());
        let chunk: Vec<u8> = self.pending.drain(..take).collect();
        self.buffers.receive.borrow_mut().extend_from_slice(&chunk);
        if take < n {
            self.error = NetworkError::END_OF_FILE;
            return true;
        }
        false
    }

    fn write(&mut self, n: usize) -> bool {
        let mut tx = self.buffers.transmit.borrow_mut();
        if tx.len() < n {
            self.error = NetworkError::GENERAL;
            return true;
        }
        let chunk = tx.split_to(n);
        self.pending.extend_from_slice(&chunk);
        false
    }

    fn status(&mut self, out: &mut NetworkStatus) -> bool {
        // Like a finite remote body: connected only while bytes remain.
        let connected = self.connected && !self.pending.is_empty();
        out.rx_bytes_waiting = self.pending.len().min(u16::MAX as usize) as u16;
        out.connected = u8::from(connected);
        out.error = if connected {
            NetworkError::NONE.into()
        } else {
            NetworkError::END_OF_FILE.into()
        };
        false
    }

    fn perform_idempotent_80(&mut self, _url: &ParsedUrl, _frame: &CommandFrame) -> bool {
        false
    }

    fn flags(&self) -> &ProtocolFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut ProtocolFlags {
        &mut self.flags
    }

    fn error(&self) -> NetworkError {
        self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{opcode, CommandFrame};

    fn open_frame() -> CommandFrame {
        CommandFrame::new(0x71, opcode::OPEN, 12, 0)
    }

    #[test]
    fn seeds_from_query_and_drains() {
        let buffers = ChannelBuffers::new();
        let mut proto = TestProtocol::new(buffers.clone());
        let url = ParsedUrl::parse("TEST://host/?abcd");
        assert!(!proto.open(&url, &open_frame()));

        let mut status = NetworkStatus::default();
        proto.status(&mut status);
        assert_eq!(status.rx_bytes_waiting, 4);
        assert_eq!(status.connected, 1);

        assert!(!proto.read(4));
        assert_eq!(&buffers.receive.borrow()[..], b"abcd");
    }

    #[test]
    fn echo_write_read() {
        let buffers = ChannelBuffers::new();
        let mut proto = TestProtocol::new(buffers.clone());
        proto.open(&ParsedUrl::parse("TEST://host/"), &open_frame());

        buffers.transmit.borrow_mut().extend_from_slice(b"ping");
        assert!(!proto.write(4));
        assert!(!proto.read(4));
        assert_eq!(&buffers.receive.borrow()[..], b"ping");
    }

    #[test]
    fn unreachable_host_fails_open() {
        let mut proto = TestProtocol::new(ChannelBuffers::new());
        let url = ParsedUrl::parse("TEST://unreachable/");
        assert!(proto.open(&url, &open_frame()));
        assert_eq!(proto.error(), NetworkError::DEVICE_ERROR);
    }

    #[test]
    fn short_read_reports_eof() {
        let buffers = ChannelBuffers::new();
        let mut proto = TestProtocol::new(buffers.clone());
        proto.open(&ParsedUrl::parse("TEST://host/?xy"), &open_frame());
        assert!(proto.read(5));
        assert_eq!(proto.error(), NetworkError::END_OF_FILE);
        assert_eq!(&buffers.receive.borrow()[..], b"xy");
    }
}
