//! Shared fixtures: a recording bus and a scriptable protocol handler.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use ndev::{
    wire_checksum, BusIo, ChannelBuffers, CommandFrame, NetworkProtocol, NetworkStatus,
    ParsedUrl, ProtocolFactory, ProtocolFlags, EOL,
};

/// Install the fmt subscriber for test logging. Later calls are no-ops,
/// so every fixture can call this unconditionally. Filtering follows
/// `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Everything the device said to the bus, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Ack,
    Nak,
    Complete,
    Error,
    ToHost(Vec<u8>, bool),
    Proceed(bool),
}

/// A bus that records device output and replays queued host payloads.
#[derive(Default)]
pub struct TestBus {
    pub events: Vec<BusEvent>,
    pub host_payloads: VecDeque<Vec<u8>>,
}

impl TestBus {
    pub fn new() -> Self {
        init_tracing();
        Self::default()
    }

    /// Queue a raw host write payload for the next `from_host`.
    pub fn queue_payload(&mut self, data: &[u8]) {
        self.host_payloads.push_back(data.to_vec());
    }

    /// Queue a devicespec payload terminated with the EOL sentinel.
    pub fn queue_spec(&mut self, spec: &str) {
        let mut payload = spec.as_bytes().to_vec();
        payload.push(EOL);
        self.queue_payload(&payload);
    }

    /// The out-of-band signals seen so far, transfers elided.
    pub fn signals(&self) -> Vec<&BusEvent> {
        self.events
            .iter()
            .filter(|e| !matches!(e, BusEvent::ToHost(..) | BusEvent::Proceed(_)))
            .collect()
    }

    /// Payload of the most recent transfer to the host.
    pub fn last_transfer(&self) -> Option<(&[u8], bool)> {
        self.events.iter().rev().find_map(|e| match e {
            BusEvent::ToHost(data, err) => Some((data.as_slice(), *err)),
            _ => None,
        })
    }

    pub fn proceed_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, BusEvent::Proceed(_)))
            .count()
    }

    pub fn ended_with_complete(&self) -> bool {
        matches!(self.signals().last(), Some(BusEvent::Complete))
    }

    pub fn ended_with_error(&self) -> bool {
        matches!(self.signals().last(), Some(BusEvent::Error))
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl BusIo for TestBus {
    fn ack(&mut self) {
        self.events.push(BusEvent::Ack);
    }

    fn nak(&mut self) {
        self.events.push(BusEvent::Nak);
    }

    fn complete(&mut self) {
        self.events.push(BusEvent::Complete);
    }

    fn error(&mut self) {
        self.events.push(BusEvent::Error);
    }

    fn to_host(&mut self, data: &[u8], err: bool) {
        self.events.push(BusEvent::ToHost(data.to_vec(), err));
    }

    fn from_host(&mut self, buf: &mut [u8]) -> u8 {
        let payload = self.host_payloads.pop_front().unwrap_or_default();
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        for b in &mut buf[n..] {
            *b = 0;
        }
        wire_checksum(buf)
    }

    fn set_proceed(&mut self, level: bool) {
        self.events.push(BusEvent::Proceed(level));
    }
}

/// Observable state shared between a test and every handler the factory
/// produces.
#[derive(Default)]
pub struct MockState {
    /// Bytes the handler will deliver to reads.
    pub rx_data: Vec<u8>,
    pub connected: bool,
    /// Report disconnected once `rx_data` is drained.
    pub auto_disconnect: bool,
    pub fail_open: bool,
    pub error: u8,
    pub open_count: usize,
    pub close_count: usize,
    pub status_count: usize,
    pub written: Vec<u8>,
    pub idempotent_calls: Vec<(String, u8)>,
    pub last_open_aux2: u8,
}

pub struct MockProtocol {
    state: Rc<RefCell<MockState>>,
    buffers: ChannelBuffers,
    flags: ProtocolFlags,
}

impl NetworkProtocol for MockProtocol {
    fn open(&mut self, _url: &ParsedUrl, frame: &CommandFrame) -> bool {
        let mut state = self.state.borrow_mut();
        state.open_count += 1;
        state.last_open_aux2 = frame.aux2;
        if state.fail_open {
            return true;
        }
        state.connected = true;
        false
    }

    fn close(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        state.close_count += 1;
        state.connected = false;
        false
    }

    fn read(&mut self, n: usize) -> bool {
        let mut state = self.state.borrow_mut();
        let take = n.min(state.rx_data.len());
        let chunk: Vec<u8> = state.rx_data.drain(..take).collect();
        self.buffers.receive.borrow_mut().extend_from_slice(&chunk);
        false
    }

    fn write(&mut self, n: usize) -> bool {
        let mut state = self.state.borrow_mut();
        let mut tx = self.buffers.transmit.borrow_mut();
        let take = n.min(tx.len());
        let chunk = tx.split_to(take);
        state.written.extend_from_slice(&chunk);
        false
    }

    fn status(&mut self, out: &mut NetworkStatus) -> bool {
        let mut state = self.state.borrow_mut();
        state.status_count += 1;
        let connected = state.connected && !(state.auto_disconnect && state.rx_data.is_empty());
        out.rx_bytes_waiting = state.rx_data.len().min(usize::from(u16::MAX)) as u16;
        out.connected = u8::from(connected);
        out.error = state.error;
        false
    }

    fn perform_idempotent_80(&mut self, url: &ParsedUrl, frame: &CommandFrame) -> bool {
        self.state
            .borrow_mut()
            .idempotent_calls
            .push((url.raw.clone(), frame.command));
        false
    }

    fn flags(&self) -> &ProtocolFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut ProtocolFlags {
        &mut self.flags
    }
}

/// Factory handing every instantiation the same shared state.
pub fn mock_factory(state: Rc<RefCell<MockState>>) -> ProtocolFactory {
    Box::new(move |buffers, _credentials| -> Box<dyn NetworkProtocol> {
        Box::new(MockProtocol {
            state: Rc::clone(&state),
            buffers: buffers.clone(),
            flags: ProtocolFlags::default(),
        })
    })
}

pub fn frame(command: u8, aux1: u8, aux2: u8) -> CommandFrame {
    CommandFrame::new(0x71, command, aux1, aux2)
}
