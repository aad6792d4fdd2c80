//! Channel document views.
//!
//! The JSON and Neon views wrap the live protocol handler: each drains the
//! whole remote document through the handler, transforms it, and leaves
//! the result in the receive buffer for the host to page through with
//! ordinary Read commands.

use std::time::Duration;

use crate::protocol::{ChannelBuffers, NetworkProtocol};
use crate::status::NetworkStatus;

mod json;
mod neon;

pub use json::JsonView;
pub use neon::NeonCompiler;

/// Read from the handler until it reports disconnected, accumulating
/// everything that lands in the receive buffer.
///
/// Yields between reads so the handler's transport can make progress.
fn drain_protocol(protocol: &mut dyn NetworkProtocol, buffers: &ChannelBuffers) -> Vec<u8> {
    let mut out = Vec::new();
    let mut status = NetworkStatus::default();

    protocol.status(&mut status);
    while status.connected != 0 {
        protocol.read(usize::from(status.rx_bytes_waiting));
        let chunk = buffers.receive.borrow_mut().split();
        out.extend_from_slice(&chunk);
        protocol.status(&mut status);
        std::thread::sleep(Duration::from_millis(10));
    }
    out
}
