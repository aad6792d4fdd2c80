//! Core of a virtual "N:" network device for a byte-command peripheral
//! bus.
//!
//! The host issues small fixed-format command frames; this crate parses
//! per-command device specifiers, instantiates the matching network
//! protocol handler, and shuttles bytes between host and network while
//! surfacing status through a rate-limited interrupt line. A secondary
//! subsystem presents a REST object store as a directory tree with a
//! local content cache.
//!
//! The crate is transport-agnostic: the peripheral bus arrives through
//! the [`BusIo`] capability, concrete wire protocols through
//! [`NetworkProtocol`] factories registered on a [`ProtocolRegistry`],
//! and the object store's HTTP client through
//! [`remote::rest::RestTransport`].

mod bus;
mod device;
mod devicespec;
mod error;
mod frame;
mod interrupt;
mod protocol;
mod status;
mod url;
mod view;

pub mod remote;

pub use crate::bus::BusIo;
pub use crate::device::{ChannelMode, NetInfo, NetworkDevice, DEFAULT_DEVICE_ID};
pub use crate::devicespec::{canonicalize, normalize, Prefix};
pub use crate::error::{AdapterError, NetworkError};
pub use crate::frame::{dstats, opcode, wire_checksum, CommandFrame, EOL, SPECIAL_PAYLOAD};
pub use crate::interrupt::{InterruptTimer, DEFAULT_TIMER_RATE_MS};
pub use crate::protocol::{
    ChannelBuffers, Credentials, NetworkProtocol, ProtocolFactory, ProtocolFlags, ProtocolKind,
    ProtocolRegistry, SharedBuffer, TestProtocol,
};
pub use crate::status::NetworkStatus;
pub use crate::url::ParsedUrl;
pub use crate::view::{JsonView, NeonCompiler};
