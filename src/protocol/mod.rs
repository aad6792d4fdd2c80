//! The network protocol handler capability and its registry.
//!
//! A handler owns one live network session and moves bytes between the
//! network and the channel buffers shared with the command processor.
//! Concrete wire protocols are supplied by the embedder through
//! [`ProtocolRegistry::register`]; only the diagnostic TEST variant ships
//! in-crate.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::BytesMut;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::NetworkError;
use crate::frame::{dstats, CommandFrame};
use crate::status::NetworkStatus;
use crate::url::ParsedUrl;

mod test;
pub use test::TestProtocol;

/// A byte buffer shared between the command processor and the live handler.
///
/// The processor owns all three buffers; handlers hold cloned handles that
/// are dropped with the handler, so the buffers always outlive them.
pub type SharedBuffer = Rc<RefCell<BytesMut>>;

/// The receive/transmit/special buffer trio wired into every handler.
#[derive(Clone, Default)]
pub struct ChannelBuffers {
    pub receive: SharedBuffer,
    pub transmit: SharedBuffer,
    pub special: SharedBuffer,
}

impl ChannelBuffers {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Login credentials handed to each factory at instantiation.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Interrupt-related state every handler carries.
#[derive(Debug, Copy, Clone)]
pub struct ProtocolFlags {
    /// Whether the handler permits PROCEED interrupts at all.
    pub interrupt_enable: bool,
    /// One-shot set after a successful Open so the next poll interrupts
    /// immediately; cleared by the first Status sent to the host.
    pub force_status: bool,
    /// Set around status polls issued from the interrupt poll routine.
    pub from_interrupt: bool,
}

impl Default for ProtocolFlags {
    fn default() -> Self {
        Self {
            interrupt_enable: true,
            force_status: false,
            from_interrupt: false,
        }
    }
}

/// A live protocol session.
///
/// The boolean-returning operations keep the legacy convention of the
/// firmware they interoperate with: `true` means FAILURE, `false` means
/// success. After a failure the numeric code is available from
/// [`NetworkProtocol::error`].
pub trait NetworkProtocol {
    /// Open the session described by `url`. Returns `true` on failure.
    fn open(&mut self, url: &ParsedUrl, frame: &CommandFrame) -> bool;

    /// Close the session. Returns `true` on failure.
    fn close(&mut self) -> bool;

    /// Move up to `n` bytes from the network into the receive buffer.
    /// Returns `true` on failure.
    fn read(&mut self, n: usize) -> bool;

    /// Consume `n` bytes from the transmit buffer out to the network.
    /// Returns `true` on failure.
    fn write(&mut self, n: usize) -> bool;

    /// Fill `out` with the current session status. Returns `true` on
    /// failure.
    fn status(&mut self, out: &mut NetworkStatus) -> bool;

    /// Report the payload direction for special command `cmd`, or
    /// [`dstats::UNSUPPORTED`] to defer to the device's default table.
    fn special_inquiry(&mut self, cmd: u8) -> u8 {
        let _ = cmd;
        dstats::UNSUPPORTED
    }

    /// Execute a payloadless special. Returns `true` on failure.
    fn special_00(&mut self, frame: &CommandFrame) -> bool {
        let _ = frame;
        true
    }

    /// Execute a host-bound-payload special, filling `buf`. Returns `true`
    /// on failure.
    fn special_40(&mut self, buf: &mut [u8], frame: &CommandFrame) -> bool {
        let _ = (buf, frame);
        true
    }

    /// Execute a peripheral-bound-payload special with `buf` as written by
    /// the host. Returns `true` on failure.
    fn special_80(&mut self, buf: &[u8], frame: &CommandFrame) -> bool {
        let _ = (buf, frame);
        true
    }

    /// Execute a one-shot filesystem special (rename/delete/lock/unlock/
    /// mkdir/rmdir) without keeping a session open. Returns `true` on
    /// failure.
    fn perform_idempotent_80(&mut self, url: &ParsedUrl, frame: &CommandFrame) -> bool {
        let _ = (url, frame);
        true
    }

    fn flags(&self) -> &ProtocolFlags;

    fn flags_mut(&mut self) -> &mut ProtocolFlags;

    /// Numeric code describing the most recent failure.
    fn error(&self) -> NetworkError {
        NetworkError::GENERAL
    }
}

/// The protocol variants a devicespec scheme can select.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ProtocolKind {
    Tcp,
    Udp,
    Telnet,
    Tnfs,
    Ftp,
    Http,
    Ssh,
    Smb,
    Test,
}

impl ProtocolKind {
    /// Map a devicespec scheme to its protocol variant, case-insensitively.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_uppercase().as_str() {
            "TCP" => Some(Self::Tcp),
            "UDP" => Some(Self::Udp),
            "TELNET" => Some(Self::Telnet),
            "TNFS" => Some(Self::Tnfs),
            "FTP" => Some(Self::Ftp),
            "HTTP" | "HTTPS" => Some(Self::Http),
            "SSH" => Some(Self::Ssh),
            "SMB" => Some(Self::Smb),
            "TEST" => Some(Self::Test),
            _ => None,
        }
    }
}

/// Factory producing a handler bound to the shared buffers and the
/// device's current credentials.
pub type ProtocolFactory = Box<dyn Fn(&ChannelBuffers, &Credentials) -> Box<dyn NetworkProtocol>>;

/// Scheme-to-factory table consulted on every Open and idempotent special.
#[derive(Default)]
pub struct ProtocolRegistry {
    factories: FxHashMap<ProtocolKind, ProtocolFactory>,
}

impl ProtocolRegistry {
    /// An empty registry. Opens fail for every scheme until factories are
    /// registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in TEST protocol installed.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            ProtocolKind::Test,
            Box::new(|buffers, _creds| -> Box<dyn NetworkProtocol> {
                Box::new(TestProtocol::new(buffers.clone()))
            }),
        );
        registry
    }

    /// Install (or replace) the factory for `kind`.
    pub fn register(&mut self, kind: ProtocolKind, factory: ProtocolFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn supports(&self, kind: ProtocolKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Instantiate a handler for `scheme`, or `None` when the scheme is
    /// unknown or has no factory installed.
    pub fn create(
        &self,
        scheme: &str,
        buffers: &ChannelBuffers,
        credentials: &Credentials,
    ) -> Option<Box<dyn NetworkProtocol>> {
        let kind = ProtocolKind::from_scheme(scheme)?;
        let factory = self.factories.get(&kind)?;
        debug!(scheme, ?kind, "protocol created");
        Some(factory(buffers, credentials))
    }
}
