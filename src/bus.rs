//! The peripheral-bus capability consumed by the device.
//!
//! The concrete transport (byte framing, line discipline, checksums on data
//! transfers) lives with the embedder. The device only needs the four
//! out-of-band signals, payload transfers in either direction, and control
//! of the PROCEED interrupt line.

/// Bus I/O as seen from a device servicing one command at a time.
///
/// A well-formed frame is always answered with `ack` (or `nak` for a
/// rejected transfer direction), followed by exactly one of `complete` or
/// `error` once the command has run.
pub trait BusIo {
    /// Accept the command frame.
    fn ack(&mut self);
    /// Reject the command frame before execution.
    fn nak(&mut self);
    /// Signal successful completion.
    fn complete(&mut self);
    /// Signal failed completion.
    fn error(&mut self);

    /// Transfer `data` to the host. `err` selects the ERROR trailer in
    /// place of COMPLETE.
    fn to_host(&mut self, data: &[u8], err: bool);

    /// Fill `buf` with the host's write payload, returning the transfer
    /// checksum.
    fn from_host(&mut self, buf: &mut [u8]) -> u8;

    /// Drive the PROCEED interrupt line to `level`.
    fn set_proceed(&mut self, level: bool);
}
