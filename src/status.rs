use crate::error::NetworkError;

/// Channel status reported to the host.
///
/// Serialized as 4 bytes: low and high byte of `rx_bytes_waiting`, then
/// `connected`, then `error`.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct NetworkStatus {
    pub rx_bytes_waiting: u16,
    pub connected: u8,
    pub error: u8,
}

impl NetworkStatus {
    /// Clear all fields back to the just-reset state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_error(&mut self, code: NetworkError) {
        self.error = code.into();
    }

    /// Serialize for the status transfer to the host.
    pub fn to_wire(&self) -> [u8; 4] {
        [
            (self.rx_bytes_waiting & 0xFF) as u8,
            (self.rx_bytes_waiting >> 8) as u8,
            self.connected,
            self.error,
        ]
    }
}
