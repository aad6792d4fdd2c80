use std::fmt;

use thiserror::Error;

/// Host-visible status error code.
///
/// Carried in the last byte of the 4-byte status response and latched in
/// [`crate::NetworkStatus`] until the next successful Open or Close resets
/// it.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct NetworkError(pub u8);

impl From<NetworkError> for u8 {
    fn from(x: NetworkError) -> u8 {
        x.0
    }
}

macro_rules! errors {
    {$($name:ident($val:expr) $desc:expr;)*} => {
        impl NetworkError {
            $(#[doc = $desc] pub const $name: Self = NetworkError($val);)*
        }

        impl fmt::Debug for NetworkError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $($val => f.write_str(stringify!($name)),)*
                    _ => write!(f, "NetworkError({})", self.0),
                }
            }
        }

        impl fmt::Display for NetworkError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let x = match self.0 {
                    $($val => $desc,)*
                    _ => "unknown error",
                };
                f.write_str(x)
            }
        }
    }
}

errors! {
    NONE(0) "no error";
    GENERAL(1) "an unspecified error occurred";
    END_OF_FILE(136) "end of file, no more data available";
    DEVICE_ERROR(144) "the device reported a failure";
    INVALID_DEVICESPEC(165) "the devicespec could not be parsed";
    NOT_CONNECTED(207) "a channel command was issued with no open connection";
    COULD_NOT_ALLOCATE_BUFFERS(255) "channel buffers could not be allocated";
}

/// Failure kinds the command processor raises before they are flattened
/// into a [`NetworkError`] status code for the host. Transport-level
/// failures never surface here: handlers report them through their
/// numeric error codes, and the remote filesystem carries its own
/// [`crate::remote::RemoteFsError`].
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Handler-level failure carrying the handler's numeric code.
    #[error("protocol error: {code}")]
    Protocol { code: NetworkError },
    /// A command was issued in a state that cannot service it.
    #[error("state error: {0}")]
    State(&'static str),
    /// The devicespec was malformed or named an unknown scheme.
    #[error("invalid devicespec: {0}")]
    Spec(String),
    /// Allocation or staging-buffer failure.
    #[error("resource error: {0}")]
    Resource(String),
}

impl AdapterError {
    /// The status code reported to the host for this failure.
    pub fn status_code(&self) -> NetworkError {
        match self {
            AdapterError::Protocol { code } => *code,
            AdapterError::State(_) => NetworkError::NOT_CONNECTED,
            AdapterError::Spec(_) => NetworkError::INVALID_DEVICESPEC,
            AdapterError::Resource(_) => NetworkError::COULD_NOT_ALLOCATE_BUFFERS,
        }
    }
}
