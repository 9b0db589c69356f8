//! Error types for roomba-io

use crate::driver::DriverState;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// roomba-io error types
///
/// Recoverable cycle errors ([`Error::Timeout`], [`Error::Decode`]) only skip
/// the current poll cycle. Channel errors ([`Error::Io`], [`Error::Serial`])
/// fault the driver immediately.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error on the byte channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration (sensor table, device, limits)
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Device initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Reply did not arrive before the deadline; partial data was discarded
    #[error("Communication timeout: received {received} of {expected} bytes")]
    Timeout {
        /// Bytes the reply should contain
        expected: usize,
        /// Bytes actually received before the deadline
        received: usize,
    },

    /// Malformed sensor reply
    #[error("Decode error: {0}")]
    Decode(String),

    /// Command rejected before queueing
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Encode-time misuse of an opcode
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Motion command from a source that is not the active pilot
    #[error("Pilot {pilot} is not the active pilot (active: {active})")]
    PilotRejected {
        /// Submitting command source
        pilot: u32,
        /// Currently registered pilot
        active: u32,
    },

    /// Driver is not in a state that accepts the operation
    #[error("Driver in state {0:?}")]
    InvalidState(DriverState),

    /// Driver faulted; recovery requires a full re-init
    #[error("Driver faulted: {0}")]
    Faulted(String),

    /// Hardware lock or command queue unavailable
    #[error("Busy: {0}")]
    Busy(String),

    /// Wire serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Worker thread panicked
    #[error("Thread panicked")]
    ThreadPanic,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error only costs the current poll cycle
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Decode(_))
    }
}
