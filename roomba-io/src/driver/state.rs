//! Driver lifecycle and hardware session state

use crate::error::{Error, Result};
use crate::protocol::{Mode, TxPacket};
use crate::transport::{Transport, exchange};
use std::time::Duration;

/// Lifecycle of the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Constructed, never initialized
    Uninitialized,
    /// Shut down; transport released
    Off,
    /// Mode setup and handshake in progress
    SettingUp,
    /// Poll cycles running
    Streaming,
    /// Channel failed; needs a new `init()`
    Faulted,
}

/// Lifecycle state plus the reason for the last fault
#[derive(Debug, Clone)]
pub struct DriverStatus {
    pub state: DriverState,
    pub fault: Option<String>,
}

impl Default for DriverStatus {
    fn default() -> Self {
        Self {
            state: DriverState::Uninitialized,
            fault: None,
        }
    }
}

/// Everything guarded by the hardware mutex
///
/// Only the thread holding the lock may put bytes on the wire.
pub struct HardwareSession<T: Transport> {
    /// Byte channel; `None` after shutdown
    pub transport: Option<T>,
    /// Last mode the SCI was put into
    pub mode: Mode,
    /// Pilot whose motion commands are honored (`None` = anyone)
    pub active_pilot: Option<u32>,
    /// Timestamp of the last sensor record, the start of the next odometry delta
    pub last_record_us: Option<u64>,
}

impl<T: Transport> HardwareSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Some(transport),
            mode: Mode::Off,
            active_pilot: None,
            last_record_us: None,
        }
    }

    fn transport_mut(&mut self) -> Result<&mut T> {
        self.transport.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport released",
            ))
        })
    }

    /// Write one command with no reply
    pub fn send(&mut self, packet: &TxPacket) -> Result<()> {
        log::debug!("Roomba: TX {:02X?}", packet.as_bytes());
        exchange(self.transport_mut()?, packet.as_bytes(), 0, Duration::ZERO)?;
        Ok(())
    }

    /// Write one command and read exactly `reply_len` bytes
    pub fn request(
        &mut self,
        packet: &TxPacket,
        reply_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        exchange(self.transport_mut()?, packet.as_bytes(), reply_len, timeout)
    }

    /// Switch the line rate of the underlying transport
    pub fn set_line_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.transport_mut()?.set_baud_rate(baud_rate)
    }
}

/// Poll cycle counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Cycles attempted while streaming
    pub cycles: u64,
    /// Cycles that produced a sensor record
    pub successes: u64,
    /// Recoverable failures (timeout, decode) since init
    pub errors: u64,
    /// Recoverable failures since the last success
    pub consecutive_failures: u32,
    /// Commands put on the wire by poll cycles
    pub commands_sent: u64,
    /// Reads in a row reporting motor overcurrent
    pub overcurrent_cycles: u32,
    /// Times the motors were cut for overcurrent
    pub overcurrent_shutoffs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_stop_command;
    use crate::transport::MockTransport;

    #[test]
    fn test_session_send_writes_packet() {
        let mock = MockTransport::new();
        let mut session = HardwareSession::new(mock.clone());
        session.send(&encode_stop_command()).unwrap();
        assert_eq!(mock.get_written(), vec![0x89, 0, 0, 0x80, 0]);
    }

    #[test]
    fn test_released_transport_is_channel_error() {
        let mut session = HardwareSession::new(MockTransport::new());
        session.transport = None;
        let err = session.send(&encode_stop_command()).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_recoverable());
    }
}
