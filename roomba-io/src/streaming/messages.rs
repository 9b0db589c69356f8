//! Message types for network streaming
//!
//! - Outbound (UDP): [`Message`] carrying scans, raw telemetry and odometry
//! - Inbound (TCP): [`CommandMessage`], answered by one [`CommandReply`] each

use crate::driver::{ChassisSample, DriverHandle, IoSample};
use crate::error::Result;
use crate::protocol::Mode;
use crate::scan::RangeScan;
use serde::{Deserialize, Serialize};

/// Outbound message published once per poll cycle per stream
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Message {
    /// Bump, cliff and wall sensors as a sparse range scan
    Scan(RangeScan),
    /// Full sensor record as 20 big-endian integers
    Io(IoSample),
    /// Odometry deltas, velocities and battery
    Chassis(ChassisSample),
}

impl Message {
    pub fn timestamp_us(&self) -> u64 {
        match self {
            Message::Scan(scan) => scan.timestamp_us,
            Message::Io(sample) => sample.timestamp_us,
            Message::Chassis(sample) => sample.timestamp_us,
        }
    }
}

/// Commands received from a client
///
/// Externally tagged so postcard can carry it too. In JSON:
/// `{"move":{"speed":200.0,"omega":0.0}}` or `"force_dock"`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CommandMessage {
    /// Switch the SCI line rate (baud index 0..=11)
    SetBaud { index: u8 },
    SetMode { mode: Mode },
    /// Define `slot` as a one-note song and play it
    PlayNote { slot: u8, note: u8, duration: u8 },
    PlaySong { slot: u8 },
    CleaningMotors {
        main_brush: bool,
        vacuum: bool,
        side_brush: bool,
    },
    /// Body motion: `speed` mm/s, `omega` rad/s (CCW positive)
    Move { speed: f32, omega: f32 },
    ForceDock,
    StartCleaning,
}

impl CommandMessage {
    /// Queue this command on the driver on behalf of `pilot`
    pub fn dispatch(&self, handle: &DriverHandle, pilot: u32) -> Result<()> {
        match *self {
            CommandMessage::SetBaud { index } => handle.set_baud_rate(index),
            CommandMessage::SetMode { mode } => handle.set_mode(mode),
            CommandMessage::PlayNote {
                slot,
                note,
                duration,
            } => handle.play_note(slot, note, duration),
            CommandMessage::PlaySong { slot } => handle.play_song(slot),
            CommandMessage::CleaningMotors {
                main_brush,
                vacuum,
                side_brush,
            } => handle.set_cleaning_motors(main_brush, vacuum, side_brush),
            CommandMessage::Move { speed, omega } => handle.send_move(pilot, speed, omega),
            CommandMessage::ForceDock => handle.force_dock(),
            CommandMessage::StartCleaning => handle.start_cleaning(),
        }
    }
}

/// Per-command acknowledgement
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub ok: bool,
    pub error: Option<String>,
}

impl CommandReply {
    pub fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                error: None,
            },
            Err(e) => Self {
                ok: false,
                error: Some(e.to_string()),
            },
        }
    }
}
