//! Outgoing command packets for the Roomba Open Interface
//!
//! Every command is an opcode byte followed by a fixed, opcode-specific
//! payload. Multi-byte values are big-endian signed integers. The only
//! variable-length command is SONG, whose length is carried in its second
//! payload byte.
//!
//! # Pattern
//!
//! ```ignore
//! let pkt = encode_drive_command(200, DriveRadius::Straight);
//! pkt.send_to(&mut port)?;
//! ```

use super::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Largest command: SONG with 16 notes = opcode + slot + len + 32
const MAX_PACKET_SIZE: usize = 3 + MAX_SONG_NOTES * 2;

/// Fixed-capacity TX buffer for a single OI command
#[derive(Clone, PartialEq, Eq)]
pub struct TxPacket {
    data: [u8; MAX_PACKET_SIZE],
    len: usize,
}

impl TxPacket {
    /// Create an empty packet
    pub const fn new() -> Self {
        Self {
            data: [0u8; MAX_PACKET_SIZE],
            len: 0,
        }
    }

    /// Packet holding a single opcode with no payload
    pub fn opcode(op: u8) -> Self {
        let mut pkt = Self::new();
        pkt.push(op);
        pkt
    }

    /// Get packet bytes for sending
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Opcode of this packet (first byte)
    #[inline]
    pub fn op(&self) -> Option<u8> {
        self.as_bytes().first().copied()
    }

    /// Send packet to any writer (serial port, etc.)
    #[inline]
    pub fn send_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.as_bytes())
    }

    #[inline]
    fn push(&mut self, byte: u8) {
        self.data[self.len] = byte;
        self.len += 1;
    }

    #[inline]
    fn push_i16(&mut self, value: i16) {
        for b in value.to_be_bytes() {
            self.push(b);
        }
    }
}

impl Default for TxPacket {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TxPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TxPacket({:02X?})", self.as_bytes())
    }
}

// ============================================================================
// Modes
// ============================================================================

/// OI operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Powered down, SCI not listening for control commands
    Off,
    /// Sensors readable, actuators owned by the robot
    Passive,
    /// Actuators controllable, cliff/wheel-drop safety active
    Safe,
    /// Unrestricted control
    Full,
}

impl Mode {
    /// Opcode selecting this mode
    pub fn opcode(self) -> u8 {
        match self {
            Mode::Off => OP_POWER,
            Mode::Passive => OP_START,
            Mode::Safe => OP_CONTROL,
            Mode::Full => OP_FULL,
        }
    }

    /// Whether drive and motor commands are accepted in this mode
    pub fn accepts_actuators(self) -> bool {
        matches!(self, Mode::Safe | Mode::Full)
    }
}

impl TryFrom<i32> for Mode {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Mode::Off),
            1 => Ok(Mode::Passive),
            2 => Ok(Mode::Safe),
            3 => Ok(Mode::Full),
            other => Err(Error::Protocol(format!("unrecognized mode {}", other))),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Mode::Off),
            "passive" => Ok(Mode::Passive),
            "safe" => Ok(Mode::Safe),
            "full" => Ok(Mode::Full),
            other => Err(Error::Protocol(format!("unrecognized mode '{}'", other))),
        }
    }
}

/// Encode the single opcode selecting `mode`
pub fn encode_mode_command(mode: Mode) -> TxPacket {
    TxPacket::opcode(mode.opcode())
}

/// Opcode sequence that moves the SCI from `from` to `to`
///
/// CONTROL is only accepted in passive mode and FULL only in safe mode, so
/// upward transitions walk through every intermediate mode. Dropping from
/// full to safe uses the dedicated SAFE opcode.
pub fn mode_transition(from: Mode, to: Mode) -> Vec<TxPacket> {
    let ops: &[u8] = match (from, to) {
        (_, Mode::Off) => &[OP_POWER],
        (_, Mode::Passive) => &[OP_START],
        (Mode::Off, Mode::Safe) => &[OP_START, OP_CONTROL],
        (Mode::Passive, Mode::Safe) => &[OP_CONTROL],
        (Mode::Safe, Mode::Safe) => &[],
        (Mode::Full, Mode::Safe) => &[OP_SAFE],
        (Mode::Off, Mode::Full) => &[OP_START, OP_CONTROL, OP_FULL],
        (Mode::Passive, Mode::Full) => &[OP_CONTROL, OP_FULL],
        (Mode::Safe, Mode::Full) => &[OP_FULL],
        (Mode::Full, Mode::Full) => &[],
    };
    ops.iter().map(|&op| TxPacket::opcode(op)).collect()
}

// ============================================================================
// Baud rate
// ============================================================================

/// Baud rate index accepted by the BAUD opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaudRate(u8);

impl BaudRate {
    /// Validate a baud index (0..=11)
    pub fn from_index(index: u8) -> Result<Self> {
        if (index as usize) < BAUD_RATES.len() {
            Ok(Self(index))
        } else {
            Err(Error::Protocol(format!(
                "baud index {} out of range 0..={}",
                index,
                BAUD_RATES.len() - 1
            )))
        }
    }

    /// Protocol index
    pub fn index(self) -> u8 {
        self.0
    }

    /// Line rate in bits per second
    pub fn bits_per_second(self) -> u32 {
        BAUD_RATES[self.0 as usize]
    }
}

/// Encode a baud rate change (`[BAUD, index]`)
pub fn encode_baud_command(index: u8) -> Result<TxPacket> {
    let baud = BaudRate::from_index(index)?;
    let mut pkt = TxPacket::opcode(OP_BAUD);
    pkt.push(baud.index());
    Ok(pkt)
}

// ============================================================================
// Drive
// ============================================================================

/// Turn radius argument of the DRIVE command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveRadius {
    /// Drive straight (0x8000)
    Straight,
    /// Turn in place clockwise (-1)
    SpinClockwise,
    /// Turn in place counter-clockwise (+1)
    SpinCounterClockwise,
    /// Arc with signed radius in mm, positive turns left
    Arc(i16),
}

impl DriveRadius {
    /// Wire value, arc radii clamped to ±2000 mm
    pub fn wire_value(self) -> i16 {
        match self {
            DriveRadius::Straight => RADIUS_STRAIGHT as i16,
            DriveRadius::SpinClockwise => RADIUS_SPIN_CLOCKWISE,
            DriveRadius::SpinCounterClockwise => RADIUS_SPIN_COUNTER_CLOCKWISE,
            DriveRadius::Arc(r) => r.clamp(-MAX_RADIUS_MM, MAX_RADIUS_MM),
        }
    }
}

/// Encode a DRIVE command (`[DRIVE, vel_hi, vel_lo, rad_hi, rad_lo]`)
///
/// Velocity saturates at ±500 mm/s.
pub fn encode_drive_command(velocity_mm_s: i32, radius: DriveRadius) -> TxPacket {
    let velocity = velocity_mm_s.clamp(-(MAX_VELOCITY_MM_S as i32), MAX_VELOCITY_MM_S as i32);
    let mut pkt = TxPacket::opcode(OP_DRIVE);
    pkt.push_i16(velocity as i16);
    pkt.push_i16(radius.wire_value());
    pkt
}

/// Stop both drive wheels
pub fn encode_stop_command() -> TxPacket {
    encode_drive_command(0, DriveRadius::Straight)
}

// ============================================================================
// Cleaning motors
// ============================================================================

/// Cleaning motor on/off states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningMotors {
    pub main_brush: bool,
    pub vacuum: bool,
    pub side_brush: bool,
}

impl CleaningMotors {
    /// MOTORS payload bitmask
    pub fn bits(self) -> u8 {
        let mut bits = 0;
        if self.side_brush {
            bits |= MOTOR_SIDE_BRUSH;
        }
        if self.vacuum {
            bits |= MOTOR_VACUUM;
        }
        if self.main_brush {
            bits |= MOTOR_MAIN_BRUSH;
        }
        bits
    }
}

/// Encode a MOTORS command (`[MOTORS, bits]`)
pub fn encode_motors_command(main_brush: bool, vacuum: bool, side_brush: bool) -> TxPacket {
    let motors = CleaningMotors {
        main_brush,
        vacuum,
        side_brush,
    };
    let mut pkt = TxPacket::opcode(OP_MOTORS);
    pkt.push(motors.bits());
    pkt
}

// ============================================================================
// Songs
// ============================================================================

/// One note of a song: MIDI pitch and duration in 1/64 s ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub duration: u8,
}

impl Note {
    pub fn new(pitch: u8, duration: u8) -> Self {
        Self { pitch, duration }
    }
}

fn check_song_slot(slot: u8) -> Result<()> {
    if slot > MAX_SONG_SLOT {
        return Err(Error::Protocol(format!(
            "song slot {} out of range 0..={}",
            slot, MAX_SONG_SLOT
        )));
    }
    Ok(())
}

/// Encode a SONG definition (`[SONG, slot, n, pitch, dur, ...]`)
pub fn encode_song_command(slot: u8, notes: &[Note]) -> Result<TxPacket> {
    check_song_slot(slot)?;
    if notes.is_empty() || notes.len() > MAX_SONG_NOTES {
        return Err(Error::Protocol(format!(
            "song needs 1..={} notes, got {}",
            MAX_SONG_NOTES,
            notes.len()
        )));
    }
    if let Some(bad) = notes
        .iter()
        .find(|n| !(MIN_NOTE..=MAX_NOTE).contains(&n.pitch))
    {
        return Err(Error::Protocol(format!(
            "note pitch {} out of range {}..={}",
            bad.pitch, MIN_NOTE, MAX_NOTE
        )));
    }

    let mut pkt = TxPacket::opcode(OP_SONG);
    pkt.push(slot);
    pkt.push(notes.len() as u8);
    for note in notes {
        pkt.push(note.pitch);
        pkt.push(note.duration);
    }
    Ok(pkt)
}

/// Encode a PLAY command (`[PLAY, slot]`)
pub fn encode_play_song_command(slot: u8) -> Result<TxPacket> {
    check_song_slot(slot)?;
    let mut pkt = TxPacket::opcode(OP_PLAY);
    pkt.push(slot);
    Ok(pkt)
}

// ============================================================================
// Sensors, docking, cleaning
// ============================================================================

/// Request the full sensor group (`[SENSORS, 0]`), answered by 26 bytes
pub fn encode_sensors_command() -> TxPacket {
    let mut pkt = TxPacket::opcode(OP_SENSORS);
    pkt.push(SENSOR_PACKET_ALL);
    pkt
}

/// Send the robot looking for its dock
pub fn encode_force_dock_command() -> TxPacket {
    TxPacket::opcode(OP_FORCE_DOCK)
}

/// Start the robot's own cleaning cycle
pub fn encode_clean_command() -> TxPacket {
    TxPacket::opcode(OP_CLEAN)
}
