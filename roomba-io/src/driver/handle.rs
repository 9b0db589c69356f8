//! Cloneable command surface of the driver
//!
//! Every method validates its arguments and queues; none of them touches
//! the serial port. Bytes go out on the next poll cycle.

use super::mailbox::{AdminCommand, CommandMailbox};
use super::state::{DriverState, DriverStatus};
use crate::error::{Error, Result};
use crate::motion::MotionCommand;
use crate::protocol::{
    BaudRate, CleaningMotors, Mode, Note, encode_play_song_command, encode_song_command,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Handle for commanding a running driver from other threads
#[derive(Clone)]
pub struct DriverHandle {
    mailbox: Arc<CommandMailbox>,
    status: Arc<Mutex<DriverStatus>>,
}

fn invalid(e: Error) -> Error {
    match e {
        Error::Protocol(msg) => Error::InvalidArgument(msg),
        other => other,
    }
}

impl DriverHandle {
    pub(crate) fn new(mailbox: Arc<CommandMailbox>, status: Arc<Mutex<DriverStatus>>) -> Self {
        Self { mailbox, status }
    }

    /// Current lifecycle state
    pub fn state(&self) -> DriverState {
        self.status.lock().state
    }

    /// Reason for the last fault, if any
    pub fn fault_reason(&self) -> Option<String> {
        self.status.lock().fault.clone()
    }

    /// Change the SCI baud rate (index 0..=11)
    pub fn set_baud_rate(&self, index: u8) -> Result<()> {
        let baud = BaudRate::from_index(index).map_err(invalid)?;
        self.mailbox.submit_admin(AdminCommand::SetBaud(baud))
    }

    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        self.mailbox.submit_admin(AdminCommand::SetMode(mode))
    }

    /// Set mode from its raw numeric value (0 off, 1 passive, 2 safe, 3 full)
    pub fn set_mode_raw(&self, mode: i32) -> Result<()> {
        let mode = Mode::try_from(mode).map_err(invalid)?;
        self.set_mode(mode)
    }

    /// Play a single note from song slot `slot`
    pub fn play_note(&self, slot: u8, note: u8, duration: u8) -> Result<()> {
        let note = Note::new(note, duration);
        encode_song_command(slot, &[note]).map_err(invalid)?;
        self.mailbox.submit_admin(AdminCommand::PlayNote { slot, note })
    }

    /// Play a previously defined song
    pub fn play_song(&self, slot: u8) -> Result<()> {
        encode_play_song_command(slot).map_err(invalid)?;
        self.mailbox.submit_admin(AdminCommand::PlaySong(slot))
    }

    pub fn set_cleaning_motors(
        &self,
        main_brush: bool,
        vacuum: bool,
        side_brush: bool,
    ) -> Result<()> {
        self.mailbox.submit_admin(AdminCommand::CleaningMotors(CleaningMotors {
            main_brush,
            vacuum,
            side_brush,
        }))
    }

    /// Request body motion: `speed` in mm/s, `omega` in rad/s
    ///
    /// Replaces any motion still pending from this pilot.
    pub fn send_move(&self, pilot: u32, speed: f32, omega: f32) -> Result<()> {
        self.mailbox
            .submit_motion(pilot, MotionCommand::new(speed, omega))
    }

    /// Make `pilot` the only source allowed to move the robot
    pub fn register_pilot(&self, pilot: u32) {
        self.mailbox.register_pilot(pilot);
    }

    pub fn active_pilot(&self) -> Option<u32> {
        self.mailbox.active_pilot()
    }

    pub fn force_dock(&self) -> Result<()> {
        self.mailbox.submit_admin(AdminCommand::ForceDock)
    }

    pub fn start_cleaning(&self) -> Result<()> {
        self.mailbox.submit_admin(AdminCommand::StartCleaning)
    }
}
