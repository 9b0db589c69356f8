//! Command mailbox between command sources and the poll loop
//!
//! Motion is a single slot where the newest submission replaces the older
//! one. Administrative commands queue in a bounded FIFO so none is lost
//! behind a later one.

use crate::error::{Error, Result};
use crate::motion::MotionCommand;
use crate::protocol::{BaudRate, CleaningMotors, Mode, Note};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

/// Depth of the administrative command queue
pub const ADMIN_QUEUE_DEPTH: usize = 16;

/// Administrative (non-motion) commands
#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    SetMode(Mode),
    SetBaud(BaudRate),
    /// Define `slot` as a one-note song and play it
    PlayNote { slot: u8, note: Note },
    PlaySong(u8),
    CleaningMotors(CleaningMotors),
    ForceDock,
    StartCleaning,
}

impl AdminCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AdminCommand::SetMode(_) => "set_mode",
            AdminCommand::SetBaud(_) => "set_baud",
            AdminCommand::PlayNote { .. } => "play_note",
            AdminCommand::PlaySong(_) => "play_song",
            AdminCommand::CleaningMotors(_) => "cleaning_motors",
            AdminCommand::ForceDock => "force_dock",
            AdminCommand::StartCleaning => "start_cleaning",
        }
    }
}

/// Motion waiting for the next cycle, tagged with its source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingMotion {
    pub pilot: u32,
    pub command: MotionCommand,
}

#[derive(Debug, Default)]
struct MotionSlot {
    pending: Option<PendingMotion>,
    active_pilot: Option<u32>,
}

/// Shared command mailbox
pub struct CommandMailbox {
    motion: Mutex<MotionSlot>,
    admin_tx: Sender<AdminCommand>,
    admin_rx: Receiver<AdminCommand>,
}

impl CommandMailbox {
    pub fn new() -> Self {
        let (admin_tx, admin_rx) = bounded(ADMIN_QUEUE_DEPTH);
        Self {
            motion: Mutex::new(MotionSlot::default()),
            admin_tx,
            admin_rx,
        }
    }

    /// Make `pilot` the active pilot
    ///
    /// A pending motion from any other source is dropped.
    pub fn register_pilot(&self, pilot: u32) {
        let mut slot = self.motion.lock();
        if slot.pending.is_some_and(|p| p.pilot != pilot) {
            slot.pending = None;
        }
        if slot.active_pilot != Some(pilot) {
            log::info!("Roomba: active pilot is now {}", pilot);
        }
        slot.active_pilot = Some(pilot);
    }

    pub fn active_pilot(&self) -> Option<u32> {
        self.motion.lock().active_pilot
    }

    /// Replace the pending motion
    ///
    /// Fails with [`Error::PilotRejected`] if another pilot is active.
    pub fn submit_motion(&self, pilot: u32, command: MotionCommand) -> Result<()> {
        let mut slot = self.motion.lock();
        if let Some(active) = slot.active_pilot {
            if active != pilot {
                return Err(Error::PilotRejected { pilot, active });
            }
        }
        slot.pending = Some(PendingMotion { pilot, command });
        Ok(())
    }

    /// Take the pending motion if its source is still allowed to drive
    pub fn take_motion(&self) -> Option<MotionCommand> {
        let mut slot = self.motion.lock();
        let pending = slot.pending.take()?;
        match slot.active_pilot {
            Some(active) if active != pending.pilot => {
                log::debug!(
                    "Roomba: dropping motion from pilot {} (active {})",
                    pending.pilot,
                    active
                );
                None
            }
            _ => Some(pending.command),
        }
    }

    /// Drop any pending motion
    pub fn clear_motion(&self) {
        self.motion.lock().pending = None;
    }

    /// Queue an administrative command; [`Error::Busy`] if the queue is full
    pub fn submit_admin(&self, command: AdminCommand) -> Result<()> {
        self.admin_tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(cmd) => Error::Busy(format!(
                "command queue full, dropped {}",
                cmd.name()
            )),
            TrySendError::Disconnected(cmd) => {
                Error::Other(format!("command queue closed, dropped {}", cmd.name()))
            }
        })
    }

    /// Oldest queued administrative command
    pub fn next_admin(&self) -> Option<AdminCommand> {
        self.admin_rx.try_recv().ok()
    }

    pub fn pending_admin(&self) -> usize {
        self.admin_rx.len()
    }
}

impl Default for CommandMailbox {
    fn default() -> Self {
        Self::new()
    }
}
