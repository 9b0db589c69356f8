//! Motion control: body velocity to Roomba DRIVE parameters

pub mod commands;
pub mod constraints;

pub use commands::MotionCommand;
pub use constraints::{DriveParameters, MotionLimits, to_drive_parameters};
