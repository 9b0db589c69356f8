//! Motion command definitions

use serde::{Deserialize, Serialize};

/// Requested body velocity
///
/// Only the most recent pending command is ever transmitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    /// Forward speed in mm/s (negative = backward)
    pub linear_mm_s: f32,
    /// Turn rate in rad/s (positive = counter-clockwise)
    pub angular_rad_s: f32,
}

impl MotionCommand {
    pub fn new(linear_mm_s: f32, angular_rad_s: f32) -> Self {
        Self {
            linear_mm_s,
            angular_rad_s,
        }
    }
}
