//! Differential drive kinematics for the simulated Roomba
//!
//! Tracks what the real robot reports: distance and angle accumulated since
//! the last sensor read, in SCI units (mm, and half the wheel difference in
//! mm). Pose is kept as well so tests can check where the robot went.

use crate::protocol::constants::{
    RADIUS_SPIN_CLOCKWISE, RADIUS_SPIN_COUNTER_CLOCKWISE, RADIUS_STRAIGHT, WHEEL_BASE_MM,
};
use std::f32::consts::{PI, TAU};

/// Wheel speeds (left, right) in mm/s for a DRIVE velocity and radius
pub fn wheel_speeds(velocity: i16, radius: i16) -> (f32, f32) {
    let v = velocity as f32;
    if radius as u16 == RADIUS_STRAIGHT || radius == 0 {
        return (v, v);
    }
    match radius {
        RADIUS_SPIN_COUNTER_CLOCKWISE => (-v, v),
        RADIUS_SPIN_CLOCKWISE => (v, -v),
        r => {
            let r = r as f32;
            let half_base = WHEEL_BASE_MM / 2.0;
            (v * (r - half_base) / r, v * (r + half_base) / r)
        }
    }
}

/// Odometry state of the simulated robot
#[derive(Debug, Clone, Default)]
pub struct PhysicsState {
    /// Distance since last read (mm)
    distance: f32,
    /// Angle since last read (SCI units)
    angle: f32,
    /// Pose in the start frame (mm, mm, rad CCW)
    x: f32,
    y: f32,
    theta: f32,
}

impl PhysicsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Integrate `dt` seconds at the given wheel speeds
    pub fn update(&mut self, dt: f32, left_mm_s: f32, right_mm_s: f32) {
        if dt <= 0.0 {
            return;
        }
        let d_dist = (left_mm_s + right_mm_s) / 2.0 * dt;
        let d_angle = (right_mm_s - left_mm_s) / 2.0 * dt;
        let d_theta = 2.0 * d_angle / WHEEL_BASE_MM;

        // Midpoint heading is exact enough at poll-period steps
        let heading = self.theta + d_theta / 2.0;
        self.x += d_dist * heading.cos();
        self.y += d_dist * heading.sin();
        self.theta = normalize_angle(self.theta + d_theta);

        self.distance += d_dist;
        self.angle += d_angle;
    }

    /// Take the accumulated (distance, angle), saturated to i16
    ///
    /// The fractional remainder stays accumulated for the next read.
    pub fn take_deltas(&mut self) -> (i16, i16) {
        let distance = saturate(self.distance);
        let angle = saturate(self.angle);
        self.distance -= distance as f32;
        self.angle -= angle as f32;
        (distance, angle)
    }

    /// Current pose (x mm, y mm, theta rad)
    pub fn pose(&self) -> (f32, f32, f32) {
        (self.x, self.y, self.theta)
    }
}

fn saturate(value: f32) -> i16 {
    value.trunc().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Normalize angle to [-π, π)
fn normalize_angle(angle: f32) -> f32 {
    let mut a = angle % TAU;
    if a >= PI {
        a -= TAU;
    } else if a < -PI {
        a += TAU;
    }
    a
}
