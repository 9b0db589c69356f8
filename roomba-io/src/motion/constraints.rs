//! Velocity limits and conversion to DRIVE parameters

use super::commands::MotionCommand;
use crate::protocol::constants::{MAX_RADIUS_MM, MAX_VELOCITY_MM_S};
use crate::protocol::{DriveRadius, TxPacket, encode_drive_command};

/// Angular rates below this (rad/s) drive straight
pub const ANGULAR_EPSILON: f32 = 1e-3;

/// Radii below this (mm) turn in place
///
/// Anything smaller rounds to 0 or +/-1 mm, and +/-1 is the spin sentinel.
const MIN_ARC_RADIUS_MM: f32 = 1.5;

/// Default in-place turn speed (mm/s per wheel)
pub const DEFAULT_SPIN_SPEED_MM_S: f32 = 200.0;

/// Limits applied when converting a motion command
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionLimits {
    /// Maximum wheel speed (mm/s)
    pub max_speed_mm_s: f32,

    /// Wheel speed used for in-place turns (mm/s)
    pub spin_speed_mm_s: f32,

    /// Largest arc radius before it is clamped (mm)
    pub max_radius_mm: f32,
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self {
            max_speed_mm_s: MAX_VELOCITY_MM_S as f32,
            spin_speed_mm_s: DEFAULT_SPIN_SPEED_MM_S,
            max_radius_mm: MAX_RADIUS_MM as f32,
        }
    }
}

impl MotionLimits {
    /// Limits with every value pulled inside what the wire format can carry
    pub fn sanitized(self) -> Self {
        let max_speed = finite_or(self.max_speed_mm_s, 0.0)
            .abs()
            .min(MAX_VELOCITY_MM_S as f32);
        Self {
            max_speed_mm_s: max_speed,
            spin_speed_mm_s: finite_or(self.spin_speed_mm_s, 0.0)
                .abs()
                .min(max_speed),
            max_radius_mm: finite_or(self.max_radius_mm, 0.0)
                .abs()
                .clamp(MIN_ARC_RADIUS_MM, MAX_RADIUS_MM as f32),
        }
    }
}

/// Velocity and radius arguments of one DRIVE command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveParameters {
    pub velocity_mm_s: i16,
    pub radius: DriveRadius,
}

impl DriveParameters {
    /// Encode as a DRIVE packet
    pub fn encode(&self) -> TxPacket {
        encode_drive_command(self.velocity_mm_s as i32, self.radius)
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value
    }
}

/// Convert linear speed and turn rate into DRIVE parameters
///
/// The Roomba only takes a velocity and a turn radius, so the angular rate
/// is expressed through `radius = linear / angular`. Radii too small to
/// express become an in-place spin at the configured spin speed; radii too
/// large are clamped, trading speed to keep the requested turn rate. The
/// radius comes from the requested speed and only the final velocity is
/// saturated, so an over-speed request keeps its path and slows down.
/// The result always fits the wire format. NaN inputs count as zero.
pub fn to_drive_parameters(
    linear_mm_s: f32,
    angular_rad_s: f32,
    limits: &MotionLimits,
) -> DriveParameters {
    let limits = limits.sanitized();
    let max_speed = limits.max_speed_mm_s;
    let linear = finite_or(linear_mm_s, 0.0);
    let angular = finite_or(angular_rad_s, 0.0);

    if angular.abs() < ANGULAR_EPSILON {
        return DriveParameters {
            velocity_mm_s: linear.clamp(-max_speed, max_speed).round() as i16,
            radius: DriveRadius::Straight,
        };
    }

    // Requested speed, not the saturated one; infinity over infinity spins
    let radius = finite_or(linear / angular, 0.0);
    let (velocity, drive_radius) = if radius.abs() < MIN_ARC_RADIUS_MM {
        // +1 sentinel: positive velocity turns counter-clockwise
        (
            angular.signum() * limits.spin_speed_mm_s,
            DriveRadius::SpinCounterClockwise,
        )
    } else if radius.abs() > limits.max_radius_mm {
        let clamped = radius.signum() * limits.max_radius_mm;
        (angular * clamped, DriveRadius::Arc(clamped.round() as i16))
    } else {
        (linear, DriveRadius::Arc(radius.round() as i16))
    };

    DriveParameters {
        velocity_mm_s: velocity.clamp(-max_speed, max_speed).round() as i16,
        radius: drive_radius,
    }
}

impl MotionCommand {
    /// Convert under `limits`; see [`to_drive_parameters`]
    pub fn to_drive_parameters(&self, limits: &MotionLimits) -> DriveParameters {
        to_drive_parameters(self.linear_mm_s, self.angular_rad_s, limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(linear: f32, angular: f32) -> DriveParameters {
        to_drive_parameters(linear, angular, &MotionLimits::default())
    }

    const STOPPED: DriveParameters = DriveParameters {
        velocity_mm_s: 0,
        radius: DriveRadius::Straight,
    };

    #[test]
    fn test_zero_is_stop() {
        assert_eq!(convert(0.0, 0.0), STOPPED);
    }

    #[test]
    fn test_straight_when_no_turn() {
        let p = convert(250.0, 0.0);
        assert_eq!(p.velocity_mm_s, 250);
        assert_eq!(p.radius, DriveRadius::Straight);

        let p = convert(-120.0, 0.0005);
        assert_eq!(p.velocity_mm_s, -120);
        assert_eq!(p.radius, DriveRadius::Straight);
    }

    #[test]
    fn test_arc_radius_from_ratio() {
        // 200 mm/s at 0.5 rad/s -> 400 mm radius, turning left
        let p = convert(200.0, 0.5);
        assert_eq!(p.velocity_mm_s, 200);
        assert_eq!(p.radius, DriveRadius::Arc(400));

        let p = convert(200.0, -0.5);
        assert_eq!(p.radius, DriveRadius::Arc(-400));
    }

    #[test]
    fn test_extreme_angular_rate_spins() {
        let p = convert(100.0, 1000.0);
        assert_eq!(p.radius, DriveRadius::SpinCounterClockwise);
        assert_eq!(p.velocity_mm_s, 200);

        let p = convert(100.0, -1000.0);
        assert_eq!(p.radius, DriveRadius::SpinCounterClockwise);
        assert_eq!(p.velocity_mm_s, -200);
    }

    #[test]
    fn test_pure_rotation_spins() {
        let p = convert(0.0, 1.0);
        assert_eq!(p.radius, DriveRadius::SpinCounterClockwise);
        assert_eq!(p.velocity_mm_s.abs(), 200);
    }

    #[test]
    fn test_large_radius_clamped_keeps_turn_rate() {
        // 400 mm/s at 0.01 rad/s asks for a 40 m radius
        let p = convert(400.0, 0.01);
        assert_eq!(p.radius, DriveRadius::Arc(2000));
        assert_eq!(p.velocity_mm_s, 20);
    }

    #[test]
    fn test_overspeed_turn_keeps_requested_radius() {
        let p = convert(1000.0, 1.0);
        assert_eq!(p.velocity_mm_s, 500);
        assert_eq!(p.radius, DriveRadius::Arc(1000));

        let p = convert(-800.0, 0.5);
        assert_eq!(p.velocity_mm_s, -500);
        assert_eq!(p.radius, DriveRadius::Arc(-1600));
    }

    #[test]
    fn test_tiny_radius_never_hits_spin_sentinel() {
        // 1.2 mm would round to Arc(1), the +1 spin sentinel, at 1 mm/s
        let p = convert(1.2, 1.0);
        assert_eq!(p.radius, DriveRadius::SpinCounterClockwise);
        assert_eq!(p.velocity_mm_s, 200);
        assert_eq!(p.encode().as_bytes(), &[0x89, 0x00, 0xC8, 0x00, 0x01]);

        let p = convert(-1.4, 1.0);
        assert_eq!(p.radius, DriveRadius::SpinCounterClockwise);

        let p = convert(1.5, 1.0);
        assert_eq!(p.radius, DriveRadius::Arc(2));
    }

    #[test]
    fn test_velocity_saturates() {
        let p = convert(5000.0, 0.0);
        assert_eq!(p.velocity_mm_s, 500);
        let p = convert(-5000.0, 0.0);
        assert_eq!(p.velocity_mm_s, -500);
    }

    #[test]
    fn test_non_finite_inputs_saturate() {
        assert_eq!(convert(f32::NAN, f32::NAN), STOPPED);
        let p = convert(f32::INFINITY, 0.0);
        assert_eq!(p.velocity_mm_s, 500);
        let p = convert(f32::NAN, f32::INFINITY);
        assert_eq!(p.radius, DriveRadius::SpinCounterClockwise);
        assert!(p.velocity_mm_s.abs() <= 500);
        let p = convert(f32::INFINITY, f32::INFINITY);
        assert_eq!(p.radius, DriveRadius::SpinCounterClockwise);
        let p = convert(f32::INFINITY, 0.5);
        assert_eq!(p.radius, DriveRadius::Arc(2000));
        assert_eq!(p.velocity_mm_s, 500);
    }

    #[test]
    fn test_custom_limits() {
        let limits = MotionLimits {
            max_speed_mm_s: 300.0,
            spin_speed_mm_s: 150.0,
            max_radius_mm: 1000.0,
        };
        let p = to_drive_parameters(450.0, 0.0, &limits);
        assert_eq!(p.velocity_mm_s, 300);
        let p = to_drive_parameters(0.0, -2.0, &limits);
        assert_eq!(p.velocity_mm_s, -150);
        let p = to_drive_parameters(300.0, 0.1, &limits);
        assert_eq!(p.radius, DriveRadius::Arc(1000));
        assert_eq!(p.velocity_mm_s, 100);
    }

    #[test]
    fn test_encode_matches_wire() {
        let pkt = convert(200.0, 0.5).encode();
        assert_eq!(pkt.as_bytes(), &[0x89, 0x00, 0xC8, 0x01, 0x90]);
        let pkt = STOPPED.encode();
        assert_eq!(pkt.as_bytes(), &[0x89, 0x00, 0x00, 0x80, 0x00]);
    }
}
