//! Range scan built from the Roomba's binary proximity sensors
//!
//! Each monitored sensor sits at a fixed mount on the robot body
//! (millimeters, x forward, y to the right). A triggered sensor becomes a
//! point at its mount; a clear sensor becomes a max-range point on the same
//! bearing, meaning "nothing within the scan radius".

use crate::error::{Error, Result};
use crate::protocol::SensorRecord;
use serde::{Deserialize, Serialize};

/// Upper bound on points in one scan
pub const MAX_SCAN_POINTS: usize = 16;

/// Default scan radius in mm
pub const DEFAULT_MAX_RADIUS_MM: f32 = 1000.0;

/// Physical sensors that contribute scan points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorId {
    Wall,
    CliffLeft,
    CliffFrontLeft,
    CliffFrontRight,
    CliffRight,
    BumpLeft,
    BumpRight,
}

impl SensorId {
    /// Whether this sensor fired in `record`
    pub fn is_triggered(self, record: &SensorRecord) -> bool {
        match self {
            SensorId::Wall => record.wall,
            SensorId::CliffLeft => record.cliff_left,
            SensorId::CliffFrontLeft => record.cliff_front_left,
            SensorId::CliffFrontRight => record.cliff_front_right,
            SensorId::CliffRight => record.cliff_right,
            SensorId::BumpLeft => record.bump_left(),
            SensorId::BumpRight => record.bump_right(),
        }
    }
}

/// Mounting offset of one sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorMount {
    pub id: SensorId,
    pub x_mm: f32,
    pub y_mm: f32,
}

impl SensorMount {
    pub const fn new(id: SensorId, x_mm: f32, y_mm: f32) -> Self {
        Self { id, x_mm, y_mm }
    }

    /// Bearing from the robot centre in radians
    pub fn bearing(&self) -> f32 {
        self.y_mm.atan2(self.x_mm)
    }

    /// Distance from the robot centre in mm
    pub fn distance(&self) -> f32 {
        self.x_mm.hypot(self.y_mm)
    }
}

/// Stock Roomba mounts, in scan order
pub fn default_mounts() -> Vec<SensorMount> {
    vec![
        SensorMount::new(SensorId::Wall, 110.0, 200.0),
        SensorMount::new(SensorId::CliffLeft, 70.0, -170.0),
        SensorMount::new(SensorId::CliffFrontLeft, 170.0, -45.0),
        SensorMount::new(SensorId::CliffFrontRight, 170.0, 45.0),
        SensorMount::new(SensorId::CliffRight, 70.0, 170.0),
        SensorMount::new(SensorId::BumpLeft, 195.0, -95.0),
        SensorMount::new(SensorId::BumpRight, 195.0, 95.0),
    ]
}

/// What to emit for a sensor that did not fire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearPolicy {
    /// One max-range point per clear sensor; scan length is constant
    #[default]
    MaxRange,
    /// Clear sensors produce no point
    Omit,
}

/// A single oriented scan point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Sensor that produced the point
    pub sensor: SensorId,
    /// Bearing in radians
    pub bearing: f32,
    /// Range in mm
    pub range_mm: f32,
    /// No obstacle within the scan radius
    pub max_range: bool,
}

impl ScanPoint {
    /// Convert to Cartesian coordinates (x, y) in mm
    pub fn to_cartesian(&self) -> (f32, f32) {
        (
            self.range_mm * self.bearing.cos(),
            self.range_mm * self.bearing.sin(),
        )
    }
}

/// One cycle's range scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeScan {
    /// Timestamp of the sensor record (µs since epoch)
    pub timestamp_us: u64,
    /// Range used for clear sensors
    pub max_range_mm: f32,
    /// Points in mount-table order
    pub points: Vec<ScanPoint>,
}

impl RangeScan {
    /// Get the number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if scan is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points from sensors that fired
    pub fn obstacles(&self) -> impl Iterator<Item = &ScanPoint> {
        self.points.iter().filter(|p| !p.max_range)
    }
}

/// Mount with bearing and distance computed once
#[derive(Debug, Clone, Copy)]
struct MountGeometry {
    id: SensorId,
    bearing: f32,
    distance: f32,
}

/// Converts sensor records into range scans
#[derive(Debug, Clone)]
pub struct ScanMapper {
    mounts: Vec<MountGeometry>,
    max_radius_mm: f32,
    policy: ClearPolicy,
}

impl ScanMapper {
    /// Build a mapper from a mount table
    ///
    /// Fails if the table is empty, exceeds [`MAX_SCAN_POINTS`], or places a
    /// sensor beyond `max_radius_mm`.
    pub fn new(mounts: &[SensorMount], max_radius_mm: f32, policy: ClearPolicy) -> Result<Self> {
        if mounts.is_empty() {
            return Err(Error::Config("scan sensor table is empty".to_string()));
        }
        if mounts.len() > MAX_SCAN_POINTS {
            return Err(Error::Config(format!(
                "scan sensor table has {} entries, limit is {}",
                mounts.len(),
                MAX_SCAN_POINTS
            )));
        }
        if !max_radius_mm.is_finite() || max_radius_mm <= 0.0 {
            return Err(Error::Config(format!(
                "scan max radius {} must be positive",
                max_radius_mm
            )));
        }

        let mut geometry = Vec::with_capacity(mounts.len());
        for mount in mounts {
            let distance = mount.distance();
            if distance > max_radius_mm {
                return Err(Error::Config(format!(
                    "{:?} mounted {:.0} mm out, beyond scan radius {:.0} mm",
                    mount.id, distance, max_radius_mm
                )));
            }
            geometry.push(MountGeometry {
                id: mount.id,
                bearing: mount.bearing(),
                distance,
            });
        }

        Ok(Self {
            mounts: geometry,
            max_radius_mm,
            policy,
        })
    }

    /// Mapper with the stock mounts
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            &default_mounts(),
            DEFAULT_MAX_RADIUS_MM,
            ClearPolicy::default(),
        )
    }

    /// Number of monitored sensors
    pub fn sensor_count(&self) -> usize {
        self.mounts.len()
    }

    pub fn max_radius_mm(&self) -> f32 {
        self.max_radius_mm
    }

    /// Map one record to scan points in mount-table order
    pub fn map_to_scan_points(&self, record: &SensorRecord) -> RangeScan {
        let mut points = Vec::with_capacity(self.mounts.len());
        for mount in &self.mounts {
            if mount.id.is_triggered(record) {
                points.push(ScanPoint {
                    sensor: mount.id,
                    bearing: mount.bearing,
                    range_mm: mount.distance,
                    max_range: false,
                });
            } else if self.policy == ClearPolicy::MaxRange {
                points.push(ScanPoint {
                    sensor: mount.id,
                    bearing: mount.bearing,
                    range_mm: self.max_radius_mm,
                    max_range: true,
                });
            }
        }

        RangeScan {
            timestamp_us: record.timestamp_us,
            max_range_mm: self.max_radius_mm,
            points,
        }
    }
}
