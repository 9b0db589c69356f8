//! Output samples and the publisher seam

use crate::error::Result;
use crate::protocol::SensorRecord;
use crate::protocol::constants::IO_FIELD_COUNT;
use crate::scan::RangeScan;
use serde::{Deserialize, Serialize};

/// Raw sensor telemetry as an opaque integer array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoSample {
    /// Timestamp of the source record (µs since epoch)
    pub timestamp_us: u64,
    /// 20 big-endian i32 fields
    pub payload: Vec<u8>,
}

impl IoSample {
    pub fn from_record(record: &SensorRecord) -> Self {
        Self {
            timestamp_us: record.timestamp_us,
            payload: record.io_payload().to_vec(),
        }
    }

    /// Decode the payload back into integers
    pub fn fields(&self) -> Vec<i32> {
        self.payload
            .chunks_exact(4)
            .take(IO_FIELD_COUNT)
            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Odometry and power of one poll cycle
///
/// The robot reports distance and angle accumulated since the previous
/// SENSORS read, so velocities are those deltas over the time between the
/// two records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChassisSample {
    pub timestamp_us: u64,
    /// Time covered by the deltas; 0 when there is no previous record
    pub dt_us: u64,
    /// Distance travelled since the previous read (mm)
    pub delta_distance_mm: i16,
    /// Rotation since the previous read (rad, counter-clockwise positive)
    pub delta_rho_rad: f32,
    /// Forward velocity (mm/s)
    pub vx_mm_s: f32,
    /// Turn rate (rad/s)
    pub omega_rad_s: f32,
    pub battery_voltage_mv: u16,
    pub battery_current_ma: i16,
    /// Pilot whose motion commands were honored this cycle
    pub active_pilot: Option<u32>,
}

impl ChassisSample {
    pub fn from_record(
        record: &SensorRecord,
        previous_us: Option<u64>,
        active_pilot: Option<u32>,
    ) -> Self {
        let dt_us = previous_us
            .map(|prev| record.timestamp_us.saturating_sub(prev))
            .unwrap_or(0);
        let delta_rho_rad = record.angle_radians();
        let (vx_mm_s, omega_rad_s) = if dt_us == 0 {
            (0.0, 0.0)
        } else {
            let dt = dt_us as f32 / 1_000_000.0;
            (record.distance_mm as f32 / dt, delta_rho_rad / dt)
        };

        Self {
            timestamp_us: record.timestamp_us,
            dt_us,
            delta_distance_mm: record.distance_mm,
            delta_rho_rad,
            vx_mm_s,
            omega_rad_s,
            battery_voltage_mv: record.battery_voltage_mv,
            battery_current_ma: record.battery_current_ma,
            active_pilot,
        }
    }
}

/// Outputs of one successful poll cycle
#[derive(Debug, Clone)]
pub struct CycleSamples {
    pub record: SensorRecord,
    pub scan: RangeScan,
    pub io: IoSample,
    pub chassis: ChassisSample,
}

/// Sink for the driver's output streams
pub trait SamplePublisher: Send {
    fn publish_scan(&mut self, scan: &RangeScan) -> Result<()>;
    fn publish_io(&mut self, sample: &IoSample) -> Result<()>;
    fn publish_chassis(&mut self, sample: &ChassisSample) -> Result<()>;
}

impl<P: SamplePublisher + ?Sized> SamplePublisher for Box<P> {
    fn publish_scan(&mut self, scan: &RangeScan) -> Result<()> {
        (**self).publish_scan(scan)
    }

    fn publish_io(&mut self, sample: &IoSample) -> Result<()> {
        (**self).publish_io(sample)
    }

    fn publish_chassis(&mut self, sample: &ChassisSample) -> Result<()> {
        (**self).publish_chassis(sample)
    }
}
