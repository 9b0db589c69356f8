//! Sensor packet group 0 decoding
//!
//! The 26-byte reply to `[SENSORS, 0]` is decoded field by field from the
//! slice at fixed offsets; nothing relies on struct layout.
//!
//! ```text
//! [0]      bumps + wheel drops     [12..14] distance  i16 mm
//! [1]      wall                    [14..16] angle     i16 mm
//! [2..6]   cliff L, FL, FR, R      [16]     charging state
//! [6]      virtual wall            [17..19] voltage   u16 mV
//! [7]      motor overcurrents      [19..21] current   i16 mA
//! [8..10]  dirt left/right         [21]     temperature i8 C
//! [10]     remote opcode           [22..24] charge    u16 mAh
//! [11]     buttons                 [24..26] capacity  u16 mAh
//! ```

use super::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Battery charging state reported by the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingState {
    NotCharging = 0,
    ChargingRecovery = 1,
    Charging = 2,
    TrickleCharging = 3,
    Waiting = 4,
    ChargingError = 5,
}

impl TryFrom<u8> for ChargingState {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => ChargingState::NotCharging,
            1 => ChargingState::ChargingRecovery,
            2 => ChargingState::Charging,
            3 => ChargingState::TrickleCharging,
            4 => ChargingState::Waiting,
            5 => ChargingState::ChargingError,
            other => return Err(Error::Decode(format!("charging state {} out of range", other))),
        })
    }
}

/// One decoded sensor snapshot
///
/// Produced once per poll cycle and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Decode time in microseconds since the Unix epoch
    pub timestamp_us: u64,
    pub bumps_wheeldrops: u8,
    pub wall: bool,
    pub cliff_left: bool,
    pub cliff_front_left: bool,
    pub cliff_front_right: bool,
    pub cliff_right: bool,
    pub virtual_wall: bool,
    pub motor_overcurrents: u8,
    pub dirt_left: u8,
    pub dirt_right: u8,
    pub remote_control: u8,
    pub buttons: u8,
    /// Distance travelled since the previous read (mm)
    pub distance_mm: i16,
    /// Right minus left wheel distance / 2 since the previous read (mm)
    pub angle: i16,
    pub charging_state: ChargingState,
    pub battery_voltage_mv: u16,
    pub battery_current_ma: i16,
    pub battery_temperature_c: i8,
    pub battery_charge_mah: u16,
    pub battery_capacity_mah: u16,
}

#[inline]
fn be_u16(raw: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([raw[offset], raw[offset + 1]])
}

#[inline]
fn be_i16(raw: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([raw[offset], raw[offset + 1]])
}

/// Current time in microseconds since the Unix epoch
pub fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Decode a sensor reply, stamping it with the current time
///
/// `expected_len` must be the full sensor group size and `raw` must match it
/// exactly.
pub fn decode_sensor_packet(raw: &[u8], expected_len: usize) -> Result<SensorRecord> {
    decode_sensor_packet_at(raw, expected_len, now_us())
}

/// Decode a sensor reply with an explicit timestamp
pub fn decode_sensor_packet_at(
    raw: &[u8],
    expected_len: usize,
    timestamp_us: u64,
) -> Result<SensorRecord> {
    if expected_len != SENSOR_PACKET_LEN {
        return Err(Error::Decode(format!(
            "expected length {} is not the sensor group size {}",
            expected_len, SENSOR_PACKET_LEN
        )));
    }
    if raw.len() != expected_len {
        return Err(Error::Decode(format!(
            "sensor packet is {} bytes, expected {}",
            raw.len(),
            expected_len
        )));
    }

    if log::log_enabled!(log::Level::Trace) {
        log::trace!("Sensor packet: {:02X?}", raw);
    }

    Ok(SensorRecord {
        timestamp_us,
        bumps_wheeldrops: raw[OFFSET_BUMPS_WHEELDROPS],
        wall: raw[OFFSET_WALL] != 0,
        cliff_left: raw[OFFSET_CLIFF_LEFT] != 0,
        cliff_front_left: raw[OFFSET_CLIFF_FRONT_LEFT] != 0,
        cliff_front_right: raw[OFFSET_CLIFF_FRONT_RIGHT] != 0,
        cliff_right: raw[OFFSET_CLIFF_RIGHT] != 0,
        virtual_wall: raw[OFFSET_VIRTUAL_WALL] != 0,
        motor_overcurrents: raw[OFFSET_MOTOR_OVERCURRENTS],
        dirt_left: raw[OFFSET_DIRT_LEFT],
        dirt_right: raw[OFFSET_DIRT_RIGHT],
        remote_control: raw[OFFSET_REMOTE],
        buttons: raw[OFFSET_BUTTONS],
        distance_mm: be_i16(raw, OFFSET_DISTANCE),
        angle: be_i16(raw, OFFSET_ANGLE),
        charging_state: ChargingState::try_from(raw[OFFSET_CHARGING_STATE])?,
        battery_voltage_mv: be_u16(raw, OFFSET_VOLTAGE),
        battery_current_ma: be_i16(raw, OFFSET_CURRENT),
        battery_temperature_c: raw[OFFSET_TEMPERATURE] as i8,
        battery_charge_mah: be_u16(raw, OFFSET_CHARGE),
        battery_capacity_mah: be_u16(raw, OFFSET_CAPACITY),
    })
}

impl SensorRecord {
    /// Record with every sensor clear and an idle, full battery
    pub fn idle() -> Self {
        Self {
            timestamp_us: 0,
            bumps_wheeldrops: 0,
            wall: false,
            cliff_left: false,
            cliff_front_left: false,
            cliff_front_right: false,
            cliff_right: false,
            virtual_wall: false,
            motor_overcurrents: 0,
            dirt_left: 0,
            dirt_right: 0,
            remote_control: 0xFF,
            buttons: 0,
            distance_mm: 0,
            angle: 0,
            charging_state: ChargingState::NotCharging,
            battery_voltage_mv: 16_000,
            battery_current_ma: -200,
            battery_temperature_c: 25,
            battery_charge_mah: 2_700,
            battery_capacity_mah: 3_000,
        }
    }

    pub fn bump_left(&self) -> bool {
        self.bumps_wheeldrops & FLAG_BUMP_LEFT != 0
    }

    pub fn bump_right(&self) -> bool {
        self.bumps_wheeldrops & FLAG_BUMP_RIGHT != 0
    }

    /// Any wheel (left, right, caster) has dropped
    pub fn wheel_dropped(&self) -> bool {
        self.bumps_wheeldrops & (FLAG_WHEELDROP_LEFT | FLAG_WHEELDROP_RIGHT | FLAG_WHEELDROP_CASTER)
            != 0
    }

    /// Rotation since the previous read in degrees, counter-clockwise positive
    pub fn angle_degrees(&self) -> f32 {
        self.angle as f32 * DEGREES_PER_MM
    }

    /// Rotation since the previous read in radians, counter-clockwise positive
    pub fn angle_radians(&self) -> f32 {
        2.0 * self.angle as f32 / WHEEL_BASE_MM
    }

    /// The 20 integer fields in wire order, timestamp excluded
    pub fn fields(&self) -> [i32; IO_FIELD_COUNT] {
        [
            self.bumps_wheeldrops as i32,
            self.wall as i32,
            self.cliff_left as i32,
            self.cliff_front_left as i32,
            self.cliff_front_right as i32,
            self.cliff_right as i32,
            self.virtual_wall as i32,
            self.motor_overcurrents as i32,
            self.dirt_left as i32,
            self.dirt_right as i32,
            self.remote_control as i32,
            self.buttons as i32,
            self.distance_mm as i32,
            self.angle as i32,
            self.charging_state as i32,
            self.battery_voltage_mv as i32,
            self.battery_current_ma as i32,
            self.battery_temperature_c as i32,
            self.battery_charge_mah as i32,
            self.battery_capacity_mah as i32,
        ]
    }

    /// Opaque telemetry payload: 20 big-endian i32 fields
    pub fn io_payload(&self) -> [u8; IO_PAYLOAD_LEN] {
        let mut out = [0u8; IO_PAYLOAD_LEN];
        for (chunk, value) in out.chunks_exact_mut(4).zip(self.fields()) {
            chunk.copy_from_slice(&value.to_be_bytes());
        }
        out
    }

    /// 26-byte wire image as the robot would send it
    pub fn encode_packet(&self) -> [u8; SENSOR_PACKET_LEN] {
        let mut raw = [0u8; SENSOR_PACKET_LEN];
        raw[OFFSET_BUMPS_WHEELDROPS] = self.bumps_wheeldrops;
        raw[OFFSET_WALL] = self.wall as u8;
        raw[OFFSET_CLIFF_LEFT] = self.cliff_left as u8;
        raw[OFFSET_CLIFF_FRONT_LEFT] = self.cliff_front_left as u8;
        raw[OFFSET_CLIFF_FRONT_RIGHT] = self.cliff_front_right as u8;
        raw[OFFSET_CLIFF_RIGHT] = self.cliff_right as u8;
        raw[OFFSET_VIRTUAL_WALL] = self.virtual_wall as u8;
        raw[OFFSET_MOTOR_OVERCURRENTS] = self.motor_overcurrents;
        raw[OFFSET_DIRT_LEFT] = self.dirt_left;
        raw[OFFSET_DIRT_RIGHT] = self.dirt_right;
        raw[OFFSET_REMOTE] = self.remote_control;
        raw[OFFSET_BUTTONS] = self.buttons;
        raw[OFFSET_DISTANCE..OFFSET_DISTANCE + 2].copy_from_slice(&self.distance_mm.to_be_bytes());
        raw[OFFSET_ANGLE..OFFSET_ANGLE + 2].copy_from_slice(&self.angle.to_be_bytes());
        raw[OFFSET_CHARGING_STATE] = self.charging_state as u8;
        raw[OFFSET_VOLTAGE..OFFSET_VOLTAGE + 2]
            .copy_from_slice(&self.battery_voltage_mv.to_be_bytes());
        raw[OFFSET_CURRENT..OFFSET_CURRENT + 2]
            .copy_from_slice(&self.battery_current_ma.to_be_bytes());
        raw[OFFSET_TEMPERATURE] = self.battery_temperature_c as u8;
        raw[OFFSET_CHARGE..OFFSET_CHARGE + 2]
            .copy_from_slice(&self.battery_charge_mah.to_be_bytes());
        raw[OFFSET_CAPACITY..OFFSET_CAPACITY + 2]
            .copy_from_slice(&self.battery_capacity_mah.to_be_bytes());
        raw
    }
}
