//! Simulated Roomba for hardware-free runs and tests
//!
//! [`SimulatedRoomba`] is a [`Transport`] that behaves like the robot on the
//! other end of the serial cable:
//!
//! | Command | Simulated effect |
//! |---------|------------------|
//! | START / CONTROL / SAFE / FULL / POWER | SCI mode changes, with the real preconditions |
//! | BAUD | Device line rate changes; host must follow with `set_baud_rate` |
//! | DRIVE | Wheel speeds integrated into distance, angle and pose |
//! | MOTORS | Cleaning motor bits recorded; stopped motors clear their overcurrent |
//! | SONG / PLAY | Song slots stored, last played slot recorded |
//! | SENSORS | 26-byte group 0 reply |
//! | CLEAN / FORCE_DOCK | Cleaning or dock seeking flagged |
//!
//! In safe mode a cliff or wheel drop stops the wheels and drops the SCI
//! to passive, as the robot does.
//!
//! Time advances with the wall clock, or only through
//! [`SimHandle::advance`] when built with [`SimulatedRoomba::with_manual_clock`].
//!
//! # Thread Model
//!
//! ```text
//! ┌──────────────────┐   write/read   ┌──────────────────┐
//! │ driver poll loop │ ─────────────▶ │ SimulatedRoomba  │
//! └──────────────────┘                └────────┬─────────┘
//!                                              │ Arc<Mutex<SimState>>
//!                                     ┌────────┴─────────┐
//!                                     │    SimHandle     │ (tests, daemon)
//!                                     └──────────────────┘
//! ```

pub mod physics;

use crate::error::{Error, Result};
use crate::protocol::constants::*;
use crate::protocol::{ChargingState, Mode, Note, SensorRecord};
use crate::transport::Transport;
use parking_lot::Mutex;
use physics::{PhysicsState, wheel_speeds};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Battery drain while driving (mA)
const DRIVE_CURRENT_MA: i16 = -1200;

/// Battery drain while idle (mA)
const IDLE_CURRENT_MA: i16 = -200;

const CLEANING_MOTORS: u8 = MOTOR_MAIN_BRUSH | MOTOR_VACUUM | MOTOR_SIDE_BRUSH;

enum SimClock {
    Realtime(Instant),
    Manual,
}

/// Everything the simulated robot knows
struct SimState {
    clock: SimClock,
    mode: Mode,
    device_baud: u32,
    host_baud: u32,
    velocity: i16,
    radius: i16,
    motors: u8,
    songs: [Option<Vec<Note>>; (MAX_SONG_SLOT as usize) + 1],
    last_song_played: Option<u8>,
    cleaning: bool,
    seeking_dock: bool,
    physics: PhysicsState,
    sensors: SensorRecord,
    /// Bytes written but not yet forming a whole command
    rx: Vec<u8>,
    /// Reply bytes waiting to be read
    tx: VecDeque<u8>,
    responsive: bool,
    disconnected: bool,
    sensor_requests: u64,
    commands: Vec<u8>,
}

impl SimState {
    fn new(clock: SimClock) -> Self {
        Self {
            clock,
            mode: Mode::Off,
            device_baud: DEFAULT_BAUD_RATE,
            host_baud: DEFAULT_BAUD_RATE,
            velocity: 0,
            radius: RADIUS_STRAIGHT as i16,
            motors: 0,
            songs: Default::default(),
            last_song_played: None,
            cleaning: false,
            seeking_dock: false,
            physics: PhysicsState::new(),
            sensors: SensorRecord::idle(),
            rx: Vec::new(),
            tx: VecDeque::new(),
            responsive: true,
            disconnected: false,
            sensor_requests: 0,
            commands: Vec::new(),
        }
    }

    /// Integrate motion up to now (realtime clock only)
    fn sync_clock(&mut self) {
        if let SimClock::Realtime(last) = &mut self.clock {
            let now = Instant::now();
            let dt = now.duration_since(*last);
            *last = now;
            self.integrate(dt);
        }
    }

    fn integrate(&mut self, dt: Duration) {
        let (left, right) = wheel_speeds(self.velocity, self.radius);
        self.physics.update(dt.as_secs_f32(), left, right);
    }

    fn stop_wheels(&mut self) {
        self.velocity = 0;
        self.radius = RADIUS_STRAIGHT as i16;
    }

    /// Bytes a complete command starting at `rx[0]` needs, if known yet
    fn command_len(&self) -> Option<usize> {
        let op = *self.rx.first()?;
        Some(match op {
            OP_START | OP_CONTROL | OP_SAFE | OP_FULL | OP_POWER | OP_CLEAN | OP_FORCE_DOCK => 1,
            OP_BAUD | OP_MOTORS | OP_PLAY | OP_SENSORS => 2,
            OP_DRIVE => 5,
            OP_SONG => 3 + 2 * (*self.rx.get(2)? as usize),
            _ => 1,
        })
    }

    fn feed(&mut self, data: &[u8]) {
        self.rx.extend_from_slice(data);
        while let Some(len) = self.command_len() {
            if self.rx.len() < len {
                break;
            }
            let command: Vec<u8> = self.rx.drain(..len).collect();
            self.execute(&command);
        }
    }

    fn execute(&mut self, command: &[u8]) {
        let op = command[0];
        self.sync_clock();

        // Powered down: only START wakes the SCI
        if self.mode == Mode::Off && op != OP_START {
            log::trace!("SimRoomba: ignoring 0x{:02X} while off", op);
            return;
        }
        self.commands.push(op);

        match op {
            OP_START => self.mode = Mode::Passive,
            OP_CONTROL => {
                if self.mode == Mode::Passive {
                    self.mode = Mode::Safe;
                }
            }
            OP_SAFE => {
                if matches!(self.mode, Mode::Safe | Mode::Full) {
                    self.mode = Mode::Safe;
                }
            }
            OP_FULL => {
                if matches!(self.mode, Mode::Safe | Mode::Full) {
                    self.mode = Mode::Full;
                }
            }
            OP_POWER => {
                self.stop_wheels();
                self.motors = 0;
                self.mode = Mode::Off;
            }
            OP_BAUD => {
                if let Some(&rate) = BAUD_RATES.get(command[1] as usize) {
                    log::debug!("SimRoomba: line rate now {}", rate);
                    self.device_baud = rate;
                }
            }
            OP_DRIVE => {
                if self.mode.accepts_actuators() {
                    self.velocity = i16::from_be_bytes([command[1], command[2]]);
                    self.radius = i16::from_be_bytes([command[3], command[4]]);
                    self.cleaning = false;
                    self.seeking_dock = false;
                }
            }
            OP_MOTORS => {
                if self.mode.accepts_actuators() {
                    self.motors = command[1] & CLEANING_MOTORS;
                    // Overcurrent bits of the cleaning motors share the MOTORS layout
                    self.sensors.motor_overcurrents &= self.motors | !CLEANING_MOTORS;
                }
            }
            OP_SONG => {
                let slot = command[1] as usize;
                if slot < self.songs.len() {
                    let notes = command[3..]
                        .chunks_exact(2)
                        .map(|pair| Note::new(pair[0], pair[1]))
                        .collect();
                    self.songs[slot] = Some(notes);
                }
            }
            OP_PLAY => {
                let slot = command[1];
                if self.mode.accepts_actuators()
                    && self.songs.get(slot as usize).is_some_and(|s| s.is_some())
                {
                    self.last_song_played = Some(slot);
                }
            }
            OP_SENSORS => self.answer_sensors(command[1]),
            OP_CLEAN => {
                self.mode = Mode::Passive;
                self.cleaning = true;
                self.seeking_dock = false;
            }
            OP_FORCE_DOCK => self.seeking_dock = true,
            other => log::warn!("SimRoomba: unknown opcode 0x{:02X}", other),
        }
    }

    fn answer_sensors(&mut self, packet: u8) {
        self.sensor_requests += 1;
        if !self.responsive {
            return;
        }

        let (distance, angle) = self.physics.take_deltas();
        let mut record = self.sensors;
        record.distance_mm = distance;
        record.angle = angle;
        record.battery_current_ma = if self.velocity != 0 {
            DRIVE_CURRENT_MA
        } else {
            IDLE_CURRENT_MA
        };
        if packet != SENSOR_PACKET_ALL {
            log::warn!("SimRoomba: unsupported sensor packet {}", packet);
            return;
        }
        self.tx.extend(&record.encode_packet());
    }

    /// Safe mode reflexes after sensor changes
    fn apply_safety(&mut self) {
        let s = &self.sensors;
        let cliff = s.cliff_left || s.cliff_front_left || s.cliff_front_right || s.cliff_right;
        if self.mode == Mode::Safe && (cliff || s.wheel_dropped()) {
            log::debug!("SimRoomba: safety stop, dropping to passive");
            self.stop_wheels();
            self.mode = Mode::Passive;
        }
    }
}

/// Simulated Roomba on the far side of a serial link
pub struct SimulatedRoomba {
    state: Arc<Mutex<SimState>>,
}

/// Test and daemon access to the simulated robot
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRoomba {
    /// Robot whose motion follows the wall clock
    pub fn new() -> Self {
        Self::with_clock(SimClock::Realtime(Instant::now()))
    }

    /// Robot whose time only moves through [`SimHandle::advance`]
    pub fn with_manual_clock() -> Self {
        Self::with_clock(SimClock::Manual)
    }

    fn with_clock(clock: SimClock) -> Self {
        log::info!("SimRoomba: powered on");
        Self {
            state: Arc::new(Mutex::new(SimState::new(clock))),
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn broken_pipe() -> Error {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "simulated cable unplugged",
        ))
    }
}

impl Default for SimulatedRoomba {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedRoomba {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(Self::broken_pipe());
        }
        let n = state.tx.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(state.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(Self::broken_pipe());
        }
        if state.host_baud != state.device_baud {
            // Framing errors on a mismatched line: the robot hears noise
            log::trace!(
                "SimRoomba: {} bytes lost to baud mismatch ({} vs {})",
                data.len(),
                state.host_baud,
                state.device_baud
            );
            return Ok(data.len());
        }
        state.feed(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn discard_input(&mut self) -> Result<()> {
        self.state.lock().tx.clear();
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.state.lock().host_baud = baud_rate;
        Ok(())
    }
}

impl SimHandle {
    /// Advance a manual clock by `dt`
    pub fn advance(&self, dt: Duration) {
        let mut state = self.state.lock();
        if matches!(state.clock, SimClock::Manual) {
            state.integrate(dt);
        }
    }

    pub fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    /// Last DRIVE (velocity mm/s, raw radius)
    pub fn drive(&self) -> (i16, i16) {
        let state = self.state.lock();
        (state.velocity, state.radius)
    }

    /// Cleaning motor bitmask
    pub fn motors(&self) -> u8 {
        self.state.lock().motors
    }

    pub fn song(&self, slot: u8) -> Option<Vec<Note>> {
        self.state.lock().songs.get(slot as usize).cloned().flatten()
    }

    pub fn last_song_played(&self) -> Option<u8> {
        self.state.lock().last_song_played
    }

    /// Device side line rate
    pub fn baud_rate(&self) -> u32 {
        self.state.lock().device_baud
    }

    pub fn is_cleaning(&self) -> bool {
        self.state.lock().cleaning
    }

    pub fn is_seeking_dock(&self) -> bool {
        self.state.lock().seeking_dock
    }

    /// Pose since power-on (x mm, y mm, theta rad)
    pub fn pose(&self) -> (f32, f32, f32) {
        let mut state = self.state.lock();
        state.sync_clock();
        state.physics.pose()
    }

    pub fn sensor_requests(&self) -> u64 {
        self.state.lock().sensor_requests
    }

    /// Opcodes executed so far, in order
    pub fn commands(&self) -> Vec<u8> {
        self.state.lock().commands.clone()
    }

    pub fn set_bumps(&self, left: bool, right: bool) {
        let mut state = self.state.lock();
        let mut bits = state.sensors.bumps_wheeldrops & !(FLAG_BUMP_LEFT | FLAG_BUMP_RIGHT);
        if left {
            bits |= FLAG_BUMP_LEFT;
        }
        if right {
            bits |= FLAG_BUMP_RIGHT;
        }
        state.sensors.bumps_wheeldrops = bits;
    }

    pub fn set_wheel_drop(&self, dropped: bool) {
        let mut state = self.state.lock();
        if dropped {
            state.sensors.bumps_wheeldrops |= FLAG_WHEELDROP_LEFT | FLAG_WHEELDROP_RIGHT;
        } else {
            state.sensors.bumps_wheeldrops &=
                !(FLAG_WHEELDROP_LEFT | FLAG_WHEELDROP_RIGHT | FLAG_WHEELDROP_CASTER);
        }
        state.apply_safety();
    }

    pub fn set_wall(&self, wall: bool) {
        self.state.lock().sensors.wall = wall;
    }

    /// Cliff flags: left, front-left, front-right, right
    pub fn set_cliffs(&self, left: bool, front_left: bool, front_right: bool, right: bool) {
        let mut state = self.state.lock();
        state.sensors.cliff_left = left;
        state.sensors.cliff_front_left = front_left;
        state.sensors.cliff_front_right = front_right;
        state.sensors.cliff_right = right;
        state.apply_safety();
    }

    pub fn set_battery(&self, voltage_mv: u16, charge_mah: u16, charging: ChargingState) {
        let mut state = self.state.lock();
        state.sensors.battery_voltage_mv = voltage_mv;
        state.sensors.battery_charge_mah = charge_mah.min(state.sensors.battery_capacity_mah);
        state.sensors.charging_state = charging;
    }

    /// Motor overcurrent bits reported until the motors are switched off
    pub fn set_overcurrents(&self, bits: u8) {
        self.state.lock().sensors.motor_overcurrents = bits;
    }

    /// Stop answering sensor requests (host sees timeouts)
    pub fn set_responsive(&self, responsive: bool) {
        self.state.lock().responsive = responsive;
    }

    /// Fail every read and write like an unplugged cable
    pub fn set_disconnected(&self, disconnected: bool) {
        self.state.lock().disconnected = disconnected;
    }
}
