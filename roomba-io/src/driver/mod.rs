//! Roomba driver orchestrator
//!
//! One poll cycle, all under the hardware mutex:
//! 1. SENSORS request and 26-byte reply (skipped in off mode)
//! 2. At most one pending command: administrative first (FIFO), otherwise
//!    the latest motion from the active pilot
//!
//! After the lock is released the record is mapped to a range scan, an I/O
//! sample and a chassis sample. Timeouts and decode errors cost one cycle;
//! enough of them in a row, or any channel error, faults the driver until
//! the next `init()`.
//!
//! Motor overcurrent reported for `max_overcurrent_cycles` reads in a row
//! takes the command slot of that cycle: wheels stop and cleaning motors
//! switch off.

mod handle;
mod mailbox;
mod publisher;
mod state;

pub use handle::DriverHandle;
pub use mailbox::{ADMIN_QUEUE_DEPTH, AdminCommand, CommandMailbox};
pub use publisher::{ChassisSample, CycleSamples, IoSample, SamplePublisher};
pub use state::{CycleStats, DriverState, DriverStatus, HardwareSession};

use crate::error::{Error, Result};
use crate::motion::MotionLimits;
use crate::protocol::constants::{BAUD_CHANGE_DELAY_MS, MODE_CHANGE_DELAY_MS};
use crate::protocol::{
    BaudRate, CleaningMotors, Mode, SENSOR_PACKET_LEN, SensorRecord, TxPacket,
    decode_sensor_packet, encode_baud_command, encode_clean_command, encode_force_dock_command,
    encode_motors_command, encode_play_song_command, encode_sensors_command, encode_song_command,
    encode_stop_command, mode_transition,
};
use crate::scan::ScanMapper;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Runtime parameters of the orchestrator
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Mode entered by `init()`
    pub mode: Mode,
    /// Baud index switched to during `init()`
    pub baud_index: Option<u8>,
    pub poll_period: Duration,
    /// Deadline for the sensor reply
    pub read_timeout: Duration,
    /// Consecutive recoverable failures that fault the driver
    pub max_consecutive_failures: u32,
    /// Pause after each mode opcode
    pub mode_change_delay: Duration,
    /// Bound on waiting for the hardware mutex
    pub lock_timeout: Duration,
    pub motion_limits: MotionLimits,
    /// Cleaning motors switched on by `init()` in safe or full mode
    pub cleaning_motors: CleaningMotors,
    /// Send the robot to its dock on shutdown instead of leaving it passive
    pub dock_on_shutdown: bool,
    /// Consecutive reads with motor overcurrent before motors are cut (0 = never)
    pub max_overcurrent_cycles: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Full,
            baud_index: None,
            poll_period: Duration::from_millis(100),
            read_timeout: Duration::from_millis(60),
            max_consecutive_failures: 3,
            mode_change_delay: Duration::from_millis(MODE_CHANGE_DELAY_MS),
            lock_timeout: Duration::from_millis(200),
            motion_limits: MotionLimits::default(),
            cleaning_motors: CleaningMotors::default(),
            dock_on_shutdown: false,
            max_overcurrent_cycles: 5,
        }
    }
}

/// Roomba driver
///
/// Shared by reference between the poll thread and whoever calls
/// [`RoombaDriver::shutdown`]; commands arrive through [`DriverHandle`].
pub struct RoombaDriver<T: Transport> {
    config: DriverConfig,
    mapper: ScanMapper,
    session: Mutex<HardwareSession<T>>,
    mailbox: Arc<CommandMailbox>,
    status: Arc<Mutex<DriverStatus>>,
    stats: Mutex<CycleStats>,
    shutdown: AtomicBool,
}

impl<T: Transport> RoombaDriver<T> {
    /// Create a driver over `transport`; nothing is sent until `init()`
    pub fn new(transport: T, config: DriverConfig, mapper: ScanMapper) -> Self {
        Self {
            config,
            mapper,
            session: Mutex::new(HardwareSession::new(transport)),
            mailbox: Arc::new(CommandMailbox::new()),
            status: Arc::new(Mutex::new(DriverStatus::default())),
            stats: Mutex::new(CycleStats::default()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Command surface for other threads
    pub fn handle(&self) -> DriverHandle {
        DriverHandle::new(Arc::clone(&self.mailbox), Arc::clone(&self.status))
    }

    pub fn state(&self) -> DriverState {
        self.status.lock().state
    }

    pub fn stats(&self) -> CycleStats {
        *self.stats.lock()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Mode the SCI was last put into
    pub fn mode(&self) -> Mode {
        self.session.lock().mode
    }

    fn set_state(&self, state: DriverState) {
        let mut status = self.status.lock();
        if status.state != state {
            log::debug!("Roomba: {:?} -> {:?}", status.state, state);
        }
        status.state = state;
        if state != DriverState::Faulted {
            status.fault = None;
        }
    }

    /// Enter Faulted and return the error callers should see
    fn fault(&self, cause: &Error) -> Error {
        let reason = cause.to_string();
        log::error!("Roomba: driver faulted: {}", reason);
        let mut status = self.status.lock();
        status.state = DriverState::Faulted;
        status.fault = Some(reason.clone());
        Error::Faulted(reason)
    }

    /// Give the driver a transport after shutdown
    pub fn attach_transport(&self, transport: T) -> Result<()> {
        let state = self.state();
        if matches!(state, DriverState::Streaming | DriverState::SettingUp) {
            return Err(Error::InvalidState(state));
        }
        self.session.lock().transport = Some(transport);
        Ok(())
    }

    /// Bring the robot into the configured mode and verify it answers
    ///
    /// Allowed from Uninitialized, Off and Faulted. On failure the driver is
    /// left Faulted.
    pub fn init(&self) -> Result<()> {
        let state = self.state();
        if !matches!(
            state,
            DriverState::Uninitialized | DriverState::Off | DriverState::Faulted
        ) {
            return Err(Error::InvalidState(state));
        }

        log::info!("Roomba: initializing ({:?} mode)", self.config.mode);
        self.set_state(DriverState::SettingUp);
        self.shutdown.store(false, Ordering::Relaxed);

        match self.setup() {
            Ok(()) => {
                *self.stats.lock() = CycleStats::default();
                self.mailbox.clear_motion();
                self.set_state(DriverState::Streaming);
                log::info!("Roomba: initialization complete");
                Ok(())
            }
            Err(e) => {
                let err = Error::InitializationFailed(e.to_string());
                self.fault(&err);
                Err(err)
            }
        }
    }

    fn setup(&self) -> Result<()> {
        let mut session = self
            .session
            .try_lock_for(self.config.lock_timeout)
            .ok_or_else(|| Error::Busy("hardware lock held during init".to_string()))?;

        if session.transport.is_none() {
            return Err(Error::Other("no transport attached".to_string()));
        }
        session.last_record_us = None;

        // The robot may have been reset behind our back; always start from START
        for packet in mode_transition(Mode::Off, self.config.mode) {
            session.send(&packet)?;
            thread::sleep(self.config.mode_change_delay);
        }
        session.mode = self.config.mode;

        if let Some(index) = self.config.baud_index {
            Self::change_baud(&mut session, index)?;
        }

        let motors = self.config.cleaning_motors;
        if motors.bits() != 0 && session.mode.accepts_actuators() {
            log::info!(
                "Roomba: cleaning motors main {} vacuum {} side {}",
                motors.main_brush,
                motors.vacuum,
                motors.side_brush
            );
            session.send(&encode_motors_command(
                motors.main_brush,
                motors.vacuum,
                motors.side_brush,
            ))?;
        }

        if session.mode == Mode::Off {
            return Ok(());
        }

        let raw = session.request(
            &encode_sensors_command(),
            SENSOR_PACKET_LEN,
            self.config.read_timeout,
        )?;
        let record = decode_sensor_packet(&raw, SENSOR_PACKET_LEN)?;
        // The handshake read resets the odometry counters
        session.last_record_us = Some(record.timestamp_us);
        log::info!(
            "Roomba: handshake ok, battery {} mV, {}/{} mAh",
            record.battery_voltage_mv,
            record.battery_charge_mah,
            record.battery_capacity_mah
        );
        Ok(())
    }

    fn change_baud(session: &mut HardwareSession<T>, index: u8) -> Result<()> {
        let packet = encode_baud_command(index)?;
        let bps = BaudRate::from_index(index)?.bits_per_second();
        log::info!("Roomba: switching SCI to {} baud", bps);
        session.send(&packet)?;
        thread::sleep(Duration::from_millis(BAUD_CHANGE_DELAY_MS));
        session.set_line_rate(bps)
    }

    fn ensure_streaming(&self) -> Result<()> {
        let status = self.status.lock();
        match status.state {
            DriverState::Streaming => Ok(()),
            DriverState::Faulted => Err(Error::Faulted(
                status.fault.clone().unwrap_or_else(|| "unknown".to_string()),
            )),
            other => Err(Error::InvalidState(other)),
        }
    }

    /// Run one read-then-command cycle
    ///
    /// Returns `Ok(None)` when the robot is in off mode and no sensor read
    /// was made.
    pub fn poll_cycle(&self) -> Result<Option<CycleSamples>> {
        self.ensure_streaming()?;
        let mut session = self
            .session
            .try_lock_for(self.config.lock_timeout)
            .ok_or_else(|| Error::Busy("hardware lock".to_string()))?;
        // Shutdown may have won the lock race
        self.ensure_streaming()?;

        session.active_pilot = self.mailbox.active_pilot();
        self.stats.lock().cycles += 1;

        let read = if session.mode == Mode::Off {
            None
        } else {
            Some(
                session
                    .request(
                        &encode_sensors_command(),
                        SENSOR_PACKET_LEN,
                        self.config.read_timeout,
                    )
                    .and_then(|raw| decode_sensor_packet(&raw, SENSOR_PACKET_LEN)),
            )
        };

        let read = match read {
            Some(Err(e)) if !e.is_recoverable() => {
                drop(session);
                return Err(self.fault(&e));
            }
            other => other,
        };

        let active_pilot = session.active_pilot;
        let mut previous_us = None;
        let mut cut_motors = false;
        if let Some(Ok(record)) = &read {
            previous_us = session.last_record_us.replace(record.timestamp_us);
            cut_motors = self.overcurrent_limit_reached(record);
        }

        // Commands still go out when only the read failed
        let sent = if cut_motors {
            self.stop_motors(&mut session)
        } else {
            self.transmit_pending(&mut session)
        };
        match sent {
            Ok(true) => self.stats.lock().commands_sent += 1,
            Ok(false) => {}
            Err(e) => {
                drop(session);
                return Err(self.fault(&e));
            }
        }
        drop(session);

        match read {
            None => Ok(None),
            Some(Ok(record)) => {
                {
                    let mut stats = self.stats.lock();
                    stats.successes += 1;
                    stats.consecutive_failures = 0;
                }
                let scan = self.mapper.map_to_scan_points(&record);
                let io = IoSample::from_record(&record);
                let chassis = ChassisSample::from_record(&record, previous_us, active_pilot);
                log::trace!(
                    "Roomba: cycle ok, dist {} mm, angle {:.1} deg, {} scan points",
                    record.distance_mm,
                    record.angle_degrees(),
                    scan.len()
                );
                Ok(Some(CycleSamples {
                    record,
                    scan,
                    io,
                    chassis,
                }))
            }
            Some(Err(e)) => {
                let consecutive = {
                    let mut stats = self.stats.lock();
                    stats.errors += 1;
                    stats.consecutive_failures += 1;
                    stats.consecutive_failures
                };
                if consecutive >= self.config.max_consecutive_failures {
                    log::warn!(
                        "Roomba: {} consecutive failed reads, last: {}",
                        consecutive,
                        e
                    );
                    return Err(self.fault(&e));
                }
                log::warn!(
                    "Roomba: sensor read failed ({}/{}): {}",
                    consecutive,
                    self.config.max_consecutive_failures,
                    e
                );
                Err(e)
            }
        }
    }

    /// Count reads with motor overcurrent; true once the limit is reached
    fn overcurrent_limit_reached(&self, record: &SensorRecord) -> bool {
        let mut stats = self.stats.lock();
        if record.motor_overcurrents == 0 {
            stats.overcurrent_cycles = 0;
            return false;
        }
        stats.overcurrent_cycles += 1;
        let limit = self.config.max_overcurrent_cycles;
        if limit == 0 || stats.overcurrent_cycles < limit {
            return false;
        }
        stats.overcurrent_cycles = 0;
        stats.overcurrent_shutoffs += 1;
        log::warn!(
            "Roomba: motor overcurrent 0x{:02X} for {} reads, stopping motors",
            record.motor_overcurrents,
            limit
        );
        true
    }

    /// Stop the wheels and cleaning motors; pending motion is dropped
    fn stop_motors(&self, session: &mut HardwareSession<T>) -> Result<bool> {
        self.mailbox.clear_motion();
        if !session.mode.accepts_actuators() {
            log::debug!("Roomba: motors not ours to stop in {:?} mode", session.mode);
            return Ok(false);
        }
        session.send(&encode_stop_command())?;
        session.send(&encode_motors_command(false, false, false))?;
        Ok(true)
    }

    /// Send at most one pending command; `Ok(true)` if something went out
    fn transmit_pending(&self, session: &mut HardwareSession<T>) -> Result<bool> {
        if let Some(command) = self.mailbox.next_admin() {
            log::debug!("Roomba: executing {}", command.name());
            self.execute_admin(session, command)?;
            return Ok(true);
        }

        let Some(motion) = self.mailbox.take_motion() else {
            return Ok(false);
        };
        if !session.mode.accepts_actuators() {
            log::debug!("Roomba: ignoring motion in {:?} mode", session.mode);
            return Ok(false);
        }
        let params = motion.to_drive_parameters(&self.config.motion_limits);
        log::debug!(
            "Roomba: drive {} mm/s, radius {:?}",
            params.velocity_mm_s,
            params.radius
        );
        session.send(&params.encode())?;
        Ok(true)
    }

    fn execute_admin(&self, session: &mut HardwareSession<T>, command: AdminCommand) -> Result<()> {
        match command {
            AdminCommand::SetMode(mode) => {
                for packet in mode_transition(session.mode, mode) {
                    session.send(&packet)?;
                    thread::sleep(self.config.mode_change_delay);
                }
                log::info!("Roomba: mode {:?} -> {:?}", session.mode, mode);
                session.mode = mode;
            }
            AdminCommand::SetBaud(baud) => Self::change_baud(session, baud.index())?,
            AdminCommand::PlayNote { slot, note } => {
                session.send(&encode_song_command(slot, &[note])?)?;
                session.send(&encode_play_song_command(slot)?)?;
            }
            AdminCommand::PlaySong(slot) => session.send(&encode_play_song_command(slot)?)?,
            AdminCommand::CleaningMotors(m) => {
                session.send(&encode_motors_command(m.main_brush, m.vacuum, m.side_brush))?
            }
            AdminCommand::ForceDock => session.send(&encode_force_dock_command())?,
            AdminCommand::StartCleaning => {
                session.send(&encode_clean_command())?;
                // The robot takes over its actuators
                session.mode = Mode::Passive;
            }
        }
        Ok(())
    }

    /// Poll until `stop` or [`RoombaDriver::shutdown`]; returns `Err` on fault
    pub fn run<P: SamplePublisher + ?Sized>(
        &self,
        publisher: &mut P,
        stop: &AtomicBool,
    ) -> Result<()> {
        log::info!("Roomba: poll loop started ({:?} period)", self.config.poll_period);

        loop {
            let cycle_start = Instant::now();
            if self.stop_requested(stop) {
                break;
            }

            match self.poll_cycle() {
                Ok(Some(samples)) => Self::publish(publisher, &samples),
                Ok(None) => {}
                Err(e) if e.is_recoverable() => {}
                Err(Error::Busy(msg)) => log::warn!("Roomba: cycle skipped: {}", msg),
                Err(e) => {
                    if self.stop_requested(stop) {
                        break;
                    }
                    log::error!("Roomba: poll loop stopped: {}", e);
                    return Err(e);
                }
            }

            let elapsed = cycle_start.elapsed();
            if elapsed < self.config.poll_period {
                thread::sleep(self.config.poll_period - elapsed);
            } else {
                log::debug!(
                    "Roomba: cycle overrun: {:?} (target {:?})",
                    elapsed,
                    self.config.poll_period
                );
            }
        }

        log::info!("Roomba: poll loop stopped");
        Ok(())
    }

    fn stop_requested(&self, stop: &AtomicBool) -> bool {
        stop.load(Ordering::Relaxed) || self.shutdown.load(Ordering::Relaxed)
    }

    fn publish<P: SamplePublisher + ?Sized>(publisher: &mut P, samples: &CycleSamples) {
        if let Err(e) = publisher.publish_scan(&samples.scan) {
            log::warn!("Roomba: failed to publish scan: {}", e);
        }
        if let Err(e) = publisher.publish_io(&samples.io) {
            log::warn!("Roomba: failed to publish io sample: {}", e);
        }
        if let Err(e) = publisher.publish_chassis(&samples.chassis) {
            log::warn!("Roomba: failed to publish chassis sample: {}", e);
        }
    }

    /// Stop the robot, hand it back and release the transport
    ///
    /// The robot is left passive, or seeking its dock when
    /// `dock_on_shutdown` is set.
    pub fn shutdown(&self) {
        log::info!("Roomba: shutting down");
        self.shutdown.store(true, Ordering::Relaxed);

        let mut session = self.session.lock();
        if session.transport.is_some() {
            let release = if self.config.dock_on_shutdown {
                log::info!("Roomba: sending robot to dock");
                encode_force_dock_command()
            } else {
                TxPacket::opcode(Mode::Passive.opcode())
            };
            for packet in &[encode_stop_command(), release] {
                if let Err(e) = session.send(packet) {
                    log::warn!("Roomba: shutdown command failed: {}", e);
                    break;
                }
            }
        }
        session.transport = None;
        session.mode = Mode::Off;
        drop(session);

        self.mailbox.clear_motion();
        self.set_state(DriverState::Off);
        log::info!("Roomba: shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;
    use crate::scan::RangeScan;
    use crate::transport::MockTransport;

    fn test_config() -> DriverConfig {
        DriverConfig {
            poll_period: Duration::from_millis(1),
            read_timeout: Duration::from_millis(5),
            mode_change_delay: Duration::ZERO,
            ..DriverConfig::default()
        }
    }

    fn sensor_reply() -> [u8; SENSOR_PACKET_LEN] {
        SensorRecord::idle().encode_packet()
    }

    /// Driver already streaming in full mode, written bytes cleared
    fn streaming_driver() -> (RoombaDriver<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        let driver = RoombaDriver::new(
            mock.clone(),
            test_config(),
            ScanMapper::with_defaults().unwrap(),
        );
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.init().unwrap();
        mock.clear_written();
        (driver, mock)
    }

    #[derive(Default)]
    struct RecordingPublisher {
        scans: Vec<RangeScan>,
        io: Vec<IoSample>,
        chassis: Vec<ChassisSample>,
    }

    impl SamplePublisher for RecordingPublisher {
        fn publish_scan(&mut self, scan: &RangeScan) -> Result<()> {
            self.scans.push(scan.clone());
            Ok(())
        }

        fn publish_io(&mut self, sample: &IoSample) -> Result<()> {
            self.io.push(sample.clone());
            Ok(())
        }

        fn publish_chassis(&mut self, sample: &ChassisSample) -> Result<()> {
            self.chassis.push(*sample);
            Ok(())
        }
    }

    #[test]
    fn test_init_sends_mode_sequence_and_handshake() {
        let mock = MockTransport::new();
        let driver = RoombaDriver::new(
            mock.clone(),
            test_config(),
            ScanMapper::with_defaults().unwrap(),
        );
        assert_eq!(driver.state(), DriverState::Uninitialized);
        mock.respond_to(OP_SENSORS, &sensor_reply());

        driver.init().unwrap();
        assert_eq!(driver.state(), DriverState::Streaming);
        assert_eq!(driver.mode(), Mode::Full);
        assert_eq!(
            mock.get_written(),
            vec![OP_START, OP_CONTROL, OP_FULL, OP_SENSORS, SENSOR_PACKET_ALL]
        );
    }

    #[test]
    fn test_init_with_baud_change() {
        let mock = MockTransport::new();
        let config = DriverConfig {
            baud_index: Some(11),
            mode: Mode::Safe,
            ..test_config()
        };
        let driver = RoombaDriver::new(mock.clone(), config, ScanMapper::with_defaults().unwrap());
        mock.respond_to(OP_SENSORS, &sensor_reply());

        driver.init().unwrap();
        assert_eq!(mock.baud_rate(), Some(115_200));
        assert_eq!(&mock.get_written()[..4], &[OP_START, OP_CONTROL, OP_BAUD, 11]);
    }

    #[test]
    fn test_init_without_reply_faults() {
        let mock = MockTransport::new();
        let driver = RoombaDriver::new(mock, test_config(), ScanMapper::with_defaults().unwrap());
        let err = driver.init().unwrap_err();
        assert!(matches!(err, Error::InitializationFailed(_)));
        assert_eq!(driver.state(), DriverState::Faulted);
        assert!(matches!(driver.poll_cycle(), Err(Error::Faulted(_))));
    }

    #[test]
    fn test_poll_before_init_is_invalid_state() {
        let driver = RoombaDriver::new(
            MockTransport::new(),
            test_config(),
            ScanMapper::with_defaults().unwrap(),
        );
        assert!(matches!(
            driver.poll_cycle(),
            Err(Error::InvalidState(DriverState::Uninitialized))
        ));
    }

    #[test]
    fn test_cycle_produces_scan_and_io() {
        let (driver, mock) = streaming_driver();
        let mut record = SensorRecord::idle();
        record.cliff_front_left = true;
        record.distance_mm = 37;
        mock.respond_to(OP_SENSORS, &record.encode_packet());

        let samples = driver.poll_cycle().unwrap().unwrap();
        assert_eq!(samples.record.distance_mm, 37);
        assert_eq!(samples.scan.len(), 7);
        assert!(!samples.scan.points[2].max_range);
        assert_eq!(samples.io.fields()[12], 37);
        assert_eq!(samples.io.timestamp_us, samples.scan.timestamp_us);
        assert_eq!(mock.get_written(), vec![OP_SENSORS, SENSOR_PACKET_ALL]);
    }

    #[test]
    fn test_only_latest_motion_is_transmitted() {
        let (driver, mock) = streaming_driver();
        let handle = driver.handle();
        handle.send_move(1, 100.0, 0.0).unwrap();
        handle.send_move(1, 200.0, 0.0).unwrap();
        mock.respond_to(OP_SENSORS, &sensor_reply());

        driver.poll_cycle().unwrap();
        assert_eq!(
            mock.get_written(),
            vec![OP_SENSORS, SENSOR_PACKET_ALL, OP_DRIVE, 0x00, 0xC8, 0x80, 0x00]
        );

        // Nothing pending: the next cycle only reads
        mock.clear_written();
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.poll_cycle().unwrap();
        assert_eq!(mock.get_written(), vec![OP_SENSORS, SENSOR_PACKET_ALL]);
    }

    #[test]
    fn test_admin_goes_before_motion() {
        let (driver, mock) = streaming_driver();
        let handle = driver.handle();
        handle.send_move(1, 100.0, 0.0).unwrap();
        handle.force_dock().unwrap();

        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.poll_cycle().unwrap();
        assert_eq!(mock.get_written(), vec![OP_SENSORS, SENSOR_PACKET_ALL, OP_FORCE_DOCK]);

        mock.clear_written();
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.poll_cycle().unwrap();
        assert_eq!(mock.get_written()[2], OP_DRIVE);
        assert_eq!(driver.stats().commands_sent, 2);
    }

    #[test]
    fn test_play_note_defines_and_plays() {
        let (driver, mock) = streaming_driver();
        driver.handle().play_note(2, 60, 32).unwrap();
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.poll_cycle().unwrap();
        assert_eq!(&mock.get_written()[2..], &[OP_SONG, 2, 1, 60, 32, OP_PLAY, 2]);
    }

    #[test]
    fn test_set_mode_and_off_skips_read() {
        let (driver, mock) = streaming_driver();
        let handle = driver.handle();
        handle.set_mode(Mode::Safe).unwrap();
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.poll_cycle().unwrap();
        assert_eq!(driver.mode(), Mode::Safe);
        assert_eq!(&mock.get_written()[2..], &[OP_SAFE]);

        handle.set_mode(Mode::Off).unwrap();
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.poll_cycle().unwrap();
        assert_eq!(driver.mode(), Mode::Off);

        mock.clear_written();
        assert!(driver.poll_cycle().unwrap().is_none());
        assert!(mock.get_written().is_empty());
    }

    #[test]
    fn test_motion_ignored_in_passive_mode() {
        let (driver, mock) = streaming_driver();
        let handle = driver.handle();
        handle.start_cleaning().unwrap();
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.poll_cycle().unwrap();
        assert_eq!(driver.mode(), Mode::Passive);

        mock.clear_written();
        handle.send_move(1, 100.0, 0.0).unwrap();
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.poll_cycle().unwrap();
        assert_eq!(mock.get_written(), vec![OP_SENSORS, SENSOR_PACKET_ALL]);
    }

    #[test]
    fn test_rejected_pilot_never_reaches_wire() {
        let (driver, mock) = streaming_driver();
        let handle = driver.handle();
        handle.register_pilot(1);
        assert!(handle.send_move(2, 300.0, 0.0).is_err());
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.poll_cycle().unwrap();
        assert_eq!(mock.get_written(), vec![OP_SENSORS, SENSOR_PACKET_ALL]);
    }

    #[test]
    fn test_two_failures_keep_streaming_three_fault() {
        let (driver, _mock) = streaming_driver();

        assert!(matches!(driver.poll_cycle(), Err(Error::Timeout { .. })));
        assert!(matches!(driver.poll_cycle(), Err(Error::Timeout { .. })));
        assert_eq!(driver.state(), DriverState::Streaming);
        assert_eq!(driver.stats().consecutive_failures, 2);

        assert!(matches!(driver.poll_cycle(), Err(Error::Faulted(_))));
        assert_eq!(driver.state(), DriverState::Faulted);
        assert!(driver.handle().fault_reason().is_some());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let (driver, mock) = streaming_driver();
        assert!(driver.poll_cycle().is_err());
        assert!(driver.poll_cycle().is_err());
        mock.respond_to(OP_SENSORS, &sensor_reply());
        assert!(driver.poll_cycle().unwrap().is_some());
        assert!(driver.poll_cycle().is_err());
        assert!(driver.poll_cycle().is_err());
        assert_eq!(driver.state(), DriverState::Streaming);
        assert_eq!(driver.stats().errors, 4);
    }

    #[test]
    fn test_timeout_does_not_corrupt_next_cycle() {
        let (driver, mock) = streaming_driver();
        let mut first = SensorRecord::idle();
        first.distance_mm = 11;
        // Only half the reply arrives in time
        mock.respond_to(OP_SENSORS, &first.encode_packet()[..13]);
        assert!(matches!(driver.poll_cycle(), Err(Error::Timeout { expected: 26, received: 13 })));

        // Its tail shows up late
        mock.inject_read(&first.encode_packet()[13..]);
        let mut second = SensorRecord::idle();
        second.distance_mm = 22;
        mock.respond_to(OP_SENSORS, &second.encode_packet());
        let samples = driver.poll_cycle().unwrap().unwrap();
        assert_eq!(samples.record.distance_mm, 22);
    }

    #[test]
    fn test_decode_failure_is_recoverable() {
        let (driver, mock) = streaming_driver();
        let mut raw = sensor_reply();
        raw[OFFSET_CHARGING_STATE] = 9;
        mock.respond_to(OP_SENSORS, &raw);
        assert!(matches!(driver.poll_cycle(), Err(Error::Decode(_))));
        assert_eq!(driver.state(), DriverState::Streaming);
    }

    #[test]
    fn test_pending_command_sent_after_read_timeout() {
        let (driver, mock) = streaming_driver();
        driver.handle().send_move(1, 0.0, 0.0).unwrap();
        assert!(driver.poll_cycle().is_err());
        assert_eq!(&mock.get_written()[2..], &[OP_DRIVE, 0, 0, 0x80, 0]);
    }

    #[test]
    fn test_io_error_faults_immediately() {
        let (driver, mock) = streaming_driver();
        mock.set_disconnected(true);
        assert!(matches!(driver.poll_cycle(), Err(Error::Faulted(_))));
        assert_eq!(driver.state(), DriverState::Faulted);

        // Re-init recovers once the channel is back
        mock.set_disconnected(false);
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.init().unwrap();
        assert_eq!(driver.state(), DriverState::Streaming);
    }

    #[test]
    fn test_shutdown_stops_and_releases() {
        let (driver, mock) = streaming_driver();
        driver.shutdown();
        assert_eq!(driver.state(), DriverState::Off);
        assert_eq!(mock.get_written(), vec![OP_DRIVE, 0, 0, 0x80, 0, OP_START]);
        assert!(matches!(
            driver.poll_cycle(),
            Err(Error::InvalidState(DriverState::Off))
        ));

        // Re-init needs a transport again
        assert!(matches!(driver.init(), Err(Error::InitializationFailed(_))));
        driver.attach_transport(mock.clone()).unwrap();
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.init().unwrap();
    }

    #[test]
    fn test_run_publishes_until_stopped() {
        let (driver, mock) = streaming_driver();
        for _ in 0..3 {
            mock.respond_to(OP_SENSORS, &sensor_reply());
        }
        let driver = Arc::new(driver);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let driver = Arc::clone(&driver);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut publisher = RecordingPublisher::default();
                let result = driver.run(&mut publisher, &stop);
                (result, publisher)
            })
        };

        let deadline = Instant::now() + Duration::from_secs(2);
        while driver.stats().successes < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        stop.store(true, Ordering::Relaxed);
        let (result, publisher) = worker.join().unwrap();

        // Loop exits Ok or on the fault that follows the scripted replies
        assert!(result.is_ok() || matches!(result, Err(Error::Faulted(_))));
        assert_eq!(publisher.scans.len(), 3);
        assert_eq!(publisher.io.len(), 3);
        assert_eq!(publisher.chassis.len(), 3);
    }

    #[test]
    fn test_run_returns_err_on_fault() {
        let (driver, mock) = streaming_driver();
        mock.set_disconnected(true);
        let stop = AtomicBool::new(false);
        let mut publisher = RecordingPublisher::default();
        assert!(matches!(driver.run(&mut publisher, &stop), Err(Error::Faulted(_))));
        assert!(publisher.scans.is_empty());
    }

    #[test]
    fn test_chassis_sample_spans_consecutive_reads() {
        let (driver, mock) = streaming_driver();
        let handle = driver.handle();
        handle.register_pilot(5);

        let mut record = SensorRecord::idle();
        record.distance_mm = 40;
        record.angle = -12;
        record.battery_voltage_mv = 14_800;
        mock.respond_to(OP_SENSORS, &record.encode_packet());
        let first = driver.poll_cycle().unwrap().unwrap();
        mock.respond_to(OP_SENSORS, &record.encode_packet());
        let second = driver.poll_cycle().unwrap().unwrap();

        let chassis = second.chassis;
        assert_eq!(chassis.timestamp_us, second.record.timestamp_us);
        assert_eq!(chassis.dt_us, second.record.timestamp_us - first.record.timestamp_us);
        assert_eq!(chassis.delta_distance_mm, 40);
        assert!(chassis.delta_rho_rad < 0.0);
        assert_eq!(chassis.battery_voltage_mv, 14_800);
        assert_eq!(chassis.active_pilot, Some(5));
        if chassis.dt_us > 0 {
            assert!(chassis.vx_mm_s > 0.0);
            assert!(chassis.omega_rad_s < 0.0);
        }
    }

    #[test]
    fn test_init_switches_on_configured_cleaning_motors() {
        let mock = MockTransport::new();
        let config = DriverConfig {
            cleaning_motors: CleaningMotors {
                main_brush: true,
                vacuum: true,
                side_brush: false,
            },
            ..test_config()
        };
        let driver = RoombaDriver::new(mock.clone(), config, ScanMapper::with_defaults().unwrap());
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.init().unwrap();
        assert_eq!(
            mock.get_written(),
            vec![OP_START, OP_CONTROL, OP_FULL, OP_MOTORS, 0x06, OP_SENSORS, SENSOR_PACKET_ALL]
        );
    }

    #[test]
    fn test_passive_init_leaves_cleaning_motors_alone() {
        let mock = MockTransport::new();
        let config = DriverConfig {
            mode: Mode::Passive,
            cleaning_motors: CleaningMotors {
                main_brush: true,
                vacuum: false,
                side_brush: true,
            },
            ..test_config()
        };
        let driver = RoombaDriver::new(mock.clone(), config, ScanMapper::with_defaults().unwrap());
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.init().unwrap();
        assert_eq!(mock.get_written(), vec![OP_START, OP_SENSORS, SENSOR_PACKET_ALL]);
    }

    #[test]
    fn test_shutdown_docks_when_configured() {
        let mock = MockTransport::new();
        let config = DriverConfig {
            dock_on_shutdown: true,
            ..test_config()
        };
        let driver = RoombaDriver::new(mock.clone(), config, ScanMapper::with_defaults().unwrap());
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.init().unwrap();
        mock.clear_written();

        driver.shutdown();
        assert_eq!(mock.get_written(), vec![OP_DRIVE, 0, 0, 0x80, 0, OP_FORCE_DOCK]);
        assert_eq!(driver.state(), DriverState::Off);
    }

    #[test]
    fn test_persistent_overcurrent_cuts_motors() {
        let mock = MockTransport::new();
        let config = DriverConfig {
            max_overcurrent_cycles: 2,
            ..test_config()
        };
        let driver = RoombaDriver::new(mock.clone(), config, ScanMapper::with_defaults().unwrap());
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.init().unwrap();
        mock.clear_written();

        let mut stalled = SensorRecord::idle();
        stalled.motor_overcurrents = 0x04;
        let handle = driver.handle();

        // First overcurrent read: business as usual
        handle.send_move(1, 100.0, 0.0).unwrap();
        mock.respond_to(OP_SENSORS, &stalled.encode_packet());
        driver.poll_cycle().unwrap();
        assert_eq!(mock.get_written()[2], OP_DRIVE);
        assert_eq!(driver.stats().overcurrent_cycles, 1);

        // Second in a row: stop and switch off instead of driving
        mock.clear_written();
        handle.send_move(1, 100.0, 0.0).unwrap();
        mock.respond_to(OP_SENSORS, &stalled.encode_packet());
        driver.poll_cycle().unwrap();
        assert_eq!(&mock.get_written()[2..], &[OP_DRIVE, 0, 0, 0x80, 0, OP_MOTORS, 0]);
        let stats = driver.stats();
        assert_eq!(stats.overcurrent_shutoffs, 1);
        assert_eq!(stats.overcurrent_cycles, 0);

        // The dropped motion is not replayed
        mock.clear_written();
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.poll_cycle().unwrap();
        assert_eq!(mock.get_written(), vec![OP_SENSORS, SENSOR_PACKET_ALL]);
    }

    #[test]
    fn test_overcurrent_counter_resets_on_clean_read() {
        let (driver, mock) = streaming_driver();
        let mut stalled = SensorRecord::idle();
        stalled.motor_overcurrents = 0x01;

        for _ in 0..4 {
            mock.respond_to(OP_SENSORS, &stalled.encode_packet());
            driver.poll_cycle().unwrap();
        }
        assert_eq!(driver.stats().overcurrent_cycles, 4);
        mock.respond_to(OP_SENSORS, &sensor_reply());
        driver.poll_cycle().unwrap();
        assert_eq!(driver.stats().overcurrent_cycles, 0);
        assert_eq!(driver.stats().overcurrent_shutoffs, 0);
    }
}
