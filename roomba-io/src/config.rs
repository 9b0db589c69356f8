//! Configuration for the roomba-io daemon
//!
//! Loaded from a TOML file. Every section and key has a default, so an
//! empty file is a valid configuration for a Roomba on `/dev/ttyUSB0`.

use crate::driver::DriverConfig;
use crate::error::{Error, Result};
use crate::motion::MotionLimits;
use crate::protocol::{CleaningMotors, Mode};
use crate::protocol::constants::{BAUD_RATES, DEFAULT_BAUD_RATE, MODE_CHANGE_DELAY_MS};
use crate::scan::{ClearPolicy, ScanMapper, SensorMount, default_mounts};
use crate::streaming::WireFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub driver: DriverSection,
    pub motion: MotionSection,
    pub scan: ScanSection,
    pub streaming: StreamingConfig,
    pub logging: LoggingConfig,
}

/// Which device to talk to and how to bring it up
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// "roomba" for a serial port, "mock" for the simulator
    pub kind: String,
    pub serial_port: String,
    /// Line rate the port is opened at (the SCI power-on rate)
    pub open_baud: u32,
    /// Baud index (0..=11) switched to during init
    pub baud_index: Option<u8>,
    /// Mode entered during init
    pub mode: Mode,
    /// Send the robot to its dock when the daemon stops
    pub dock_on_shutdown: bool,
    /// Cleaning motors switched on during init (safe and full mode only)
    pub cleaning_motors: CleaningMotors,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: "roomba".to_string(),
            serial_port: "/dev/ttyUSB0".to_string(),
            open_baud: DEFAULT_BAUD_RATE,
            baud_index: None,
            mode: Mode::Full,
            dock_on_shutdown: false,
            cleaning_motors: CleaningMotors::default(),
        }
    }
}

/// Poll loop timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverSection {
    pub poll_period_ms: u64,
    pub read_timeout_ms: u64,
    pub max_consecutive_failures: u32,
    pub mode_change_delay_ms: u64,
    pub lock_timeout_ms: u64,
    /// Reads in a row with motor overcurrent before motors are cut (0 = never)
    pub max_overcurrent_cycles: u32,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            poll_period_ms: 100,
            read_timeout_ms: 60,
            max_consecutive_failures: 3,
            mode_change_delay_ms: MODE_CHANGE_DELAY_MS,
            lock_timeout_ms: 200,
            max_overcurrent_cycles: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MotionSection {
    pub max_speed_mm_s: f32,
    pub spin_speed_mm_s: f32,
    pub max_radius_mm: f32,
}

impl Default for MotionSection {
    fn default() -> Self {
        let limits = MotionLimits::default();
        Self {
            max_speed_mm_s: limits.max_speed_mm_s,
            spin_speed_mm_s: limits.spin_speed_mm_s,
            max_radius_mm: limits.max_radius_mm,
        }
    }
}

/// Bump-to-scan mapping
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanSection {
    pub max_radius_mm: f32,
    pub clear_policy: ClearPolicy,
    /// Sensor table; the built-in Roomba layout when absent
    pub sensors: Option<Vec<SensorMount>>,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            max_radius_mm: crate::scan::DEFAULT_MAX_RADIUS_MM,
            clear_policy: ClearPolicy::default(),
            sensors: None,
        }
    }
}

/// Network surfaces
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// TCP bind address for inbound commands
    ///
    /// Examples:
    /// - `0.0.0.0:5555` - Bind to all interfaces on port 5555
    /// - `127.0.0.1:5555` - Localhost only
    pub tcp_cmd_address: String,
    /// Destination for scan and telemetry datagrams; streaming is off when unset
    pub udp_target: Option<String>,
    pub wire_format: WireFormat,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            tcp_cmd_address: "0.0.0.0:5555".to_string(),
            udp_target: None,
            wire_format: WireFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use roomba_io::config::AppConfig;
    ///
    /// let config = AppConfig::load("roomba-io.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        match self.device.kind.as_str() {
            "roomba" => {
                if self.device.serial_port.is_empty() {
                    return Err(Error::Config("device.serial_port is empty".to_string()));
                }
            }
            "mock" => {}
            other => {
                return Err(Error::Config(format!(
                    "unknown device.kind '{}' (expected roomba or mock)",
                    other
                )));
            }
        }

        if self.device.open_baud == 0 {
            return Err(Error::Config("device.open_baud must be positive".to_string()));
        }
        if let Some(index) = self.device.baud_index {
            if index as usize >= BAUD_RATES.len() {
                return Err(Error::Config(format!(
                    "device.baud_index {} out of range 0..={}",
                    index,
                    BAUD_RATES.len() - 1
                )));
            }
        }

        if self.driver.poll_period_ms == 0 {
            return Err(Error::Config("driver.poll_period_ms must be positive".to_string()));
        }
        if self.driver.read_timeout_ms == 0 {
            return Err(Error::Config("driver.read_timeout_ms must be positive".to_string()));
        }
        if self.driver.max_consecutive_failures == 0 {
            return Err(Error::Config(
                "driver.max_consecutive_failures must be at least 1".to_string(),
            ));
        }

        let m = &self.motion;
        for (name, value) in [
            ("motion.max_speed_mm_s", m.max_speed_mm_s),
            ("motion.spin_speed_mm_s", m.spin_speed_mm_s),
            ("motion.max_radius_mm", m.max_radius_mm),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }

        // Builds the mapper only to surface its table errors
        self.scan_mapper()?;

        self.streaming
            .tcp_cmd_address
            .parse::<SocketAddr>()
            .map_err(|e| {
                Error::Config(format!(
                    "streaming.tcp_cmd_address '{}': {}",
                    self.streaming.tcp_cmd_address, e
                ))
            })?;

        if log_level(&self.logging.level).is_none() {
            return Err(Error::Config(format!(
                "unknown logging.level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }

    pub fn motion_limits(&self) -> MotionLimits {
        MotionLimits {
            max_speed_mm_s: self.motion.max_speed_mm_s,
            spin_speed_mm_s: self.motion.spin_speed_mm_s,
            max_radius_mm: self.motion.max_radius_mm,
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            mode: self.device.mode,
            baud_index: self.device.baud_index,
            poll_period: Duration::from_millis(self.driver.poll_period_ms),
            read_timeout: Duration::from_millis(self.driver.read_timeout_ms),
            max_consecutive_failures: self.driver.max_consecutive_failures,
            mode_change_delay: Duration::from_millis(self.driver.mode_change_delay_ms),
            lock_timeout: Duration::from_millis(self.driver.lock_timeout_ms),
            motion_limits: self.motion_limits(),
            cleaning_motors: self.device.cleaning_motors,
            dock_on_shutdown: self.device.dock_on_shutdown,
            max_overcurrent_cycles: self.driver.max_overcurrent_cycles,
        }
    }

    /// Mapper for the configured sensor table
    pub fn scan_mapper(&self) -> Result<ScanMapper> {
        let mounts = match &self.scan.sensors {
            Some(sensors) => sensors.clone(),
            None => default_mounts(),
        };
        ScanMapper::new(&mounts, self.scan.max_radius_mm, self.scan.clear_policy)
    }
}

/// Parse a level name for the logger
pub fn log_level(level: &str) -> Option<log::LevelFilter> {
    level.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::SensorId;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device.kind, "roomba");
        assert_eq!(config.device.open_baud, 57_600);
        assert_eq!(config.device.mode, Mode::Full);
        assert_eq!(config.driver.poll_period_ms, 100);
        assert_eq!(config.driver.max_overcurrent_cycles, 5);
        assert_eq!(config.device.cleaning_motors.bits(), 0);
        assert!(!config.device.dock_on_shutdown);
        assert_eq!(config.streaming.tcp_cmd_address, "0.0.0.0:5555");
        assert_eq!(config.streaming.wire_format, WireFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.scan.clear_policy, ClearPolicy::MaxRange);
        assert!(config.scan.sensors.is_none());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[device]
kind = "mock"
baud_index = 11
mode = "safe"
cleaning_motors = { main_brush = true, vacuum = true }
dock_on_shutdown = true

[driver]
poll_period_ms = 50
max_overcurrent_cycles = 0

[scan]
max_radius_mm = 500.0
clear_policy = "omit"
sensors = [
    { id = "bump_left", x_mm = 100.0, y_mm = 100.0 },
    { id = "wall", x_mm = 0.0, y_mm = -150.0 },
]

[streaming]
udp_target = "127.0.0.1:6000"
wire_format = "postcard"

[logging]
level = "debug"
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.device.kind, "mock");
        assert_eq!(config.device.mode, Mode::Safe);
        assert_eq!(config.driver.poll_period_ms, 50);
        assert_eq!(config.driver.read_timeout_ms, 60);
        assert_eq!(config.scan.clear_policy, ClearPolicy::Omit);
        assert_eq!(config.streaming.wire_format, WireFormat::Postcard);
        let sensors = config.scan.sensors.as_ref().unwrap();
        assert_eq!(sensors[1].id, SensorId::Wall);
        assert!(config.validate().is_ok());

        let driver = config.driver_config();
        assert_eq!(driver.baud_index, Some(11));
        assert_eq!(driver.poll_period, Duration::from_millis(50));
        assert!(driver.cleaning_motors.main_brush);
        assert!(driver.cleaning_motors.vacuum);
        assert!(!driver.cleaning_motors.side_brush);
        assert!(driver.dock_on_shutdown);
        assert_eq!(driver.max_overcurrent_cycles, 0);
        assert_eq!(config.scan_mapper().unwrap().sensor_count(), 2);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.device.kind = "vacuum".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.device.baud_index = Some(12);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.scan.sensors = Some(Vec::new());
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.streaming.tcp_cmd_address = "not an address".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.motion.max_speed_mm_s = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[device]\nkind = \"mock\"\n").unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.device.kind, "mock");

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[device]\nkind = \"serial\"\n").unwrap();
        assert!(matches!(AppConfig::load(bad.path()), Err(Error::Config(_))));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        writeln!(garbage, "[device\n").unwrap();
        assert!(matches!(AppConfig::load(garbage.path()), Err(Error::Toml(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roomba-io.toml");
        let mut config = AppConfig::default();
        config.device.baud_index = Some(10);
        config.device.cleaning_motors.side_brush = true;
        config.streaming.udp_target = Some("10.0.0.2:7000".to_string());
        config.to_file(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.device.baud_index, Some(10));
        assert!(loaded.device.cleaning_motors.side_brush);
        assert_eq!(loaded.streaming.udp_target.as_deref(), Some("10.0.0.2:7000"));
    }
}
