//! roomba-io - Serial driver for iRobot Roomba robots (SCI / Open Interface)
//!
//! Polls the robot's sensors on a fixed period, turns the bump, cliff and
//! wall flags into a sparse range scan, publishes the raw record as a
//! 20-integer telemetry sample, and forwards motion and admin commands
//! queued through a [`driver::DriverHandle`].
//!
//! ```no_run
//! use roomba_io::driver::{DriverConfig, RoombaDriver};
//! use roomba_io::scan::ScanMapper;
//! use roomba_io::transport::SerialTransport;
//!
//! let transport = SerialTransport::open("/dev/ttyUSB0", 57_600)?;
//! let mapper = ScanMapper::with_defaults()?;
//! let driver = RoombaDriver::new(transport, DriverConfig::default(), mapper);
//! driver.init()?;
//! driver.handle().send_move(1, 200.0, 0.0)?;
//! if let Some(samples) = driver.poll_cycle()? {
//!     println!("{} scan points", samples.scan.len());
//! }
//! driver.shutdown();
//! # Ok::<(), roomba_io::Error>(())
//! ```

pub mod config;
pub mod devices;
pub mod driver;
pub mod error;
pub mod motion;
pub mod protocol;
pub mod scan;
pub mod streaming;
pub mod transport;

// Re-export commonly used types
pub use config::AppConfig;
pub use driver::{DriverHandle, RoombaDriver};
pub use error::{Error, Result};
