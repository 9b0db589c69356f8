//! Device selection

pub mod mock;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::transport::{SerialTransport, Transport};
use mock::SimulatedRoomba;

/// Open the transport named by `device.kind`
pub fn create_transport(config: &AppConfig) -> Result<Box<dyn Transport>> {
    match config.device.kind.as_str() {
        "roomba" => {
            let transport =
                SerialTransport::open(&config.device.serial_port, config.device.open_baud)?;
            Ok(Box::new(transport))
        }
        "mock" => {
            log::info!("Using simulated Roomba");
            Ok(Box::new(SimulatedRoomba::new()))
        }
        other => Err(Error::Config(format!("unknown device kind '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_transport_by_kind() {
        let mut config = AppConfig::default();
        config.device.kind = "mock".to_string();
        assert!(create_transport(&config).is_ok());

        config.device.kind = "create2".to_string();
        assert!(matches!(create_transport(&config), Err(Error::Config(_))));
    }
}
