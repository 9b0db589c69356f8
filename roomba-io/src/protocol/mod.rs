//! Roomba Open Interface codec
//!
//! - [`packet`]: outgoing command encoding (`TxPacket`, mode/drive/song/...)
//! - [`sensors`]: decoding of the 26-byte sensor group reply
//! - [`constants`]: opcodes, limits, and sensor packet offsets

pub mod constants;
pub mod packet;
pub mod sensors;

pub use constants::SENSOR_PACKET_LEN;
pub use packet::{
    BaudRate, CleaningMotors, DriveRadius, Mode, Note, TxPacket, encode_baud_command,
    encode_clean_command, encode_drive_command, encode_force_dock_command, encode_mode_command,
    encode_motors_command, encode_play_song_command, encode_sensors_command, encode_song_command,
    encode_stop_command, mode_transition,
};
pub use sensors::{ChargingState, SensorRecord, decode_sensor_packet};
