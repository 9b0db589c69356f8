//! Constants for the Roomba Open Interface (SCI) protocol

// Mode and system opcodes
pub const OP_START: u8 = 0x80; // Start SCI, enter passive mode
pub const OP_BAUD: u8 = 0x81; // Baud rate change (1 byte index)
pub const OP_CONTROL: u8 = 0x82; // Passive -> safe mode
pub const OP_SAFE: u8 = 0x83; // Full -> safe mode
pub const OP_FULL: u8 = 0x84; // Safe -> full mode
pub const OP_POWER: u8 = 0x85; // Power down (off mode)

// Cleaning and docking opcodes
pub const OP_CLEAN: u8 = 0x87; // Start built-in cleaning cycle
pub const OP_FORCE_DOCK: u8 = 0x8F; // Seek the docking station

// Actuator opcodes
pub const OP_DRIVE: u8 = 0x89; // Velocity (2) + radius (2), big-endian signed
pub const OP_MOTORS: u8 = 0x8A; // Cleaning motor bitmask
pub const OP_SONG: u8 = 0x8C; // Slot + length + (note, duration) pairs
pub const OP_PLAY: u8 = 0x8D; // Play song slot

// Sensor opcodes
pub const OP_SENSORS: u8 = 0x8E; // Sensor request (1 byte packet code)
pub const SENSOR_PACKET_ALL: u8 = 0x00; // Packet group 0: all sensors

// Drive limits
pub const MAX_VELOCITY_MM_S: i16 = 500;
pub const MAX_RADIUS_MM: i16 = 2000;
pub const RADIUS_STRAIGHT: u16 = 0x8000;
pub const RADIUS_SPIN_CLOCKWISE: i16 = -1;
pub const RADIUS_SPIN_COUNTER_CLOCKWISE: i16 = 1;

// Cleaning motor bits
pub const MOTOR_SIDE_BRUSH: u8 = 0x01;
pub const MOTOR_VACUUM: u8 = 0x02;
pub const MOTOR_MAIN_BRUSH: u8 = 0x04;

// Song limits
pub const MAX_SONG_SLOT: u8 = 15;
pub const MAX_SONG_NOTES: usize = 16;
pub const MIN_NOTE: u8 = 31;
pub const MAX_NOTE: u8 = 127;

// Baud rate table indexed by the BAUD opcode argument
pub const BAUD_RATES: [u32; 12] = [
    300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 28800, 38400, 57600, 115200,
];
pub const DEFAULT_BAUD_RATE: u32 = 57600;

// Sensor packet group 0 layout (26 bytes)
pub const SENSOR_PACKET_LEN: usize = 26;
pub const OFFSET_BUMPS_WHEELDROPS: usize = 0;
pub const OFFSET_WALL: usize = 1;
pub const OFFSET_CLIFF_LEFT: usize = 2;
pub const OFFSET_CLIFF_FRONT_LEFT: usize = 3;
pub const OFFSET_CLIFF_FRONT_RIGHT: usize = 4;
pub const OFFSET_CLIFF_RIGHT: usize = 5;
pub const OFFSET_VIRTUAL_WALL: usize = 6;
pub const OFFSET_MOTOR_OVERCURRENTS: usize = 7;
pub const OFFSET_DIRT_LEFT: usize = 8;
pub const OFFSET_DIRT_RIGHT: usize = 9;
pub const OFFSET_REMOTE: usize = 10;
pub const OFFSET_BUTTONS: usize = 11;
pub const OFFSET_DISTANCE: usize = 12; // i16 BE, mm
pub const OFFSET_ANGLE: usize = 14; // i16 BE, (right - left) / 2 mm
pub const OFFSET_CHARGING_STATE: usize = 16;
pub const OFFSET_VOLTAGE: usize = 17; // u16 BE, mV
pub const OFFSET_CURRENT: usize = 19; // i16 BE, mA
pub const OFFSET_TEMPERATURE: usize = 21; // i8, degrees C
pub const OFFSET_CHARGE: usize = 22; // u16 BE, mAh
pub const OFFSET_CAPACITY: usize = 24; // u16 BE, mAh

// Bump and wheel drop flag masks
pub const FLAG_BUMP_RIGHT: u8 = 0x01;
pub const FLAG_BUMP_LEFT: u8 = 0x02;
pub const FLAG_WHEELDROP_RIGHT: u8 = 0x04;
pub const FLAG_WHEELDROP_LEFT: u8 = 0x08;
pub const FLAG_WHEELDROP_CASTER: u8 = 0x10;

// Geometry
pub const WHEEL_BASE_MM: f32 = 258.0;
pub const DEGREES_PER_MM: f32 = 360.0 / (WHEEL_BASE_MM * std::f32::consts::PI);

// IoSample payload: 20 fields x i32
pub const IO_FIELD_COUNT: usize = 20;
pub const IO_PAYLOAD_LEN: usize = IO_FIELD_COUNT * 4;

// Timing
pub const MODE_CHANGE_DELAY_MS: u64 = 20;
pub const BAUD_CHANGE_DELAY_MS: u64 = 100;
