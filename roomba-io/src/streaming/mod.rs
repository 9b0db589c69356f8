//! Network surfaces: UDP sample streaming and TCP command intake

pub mod messages;
pub mod tcp_receiver;
pub mod udp_publisher;
pub mod wire;

pub use messages::{CommandMessage, CommandReply, Message};
pub use tcp_receiver::TcpReceiver;
pub use udp_publisher::{ChannelPublisher, UdpPublisher, stream_channel};
pub use wire::{Serializer, WireFormat};
