//! UDP publisher for scan, telemetry and odometry streaming
//!
//! The poll thread hands each cycle's outputs to a [`ChannelPublisher`],
//! which never blocks: when the bounded channel is full the newest message
//! is dropped. A [`UdpPublisher`] thread drains the channel and sends each
//! message as one length-prefixed datagram to the configured target.
//!
//! ```text
//! poll thread ──► ChannelPublisher ──► crossbeam channel ──► UdpPublisher ──► target
//! ```

use crate::driver::{ChassisSample, IoSample, SamplePublisher};
use crate::error::{Error, Result};
use crate::scan::RangeScan;
use crate::streaming::messages::Message;
use crate::streaming::wire::{Serializer, frame_into};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Messages buffered between the poll and UDP threads
pub const STREAM_QUEUE_DEPTH: usize = 64;

/// Send buffer capacity; a scan of 16 points is well under this
const MAX_UDP_BUFFER_SIZE: usize = 4096;

/// How long the publisher waits for a message before rechecking the running flag
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Create the channel pair joining the poll thread to the UDP thread
pub fn stream_channel() -> (ChannelPublisher, Receiver<Message>) {
    let (tx, rx) = crossbeam_channel::bounded(STREAM_QUEUE_DEPTH);
    (ChannelPublisher::new(tx), rx)
}

/// [`SamplePublisher`] that forwards into a bounded channel
pub struct ChannelPublisher {
    tx: Sender<Message>,
    dropped: u64,
}

impl ChannelPublisher {
    pub fn new(tx: Sender<Message>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// Messages dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn push(&mut self, msg: Message) -> Result<()> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                log::trace!("Stream queue full, dropped message ({} total)", self.dropped);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(Error::Other("stream channel disconnected".to_string()))
            }
        }
    }
}

impl SamplePublisher for ChannelPublisher {
    fn publish_scan(&mut self, scan: &RangeScan) -> Result<()> {
        self.push(Message::Scan(scan.clone()))
    }

    fn publish_io(&mut self, sample: &IoSample) -> Result<()> {
        self.push(Message::Io(sample.clone()))
    }

    fn publish_chassis(&mut self, sample: &ChassisSample) -> Result<()> {
        self.push(Message::Chassis(*sample))
    }
}

/// UDP publisher that streams messages to a single target
pub struct UdpPublisher {
    socket: UdpSocket,
    target: SocketAddr,
    serializer: Serializer,
    rx: Receiver<Message>,
    /// Global running flag (daemon shutdown)
    running: Arc<AtomicBool>,
    sent: u64,
}

impl UdpPublisher {
    /// Bind an ephemeral local socket for sending to `target`
    pub fn bind(
        target: &str,
        serializer: Serializer,
        rx: Receiver<Message>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let target: SocketAddr = target
            .parse()
            .map_err(|e| Error::Config(format!("udp target '{}': {}", target, e)))?;
        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)?;
        Ok(Self::new(socket, target, serializer, rx, running))
    }

    pub fn new(
        socket: UdpSocket,
        target: SocketAddr,
        serializer: Serializer,
        rx: Receiver<Message>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            socket,
            target,
            serializer,
            rx,
            running,
            sent: 0,
        }
    }

    /// Datagrams sent so far
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Run until the running flag clears or every sender is gone
    pub fn run(&mut self) -> Result<()> {
        log::info!("UDP publisher streaming to {}", self.target);

        // Pre-allocate send buffer to avoid allocation per message
        let mut send_buffer = Vec::with_capacity(MAX_UDP_BUFFER_SIZE);

        while self.running.load(Ordering::Relaxed) {
            match self.rx.recv_timeout(RECV_TIMEOUT) {
                Ok(msg) => {
                    // UDP send errors are not fatal - just log and continue
                    if let Err(e) = self.send_with_buffer(&msg, &mut send_buffer) {
                        log::warn!("Failed to send message: {}", e);
                    } else {
                        self.sent += 1;
                        log::trace!("Sent message (ts: {}) to {}", msg.timestamp_us(), self.target);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::debug!("Stream channel closed");
                    break;
                }
            }
        }

        log::info!("UDP publisher stopped ({} datagrams sent)", self.sent);
        Ok(())
    }

    /// Send one message as `[4-byte length][payload]`, reusing `buffer`
    fn send_with_buffer(&self, msg: &Message, buffer: &mut Vec<u8>) -> Result<()> {
        let payload = self.serializer.serialize(msg)?;
        frame_into(&payload, buffer)?;
        self.socket.send_to(buffer, self.target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SensorRecord;
    use crate::scan::ScanMapper;
    use crate::streaming::wire::{WireFormat, unframe};

    #[test]
    fn test_channel_publisher_drops_when_full() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut publisher = ChannelPublisher::new(tx);
        let sample = IoSample::from_record(&SensorRecord::idle());
        publisher.publish_io(&sample).unwrap();
        publisher.publish_io(&sample).unwrap();
        assert_eq!(publisher.dropped(), 1);
        assert_eq!(rx.len(), 1);

        drop(rx);
        assert!(publisher.publish_io(&sample).is_err());
    }

    #[test]
    fn test_channel_publisher_forwards_chassis() {
        let (mut publisher, rx) = stream_channel();
        let mut record = SensorRecord::idle();
        record.timestamp_us = 2_000;
        record.distance_mm = 12;
        let sample = ChassisSample::from_record(&record, Some(1_000), Some(4));
        publisher.publish_chassis(&sample).unwrap();

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.timestamp_us(), 2_000);
        assert_eq!(msg, Message::Chassis(sample));
    }

    #[test]
    fn test_udp_delivery() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let target = receiver.local_addr().unwrap().to_string();

        let (mut channel, rx) = stream_channel();
        let running = Arc::new(AtomicBool::new(true));
        let serializer = Serializer::new(WireFormat::Json);
        let mut udp = UdpPublisher::bind(&target, serializer, rx, Arc::clone(&running)).unwrap();
        let worker = std::thread::spawn(move || udp.run());

        let scan = ScanMapper::with_defaults()
            .unwrap()
            .map_to_scan_points(&SensorRecord::idle());
        channel.publish_scan(&scan).unwrap();

        let mut buf = [0u8; MAX_UDP_BUFFER_SIZE];
        let n = receiver.recv(&mut buf).unwrap();
        let payload = unframe(&buf[..n]).unwrap().unwrap();
        assert_eq!(serializer.deserialize(payload).unwrap(), Message::Scan(scan));

        running.store(false, Ordering::Relaxed);
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_bad_target_is_config_error() {
        let (_, rx) = stream_channel();
        let running = Arc::new(AtomicBool::new(true));
        let result = UdpPublisher::bind(
            "nowhere",
            Serializer::new(WireFormat::Json),
            rx,
            running,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
