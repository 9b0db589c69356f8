//! TCP command receiver for client control
//!
//! Each connection becomes the active pilot when it starts, so the newest
//! client is the one allowed to move the robot. Every command gets a
//! framed [`CommandReply`]; a rejected or malformed command does not close
//! the connection.
//!
//! # Connection Lifecycle
//!
//! ```text
//! 1. Client connects to the command port
//! 2. Receiver registers the connection as active pilot
//! 3. Loop: read frame → dispatch to DriverHandle → write reply
//! 4. On disconnect or shutdown the socket is closed
//! ```
//!
//! # Safety Features
//!
//! - **Read timeout**: 500ms timeout allows periodic shutdown flag checks
//! - **Buffer limit**: Commands > 1MB close the connection

use crate::driver::DriverHandle;
use crate::error::{Error, Result};
use crate::streaming::messages::{CommandMessage, CommandReply};
use crate::streaming::wire::{MAX_MESSAGE_SIZE, Serializer, frame_into};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Initial capacity for command read buffer (typical command size)
const INITIAL_BUFFER_CAPACITY: usize = 256;

const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// One frame read from the client
enum Inbound {
    Command(CommandMessage),
    /// Frame arrived but did not deserialize
    Malformed(Error),
}

/// TCP receiver that handles commands from one connected client
pub struct TcpReceiver {
    serializer: Serializer,
    handle: DriverHandle,
    pilot: u32,
    /// Global running flag (daemon shutdown)
    running: Arc<AtomicBool>,
    /// Reusable buffer for reading command payloads
    read_buffer: Vec<u8>,
    /// Reusable buffer for framing replies
    write_buffer: Vec<u8>,
}

impl TcpReceiver {
    pub fn new(
        serializer: Serializer,
        handle: DriverHandle,
        pilot: u32,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            serializer,
            handle,
            pilot,
            running,
            read_buffer: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
            write_buffer: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Run the receiver loop for a connected client
    pub fn run(&mut self, mut stream: TcpStream) -> Result<()> {
        log::info!(
            "TCP receiver started for client {:?} as pilot {}",
            stream.peer_addr(),
            self.pilot
        );
        self.handle.register_pilot(self.pilot);

        // Set read timeout so we can check shutdown flag
        if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
            log::warn!("Failed to set read timeout: {}", e);
        }

        while self.running.load(Ordering::Relaxed) {
            match self.read_frame(&mut stream) {
                Ok(Some(Inbound::Command(cmd))) => {
                    log::debug!("Received command: {:?}", cmd);
                    let result = cmd.dispatch(&self.handle, self.pilot);
                    if let Err(e) = &result {
                        log::warn!("Command {:?} rejected: {}", cmd, e);
                    }
                    self.write_reply(&mut stream, &CommandReply::from_result(&result))?;
                }
                Ok(Some(Inbound::Malformed(e))) => {
                    log::warn!("Discarding malformed command: {}", e);
                    self.write_reply(&mut stream, &CommandReply::from_result(&Err(e)))?;
                }
                Ok(None) => {
                    // Timeout, continue loop
                }
                Err(Error::Io(ref io_err))
                    if io_err.kind() == std::io::ErrorKind::UnexpectedEof
                        || io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    log::info!("Client disconnected");
                    let _ = stream.shutdown(std::net::Shutdown::Both);
                    return Ok(());
                }
                Err(e) => {
                    log::error!("Failed to read message: {}", e);
                    let _ = stream.shutdown(std::net::Shutdown::Both);
                    return Err(e);
                }
            }
        }

        let _ = stream.shutdown(std::net::Shutdown::Both);
        log::info!("TCP receiver stopped");
        Ok(())
    }

    /// Read one length-prefixed frame
    ///
    /// `Ok(None)` means the read timed out before a frame started.
    fn read_frame(&mut self, stream: &mut TcpStream) -> Result<Option<Inbound>> {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(Error::Other(format!("Message too large: {} bytes", len)));
        }

        // Reuse buffer - resize only if needed
        self.read_buffer.clear();
        self.read_buffer.resize(len, 0);
        stream.read_exact(&mut self.read_buffer)?;

        Ok(Some(
            match self.serializer.deserialize_command(&self.read_buffer) {
                Ok(cmd) => Inbound::Command(cmd),
                Err(e) => Inbound::Malformed(e),
            },
        ))
    }

    fn write_reply(&mut self, stream: &mut TcpStream, reply: &CommandReply) -> Result<()> {
        let payload = self.serializer.serialize_reply(reply)?;
        frame_into(&payload, &mut self.write_buffer)?;
        stream.write_all(&self.write_buffer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverConfig, RoombaDriver};
    use crate::protocol::Mode;
    use crate::scan::ScanMapper;
    use crate::streaming::wire::{WireFormat, unframe};
    use crate::transport::MockTransport;
    use std::net::TcpListener;

    fn send(stream: &mut TcpStream, serializer: &Serializer, cmd: &CommandMessage) -> CommandReply {
        let mut frame = Vec::new();
        frame_into(&serializer.serialize_command(cmd).unwrap(), &mut frame).unwrap();
        stream.write_all(&frame).unwrap();
        read_reply(stream, serializer)
    }

    fn read_reply(stream: &mut TcpStream, serializer: &Serializer) -> CommandReply {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).unwrap();
        let mut frame = len.to_vec();
        frame.resize(4 + u32::from_be_bytes(len) as usize, 0);
        stream.read_exact(&mut frame[4..]).unwrap();
        serializer
            .deserialize_reply(unframe(&frame).unwrap().unwrap())
            .unwrap()
    }

    #[test]
    fn test_commands_are_acknowledged() {
        let driver = RoombaDriver::new(
            MockTransport::new(),
            DriverConfig::default(),
            ScanMapper::with_defaults().unwrap(),
        );
        let handle = driver.handle();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let serializer = Serializer::new(WireFormat::Json);

        let server_handle = handle.clone();
        let server_running = Arc::clone(&running);
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            TcpReceiver::new(serializer, server_handle, 7, server_running).run(stream)
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let reply = send(
            &mut client,
            &serializer,
            &CommandMessage::Move {
                speed: 100.0,
                omega: 0.0,
            },
        );
        assert!(reply.ok);
        assert_eq!(handle.active_pilot(), Some(7));

        let reply = send(&mut client, &serializer, &CommandMessage::SetBaud { index: 20 });
        assert!(!reply.ok);
        assert!(reply.error.is_some());

        let reply = send(&mut client, &serializer, &CommandMessage::SetMode { mode: Mode::Safe });
        assert!(reply.ok);

        // Garbage keeps the connection open
        let mut frame = Vec::new();
        frame_into(b"{oops", &mut frame).unwrap();
        client.write_all(&frame).unwrap();
        assert!(!read_reply(&mut client, &serializer).ok);

        drop(client);
        server.join().unwrap().unwrap();
    }
}
