//! Mock transport for testing
//!
//! Replies are scripted: [`MockTransport::respond_with`] queues bytes that
//! become readable after the next write, the way a device answers a request.

use super::Transport;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Mock transport for unit testing
///
/// Clones share the same buffers so a test can keep a handle after moving
/// the transport into a driver.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct PendingReply {
    /// Opcode that releases this reply (`None` = any write)
    trigger: Option<u8>,
    bytes: Vec<u8>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    pending: VecDeque<PendingReply>,
    read_chunk: usize,
    disconnected: bool,
    baud_rate: Option<u32>,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                write_buffer: Vec::new(),
                pending: VecDeque::new(),
                read_chunk: usize::MAX,
                disconnected: false,
                baud_rate: None,
            })),
        }
    }

    /// Inject data that is readable immediately
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Queue a reply released by the next write
    pub fn respond_with(&self, data: &[u8]) {
        self.inner.lock().pending.push_back(PendingReply {
            trigger: None,
            bytes: data.to_vec(),
        });
    }

    /// Queue a reply released by the next write starting with `opcode`
    pub fn respond_to(&self, opcode: u8, data: &[u8]) {
        self.inner.lock().pending.push_back(PendingReply {
            trigger: Some(opcode),
            bytes: data.to_vec(),
        });
    }

    /// Limit how many bytes a single read returns
    pub fn set_read_chunk(&self, chunk: usize) {
        self.inner.lock().read_chunk = chunk.max(1);
    }

    /// Make every read and write fail like an unplugged cable
    pub fn set_disconnected(&self, disconnected: bool) {
        self.inner.lock().disconnected = disconnected;
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        self.inner.lock().write_buffer.clear();
    }

    /// Last baud rate applied through [`Transport::set_baud_rate`]
    pub fn baud_rate(&self) -> Option<u32> {
        self.inner.lock().baud_rate
    }

    fn broken_pipe() -> Error {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "mock transport disconnected",
        ))
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.disconnected {
            return Err(Self::broken_pipe());
        }
        let available = inner.read_buffer.len().min(buffer.len()).min(inner.read_chunk);
        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
            *slot = byte;
        }
        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.disconnected {
            return Err(Self::broken_pipe());
        }
        inner.write_buffer.extend_from_slice(data);

        let releases = match inner.pending.front() {
            Some(reply) => reply.trigger.is_none() || reply.trigger == data.first().copied(),
            None => false,
        };
        if releases {
            if let Some(reply) = inner.pending.pop_front() {
                inner.read_buffer.extend(reply.bytes);
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn discard_input(&mut self) -> Result<()> {
        self.inner.lock().read_buffer.clear();
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.inner.lock().baud_rate = Some(baud_rate);
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}
