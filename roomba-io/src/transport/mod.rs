//! Transport layer for I/O abstraction
//!
//! [`exchange`] is the only way the driver talks to hardware: one command
//! out, optionally exactly N reply bytes back, bounded by a deadline.

use crate::error::{Error, Result};
use std::thread;
use std::time::{Duration, Instant};

pub mod mock;
mod serial;
pub use mock::MockTransport;
pub use serial::SerialTransport;

/// Sleep between empty reads while waiting for a reply
const READ_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Transport trait for device communication
pub trait Transport: Send {
    /// Read available data into buffer, returns number of bytes read (0 if none yet)
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Write the whole buffer
    fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data)?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "transport accepted no bytes",
                )));
            }
            data = &data[n..];
        }
        Ok(())
    }

    /// Drop any unread input (late bytes from an earlier timed-out reply)
    fn discard_input(&mut self) -> Result<()> {
        Ok(())
    }

    /// Change the line rate after a BAUD command
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        Err(Error::Other(format!(
            "transport cannot change baud rate to {}",
            baud_rate
        )))
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        (**self).read(buffer)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_all(data)
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        (**self).set_baud_rate(baud_rate)
    }
}

/// Send `command` and read exactly `expected_reply_len` bytes
///
/// Stale input is discarded before the command goes out so a reply that
/// arrived after an earlier timeout cannot be mistaken for this one. With
/// `expected_reply_len == 0` the call returns as soon as the command is
/// flushed. If the deadline passes first the partial reply is dropped and
/// [`Error::Timeout`] is returned. No retries.
pub fn exchange<T: Transport + ?Sized>(
    transport: &mut T,
    command: &[u8],
    expected_reply_len: usize,
    timeout: Duration,
) -> Result<Vec<u8>> {
    if expected_reply_len > 0 {
        transport.discard_input()?;
    }
    transport.write_all(command)?;
    transport.flush()?;
    log::trace!("TX {:02X?}", command);

    if expected_reply_len == 0 {
        return Ok(Vec::new());
    }

    let deadline = Instant::now() + timeout;
    let mut reply = vec![0u8; expected_reply_len];
    let mut filled = 0;

    while filled < expected_reply_len {
        let n = transport.read(&mut reply[filled..])?;
        filled += n;
        if filled >= expected_reply_len {
            break;
        }
        if Instant::now() >= deadline {
            log::debug!(
                "Reply timeout after {:?}: {} of {} bytes",
                timeout,
                filled,
                expected_reply_len
            );
            return Err(Error::Timeout {
                expected: expected_reply_len,
                received: filled,
            });
        }
        if n == 0 {
            thread::sleep(READ_POLL_INTERVAL);
        }
    }

    Ok(reply)
}
