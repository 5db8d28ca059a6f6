//! Byte-level link abstraction.
//!
//! Everything above this module talks to the camera through [`ChipLink`]:
//! configure a baud rate, write bytes, check how many bytes are waiting,
//! pull them out one at a time. Two implementations exist:
//!
//! ```text
//! +---------------------+     +---------------------+
//! |  FrameBuffer/Camera |     |  FrameBuffer/Camera |
//! +----------+----------+     +----------+----------+
//!            |                           |
//!            v                           v
//! +----------+----------+     +----------+----------+
//! |   ChipLink trait    |     |   ChipLink trait    |
//! +----------+----------+     +----------+----------+
//!            |                           |
//!            v                           v
//! +----------+----------+     +----------+----------+
//! |    Max3100Link      |     |     SerialLink      |
//! |  (software UART     |     |  (kernel tty,       |
//! |   over SpiBus)      |     |   serialport)       |
//! +---------------------+     +---------------------+
//! ```
//!
//! None of the methods block: waiting is the caller's job, done by
//! polling [`ChipLink::bytes_available`] (see [`crate::framebuf`]).

pub mod max3100;
pub mod spi;

#[cfg(feature = "native")]
pub mod serial;

#[cfg(test)]
pub(crate) mod mock;

use crate::error::{Error, Result};

/// Baud rates every link accepts.
pub const SUPPORTED_BAUDS: &[u32] = &[9600, 19200, 38400, 57600];

/// Reject baud rates outside [`SUPPORTED_BAUDS`].
pub fn check_baud(baud: u32) -> Result<u32> {
    if SUPPORTED_BAUDS.contains(&baud) {
        Ok(baud)
    } else {
        Err(Error::UnsupportedBaud(baud))
    }
}

/// A UART-like channel to the camera.
///
/// A link is owned by one caller at a time; no method is safe to call
/// concurrently with another on the same instance.
pub trait ChipLink {
    /// Switch the link to `baud`.
    ///
    /// Fails with [`Error::UnsupportedBaud`] and leaves the link untouched
    /// when `baud` is not supported.
    fn configure(&mut self, baud: u32) -> Result<()>;

    /// Currently configured baud rate.
    fn baud(&self) -> u32;

    /// Queue `data` for transmission. Returns once the link accepted every
    /// byte; says nothing about the remote end.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Number of received bytes ready to read, without blocking.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Take one received byte, or `None` when nothing is buffered.
    fn read_byte(&mut self) -> Result<Option<u8>>;

    /// Take exactly `n` bytes if that many are buffered, otherwise take
    /// nothing and return `None`.
    fn read_exact(&mut self, n: usize) -> Result<Option<Vec<u8>>> {
        if self.bytes_available()? < n {
            return Ok(None);
        }
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.read_byte()? {
                Some(byte) => out.push(byte),
                None => {
                    return Err(Error::Protocol(format!(
                        "link reported {n} bytes available but yielded {}",
                        out.len()
                    )));
                },
            }
        }
        Ok(Some(out))
    }

    /// Receive overruns (bytes lost because the inbound buffer was full)
    /// since the link was opened.
    fn miss_count(&self) -> u64;

    /// Discard everything received so far.
    fn clear(&mut self) -> Result<()>;
}

impl<L: ChipLink + ?Sized> ChipLink for Box<L> {
    fn configure(&mut self, baud: u32) -> Result<()> {
        (**self).configure(baud)
    }

    fn baud(&self) -> u32 {
        (**self).baud()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        (**self).read_byte()
    }

    fn read_exact(&mut self, n: usize) -> Result<Option<Vec<u8>>> {
        (**self).read_exact(n)
    }

    fn miss_count(&self) -> u64 {
        (**self).miss_count()
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }
}

// Re-export the implementations
pub use max3100::{Crystal, LinkConfig, Max3100Link};
pub use spi::SpiBus;

#[cfg(feature = "native")]
pub use serial::{PortInfo, SerialConfig, SerialLink, list_ports};

#[cfg(all(feature = "spidev", target_os = "linux"))]
pub use spi::SpidevBus;
