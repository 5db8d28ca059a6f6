//! # camlink
//!
//! A library for driving a uCAM-style serial camera over a UART, either a
//! MAX3100 SPI UART or a plain serial device.
//!
//! This crate provides:
//!
//! - A software UART on the MAX3100 (buffered receive, overrun counting,
//!   baud reconfiguration)
//! - Drain-until-quiet framing with bounded, cancellable waits
//! - The camera's SYNC handshake, command/acknowledge exchange and
//!   multi-round packet download with checksum validation
//! - Byte-level localization of corrupted packets
//! - A two-process loopback self-test
//!
//! ## Features
//!
//! - `native` (default): serial device link via `serialport`
//! - `spidev` (default): Linux `/dev/spidevB.D` bus for the MAX3100 link
//! - `serde`: Serialization support for config enums and reports
//!
//! ## Example
//!
//! ```rust,no_run
//! use camlink::{Camera, CameraConfig, FrameBuffer, LinkConfig, Max3100Link, PollPolicy, SystemClock};
//! use camlink::reset::NoReset;
//!
//! # #[cfg(all(feature = "spidev", target_os = "linux"))]
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let spi = camlink::link::SpidevBus::open("/dev/spidev0.0", 7_800_000)?;
//!     let link = Max3100Link::open(spi, LinkConfig::new(57600))?;
//!     let frames = FrameBuffer::new(link, SystemClock::new(), PollPolicy::default());
//!     let mut camera = Camera::new(frames, NoReset, CameraConfig::default());
//!
//!     camera.connect()?;
//!     camera.configure()?;
//!     camera.snapshot()?;
//!     let picture = camera.download(|done, total| println!("{done}/{total}"))?;
//!     println!("{} bytes", picture.data().len());
//!     Ok(())
//! }
//! # #[cfg(not(all(feature = "spidev", target_os = "linux")))]
//! # fn main() {}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod camera;
pub mod error;
pub mod framebuf;
pub mod link;
pub mod loopback;
pub mod poll;
pub mod protocol;
pub mod reset;

// Re-exports for convenience
pub use camera::{Camera, CameraConfig, Picture, RetryMode, SyncCheck, TransferSession};
pub use error::{Error, Result};
pub use framebuf::FrameBuffer;
pub use link::{ChipLink, Crystal, LinkConfig, Max3100Link, SpiBus};
pub use poll::{CancelToken, Clock, PollPolicy, SystemClock};
pub use protocol::{Command, PacketFault, Region};

#[cfg(feature = "native")]
pub use link::{SerialConfig, SerialLink};
