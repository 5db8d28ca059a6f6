//! Camera driver.
//!
//! [`Camera`] strings the protocol units together in the order the
//! device expects:
//!
//! 1. [`SyncHandshake`]: reset, SYNC until answered, optionally change baud.
//! 2. Setup commands over the [`CommandChannel`]: format, packet size,
//!    exposure.
//! 3. SNAPSHOT.
//! 4. [`PacketTransfer`]: GET PICTURE and packet rounds.
//!
//! ## Example
//!
//! ```rust,no_run
//! use camlink::camera::{Camera, CameraConfig};
//! use camlink::framebuf::FrameBuffer;
//! use camlink::link::{SerialConfig, SerialLink};
//! use camlink::poll::{PollPolicy, SystemClock};
//! use camlink::reset::SysfsGpio;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let link = SerialLink::open(&SerialConfig::new("/dev/serial0", 57600))?;
//!     let frames = FrameBuffer::new(link, SystemClock::new(), PollPolicy::default());
//!     let mut camera = Camera::new(frames, SysfsGpio::open(23)?, CameraConfig::default());
//!
//!     let picture = camera.capture(|done, total| println!("{done}/{total}"))?;
//!     std::fs::write("picture.jpg", picture.data())?;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod handshake;
pub mod transfer;

use std::time::Duration;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::framebuf::FrameBuffer;
use crate::link::ChipLink;
use crate::poll::Clock;
use crate::protocol::frame::{Command, ImageFormat, Resolution, SnapshotKind};
use crate::reset::ResetLine;

pub use command::{Ack, CommandChannel};
pub use handshake::{
    AttemptRecord, HandshakeConfig, HandshakeReport, HandshakeState, SyncCheck, SyncHandshake,
};
pub use transfer::{
    Diagnosis, Observation, PacketTransfer, RetryMode, TransferConfig, TransferSession,
    VariantDiagnosis,
};

/// Everything needed to take a picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConfig {
    /// Handshake timing and baud change.
    pub handshake: HandshakeConfig,
    /// Image format.
    pub format: ImageFormat,
    /// Raw picture resolution.
    pub raw_resolution: Resolution,
    /// JPEG picture resolution.
    pub jpeg_resolution: Resolution,
    /// Contrast setting (0..=4, 2 is normal).
    pub contrast: u8,
    /// Brightness setting (0..=4, 2 is normal).
    pub brightness: u8,
    /// Exposure setting (0..=4, 2 is normal).
    pub exposure: u8,
    /// Snapshot encoding.
    pub snapshot: SnapshotKind,
    /// Frames to skip before the snapshot.
    pub skip_frames: u16,
    /// Pause before each setup command and before reading its reply.
    pub step_delay: Duration,
    /// Sends per setup command before giving up.
    pub step_attempts: u32,
    /// Download settings.
    pub transfer: TransferConfig,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            format: ImageFormat::Jpeg,
            raw_resolution: Resolution::R640x480,
            jpeg_resolution: Resolution::R640x480,
            contrast: 2,
            brightness: 2,
            exposure: 2,
            snapshot: SnapshotKind::Compressed,
            skip_frames: 0,
            step_delay: Duration::from_millis(100),
            step_attempts: 3,
            transfer: TransferConfig::default(),
        }
    }
}

/// A downloaded picture.
#[derive(Debug, Clone)]
pub struct Picture {
    data: Vec<u8>,
    session: TransferSession,
}

impl Picture {
    /// Picture bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The download session it came from.
    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Take the picture bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Serial camera on a [`ChipLink`].
pub struct Camera<L: ChipLink, C: Clock, R: ResetLine> {
    channel: CommandChannel<L, C>,
    reset: R,
    config: CameraConfig,
    handshake: SyncHandshake,
}

impl<L: ChipLink, C: Clock, R: ResetLine> Camera<L, C, R> {
    /// Create a camera driver.
    pub fn new(frames: FrameBuffer<L, C>, reset: R, config: CameraConfig) -> Self {
        Self {
            channel: CommandChannel::new(frames),
            reset,
            handshake: SyncHandshake::new(config.handshake),
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Handshake state and attempt history.
    pub fn handshake(&self) -> &SyncHandshake {
        &self.handshake
    }

    /// The command channel.
    pub fn channel(&self) -> &CommandChannel<L, C> {
        &self.channel
    }

    /// The link.
    pub fn link(&self) -> &L {
        self.channel.frames().link()
    }

    /// Give the link back.
    pub fn into_link(self) -> L {
        self.channel.into_frames().into_link()
    }

    /// Reset the camera and establish contact.
    pub fn connect(&mut self) -> Result<HandshakeReport> {
        info!(
            "Connecting to camera at {} baud",
            self.channel.frames().link().baud()
        );
        self.handshake.run(&mut self.channel, &mut self.reset)
    }

    /// Send the format, packet size and exposure settings.
    pub fn configure(&mut self) -> Result<()> {
        let cfg = self.config;
        self.step(&Command::initial(
            cfg.format,
            cfg.raw_resolution,
            cfg.jpeg_resolution,
        ))?;
        self.step(&Command::set_package_size(cfg.transfer.package_size))?;
        self.step(&Command::exposure(cfg.contrast, cfg.brightness, cfg.exposure))?;
        info!(
            "Camera configured: {:?}, {} byte packets",
            cfg.format, cfg.transfer.package_size
        );
        Ok(())
    }

    /// Capture a picture into camera memory.
    pub fn snapshot(&mut self) -> Result<()> {
        self.step(&Command::snapshot(self.config.snapshot, self.config.skip_frames))?;
        info!("Snapshot taken");
        Ok(())
    }

    /// Download the last snapshot. `progress` gets `(valid, total)` packet
    /// counts as the transfer proceeds.
    pub fn download(&mut self, progress: impl FnMut(usize, usize)) -> Result<Picture> {
        let session = PacketTransfer::new(&mut self.channel, self.config.transfer).run(progress)?;
        let data = session.assemble()?;
        info!("Downloaded {} bytes", data.len());
        Ok(Picture { data, session })
    }

    /// Connect, configure, snapshot and download.
    pub fn capture(&mut self, progress: impl FnMut(usize, usize)) -> Result<Picture> {
        self.connect()?;
        self.configure()?;
        self.snapshot()?;
        self.download(progress)
    }

    /// Send a setup command, resending it while the camera stays silent
    /// or acknowledges the wrong command.
    fn step(&mut self, cmd: &Command) -> Result<()> {
        let delay = self.config.step_delay;
        let attempts = self.config.step_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.channel.frames().clock().sleep(delay);
            match self.channel.send_command_after(cmd, delay) {
                Ok(_) => return Ok(()),
                Err(e @ (Error::EmptyResponse(_) | Error::BadAck { .. })) if attempt < attempts => {
                    warn!("{cmd}: attempt {attempt}/{attempts} failed: {e}");
                    self.channel.frames_mut().clear()?;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}
