//! Camera command frames.
//!
//! ## Frame Format
//!
//! Every command and acknowledgment is six bytes:
//!
//! ```text
//! +--------+---------+---------+---------+---------+---------+
//! | Marker | Command | Param 0 | Param 1 | Param 2 | Param 3 |
//! +--------+---------+---------+---------+---------+---------+
//! |  0xAA  |   id    |    p0   |    p1   |    p2   |    p3   |
//! +--------+---------+---------+---------+---------+---------+
//! ```
//!
//! An acknowledgment is `AA 0E <echoed id> ...`; the device answers a
//! SYNC with an ACK followed by its own SYNC (12 bytes in total), and
//! answers GET PICTURE with an ACK followed by a DATA frame whose last
//! three bytes carry the picture size, little-endian.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::protocol::hex;

/// Length of every command frame.
pub const FRAME_LEN: usize = 6;

/// First byte of every frame.
pub const MARKER: u8 = 0xAA;

/// Command identifiers (frame byte 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    /// Select image format and resolution (0x01).
    Initial = 0x01,
    /// Request a picture (0x04).
    GetPicture = 0x04,
    /// Capture a snapshot into camera memory (0x05).
    Snapshot = 0x05,
    /// Set the bulk packet size (0x06).
    SetPackageSize = 0x06,
    /// Change the camera baud rate (0x07).
    SetBaudRate = 0x07,
    /// Reset (0x08).
    Reset = 0x08,
    /// Picture data header (0x0A).
    Data = 0x0A,
    /// Synchronise (0x0D).
    Sync = 0x0D,
    /// Acknowledge (0x0E).
    Ack = 0x0E,
    /// Negative acknowledge (0x0F).
    Nak = 0x0F,
    /// Contrast, brightness and exposure (0x14).
    Exposure = 0x14,
}

impl TryFrom<u8> for CommandId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x01 => Self::Initial,
            0x04 => Self::GetPicture,
            0x05 => Self::Snapshot,
            0x06 => Self::SetPackageSize,
            0x07 => Self::SetBaudRate,
            0x08 => Self::Reset,
            0x0A => Self::Data,
            0x0D => Self::Sync,
            0x0E => Self::Ack,
            0x0F => Self::Nak,
            0x14 => Self::Exposure,
            other => return Err(Error::Protocol(format!("unknown command id 0x{other:02X}"))),
        })
    }
}

/// Image format selected by [`Command::initial`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ImageFormat {
    /// 8-bit grey scale.
    Gray8 = 0x03,
    /// JPEG.
    #[default]
    Jpeg = 0x07,
    /// 16-bit RGB565.
    Rgb565 = 0x08,
}

/// Resolution byte used by [`Command::initial`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Resolution {
    /// 160 × 128.
    R160x128 = 0x03,
    /// 320 × 240.
    R320x240 = 0x05,
    /// 640 × 480.
    #[default]
    R640x480 = 0x07,
}

/// Picture source for [`Command::get_picture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PictureKind {
    /// The picture captured by the last SNAPSHOT.
    #[default]
    Snapshot = 0x01,
    /// Live raw picture.
    Raw = 0x02,
    /// Live JPEG picture.
    Jpeg = 0x05,
}

/// Snapshot encoding for [`Command::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SnapshotKind {
    /// Compressed (JPEG).
    #[default]
    Compressed = 0x00,
    /// Uncompressed (raw).
    Uncompressed = 0x01,
}

/// A six-byte command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    id: CommandId,
    params: [u8; 4],
}

impl Command {
    /// Create a command from its id and parameter bytes.
    pub const fn new(id: CommandId, params: [u8; 4]) -> Self {
        Self { id, params }
    }

    /// SYNC request: `AA 0D 00 00 00 00`.
    pub const fn sync() -> Self {
        Self::new(CommandId::Sync, [0; 4])
    }

    /// Acknowledge the device's SYNC: `AA 0E 0D 00 00 00`.
    pub const fn sync_ack() -> Self {
        Self::new(CommandId::Ack, [CommandId::Sync as u8, 0, 0, 0])
    }

    /// Select format and resolutions: `AA 01 00 fmt raw jpeg`.
    pub const fn initial(format: ImageFormat, raw: Resolution, jpeg: Resolution) -> Self {
        Self::new(
            CommandId::Initial,
            [0x00, format as u8, raw as u8, jpeg as u8],
        )
    }

    /// Set the bulk packet size: `AA 06 08 lo hi 00`.
    pub fn set_package_size(size: u16) -> Self {
        let [lo, hi] = size.to_le_bytes();
        Self::new(CommandId::SetPackageSize, [0x08, lo, hi, 0x00])
    }

    /// Change the camera baud rate: `AA 07 div1 div2 00 00`.
    pub fn set_baud_rate(baud: u32) -> Result<Self> {
        let (first, second) = baud_divisors(baud).ok_or(Error::UnsupportedBaud(baud))?;
        Ok(Self::new(CommandId::SetBaudRate, [first, second, 0, 0]))
    }

    /// Contrast, brightness and exposure: `AA 14 c b e 00`.
    pub const fn exposure(contrast: u8, brightness: u8, exposure: u8) -> Self {
        Self::new(CommandId::Exposure, [contrast, brightness, exposure, 0x00])
    }

    /// Capture a snapshot: `AA 05 kind skip_lo skip_hi 00`.
    pub fn snapshot(kind: SnapshotKind, skip_frames: u16) -> Self {
        let [lo, hi] = skip_frames.to_le_bytes();
        Self::new(CommandId::Snapshot, [kind as u8, lo, hi, 0x00])
    }

    /// Request a picture: `AA 04 kind 00 00 00`.
    pub const fn get_picture(kind: PictureKind) -> Self {
        Self::new(CommandId::GetPicture, [kind as u8, 0, 0, 0])
    }

    /// Request bulk packet `request` (0-based): `AA 0E 00 00 lo hi`.
    pub fn ack_package(request: u16) -> Self {
        let [lo, hi] = request.to_le_bytes();
        Self::new(CommandId::Ack, [0x00, 0x00, lo, hi])
    }

    /// End a bulk transfer: `AA 0E 00 00 F0 F0`.
    pub const fn transfer_done() -> Self {
        Self::new(CommandId::Ack, [0x00, 0x00, 0xF0, 0xF0])
    }

    /// Reset the camera state machine: `AA 08 00 00 00 00`.
    pub const fn reset() -> Self {
        Self::new(CommandId::Reset, [0; 4])
    }

    /// Command id.
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Parameter bytes.
    pub fn params(&self) -> [u8; 4] {
        self.params
    }

    /// Wire bytes.
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let [p0, p1, p2, p3] = self.params;
        [MARKER, self.id as u8, p0, p1, p2, p3]
    }

    /// The three leading bytes a valid acknowledgment must carry.
    pub fn expected_ack(&self) -> [u8; 3] {
        [MARKER, CommandId::Ack as u8, self.id as u8]
    }

    /// Whether `response` starts with this command's acknowledgment.
    pub fn is_acked_by(&self, response: &[u8]) -> bool {
        response.len() >= 3 && response[..3] == self.expected_ack()
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} [{}]", self.id, hex(&self.to_bytes()))
    }
}

/// Camera-side divisor pair for a baud rate.
pub fn baud_divisors(baud: u32) -> Option<(u8, u8)> {
    match baud {
        9600 => Some((0x1F, 0x0B)),
        19200 => Some((0x1F, 0x05)),
        38400 => Some((0x1F, 0x02)),
        57600 => Some((0x1F, 0x01)),
        _ => None,
    }
}

/// Picture size carried by a 12-byte GET PICTURE reply (ACK + DATA).
pub fn picture_size(reply: &[u8]) -> Result<u32> {
    if reply.len() != 2 * FRAME_LEN {
        return Err(Error::Protocol(format!(
            "picture reply is {} bytes, expected {}: {}",
            reply.len(),
            2 * FRAME_LEN,
            hex(reply)
        )));
    }
    Ok(LittleEndian::read_u24(&reply[reply.len() - 3..]))
}
