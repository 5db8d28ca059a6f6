//! Bulk picture packets.
//!
//! ```text
//! +--------+---------+--------+---------+-------------+----------+------+
//! | id lo  | id hi   | len lo | len hi  | payload ... | checksum | 0x00 |
//! +--------+---------+--------+---------+-------------+----------+------+
//! ```
//!
//! `checksum` is the sum of every preceding byte modulo 256. Packet ids
//! are 1-based; the host requests packet `id` with `ack_package(id - 1)`.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Bytes of framing around each payload (id, length, checksum, terminator).
pub const PACKET_OVERHEAD: usize = 6;

/// Why a received packet was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketFault {
    /// Fewer bytes than the framing alone needs.
    #[error("packet too short ({len} bytes)")]
    TooShort {
        /// Received length.
        len: usize,
    },

    /// Packet id does not match the requested index.
    #[error("wrong packet id: expected {expected}, got {actual}")]
    WrongId {
        /// Requested id.
        expected: u16,
        /// Id found in the packet.
        actual: u16,
    },

    /// High id byte is not zero.
    #[error("id high byte is 0x{0:02X}, expected 0x00")]
    NonZeroIdHigh(u8),

    /// Received length differs from what this index should carry.
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Expected total length.
        expected: usize,
        /// Received total length.
        actual: usize,
    },

    /// The length field disagrees with the expected packet length.
    #[error("declared payload length {declared} does not fit a {expected}-byte packet")]
    DeclaredLength {
        /// Expected total length.
        expected: usize,
        /// Payload length from the header.
        declared: usize,
    },

    /// Checksum byte does not match the computed sum.
    #[error("checksum mismatch: computed 0x{expected:02X}, packet says 0x{actual:02X}")]
    ChecksumMismatch {
        /// Computed checksum.
        expected: u8,
        /// Checksum byte in the packet.
        actual: u8,
    },

    /// Final byte is not zero.
    #[error("terminator byte is 0x{0:02X}, expected 0x00")]
    BadTerminator(u8),

    /// Nothing arrived for the request.
    #[error("no response")]
    NoResponse,
}

/// Sum of `bytes` modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// How a picture of a given size splits into packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLayout {
    image_size: u32,
    package_size: u16,
    count: u16,
}

impl TransferLayout {
    /// Layout for `image_size` bytes sent in packets of `package_size`.
    pub fn new(image_size: u32, package_size: u16) -> Result<Self> {
        let package = usize::from(package_size);
        if package <= PACKET_OVERHEAD {
            return Err(Error::Config(format!(
                "package size {package_size} leaves no room for payload"
            )));
        }
        let capacity = (package - PACKET_OVERHEAD) as u64;
        let count = u64::from(image_size).div_ceil(capacity);
        let count = u16::try_from(count).map_err(|_| {
            Error::Protocol(format!(
                "picture of {image_size} bytes needs {count} packets of {package_size}"
            ))
        })?;
        Ok(Self {
            image_size,
            package_size,
            count,
        })
    }

    /// Picture size in bytes.
    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Packet size in bytes, framing included.
    pub fn package_size(&self) -> u16 {
        self.package_size
    }

    /// Payload bytes carried by a full packet.
    pub fn payload_capacity(&self) -> usize {
        usize::from(self.package_size) - PACKET_OVERHEAD
    }

    /// Number of packets, `ceil(image_size / payload_capacity)`.
    pub fn package_count(&self) -> u16 {
        self.count
    }

    /// 1-based packet ids in transfer order.
    pub fn ids(&self) -> impl Iterator<Item = u16> + use<> {
        1..=self.count
    }

    /// Expected total length of packet `id`. Every packet is full except
    /// the last, which carries the remainder.
    pub fn expected_len(&self, id: u16) -> usize {
        if id < self.count {
            usize::from(self.package_size)
        } else {
            let before = usize::from(self.count.saturating_sub(1)) * self.payload_capacity();
            self.image_size as usize - before + PACKET_OVERHEAD
        }
    }
}

/// Borrowed view of one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    raw: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Check framing only (length at least [`PACKET_OVERHEAD`]).
    pub fn parse(raw: &'a [u8]) -> std::result::Result<Self, PacketFault> {
        if raw.len() < PACKET_OVERHEAD {
            return Err(PacketFault::TooShort { len: raw.len() });
        }
        Ok(Self { raw })
    }

    /// Parse and fully validate `raw` as packet `id` of `expected_len` bytes.
    pub fn validate(
        raw: &'a [u8],
        id: u16,
        expected_len: usize,
    ) -> std::result::Result<Self, PacketFault> {
        let packet = Self::parse(raw)?;

        let [id_lo, id_hi] = id.to_le_bytes();
        if raw[0] != id_lo {
            return Err(PacketFault::WrongId {
                expected: id,
                actual: packet.id(),
            });
        }
        if raw[1] != id_hi {
            return Err(if id_hi == 0 {
                PacketFault::NonZeroIdHigh(raw[1])
            } else {
                PacketFault::WrongId {
                    expected: id,
                    actual: packet.id(),
                }
            });
        }

        if raw.len() != expected_len {
            return Err(PacketFault::LengthMismatch {
                expected: expected_len,
                actual: raw.len(),
            });
        }
        if packet.declared_len() + PACKET_OVERHEAD != expected_len {
            return Err(PacketFault::DeclaredLength {
                expected: expected_len,
                declared: packet.declared_len(),
            });
        }

        let computed = checksum(&raw[..raw.len() - 2]);
        if computed != packet.checksum() {
            return Err(PacketFault::ChecksumMismatch {
                expected: computed,
                actual: packet.checksum(),
            });
        }
        if packet.terminator() != 0 {
            return Err(PacketFault::BadTerminator(packet.terminator()));
        }

        Ok(packet)
    }

    /// Build the wire bytes of packet `id` carrying `payload`.
    ///
    /// Fails when `payload` does not fit the 16-bit length field.
    pub fn encode(id: u16, payload: &[u8]) -> Result<Vec<u8>> {
        let len = u16::try_from(payload.len()).map_err(|_| {
            Error::Protocol(format!(
                "payload of {} bytes exceeds the packet length field",
                payload.len()
            ))
        })?;
        let mut out = vec![0u8; payload.len() + PACKET_OVERHEAD];
        LittleEndian::write_u16(&mut out[0..2], id);
        LittleEndian::write_u16(&mut out[2..4], len);
        out[4..4 + payload.len()].copy_from_slice(payload);
        let sum_end = out.len() - 2;
        out[sum_end] = checksum(&out[..sum_end]);
        Ok(out)
    }

    /// Packet id.
    pub fn id(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[0..2])
    }

    /// Payload length from the header.
    pub fn declared_len(&self) -> usize {
        usize::from(LittleEndian::read_u16(&self.raw[2..4]))
    }

    /// Payload bytes between header and checksum.
    pub fn payload(&self) -> &'a [u8] {
        &self.raw[4..self.raw.len() - 2]
    }

    /// Checksum byte.
    pub fn checksum(&self) -> u8 {
        self.raw[self.raw.len() - 2]
    }

    /// Final byte.
    pub fn terminator(&self) -> u8 {
        self.raw[self.raw.len() - 1]
    }

    /// Full packet bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }
}
