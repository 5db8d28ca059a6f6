//! Camera wire protocol.

pub mod frame;
pub mod localize;
pub mod packet;

// Re-export common types
pub use frame::{Command, CommandId, FRAME_LEN, ImageFormat, PictureKind, Resolution, SnapshotKind};
pub use localize::{Region, localize, render_region};
pub use packet::{PACKET_OVERHEAD, Packet, PacketFault, TransferLayout, checksum};

/// Format bytes as space-separated upper-case hex (`AA 0D 00`).
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Like [`hex`], but long buffers show only the first `limit` bytes.
pub fn hex_preview(bytes: &[u8], limit: usize) -> String {
    if bytes.len() <= limit {
        hex(bytes)
    } else {
        format!("{} ...", hex(&bytes[..limit]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0xAA, 0x0D, 0x00]), "AA 0D 00");
        assert_eq!(hex(&[]), "");
    }

    #[test]
    fn test_hex_preview_truncates() {
        assert_eq!(hex_preview(&[1, 2, 3], 12), "01 02 03");
        assert_eq!(hex_preview(&[1, 2, 3], 2), "01 02 ...");
    }
}
