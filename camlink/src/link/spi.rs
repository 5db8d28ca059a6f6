//! SPI bus seam for the MAX3100 link.
//!
//! The MAX3100 is driven purely through full-duplex SPI transfers; the
//! link only needs one primitive from the bus. On Linux, [`SpidevBus`]
//! provides it through the kernel's spidev interface.

use std::io;

/// Full-duplex SPI transfer primitive.
pub trait SpiBus {
    /// Clock out `write` while clocking in the same number of bytes into
    /// `read`. Both slices have the same length.
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> io::Result<()>;
}

impl<S: SpiBus + ?Sized> SpiBus for &mut S {
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> io::Result<()> {
        (**self).transfer(write, read)
    }
}

impl<S: SpiBus + ?Sized> SpiBus for Box<S> {
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> io::Result<()> {
        (**self).transfer(write, read)
    }
}

#[cfg(all(feature = "spidev", target_os = "linux"))]
pub use spidev::SpidevBus;

#[cfg(all(feature = "spidev", target_os = "linux"))]
#[allow(unsafe_code)]
mod spidev {
    use super::SpiBus;
    use log::debug;
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::AsRawFd;
    use std::path::Path;

    /// `struct spi_ioc_transfer` from `<linux/spi/spidev.h>`.
    #[repr(C)]
    #[derive(Debug, Default)]
    struct SpiIocTransfer {
        tx_buf: u64,
        rx_buf: u64,
        len: u32,
        speed_hz: u32,
        delay_usecs: u16,
        bits_per_word: u8,
        cs_change: u8,
        tx_nbits: u8,
        rx_nbits: u8,
        word_delay_usecs: u8,
        pad: u8,
    }

    const SPI_IOC_MAGIC: u64 = b'k' as u64;
    const IOC_WRITE: u64 = 1;
    const IOC_READ: u64 = 2;

    const fn ioc(dir: u64, nr: u64, size: usize) -> u64 {
        (dir << 30) | ((size as u64) << 16) | (SPI_IOC_MAGIC << 8) | nr
    }

    const SPI_IOC_MESSAGE_1: u64 = ioc(IOC_WRITE, 0, std::mem::size_of::<SpiIocTransfer>());
    const SPI_IOC_RD_BITS_PER_WORD: u64 = ioc(IOC_READ, 3, 1);
    const SPI_IOC_WR_MAX_SPEED_HZ: u64 = ioc(IOC_WRITE, 4, 4);

    /// SPI bus on a `/dev/spidevB.D` character device.
    #[derive(Debug)]
    pub struct SpidevBus {
        file: File,
        speed_hz: u32,
        bits_per_word: u8,
    }

    impl SpidevBus {
        /// Default SPI clock for the MAX3100 (7.8 MHz).
        pub const DEFAULT_SPEED_HZ: u32 = 7_800_000;

        /// Open the device and set its maximum clock to `speed_hz`.
        pub fn open(path: impl AsRef<Path>, speed_hz: u32) -> io::Result<Self> {
            let path = path.as_ref();
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)?;
            let fd = file.as_raw_fd();

            let mut bits_per_word: u8 = 0;
            // SAFETY: fd is open for the lifetime of `file`; the kernel writes one byte.
            if unsafe { libc::ioctl(fd, SPI_IOC_RD_BITS_PER_WORD as _, &raw mut bits_per_word) } < 0 {
                return Err(io::Error::last_os_error());
            }

            let speed: u32 = speed_hz;
            // SAFETY: fd is open; the kernel reads four bytes.
            if unsafe { libc::ioctl(fd, SPI_IOC_WR_MAX_SPEED_HZ as _, &raw const speed) } < 0 {
                return Err(io::Error::last_os_error());
            }

            debug!(
                "Opened {} at {speed_hz} Hz, {bits_per_word} bits per word",
                path.display()
            );

            Ok(Self {
                file,
                speed_hz,
                bits_per_word,
            })
        }

        /// Configured SPI clock in Hz.
        pub fn speed_hz(&self) -> u32 {
            self.speed_hz
        }
    }

    impl SpiBus for SpidevBus {
        fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> io::Result<()> {
            if write.len() != read.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "SPI transfer buffers differ in length",
                ));
            }
            let xfer = SpiIocTransfer {
                tx_buf: write.as_ptr() as u64,
                rx_buf: read.as_mut_ptr() as u64,
                len: write.len() as u32,
                speed_hz: self.speed_hz,
                bits_per_word: self.bits_per_word,
                ..SpiIocTransfer::default()
            };
            // SAFETY: both buffers outlive the call and are `len` bytes long.
            let rc = unsafe {
                libc::ioctl(
                    self.file.as_raw_fd(),
                    SPI_IOC_MESSAGE_1 as _,
                    &raw const xfer,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }

}
