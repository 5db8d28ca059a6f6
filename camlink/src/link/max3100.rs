//! MAX3100 SPI UART link.
//!
//! The MAX3100 exposes a UART through 16-bit SPI words, most significant
//! byte first:
//!
//! ```text
//! command word (host -> chip)          response word (chip -> host)
//! +----+----+---------------------+    +---+---+----------+--------+
//! | 15 | 14 |        13..0        |    | R | T |  ...     | data   |
//! +----+----+---------------------+    +---+---+----------+--------+
//!  1 1  write configuration              R: a received byte is in 7..0
//!  0 1  read configuration               T: transmit buffer empty
//!  1 0  write data (byte in 7..0)
//!  0 0  read data
//! ```
//!
//! The chip itself buffers very little, so [`Max3100Link`] keeps a
//! software receive buffer and fills it by polling ("fetching") with
//! read-data words until a run of `max_misses` words comes back empty.

use std::collections::VecDeque;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::link::spi::SpiBus;
use crate::link::{ChipLink, check_baud};

/// MAX3100 register words and flags.
pub mod reg {
    /// Write configuration command.
    pub const CMD_WRITE_CONF: u16 = 0b1100_0000_0000_0000;
    /// Read configuration command.
    pub const CMD_READ_CONF: u16 = 0b0100_0000_0000_0000;
    /// Write data command (byte in the low 8 bits).
    pub const CMD_WRITE_DATA: u16 = 0b1000_0000_0000_0000;
    /// Read data command.
    pub const CMD_READ_DATA: u16 = 0b0000_0000_0000_0000;

    /// Response flag: received data present.
    pub const FLAG_R: u16 = 0b1000_0000_0000_0000;
    /// Response flag: transmit buffer empty.
    pub const FLAG_T: u16 = 0b0100_0000_0000_0000;
    /// Receive interrupt mask bits set in every configuration write.
    pub const CONF_RM: u16 = 0b0000_1100_0000_0000;
}

/// Crystal fitted next to the MAX3100; selects the baud divisor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Crystal {
    /// 1.8432 MHz.
    #[cfg_attr(feature = "serde", serde(rename = "1.8432"))]
    Mhz1_8432,
    /// 3.6864 MHz.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "3.6864"))]
    Mhz3_6864,
}

impl Crystal {
    /// Baud divisor bits for `baud`, or `None` when unsupported.
    pub fn baud_bits(self, baud: u32) -> Option<u16> {
        match (self, baud) {
            (Self::Mhz3_6864, 57600) => Some(0b0010),
            (Self::Mhz3_6864, 38400) => Some(0b1001),
            (Self::Mhz3_6864, 19200) => Some(0b1010),
            (Self::Mhz3_6864, 9600) => Some(0b1011),
            (Self::Mhz1_8432, 57600) => Some(0b0001),
            (Self::Mhz1_8432, 38400) => Some(0b1000),
            (Self::Mhz1_8432, 19200) => Some(0b1001),
            (Self::Mhz1_8432, 9600) => Some(0b1010),
            _ => None,
        }
    }
}

/// MAX3100 link configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// UART baud rate.
    pub baud: u32,
    /// Fitted crystal.
    pub crystal: Crystal,
    /// SPI clock in Hz (informational for the bus owner).
    pub spi_speed_hz: u32,
    /// Consecutive empty read-data words that end a fetch.
    pub max_misses: u8,
    /// Software receive buffer size in bytes.
    pub rx_capacity: usize,
    /// Read-configuration polls allowed while waiting for `T` before a write.
    pub tx_ready_polls: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud: 9600,
            crystal: Crystal::default(),
            spi_speed_hz: 7_800_000,
            max_misses: 10,
            rx_capacity: 8192,
            tx_ready_polls: 100_000,
        }
    }
}

impl LinkConfig {
    /// Create a configuration for `baud` with default settings otherwise.
    pub fn new(baud: u32) -> Self {
        Self {
            baud,
            ..Default::default()
        }
    }

    /// Set the crystal.
    #[must_use]
    pub fn with_crystal(mut self, crystal: Crystal) -> Self {
        self.crystal = crystal;
        self
    }

    /// Set the SPI clock.
    #[must_use]
    pub fn with_spi_speed(mut self, hz: u32) -> Self {
        self.spi_speed_hz = hz;
        self
    }

    /// Set the miss tolerance.
    #[must_use]
    pub fn with_max_misses(mut self, max_misses: u8) -> Self {
        self.max_misses = max_misses;
        self
    }
}

/// UART link emulated on top of a MAX3100 over SPI.
pub struct Max3100Link<S: SpiBus> {
    spi: S,
    config: LinkConfig,
    rx: VecDeque<u8>,
    overruns: u64,
}

impl<S: SpiBus> Max3100Link<S> {
    /// Take ownership of `spi` and program the chip with `config`.
    pub fn open(spi: S, config: LinkConfig) -> Result<Self> {
        let mut link = Self {
            spi,
            config,
            rx: VecDeque::with_capacity(config.rx_capacity),
            overruns: 0,
        };
        link.configure(config.baud)?;
        Ok(link)
    }

    /// Active configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Give the SPI bus back.
    pub fn into_inner(self) -> S {
        self.spi
    }

    fn transfer16(&mut self, word: u16) -> Result<u16> {
        let mut tx = [0u8; 2];
        let mut rx = [0u8; 2];
        BigEndian::write_u16(&mut tx, word);
        self.spi.transfer(&tx, &mut rx)?;
        Ok(BigEndian::read_u16(&rx))
    }

    fn store(&mut self, byte: u8) {
        if self.rx.len() >= self.config.rx_capacity {
            self.overruns += 1;
            warn!(
                "MAX3100 receive buffer full, dropped 0x{byte:02X} ({} overruns)",
                self.overruns
            );
            return;
        }
        self.rx.push_back(byte);
    }

    /// Poll read-data words until `max_misses` in a row come back empty.
    fn fetch(&mut self) -> Result<()> {
        let mut misses = 0u8;
        while misses < self.config.max_misses {
            let r = self.transfer16(reg::CMD_READ_DATA)?;
            if r & reg::FLAG_R != 0 {
                self.store((r & 0xFF) as u8);
                misses = 0;
            } else {
                misses += 1;
            }
        }
        Ok(())
    }

    fn put_byte(&mut self, byte: u8) -> Result<()> {
        let mut polls = 0u32;
        loop {
            let r = self.transfer16(reg::CMD_READ_CONF)?;
            if r & reg::FLAG_R != 0 {
                self.fetch()?;
            } else if r & reg::FLAG_T != 0 {
                break;
            }
            polls += 1;
            if polls >= self.config.tx_ready_polls {
                return Err(Error::Timeout(format!(
                    "MAX3100 transmit buffer not empty after {polls} polls"
                )));
            }
        }

        let r = self.transfer16(reg::CMD_WRITE_DATA | u16::from(byte))?;
        if r & reg::FLAG_R != 0 {
            self.store((r & 0xFF) as u8);
            self.fetch()?;
        }
        Ok(())
    }
}

impl<S: SpiBus> ChipLink for Max3100Link<S> {
    fn configure(&mut self, baud: u32) -> Result<()> {
        check_baud(baud)?;
        let bits = self
            .config
            .crystal
            .baud_bits(baud)
            .ok_or(Error::UnsupportedBaud(baud))?;
        self.transfer16(reg::CMD_WRITE_CONF | reg::CONF_RM | bits)?;
        self.config.baud = baud;
        debug!("MAX3100 configured for {baud} baud ({:?})", self.config.crystal);
        Ok(())
    }

    fn baud(&self) -> u32 {
        self.config.baud
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            self.put_byte(byte)?;
        }
        trace!("MAX3100 wrote {} bytes", data.len());
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        self.fetch()?;
        Ok(self.rx.len())
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        self.fetch()?;
        Ok(self.rx.pop_front())
    }

    fn miss_count(&self) -> u64 {
        self.overruns
    }

    fn clear(&mut self) -> Result<()> {
        self.fetch()?;
        self.rx.clear();
        Ok(())
    }
}
