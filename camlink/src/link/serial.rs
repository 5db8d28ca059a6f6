//! Pass-through link over a kernel serial device.
//!
//! Used when the camera sits on a real UART (for example the Pi's
//! `/dev/serial0`) instead of behind the MAX3100. The driver buffers
//! receive data itself, so `miss_count` is always zero here.

use std::io::{Read, Write};
use std::time::Duration;

use log::{debug, trace};
use serialport::{ClearBuffer, SerialPort};

use crate::error::{Error, Result};
use crate::link::{ChipLink, check_baud};

/// Serial device configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device path (e.g. "/dev/serial0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout for a single blocking read or write.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::from("/dev/serial0"),
            baud_rate: 9600,
            timeout: Duration::from_millis(100),
        }
    }
}

impl SerialConfig {
    /// Create a configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// List serial devices known to the OS.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let (vid, pid, product) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => {
                    (Some(info.vid), Some(info.pid), info.product)
                },
                _ => (None, None, None),
            };
            PortInfo {
                name: p.port_name,
                vid,
                pid,
                product,
            }
        })
        .collect())
}

/// [`ChipLink`] over a `serialport` device.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    name: String,
    baud: u32,
}

impl SerialLink {
    /// Open and flush the device.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let baud = check_baud(config.baud_rate)?;
        let port = serialport::new(&config.port_name, baud)
            .timeout(config.timeout)
            .open()?;
        port.clear(ClearBuffer::All)?;
        debug!("Opened {} at {baud} baud", config.port_name);
        Ok(Self {
            port,
            name: config.port_name.clone(),
            baud,
        })
    }

    /// Device path.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ChipLink for SerialLink {
    fn configure(&mut self, baud: u32) -> Result<()> {
        check_baud(baud)?;
        self.port.set_baud_rate(baud)?;
        self.baud = baud;
        debug!("{} reconfigured for {baud} baud", self.name);
        Ok(())
    }

    fn baud(&self) -> u32 {
        self.baud
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        trace!("{} wrote {} bytes", self.name, data.len());
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.port.bytes_to_read()? == 0 {
            return Ok(None);
        }
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(Error::Transport(e)),
        }
    }

    fn miss_count(&self) -> u64 {
        0
    }

    fn clear(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
