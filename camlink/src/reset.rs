//! Camera reset line.
//!
//! The camera's reset input is active-low: pulling it low holds the
//! camera in reset, releasing it lets the camera boot.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;

use crate::error::Result;
use crate::poll::{Clock, SystemClock};

/// A digital output wired to the camera's reset input.
pub trait ResetLine {
    /// Hold the camera in reset (`true`) or release it (`false`).
    fn set_reset(&mut self, asserted: bool) -> Result<()>;
}

impl<R: ResetLine + ?Sized> ResetLine for &mut R {
    fn set_reset(&mut self, asserted: bool) -> Result<()> {
        (**self).set_reset(asserted)
    }
}

impl<R: ResetLine + ?Sized> ResetLine for Box<R> {
    fn set_reset(&mut self, asserted: bool) -> Result<()> {
        (**self).set_reset(asserted)
    }
}

/// Assert reset, hold it for `hold`, release it.
pub fn pulse_reset<R, C>(line: &mut R, clock: &C, hold: Duration) -> Result<()>
where
    R: ResetLine + ?Sized,
    C: Clock + ?Sized,
{
    line.set_reset(true)?;
    clock.sleep(hold);
    line.set_reset(false)
}

/// No reset wire; every call succeeds and does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReset;

impl ResetLine for NoReset {
    fn set_reset(&mut self, _asserted: bool) -> Result<()> {
        Ok(())
    }
}

/// Reset line on a GPIO exported through `/sys/class/gpio`.
#[derive(Debug)]
pub struct SysfsGpio {
    pin: u32,
    value: PathBuf,
}

impl SysfsGpio {
    /// Default sysfs GPIO root.
    pub const SYSFS_ROOT: &'static str = "/sys/class/gpio";

    const EXPORT_RETRIES: u32 = 10;
    const EXPORT_RETRY_DELAY: Duration = Duration::from_millis(10);

    /// Export BCM pin `pin` and configure it as an output, released.
    pub fn open(pin: u32) -> Result<Self> {
        Self::open_at(Self::SYSFS_ROOT, pin, &SystemClock::new())
    }

    /// Like [`SysfsGpio::open`], under a different sysfs root. Waits
    /// between export retries go through `clock`.
    pub fn open_at<C: Clock + ?Sized>(root: impl AsRef<Path>, pin: u32, clock: &C) -> Result<Self> {
        let root = root.as_ref();
        let dir = root.join(format!("gpio{pin}"));

        if !dir.exists() {
            debug!("Exporting GPIO {pin}");
            fs::write(root.join("export"), pin.to_string())?;
        }

        // udev may still be fixing permissions on a freshly exported pin.
        let direction = dir.join("direction");
        let mut attempt = 0;
        loop {
            match fs::write(&direction, "out") {
                Ok(()) => break,
                Err(e) if attempt < Self::EXPORT_RETRIES && retryable(&e) => {
                    attempt += 1;
                    clock.sleep(Self::EXPORT_RETRY_DELAY);
                },
                Err(e) => return Err(e.into()),
            }
        }

        let mut gpio = Self {
            pin,
            value: dir.join("value"),
        };
        gpio.set_reset(false)?;
        Ok(gpio)
    }

    /// BCM pin number.
    pub fn pin(&self) -> u32 {
        self.pin
    }
}

fn retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

impl ResetLine for SysfsGpio {
    fn set_reset(&mut self, asserted: bool) -> Result<()> {
        let level = if asserted { "0" } else { "1" };
        fs::write(&self.value, level)?;
        debug!(
            "GPIO {} {}",
            self.pin,
            if asserted { "low (reset)" } else { "high" }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::ManualClock;

    #[derive(Default)]
    struct RecordingLine {
        levels: Vec<bool>,
    }

    impl ResetLine for RecordingLine {
        fn set_reset(&mut self, asserted: bool) -> Result<()> {
            self.levels.push(asserted);
            Ok(())
        }
    }

    #[test]
    fn test_pulse_asserts_holds_then_releases() {
        let clock = ManualClock::new();
        let mut line = RecordingLine::default();
        pulse_reset(&mut line, &clock, Duration::from_millis(100)).unwrap();
        assert_eq!(line.levels, vec![true, false]);
        assert_eq!(clock.now(), Duration::from_millis(100));
    }

    #[test]
    fn test_sysfs_gpio_drives_value_active_low() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("gpio23");
        fs::create_dir(&dir).unwrap();

        let clock = ManualClock::new();
        let mut gpio = SysfsGpio::open_at(root.path(), 23, &clock).unwrap();
        assert_eq!(clock.now(), Duration::ZERO);
        assert_eq!(gpio.pin(), 23);
        assert_eq!(fs::read_to_string(dir.join("direction")).unwrap(), "out");
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "1");

        gpio.set_reset(true).unwrap();
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "0");
        gpio.set_reset(false).unwrap();
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "1");
    }

    #[test]
    fn test_sysfs_gpio_exports_missing_pin() {
        let root = tempfile::tempdir().unwrap();
        let clock = ManualClock::new();
        let result = SysfsGpio::open_at(root.path(), 17, &clock);
        assert_eq!(
            fs::read_to_string(root.path().join("export")).unwrap(),
            "17"
        );
        // Nothing creates gpio17/ here, so configuring it fails after
        // every retry, each one spaced on the clock.
        assert!(result.is_err());
        assert_eq!(
            clock.now(),
            SysfsGpio::EXPORT_RETRY_DELAY * SysfsGpio::EXPORT_RETRIES
        );
    }

    #[test]
    fn test_no_reset_is_inert() {
        let clock = ManualClock::new();
        pulse_reset(&mut NoReset, &clock, Duration::from_millis(5)).unwrap();
    }
}
