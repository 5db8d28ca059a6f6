//! Configuration file support for camlink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (CAMLINK_*)
//! 3. Local config file (./camlink.toml)
//! 4. Global config file (~/.config/camlink/config.toml)
//!
//! ```toml
//! [link]
//! kind = "max3100"
//! spi = "/dev/spidev0.0"
//! baud = 57600
//! crystal = "3.6864"
//! reset_gpio = 23
//!
//! [camera]
//! package_size = 512
//! step_attempts = 3
//! sync_check = "strict"
//! retry = "failed-only"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use camlink::{Crystal, RetryMode, SyncCheck};
use clap::ValueEnum;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Local config file name.
pub const LOCAL_CONFIG: &str = "camlink.toml";

/// Which link carries the camera traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// MAX3100 SPI UART.
    #[default]
    Max3100,
    /// Kernel serial device.
    Serial,
}

/// Link configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Link type.
    pub kind: Option<LinkKind>,
    /// spidev device for the MAX3100.
    pub spi: Option<String>,
    /// SPI clock in Hz.
    pub spi_speed: Option<u32>,
    /// Serial device for the pass-through link.
    pub serial: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// MAX3100 crystal.
    pub crystal: Option<Crystal>,
    /// Empty polls that end a MAX3100 fetch.
    pub max_misses: Option<u8>,
    /// BCM pin wired to the camera reset.
    pub reset_gpio: Option<u32>,
}

/// Camera configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Packet size in bytes.
    pub package_size: Option<u16>,
    /// Maximum download rounds.
    pub max_rounds: Option<u32>,
    /// SYNC attempts before giving up.
    pub max_attempts: Option<u32>,
    /// Sends per setup command.
    pub step_attempts: Option<u32>,
    /// SYNC reply check.
    pub sync_check: Option<SyncCheck>,
    /// Retry strategy.
    pub retry: Option<RetryMode>,
    /// Baud rate to switch to after syncing.
    pub switch_baud: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Link configuration.
    #[serde(default)]
    pub link: LinkConfig,
    /// Camera configuration.
    #[serde(default)]
    pub camera: CameraConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "camlink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set fields in `other` win.
    fn merge(&mut self, other: Self) {
        let link = other.link;
        overlay(&mut self.link.kind, link.kind);
        overlay(&mut self.link.spi, link.spi);
        overlay(&mut self.link.spi_speed, link.spi_speed);
        overlay(&mut self.link.serial, link.serial);
        overlay(&mut self.link.baud, link.baud);
        overlay(&mut self.link.crystal, link.crystal);
        overlay(&mut self.link.max_misses, link.max_misses);
        overlay(&mut self.link.reset_gpio, link.reset_gpio);

        let camera = other.camera;
        overlay(&mut self.camera.package_size, camera.package_size);
        overlay(&mut self.camera.max_rounds, camera.max_rounds);
        overlay(&mut self.camera.max_attempts, camera.max_attempts);
        overlay(&mut self.camera.step_attempts, camera.step_attempts);
        overlay(&mut self.camera.sync_check, camera.sync_check);
        overlay(&mut self.camera.retry, camera.retry);
        overlay(&mut self.camera.switch_baud, camera.switch_baud);
    }
}

fn overlay<T>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.link.kind.is_none());
        assert!(config.link.baud.is_none());
        assert!(config.link.reset_gpio.is_none());
        assert!(config.camera.package_size.is_none());
        assert!(config.camera.retry.is_none());
    }

    #[test]
    fn test_config_merge_overrides_set_fields() {
        let mut base = Config::default();
        base.link.baud = Some(9600);
        base.link.spi = Some("/dev/spidev0.0".to_string());

        let mut other = Config::default();
        other.link.baud = Some(57600);
        other.camera.package_size = Some(128);

        base.merge(other);
        assert_eq!(base.link.baud, Some(57600));
        assert_eq!(base.link.spi.as_deref(), Some("/dev/spidev0.0"));
        assert_eq!(base.camera.package_size, Some(128));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.link.serial = Some("/dev/serial0".to_string());
        base.camera.sync_check = Some(SyncCheck::Strict);

        base.merge(Config::default());

        assert_eq!(base.link.serial.as_deref(), Some("/dev/serial0"));
        assert_eq!(base.camera.sync_check, Some(SyncCheck::Strict));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[link]
kind = "serial"
serial = "/dev/ttyAMA0"
baud = 38400
crystal = "1.8432"
max_misses = 20
reset_gpio = 23

[camera]
package_size = 64
max_rounds = 3
step_attempts = 4
sync_check = "strict"
retry = "failed-only"
switch_baud = 57600
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.link.kind, Some(LinkKind::Serial));
        assert_eq!(config.link.serial.as_deref(), Some("/dev/ttyAMA0"));
        assert_eq!(config.link.baud, Some(38400));
        assert_eq!(config.link.crystal, Some(Crystal::Mhz1_8432));
        assert_eq!(config.link.max_misses, Some(20));
        assert_eq!(config.link.reset_gpio, Some(23));
        assert_eq!(config.camera.package_size, Some(64));
        assert_eq!(config.camera.max_rounds, Some(3));
        assert_eq!(config.camera.step_attempts, Some(4));
        assert_eq!(config.camera.sync_check, Some(SyncCheck::Strict));
        assert_eq!(config.camera.retry, Some(RetryMode::FailedOnly));
        assert_eq!(config.camera.switch_baud, Some(57600));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.link.kind.is_none());
        assert!(config.camera.max_rounds.is_none());
    }

    #[test]
    fn test_config_rejects_unknown_enum_value() {
        assert!(toml::from_str::<Config>("[link]\nkind = \"usb\"\n").is_err());
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.link.kind = Some(LinkKind::Max3100);
        config.link.crystal = Some(Crystal::Mhz3_6864);
        config.camera.retry = Some(RetryMode::FullSweep);

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(deserialized.link.kind, Some(LinkKind::Max3100));
        assert_eq!(deserialized.link.crystal, Some(Crystal::Mhz3_6864));
        assert_eq!(deserialized.camera.retry, Some(RetryMode::FullSweep));
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camlink.toml");
        fs::write(&path, "[link]\nspi = \"/dev/spidev0.1\"\n[camera]\nmax_attempts = 10\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.link.spi.as_deref(), Some("/dev/spidev0.1"));
        assert_eq!(config.camera.max_attempts, Some(10));
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.link.spi.is_none());
    }

    #[test]
    fn test_global_config_path_names_camlink() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_string_lossy().contains("camlink"));
            assert!(p.to_string_lossy().ends_with("config.toml"));
        }
    }
}
