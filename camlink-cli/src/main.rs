//! camlink - capture pictures from a serial camera over a MAX3100 SPI UART.

use anyhow::{Context, Result, bail};
use camlink::camera::{CameraConfig, HandshakeReport, TransferConfig};
use camlink::link::{PortInfo, SUPPORTED_BAUDS, list_ports};
use camlink::loopback::{self, LoopbackConfig, LoopbackReport, Role};
use camlink::reset::{NoReset, ResetLine, SysfsGpio};
use camlink::{
    Camera, CancelToken, ChipLink, Crystal, Error, FrameBuffer, PollPolicy, RetryMode, SerialConfig,
    SerialLink, SyncCheck, SystemClock,
};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

mod config;
mod report;

use config::{Config, LinkKind};
use report::{CaptureReport, render_diagnostics};

/// camlink - capture pictures from a uCAM-style serial camera.
///
/// Environment variables:
///   CAMLINK_LINK        - Link type (max3100, serial)
///   CAMLINK_SPI         - spidev device for the MAX3100
///   CAMLINK_SERIAL      - Serial device for the serial link
///   CAMLINK_BAUD        - Baud rate
///   CAMLINK_RESET_GPIO  - BCM pin wired to the camera reset
#[derive(Parser)]
#[command(name = "camlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Link to the camera.
    #[arg(long, global = true, env = "CAMLINK_LINK")]
    link: Option<LinkKind>,

    /// spidev device for the MAX3100 link.
    #[arg(long, global = true, env = "CAMLINK_SPI", value_name = "DEVICE")]
    spi: Option<String>,

    /// Serial device for the serial link.
    #[arg(long, global = true, env = "CAMLINK_SERIAL", value_name = "DEVICE")]
    serial: Option<String>,

    /// Baud rate (9600, 19200, 38400 or 57600).
    #[arg(short, long, global = true, env = "CAMLINK_BAUD")]
    baud: Option<u32>,

    /// BCM GPIO pin wired to the camera reset (no reset if unset).
    #[arg(long, global = true, env = "CAMLINK_RESET_GPIO", value_name = "PIN")]
    reset_gpio: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Reset the camera and run the SYNC handshake only.
    Sync {
        /// Require the full 12-byte SYNC reply.
        #[arg(long)]
        strict_sync: bool,
    },

    /// Take a picture and download it.
    Capture {
        /// Output file.
        #[arg(short, long, default_value = "picture.jpg")]
        output: PathBuf,

        /// Packet size in bytes.
        #[arg(long)]
        package_size: Option<u16>,

        /// Maximum download rounds.
        #[arg(long)]
        max_rounds: Option<u32>,

        /// Only re-request packets that failed in earlier rounds.
        #[arg(long)]
        retry_failed_only: bool,

        /// Require the full 12-byte SYNC reply.
        #[arg(long)]
        strict_sync: bool,

        /// Print a JSON report to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Two-process link self-test.
    Loopback {
        /// Which end of the loop this process is.
        #[arg(long, value_enum)]
        role: RoleArg,

        /// Payload length in bytes.
        #[arg(long, default_value = "512")]
        length: usize,

        /// Seconds to wait for data.
        #[arg(long, default_value = "10")]
        wait: u64,
    },

    /// List available serial ports.
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

/// Loopback role.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    /// Send a payload and expect it back.
    Sender,
    /// Echo whatever arrives.
    Echo,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Sender => Role::Sender,
            RoleArg::Echo => Role::Echo,
        }
    }
}

/// Link settings after merging flags, environment and config files.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LinkSettings {
    kind: LinkKind,
    spi: String,
    spi_speed: u32,
    serial: String,
    baud: u32,
    crystal: Crystal,
    max_misses: u8,
    reset_gpio: Option<u32>,
}

impl LinkSettings {
    const DEFAULT_SPI: &'static str = "/dev/spidev0.0";
    const DEFAULT_SERIAL: &'static str = "/dev/serial0";
    const DEFAULT_BAUD: u32 = 57600;

    fn resolve(cli: &Cli, config: &Config) -> Self {
        let defaults = camlink::LinkConfig::new(Self::DEFAULT_BAUD);
        let file = &config.link;
        Self {
            kind: cli.link.or(file.kind).unwrap_or_default(),
            spi: cli
                .spi
                .clone()
                .or_else(|| file.spi.clone())
                .unwrap_or_else(|| Self::DEFAULT_SPI.to_string()),
            spi_speed: file.spi_speed.unwrap_or(defaults.spi_speed_hz),
            serial: cli
                .serial
                .clone()
                .or_else(|| file.serial.clone())
                .unwrap_or_else(|| Self::DEFAULT_SERIAL.to_string()),
            baud: cli.baud.or(file.baud).unwrap_or(Self::DEFAULT_BAUD),
            crystal: file.crystal.unwrap_or_default(),
            max_misses: file.max_misses.unwrap_or(defaults.max_misses),
            reset_gpio: cli.reset_gpio.or(file.reset_gpio),
        }
    }

    fn device(&self) -> &str {
        match self.kind {
            LinkKind::Max3100 => &self.spi,
            LinkKind::Serial => &self.serial,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "camlink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            warn!("Could not install Ctrl-C handler: {e}");
        }
    }

    match &cli.command {
        Commands::Sync { strict_sync } => {
            cmd_sync(&cli, &config, *strict_sync, &cancel)?;
        },
        Commands::Capture {
            output,
            package_size,
            max_rounds,
            retry_failed_only,
            strict_sync,
            json,
        } => {
            let options = CaptureOptions {
                package_size: *package_size,
                max_rounds: *max_rounds,
                retry_failed_only: *retry_failed_only,
                strict_sync: *strict_sync,
            };
            cmd_capture(&cli, &config, output, &options, *json, &cancel)?;
        },
        Commands::Loopback { role, length, wait } => {
            cmd_loopback(&cli, &config, (*role).into(), *length, *wait, &cancel)?;
        },
        Commands::ListPorts { json } => {
            cmd_list_ports(*json)?;
        },
    }

    Ok(())
}

/// Open the configured link.
fn open_link(settings: &LinkSettings) -> Result<Box<dyn ChipLink>> {
    if !SUPPORTED_BAUDS.contains(&settings.baud) {
        bail!(
            "unsupported baud rate {} (expected one of {:?})",
            settings.baud,
            SUPPORTED_BAUDS
        );
    }
    match settings.kind {
        LinkKind::Max3100 => open_max3100(settings),
        LinkKind::Serial => {
            let link = SerialLink::open(&SerialConfig::new(&settings.serial, settings.baud))
                .with_context(|| format!("failed to open serial device {}", settings.serial))?;
            Ok(Box::new(link))
        },
    }
}

#[cfg(target_os = "linux")]
fn open_max3100(settings: &LinkSettings) -> Result<Box<dyn ChipLink>> {
    let spi = camlink::link::SpidevBus::open(&settings.spi, settings.spi_speed)
        .with_context(|| format!("failed to open SPI device {}", settings.spi))?;
    let config = camlink::LinkConfig::new(settings.baud)
        .with_crystal(settings.crystal)
        .with_spi_speed(settings.spi_speed)
        .with_max_misses(settings.max_misses);
    let link = camlink::Max3100Link::open(spi, config)
        .with_context(|| format!("failed to configure MAX3100 on {}", settings.spi))?;
    Ok(Box::new(link))
}

#[cfg(not(target_os = "linux"))]
fn open_max3100(_settings: &LinkSettings) -> Result<Box<dyn ChipLink>> {
    bail!("the MAX3100 link needs Linux spidev; use --link serial")
}

fn open_reset(settings: &LinkSettings) -> Result<Box<dyn ResetLine>> {
    match settings.reset_gpio {
        Some(pin) => {
            let gpio =
                SysfsGpio::open(pin).with_context(|| format!("failed to open reset GPIO {pin}"))?;
            Ok(Box::new(gpio))
        },
        None => Ok(Box::new(NoReset)),
    }
}

fn open_frames(
    settings: &LinkSettings,
    cancel: &CancelToken,
) -> Result<FrameBuffer<Box<dyn ChipLink>, SystemClock>> {
    let link = open_link(settings)?;
    Ok(FrameBuffer::new(link, SystemClock::new(), PollPolicy::default()).with_cancel(cancel.clone()))
}

fn camera_config(config: &Config, strict_sync: bool) -> CameraConfig {
    let file = &config.camera;
    let check = if strict_sync {
        SyncCheck::Strict
    } else {
        file.sync_check.unwrap_or_default()
    };
    let mut handshake = CameraConfig::default()
        .handshake
        .with_check(check)
        .with_baud_change(file.switch_baud);
    if let Some(attempts) = file.max_attempts {
        handshake = handshake.with_max_attempts(attempts);
    }

    let mut transfer = TransferConfig::default().with_retry(file.retry.unwrap_or_default());
    if let Some(size) = file.package_size {
        transfer = transfer.with_package_size(size);
    }
    if let Some(rounds) = file.max_rounds {
        transfer = transfer.with_max_rounds(rounds);
    }

    let defaults = CameraConfig::default();
    CameraConfig {
        handshake,
        transfer,
        step_attempts: file.step_attempts.unwrap_or(defaults.step_attempts),
        ..defaults
    }
}

fn print_connected(cli: &Cli, report: &HandshakeReport) {
    if !cli.quiet {
        eprintln!(
            "{} Camera synced after {} attempt(s) at {} baud",
            style("✓").green(),
            report.attempts,
            report.baud
        );
    }
}

fn cmd_sync(cli: &Cli, config: &Config, strict_sync: bool, cancel: &CancelToken) -> Result<()> {
    let settings = LinkSettings::resolve(cli, config);
    if !cli.quiet {
        eprintln!(
            "{} Connecting on {} at {} baud",
            style("🔌").cyan(),
            style(settings.device()).green(),
            settings.baud
        );
    }
    let frames = open_frames(&settings, cancel)?;
    let reset = open_reset(&settings)?;
    let mut camera = Camera::new(frames, reset, camera_config(config, strict_sync));

    let report = camera.connect().context("handshake failed")?;
    print_connected(cli, &report);
    Ok(())
}

/// Capture flags that override the config file.
struct CaptureOptions {
    package_size: Option<u16>,
    max_rounds: Option<u32>,
    retry_failed_only: bool,
    strict_sync: bool,
}

fn cmd_capture(
    cli: &Cli,
    config: &Config,
    output: &Path,
    options: &CaptureOptions,
    json: bool,
    cancel: &CancelToken,
) -> Result<()> {
    let settings = LinkSettings::resolve(cli, config);
    let mut setup = camera_config(config, options.strict_sync);
    if let Some(size) = options.package_size {
        setup.transfer = setup.transfer.with_package_size(size);
    }
    if let Some(rounds) = options.max_rounds {
        setup.transfer = setup.transfer.with_max_rounds(rounds);
    }
    if options.retry_failed_only {
        setup.transfer = setup.transfer.with_retry(RetryMode::FailedOnly);
    }

    if !cli.quiet {
        eprintln!(
            "{} Connecting on {} at {} baud",
            style("🔌").cyan(),
            style(settings.device()).green(),
            settings.baud
        );
    }
    let frames = open_frames(&settings, cancel)?;
    let reset = open_reset(&settings)?;
    let mut camera = Camera::new(frames, reset, setup);

    let handshake = camera.connect().context("handshake failed")?;
    print_connected(cli, &handshake);
    camera.configure().context("camera setup failed")?;
    camera.snapshot().context("snapshot failed")?;

    // Create progress bar
    let pb = if cli.quiet || json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(0);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message("packets");
        pb
    };

    let result = camera.download(|done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    });
    pb.finish_and_clear();
    let overruns = camera.link().miss_count();

    match result {
        Ok(picture) => {
            fs::write(output, picture.data())
                .with_context(|| format!("failed to write {}", output.display()))?;
            if json {
                let report = CaptureReport::from_session(
                    picture.session(),
                    Some(output.display().to_string()),
                    overruns,
                );
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if !cli.quiet {
                let diagnostics = render_diagnostics(picture.session());
                if !diagnostics.is_empty() {
                    eprint!("{diagnostics}");
                }
                eprintln!(
                    "{} Saved {} bytes to {} ({} round(s), {} overrun(s))",
                    style("🎉").green().bold(),
                    picture.data().len(),
                    style(output.display()).green(),
                    picture.session().rounds(),
                    overruns
                );
            }
            Ok(())
        },
        Err(Error::SessionExhausted {
            rounds,
            missing,
            session,
        }) => {
            if json {
                let report = CaptureReport::from_session(&session, None, overruns);
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                eprint!("{}", render_diagnostics(&session));
            }
            bail!(
                "download incomplete after {rounds} round(s); packets never validated: {missing:?}"
            )
        },
        Err(Error::Cancelled) => bail!("interrupted"),
        Err(e) => Err(e).context("download failed"),
    }
}

fn cmd_loopback(
    cli: &Cli,
    config: &Config,
    role: Role,
    length: usize,
    wait: u64,
    cancel: &CancelToken,
) -> Result<()> {
    let settings = LinkSettings::resolve(cli, config);
    let mut frames = open_frames(&settings, cancel)?;
    let loopback_config = LoopbackConfig {
        length,
        wait: std::time::Duration::from_secs(wait),
        ..LoopbackConfig::default()
    };

    if !cli.quiet {
        eprintln!(
            "{} Loopback as {:?} on {} at {} baud",
            style("🔄").cyan(),
            role,
            style(settings.device()).green(),
            settings.baud
        );
    }
    let report = loopback::run(&mut frames, role, &loopback_config).context("loopback failed")?;
    print_loopback(cli, &report);

    if !report.matched {
        bail!(
            "loopback mismatch: sent {} bytes, received {}",
            report.sent,
            report.received
        );
    }
    Ok(())
}

fn print_loopback(cli: &Cli, report: &LoopbackReport) {
    if cli.quiet {
        return;
    }
    let mark = if report.matched {
        style("✓").green()
    } else {
        style("✗").red()
    };
    eprintln!(
        "{} {:?}: sent {}, received {} in {:.2?} ({} overrun(s))",
        mark, report.role, report.sent, report.received, report.elapsed, report.overruns
    );
}

fn cmd_list_ports(json: bool) -> Result<()> {
    let ports: Vec<PortInfo> = list_ports().unwrap_or_else(|e| {
        warn!("Could not enumerate serial ports: {e}");
        Vec::new()
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("none found").dim());
    } else {
        for port in &ports {
            let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" ({vid:04X}:{pid:04X})")
            } else {
                String::new()
            };
            let product = port.product.as_deref().unwrap_or("");
            eprintln!(
                "  {} {}{}{}",
                style("•").dim(),
                style(&port.name).green(),
                vid_pid,
                if product.is_empty() {
                    String::new()
                } else {
                    format!(" {product}")
                }
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_capture_defaults() {
        let cli = parse(&["camlink", "capture"]);
        match cli.command {
            Commands::Capture {
                output,
                package_size,
                retry_failed_only,
                json,
                ..
            } => {
                assert_eq!(output, PathBuf::from("picture.jpg"));
                assert!(package_size.is_none());
                assert!(!retry_failed_only);
                assert!(!json);
            },
            _ => panic!("expected capture"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&[
            "camlink",
            "capture",
            "--link",
            "serial",
            "--serial",
            "/dev/ttyUSB0",
            "-b",
            "38400",
            "-vv",
        ]);
        assert_eq!(cli.link, Some(LinkKind::Serial));
        assert_eq!(cli.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud, Some(38400));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_loopback_requires_role() {
        assert!(Cli::try_parse_from(["camlink", "loopback"]).is_err());
        let cli = parse(&["camlink", "loopback", "--role", "echo", "--length", "64"]);
        match cli.command {
            Commands::Loopback { role, length, wait } => {
                assert!(matches!(role, RoleArg::Echo));
                assert_eq!(length, 64);
                assert_eq!(wait, 10);
            },
            _ => panic!("expected loopback"),
        }
    }

    #[test]
    fn test_unknown_link_rejected() {
        assert!(Cli::try_parse_from(["camlink", "--link", "usb", "sync"]).is_err());
    }

    #[test]
    fn test_settings_precedence() {
        let mut config = Config::default();
        config.link.kind = Some(LinkKind::Serial);
        config.link.baud = Some(9600);
        config.link.serial = Some("/dev/ttyS1".to_string());
        config.link.reset_gpio = Some(23);

        let cli = parse(&["camlink", "--baud", "19200", "sync"]);
        let settings = LinkSettings::resolve(&cli, &config);
        assert_eq!(settings.kind, LinkKind::Serial);
        assert_eq!(settings.baud, 19200);
        assert_eq!(settings.device(), "/dev/ttyS1");
        assert_eq!(settings.reset_gpio, Some(23));
    }

    #[test]
    fn test_settings_defaults() {
        let cli = parse(&["camlink", "sync"]);
        let settings = LinkSettings::resolve(&cli, &Config::default());
        assert_eq!(settings.kind, LinkKind::Max3100);
        assert_eq!(settings.device(), "/dev/spidev0.0");
        assert_eq!(settings.baud, 57600);
        assert_eq!(settings.crystal, Crystal::Mhz3_6864);
        assert!(settings.reset_gpio.is_none());
    }

    #[test]
    fn test_open_link_rejects_unsupported_baud() {
        let cli = parse(&["camlink", "--link", "serial", "--baud", "1234", "sync"]);
        let settings = LinkSettings::resolve(&cli, &Config::default());
        let err = open_link(&settings).err().unwrap();
        assert!(err.to_string().contains("unsupported baud rate 1234"));
    }

    #[test]
    fn test_camera_config_from_file() {
        let mut config = Config::default();
        config.camera.package_size = Some(64);
        config.camera.max_rounds = Some(2);
        config.camera.retry = Some(RetryMode::FailedOnly);
        config.camera.switch_baud = Some(57600);
        config.camera.max_attempts = Some(10);
        config.camera.step_attempts = Some(5);

        let camera = camera_config(&config, true);
        assert_eq!(camera.transfer.package_size, 64);
        assert_eq!(camera.transfer.max_rounds, 2);
        assert_eq!(camera.transfer.retry, RetryMode::FailedOnly);
        assert_eq!(camera.handshake.check, SyncCheck::Strict);
        assert_eq!(camera.handshake.baud_change, Some(57600));
        assert_eq!(camera.handshake.max_attempts, 10);
        assert_eq!(camera.step_attempts, 5);
    }

    #[test]
    fn test_camera_config_keeps_default_step_attempts() {
        let camera = camera_config(&Config::default(), false);
        assert_eq!(camera.step_attempts, CameraConfig::default().step_attempts);
    }
}
