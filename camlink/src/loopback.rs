//! Link self-test between two independent processes.
//!
//! Wire two links back to back (for example the MAX3100 to the Pi's own
//! UART) and run one role on each side. Each role owns its link; the two
//! only meet on the wire.

use std::time::Duration;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::framebuf::FrameBuffer;
use crate::link::ChipLink;
use crate::poll::Clock;
use crate::protocol::hex_preview;

/// Which end of the loop this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Role {
    /// Send a payload and expect it back.
    Sender,
    /// Wait for a payload and send it back.
    Echo,
}

/// Loopback settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackConfig {
    /// Payload length in bytes.
    pub length: usize,
    /// How long to wait for the payload to arrive.
    pub wait: Duration,
    /// Pause on the echo side between receiving and replying.
    pub turnaround: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            length: 512,
            wait: Duration::from_secs(10),
            turnaround: Duration::from_millis(100),
        }
    }
}

/// Outcome of one role.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LoopbackReport {
    /// Role that ran.
    pub role: Role,
    /// Bytes written.
    pub sent: usize,
    /// Bytes read.
    pub received: usize,
    /// For the sender: whether the echo equals the payload. For the echo
    /// side: whether the full payload arrived.
    pub matched: bool,
    /// Time from start to the last byte read.
    pub elapsed: Duration,
    /// Receive overruns reported by the link.
    pub overruns: u64,
}

/// Deterministic `A..=Z` payload.
pub fn payload(length: usize) -> Vec<u8> {
    (0..length).map(|i| b'A' + ((i * 7) % 26) as u8).collect()
}

/// Run `role` over `frames`.
pub fn run<L: ChipLink, C: Clock>(
    frames: &mut FrameBuffer<L, C>,
    role: Role,
    config: &LoopbackConfig,
) -> Result<LoopbackReport> {
    match role {
        Role::Sender => run_sender(frames, config),
        Role::Echo => run_echo(frames, config),
    }
}

/// Send the payload and compare what comes back.
pub fn run_sender<L: ChipLink, C: Clock>(
    frames: &mut FrameBuffer<L, C>,
    config: &LoopbackConfig,
) -> Result<LoopbackReport> {
    let data = payload(config.length);
    frames.clear()?;
    let started = frames.clock().now();
    info!(
        "Sending {} bytes ({}) at {} baud",
        data.len(),
        hex_preview(&data, 8),
        frames.link().baud()
    );
    frames.send(&data)?;

    let echoed = collect(frames, config.length, config.wait)?;
    let elapsed = frames.clock().now() - started;
    let matched = echoed == data;
    if matched {
        info!("Echo matched ({} bytes in {elapsed:?})", echoed.len());
    } else {
        warn!(
            "Echo mismatch: sent {} bytes, got {} ({})",
            data.len(),
            echoed.len(),
            hex_preview(&echoed, 8)
        );
    }

    Ok(LoopbackReport {
        role: Role::Sender,
        sent: data.len(),
        received: echoed.len(),
        matched,
        elapsed,
        overruns: frames.link().miss_count(),
    })
}

/// Wait for the payload and send back exactly what arrived.
pub fn run_echo<L: ChipLink, C: Clock>(
    frames: &mut FrameBuffer<L, C>,
    config: &LoopbackConfig,
) -> Result<LoopbackReport> {
    let started = frames.clock().now();
    let received = collect(frames, config.length, config.wait)?;
    let elapsed = frames.clock().now() - started;
    if received.is_empty() {
        return Err(Error::Timeout(format!(
            "no data within {:?}",
            config.wait
        )));
    }
    info!("Received {} bytes in {elapsed:?}", received.len());

    frames.clock().sleep(config.turnaround);
    frames.send(&received)?;

    Ok(LoopbackReport {
        role: Role::Echo,
        sent: received.len(),
        received: received.len(),
        matched: received.len() == config.length,
        elapsed,
        overruns: frames.link().miss_count(),
    })
}

/// Read until `length` bytes arrived or `wait` passed with nothing new.
fn collect<L: ChipLink, C: Clock>(
    frames: &mut FrameBuffer<L, C>,
    length: usize,
    wait: Duration,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(length);
    while out.len() < length {
        let chunk = frames.recv_within(wait)?;
        if chunk.is_empty() {
            break;
        }
        out.extend(chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::{ManualClock, ScriptedLink};
    use crate::poll::PollPolicy;

    fn frames(link: ScriptedLink, clock: &ManualClock) -> FrameBuffer<ScriptedLink, &ManualClock> {
        FrameBuffer::new(link, clock, PollPolicy::default())
    }

    fn config(length: usize) -> LoopbackConfig {
        LoopbackConfig {
            length,
            wait: Duration::from_millis(50),
            ..LoopbackConfig::default()
        }
    }

    #[test]
    fn test_payload_is_uppercase_and_deterministic() {
        let data = payload(64);
        assert_eq!(data.len(), 64);
        assert!(data.iter().all(u8::is_ascii_uppercase));
        assert_eq!(data, payload(64));
        assert_eq!(&data[..3], b"AHO");
    }

    #[test]
    fn test_sender_matches_echo() {
        let clock = ManualClock::new();
        let mut fb = frames(ScriptedLink::echo(), &clock);
        let report = run(&mut fb, Role::Sender, &config(100)).unwrap();
        assert!(report.matched);
        assert_eq!(report.sent, 100);
        assert_eq!(report.received, 100);
    }

    #[test]
    fn test_sender_detects_corruption() {
        let clock = ManualClock::new();
        let link = ScriptedLink::new(|data| {
            let mut back = data.to_vec();
            back[3] = b'!';
            back
        });
        let mut fb = frames(link, &clock);
        let report = run(&mut fb, Role::Sender, &config(20)).unwrap();
        assert!(!report.matched);
        assert_eq!(report.received, 20);
    }

    #[test]
    fn test_sender_reports_short_echo() {
        let clock = ManualClock::new();
        let link = ScriptedLink::new(|data| data[..5].to_vec());
        let mut fb = frames(link, &clock);
        let report = run(&mut fb, Role::Sender, &config(20)).unwrap();
        assert!(!report.matched);
        assert_eq!(report.received, 5);
    }

    #[test]
    fn test_echo_returns_received_bytes() {
        let clock = ManualClock::new();
        let mut link = ScriptedLink::silent();
        link.inject(b"HELLOWORLD");
        let mut fb = frames(link, &clock);

        let report = run(&mut fb, Role::Echo, &config(10)).unwrap();
        assert!(report.matched);
        assert_eq!(fb.link().written(), b"HELLOWORLD".to_vec());
    }

    #[test]
    fn test_echo_times_out_without_data() {
        let clock = ManualClock::new();
        let mut fb = frames(ScriptedLink::silent(), &clock);
        assert!(matches!(
            run(&mut fb, Role::Echo, &config(10)),
            Err(Error::Timeout(_))
        ));
    }
}
