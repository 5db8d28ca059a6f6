//! SYNC handshake.
//!
//! After a reset the camera boots in its own time and only answers once
//! it has locked onto the host's baud rate. The host resets it, then
//! sends SYNC frames on a schedule that spreads out by `delay_step` per
//! failed attempt until one is acknowledged:
//!
//! ```text
//!   reset   settle    SYNC  SYNC   SYNC    SYNC     ...   ACK+SYNC
//! __    ____________  |     |      |       |              |
//!   |__|              |<5ms>|<6ms >|<7ms  >|<8ms ...      v
//!                                                     SYNC-ACK -> Synced
//! ```

use std::time::Duration;

use log::{debug, info, warn};

use crate::camera::command::CommandChannel;
use crate::error::{Error, Result};
use crate::link::ChipLink;
use crate::poll::Clock;
use crate::protocol::frame::{Command, CommandId, FRAME_LEN, MARKER};
use crate::protocol::hex;
use crate::reset::{ResetLine, pulse_reset};

/// How strictly a SYNC reply is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SyncCheck {
    /// Only the first three bytes must read `AA 0E 0D`.
    #[default]
    Prefix,
    /// Exactly 12 bytes: `AA 0E 0D` at 0 and the camera's own `AA 0D` at 6.
    Strict,
}

impl SyncCheck {
    /// Bytes to wait for before reading a reply.
    pub fn reply_len(self) -> usize {
        match self {
            Self::Prefix => FRAME_LEN,
            Self::Strict => 2 * FRAME_LEN,
        }
    }

    /// Whether `reply` is an acceptable answer to SYNC.
    pub fn accepts(self, reply: &[u8]) -> bool {
        let acked = Command::sync().is_acked_by(reply);
        match self {
            Self::Prefix => acked,
            Self::Strict => {
                acked
                    && reply.len() == 2 * FRAME_LEN
                    && reply[FRAME_LEN..FRAME_LEN + 2] == [MARKER, CommandId::Sync as u8]
            },
        }
    }
}

/// Handshake timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// SYNC frames sent before giving up.
    pub max_attempts: u32,
    /// Spacing between the first and second attempt.
    pub initial_delay: Duration,
    /// Added to the spacing after every failed attempt.
    pub delay_step: Duration,
    /// How long to wait for a reply to one SYNC.
    pub response_wait: Duration,
    /// Reset pulse length.
    pub reset_hold: Duration,
    /// Pause after releasing reset.
    pub settle: Duration,
    /// Reply validation.
    pub check: SyncCheck,
    /// Baud rate to switch to once synced, if any.
    pub baud_change: Option<u32>,
    /// Pause around the baud-change command.
    pub command_delay: Duration,
    /// Pause after both ends switched baud.
    pub baud_settle: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            initial_delay: Duration::from_millis(5),
            delay_step: Duration::from_millis(1),
            response_wait: Duration::from_millis(3),
            reset_hold: Duration::from_millis(100),
            settle: Duration::from_secs(1),
            check: SyncCheck::default(),
            baud_change: None,
            command_delay: Duration::from_millis(100),
            baud_settle: Duration::from_secs(1),
        }
    }
}

impl HandshakeConfig {
    /// Set the attempt limit.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the reply check.
    #[must_use]
    pub fn with_check(mut self, check: SyncCheck) -> Self {
        self.check = check;
        self
    }

    /// Switch both ends to `baud` after syncing.
    #[must_use]
    pub fn with_baud_change(mut self, baud: Option<u32>) -> Self {
        self.baud_change = baud;
        self
    }
}

/// Where the handshake is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    /// Not started.
    #[default]
    Idle,
    /// Reset done, sending SYNC.
    Probing,
    /// The camera answered.
    Synced,
    /// Attempts exhausted.
    Failed,
}

/// One SYNC attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// When the SYNC went out, on the handshake's clock.
    pub sent_at: Duration,
    /// Spacing scheduled before the next attempt.
    pub delay: Duration,
    /// Bytes received in reply.
    pub response_len: usize,
    /// Whether the reply was accepted.
    pub matched: bool,
}

/// Outcome of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReport {
    /// Attempt that succeeded.
    pub attempts: u32,
    /// Accepted reply.
    pub reply: Vec<u8>,
    /// Link baud rate after the handshake.
    pub baud: u32,
}

/// The SYNC/SYNC-ACK state machine.
#[derive(Debug, Clone, Default)]
pub struct SyncHandshake {
    config: HandshakeConfig,
    state: HandshakeState,
    history: Vec<AttemptRecord>,
}

impl SyncHandshake {
    /// Create an idle handshake.
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            config,
            state: HandshakeState::Idle,
            history: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Attempts made by the last run.
    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    /// Reset the camera and send SYNC until it answers.
    pub fn run<L, C, R>(
        &mut self,
        channel: &mut CommandChannel<L, C>,
        reset: &mut R,
    ) -> Result<HandshakeReport>
    where
        L: ChipLink,
        C: Clock,
        R: ResetLine + ?Sized,
    {
        self.history.clear();
        self.state = HandshakeState::Probing;

        pulse_reset(reset, channel.frames().clock(), self.config.reset_hold)?;
        channel.frames().clock().sleep(self.config.settle);

        match self.attempt_sync(channel) {
            Ok(reply) => {
                self.state = HandshakeState::Synced;
                let baud = self.finish(channel)?;
                Ok(HandshakeReport {
                    attempts: self.history.len() as u32,
                    reply,
                    baud,
                })
            },
            Err(e) => {
                self.state = HandshakeState::Failed;
                Err(e)
            },
        }
    }

    fn attempt_sync<L: ChipLink, C: Clock>(&mut self, channel: &mut CommandChannel<L, C>) -> Result<Vec<u8>> {
        let cfg = self.config;
        let mut delay = cfg.initial_delay;
        let mut next_attempt = channel.frames().clock().now();

        for attempt in 1..=cfg.max_attempts {
            let frames = channel.frames_mut();
            frames.cancel_token().check()?;
            frames.clock().sleep_until(next_attempt);

            let sent_at = frames.clock().now();
            next_attempt = sent_at + delay;
            frames.clear()?;
            channel.send_frame(&Command::sync())?;

            let frames = channel.frames_mut();
            frames.wait_for(cfg.check.reply_len(), cfg.response_wait)?;
            let reply = frames.recv()?;
            let matched = cfg.check.accepts(&reply);

            self.history.push(AttemptRecord {
                attempt,
                sent_at,
                delay,
                response_len: reply.len(),
                matched,
            });

            if matched {
                info!("Camera synced on attempt {attempt}");
                return Ok(reply);
            }
            if reply.is_empty() {
                debug!("SYNC attempt {attempt}: no reply");
            } else {
                debug!("SYNC attempt {attempt}: rejected reply {}", hex(&reply));
            }
            delay += cfg.delay_step;
        }

        warn!("Camera did not answer {} SYNC attempts", cfg.max_attempts);
        Err(Error::HandshakeFailed {
            attempts: cfg.max_attempts,
        })
    }

    /// Confirm the sync and apply the optional baud change.
    fn finish<L: ChipLink, C: Clock>(&self, channel: &mut CommandChannel<L, C>) -> Result<u32> {
        channel.send_frame(&Command::sync_ack())?;

        if let Some(baud) = self.config.baud_change {
            let cmd = Command::set_baud_rate(baud)?;
            channel.frames().clock().sleep(self.config.command_delay);
            channel.send_command_after(&cmd, self.config.command_delay)?;
            channel.frames_mut().link_mut().configure(baud)?;
            channel.frames().clock().sleep(self.config.baud_settle);
            info!("Switched to {baud} baud");
        }
        Ok(channel.frames().link().baud())
    }
}
