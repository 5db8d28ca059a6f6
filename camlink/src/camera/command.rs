//! Command/acknowledge exchange.

use std::time::Duration;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::framebuf::FrameBuffer;
use crate::link::ChipLink;
use crate::poll::Clock;
use crate::protocol::frame::Command;
use crate::protocol::hex;

/// A validated acknowledgment, plus anything the camera sent after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    bytes: Vec<u8>,
}

impl Ack {
    /// Raw response bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the raw response bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Sends commands and checks their acknowledgments.
pub struct CommandChannel<L: ChipLink, C: Clock> {
    frames: FrameBuffer<L, C>,
    settle: Duration,
}

impl<L: ChipLink, C: Clock> CommandChannel<L, C> {
    /// Default pause between sending a command and reading its reply.
    pub const DEFAULT_SETTLE: Duration = Duration::from_micros(100);

    /// Create a channel over `frames`.
    pub fn new(frames: FrameBuffer<L, C>) -> Self {
        Self {
            frames,
            settle: Self::DEFAULT_SETTLE,
        }
    }

    /// Set the default settle delay.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// The frame buffer underneath.
    pub fn frames(&self) -> &FrameBuffer<L, C> {
        &self.frames
    }

    /// The frame buffer underneath, mutably.
    pub fn frames_mut(&mut self) -> &mut FrameBuffer<L, C> {
        &mut self.frames
    }

    /// Give the frame buffer back.
    pub fn into_frames(self) -> FrameBuffer<L, C> {
        self.frames
    }

    /// Send `cmd` without waiting for anything back.
    pub fn send_frame(&mut self, cmd: &Command) -> Result<()> {
        trace!("Sending {cmd}");
        self.frames.send(&cmd.to_bytes())
    }

    /// Send `cmd`, wait the default settle delay, and validate the reply.
    pub fn send_command(&mut self, cmd: &Command) -> Result<Ack> {
        self.send_command_after(cmd, self.settle)
    }

    /// Send `cmd`, wait `settle`, drain the reply and check that it starts
    /// with `AA 0E <cmd id>`.
    pub fn send_command_after(&mut self, cmd: &Command, settle: Duration) -> Result<Ack> {
        self.send_frame(cmd)?;
        self.frames.clock().sleep(settle);
        let response = self.frames.recv()?;

        if response.is_empty() {
            return Err(Error::EmptyResponse(cmd.to_string()));
        }
        if !cmd.is_acked_by(&response) {
            return Err(Error::BadAck {
                expected: hex(&cmd.expected_ack()),
                actual: hex(&response[..response.len().min(3)]),
            });
        }

        debug!("{:?} acknowledged", cmd.id());
        Ok(Ack { bytes: response })
    }
}
