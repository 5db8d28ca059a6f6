//! Receive-side framing on top of a [`ChipLink`].
//!
//! The camera gives no length prefix for most replies, so a response is
//! "everything that arrives until the line goes quiet". [`FrameBuffer`]
//! implements that drain plus the bounded waits built on it. Every loop
//! here checks the [`CancelToken`] and goes through the [`Clock`].

use std::time::Duration;

use log::trace;

use crate::error::{Error, Result};
use crate::link::ChipLink;
use crate::poll::{CancelToken, Clock, PollPolicy};
use crate::protocol::{hex, hex_preview};

/// Longest dump logged for a single read.
const TRACE_PREVIEW: usize = 12;

/// A link plus the timing used to talk over it.
pub struct FrameBuffer<L: ChipLink, C: Clock> {
    link: L,
    clock: C,
    policy: PollPolicy,
    cancel: CancelToken,
}

impl<L: ChipLink, C: Clock> FrameBuffer<L, C> {
    /// Wrap `link`.
    pub fn new(link: L, clock: C, policy: PollPolicy) -> Self {
        Self {
            link,
            clock,
            policy,
            cancel: CancelToken::new(),
        }
    }

    /// Use `cancel` for every subsequent poll.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// The underlying link, mutably (for reconfiguration).
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// The clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Polling policy.
    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Cancellation token.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Give the link back.
    pub fn into_link(self) -> L {
        self.link
    }

    /// Write `data` to the link.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.cancel.check()?;
        trace!("Write: {:03} : {}", data.len(), hex(data));
        self.link.write(data)
    }

    /// Bytes waiting right now.
    pub fn available(&mut self) -> Result<usize> {
        self.link.bytes_available()
    }

    /// Discard anything received so far.
    pub fn clear(&mut self) -> Result<()> {
        self.link.clear()
    }

    /// Drain everything currently arriving, pausing `byte_pause` after
    /// each byte, until a read comes back empty. Returns what was read,
    /// possibly nothing.
    ///
    /// Fails with [`Error::Timeout`] if bytes are still arriving after
    /// `max_wait`.
    pub fn recv(&mut self) -> Result<Vec<u8>> {
        let started = self.clock.now();
        let mut out = Vec::new();
        loop {
            self.cancel.check()?;
            let Some(byte) = self.link.read_byte()? else {
                break;
            };
            out.push(byte);
            if self.clock.now() - started > self.policy.max_wait {
                return Err(Error::Timeout(format!(
                    "line still busy after {:?} ({} bytes read)",
                    self.policy.max_wait,
                    out.len()
                )));
            }
            self.clock.sleep(self.policy.byte_pause);
        }
        if !out.is_empty() {
            trace!(
                "Read:  {:03} : {}",
                out.len(),
                hex_preview(&out, TRACE_PREVIEW)
            );
        }
        Ok(out)
    }

    /// Poll until at least `n` bytes are waiting or `within` has passed.
    /// Returns the number of bytes waiting at the end.
    pub fn wait_for(&mut self, n: usize, within: Duration) -> Result<usize> {
        let deadline = self.clock.now() + within;
        loop {
            self.cancel.check()?;
            let available = self.link.bytes_available()?;
            if available >= n || self.clock.now() >= deadline {
                return Ok(available);
            }
            self.clock.sleep(self.policy.interval);
        }
    }

    /// Wait up to `within` for the first byte, then drain.
    pub fn recv_within(&mut self, within: Duration) -> Result<Vec<u8>> {
        if self.wait_for(1, within)? == 0 {
            return Ok(Vec::new());
        }
        self.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::{ManualClock, ScriptedLink};

    struct Babbler;

    impl ChipLink for Babbler {
        fn configure(&mut self, _baud: u32) -> Result<()> {
            Ok(())
        }

        fn baud(&self) -> u32 {
            9600
        }

        fn write(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn bytes_available(&mut self) -> Result<usize> {
            Ok(1)
        }

        fn read_byte(&mut self) -> Result<Option<u8>> {
            Ok(Some(0x55))
        }

        fn miss_count(&self) -> u64 {
            0
        }

        fn clear(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn policy() -> PollPolicy {
        PollPolicy::default()
            .with_interval(Duration::from_micros(200))
            .with_byte_pause(Duration::from_micros(50))
            .with_max_wait(Duration::from_millis(10))
    }

    #[test]
    fn test_recv_drains_until_quiet() {
        let clock = ManualClock::new();
        let mut link = ScriptedLink::silent();
        link.inject(&[1, 2, 3, 4]);
        let mut fb = FrameBuffer::new(link, &clock, policy());

        assert_eq!(fb.recv().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(fb.recv().unwrap(), Vec::<u8>::new());
        assert_eq!(clock.now(), Duration::from_micros(200));
    }

    #[test]
    fn test_send_reaches_link_and_collects_reply() {
        let clock = ManualClock::new();
        let mut fb = FrameBuffer::new(ScriptedLink::echo(), &clock, policy());
        fb.send(&[0xAA, 0x0D]).unwrap();
        assert_eq!(fb.available().unwrap(), 2);
        assert_eq!(fb.recv().unwrap(), vec![0xAA, 0x0D]);
        assert_eq!(fb.link().frames, vec![vec![0xAA, 0x0D]]);
    }

    #[test]
    fn test_recv_times_out_on_endless_stream() {
        let clock = ManualClock::new();
        let mut fb = FrameBuffer::new(Babbler, &clock, policy());
        assert!(matches!(fb.recv(), Err(Error::Timeout(_))));
        assert!(clock.now() > Duration::from_millis(10));
    }

    #[test]
    fn test_wait_for_gives_up_at_deadline() {
        let clock = ManualClock::new();
        let mut fb = FrameBuffer::new(ScriptedLink::silent(), &clock, policy());
        assert_eq!(fb.wait_for(6, Duration::from_millis(3)).unwrap(), 0);
        assert_eq!(clock.now(), Duration::from_millis(3));
        assert_eq!(fb.recv_within(Duration::from_millis(1)).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_wait_for_returns_early_when_enough_bytes() {
        let clock = ManualClock::new();
        let mut link = ScriptedLink::silent();
        link.inject(&[0; 6]);
        let mut fb = FrameBuffer::new(link, &clock, policy());
        assert_eq!(fb.wait_for(6, Duration::from_secs(1)).unwrap(), 6);
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn test_cancelled_buffer_refuses_io() {
        let clock = ManualClock::new();
        let cancel = CancelToken::new();
        let mut fb = FrameBuffer::new(ScriptedLink::echo(), &clock, policy()).with_cancel(cancel.clone());
        cancel.cancel();
        assert!(matches!(fb.send(&[1]), Err(Error::Cancelled)));
        assert!(matches!(fb.recv(), Err(Error::Cancelled)));
        assert!(fb.link().frames.is_empty());
    }
}
