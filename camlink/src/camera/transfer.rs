//! Multi-round picture download.
//!
//! A round asks for the picture size, then requests packets one index at
//! a time and records every packet received, valid or not. Rounds repeat
//! until each index has been seen valid at least once or the round limit
//! is hit. History is never overwritten: all observations for an index
//! are kept so failures can be compared against a good copy afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, info, warn};

use crate::camera::command::CommandChannel;
use crate::error::{Error, Result};
use crate::link::ChipLink;
use crate::poll::Clock;
use crate::protocol::frame::{Command, PictureKind, picture_size};
use crate::protocol::hex_preview;
use crate::protocol::localize::{Region, localize};
use crate::protocol::packet::{Packet, PacketFault, TransferLayout};

/// Which indices a retry round requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum RetryMode {
    /// Every index, every round.
    #[default]
    FullSweep,
    /// After the first round, only indices never seen valid.
    FailedOnly,
}

/// Transfer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Packet size negotiated with the camera, framing included.
    pub package_size: u16,
    /// Maximum rounds.
    pub max_rounds: u32,
    /// Pause before each round's GET PICTURE.
    pub round_delay: Duration,
    /// Pause between a request and reading its reply.
    pub request_settle: Duration,
    /// How long to wait for a requested packet to start arriving.
    pub packet_wait: Duration,
    /// Retry strategy.
    pub retry: RetryMode,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            package_size: 512,
            max_rounds: 5,
            round_delay: Duration::from_secs(2),
            request_settle: Duration::from_micros(100),
            packet_wait: Duration::from_secs(1),
            retry: RetryMode::default(),
        }
    }
}

impl TransferConfig {
    /// Set the packet size.
    #[must_use]
    pub fn with_package_size(mut self, package_size: u16) -> Self {
        self.package_size = package_size;
        self
    }

    /// Set the round limit.
    #[must_use]
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Set the retry strategy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryMode) -> Self {
        self.retry = retry;
        self
    }
}

/// One packet as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Round it arrived in (from 1).
    pub round: u32,
    /// Why it was rejected; `None` when valid.
    pub fault: Option<PacketFault>,
    /// Bytes as received.
    pub raw: Vec<u8>,
}

impl Observation {
    /// Whether the packet validated.
    pub fn is_valid(&self) -> bool {
        self.fault.is_none()
    }
}

/// Localization of one rejected observation against a good one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDiagnosis {
    /// Round of the rejected observation.
    pub round: u32,
    /// Why it was rejected.
    pub fault: PacketFault,
    /// Where it diverges from the good packet.
    pub regions: Vec<Region>,
}

/// Diagnostics for one packet index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    /// Packet id.
    pub id: u16,
    /// Good packet used as reference.
    pub good: Vec<u8>,
    /// One entry per rejected observation.
    pub variants: Vec<VariantDiagnosis>,
}

/// Everything observed while downloading one picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    layout: TransferLayout,
    rounds: u32,
    history: BTreeMap<u16, Vec<Observation>>,
}

impl TransferSession {
    /// Empty session for `layout`.
    pub fn new(layout: TransferLayout) -> Self {
        Self {
            layout,
            rounds: 0,
            history: BTreeMap::new(),
        }
    }

    /// Packet layout.
    pub fn layout(&self) -> &TransferLayout {
        &self.layout
    }

    /// Rounds started so far.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Record packet `id` as received in the current round.
    pub fn record(&mut self, id: u16, raw: Vec<u8>, fault: Option<PacketFault>) {
        self.history.entry(id).or_default().push(Observation {
            round: self.rounds,
            fault,
            raw,
        });
    }

    /// All observations of packet `id`, oldest first.
    pub fn observations(&self, id: u16) -> &[Observation] {
        self.history.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether packet `id` has been seen valid at least once.
    pub fn is_valid(&self, id: u16) -> bool {
        self.observations(id).iter().any(Observation::is_valid)
    }

    /// Packets with at least one valid observation.
    pub fn valid_count(&self) -> usize {
        self.layout.ids().filter(|id| self.is_valid(*id)).count()
    }

    /// Packets never seen valid, in order.
    pub fn missing(&self) -> Vec<u16> {
        self.layout.ids().filter(|id| !self.is_valid(*id)).collect()
    }

    /// Whether every packet has been seen valid.
    pub fn is_complete(&self) -> bool {
        self.layout.ids().all(|id| self.is_valid(id))
    }

    /// Concatenate the first valid payload of every packet.
    pub fn assemble(&self) -> Result<Vec<u8>> {
        let mut image = Vec::with_capacity(self.layout.image_size() as usize);
        for id in self.layout.ids() {
            let good = self
                .observations(id)
                .iter()
                .find(|o| o.is_valid())
                .ok_or_else(|| Error::Protocol(format!("packet {id} never arrived intact")))?;
            let packet = Packet::parse(&good.raw)?;
            image.extend_from_slice(packet.payload());
        }
        Ok(image)
    }

    /// Localize every rejected observation of packets that also have a
    /// valid one. The latest valid observation is the reference.
    pub fn diagnose(&self) -> Vec<Diagnosis> {
        let mut out = Vec::new();
        for (&id, observations) in &self.history {
            let Some(good) = observations.iter().rev().find(|o| o.is_valid()) else {
                continue;
            };
            let variants: Vec<VariantDiagnosis> = observations
                .iter()
                .filter_map(|o| {
                    o.fault.clone().map(|fault| VariantDiagnosis {
                        round: o.round,
                        fault,
                        regions: localize(&good.raw, &o.raw),
                    })
                })
                .collect();
            if !variants.is_empty() {
                out.push(Diagnosis {
                    id,
                    good: good.raw.clone(),
                    variants,
                });
            }
        }
        out
    }
}

/// Runs download rounds over a command channel.
pub struct PacketTransfer<'a, L: ChipLink, C: Clock> {
    channel: &'a mut CommandChannel<L, C>,
    config: TransferConfig,
}

impl<'a, L: ChipLink, C: Clock> PacketTransfer<'a, L, C> {
    /// Create a transfer over `channel`.
    pub fn new(channel: &'a mut CommandChannel<L, C>, config: TransferConfig) -> Self {
        Self { channel, config }
    }

    /// Download until complete or out of rounds.
    ///
    /// `progress` gets `(packets_valid, packets_total)` after every packet.
    /// Exhausting the rounds returns [`Error::SessionExhausted`] carrying
    /// the whole session. Once a session exists, a picture request that
    /// goes unanswered or is malformed uses up its round instead of
    /// dropping the session.
    pub fn run(&mut self, mut progress: impl FnMut(usize, usize)) -> Result<TransferSession> {
        if self.config.max_rounds == 0 {
            return Err(Error::Config("max_rounds must be at least 1".into()));
        }

        let mut session: Option<TransferSession> = None;
        for round in 1..=self.config.max_rounds {
            self.channel.frames().cancel_token().check()?;
            self.channel.frames().clock().sleep(self.config.round_delay);

            let layout = match self.request_picture() {
                Ok(layout) => layout,
                Err(e @ (Error::EmptyResponse(_) | Error::BadAck { .. } | Error::Protocol(_)))
                    if session.is_some() =>
                {
                    warn!("Round {round}: picture request failed, skipping round: {e}");
                    if let Some(s) = session.as_mut() {
                        s.rounds = round;
                    }
                    continue;
                },
                Err(e) => return Err(e),
            };
            let current = match session.take() {
                Some(s) if *s.layout() == layout => s,
                Some(s) => {
                    warn!(
                        "Picture size changed from {} to {} bytes; starting over",
                        s.layout().image_size(),
                        layout.image_size()
                    );
                    TransferSession::new(layout)
                },
                None => TransferSession::new(layout),
            };
            let current = session.insert(current);
            current.rounds = round;

            let ids: Vec<u16> = match self.config.retry {
                RetryMode::FailedOnly => current.missing(),
                RetryMode::FullSweep => layout.ids().collect(),
            };
            let total = usize::from(layout.package_count());

            for id in ids {
                let raw = self.fetch_packet(id)?;
                let fault = if raw.is_empty() {
                    Some(PacketFault::NoResponse)
                } else {
                    Packet::validate(&raw, id, layout.expected_len(id)).err()
                };
                match &fault {
                    None => debug!("Packet {id}/{total}: good"),
                    Some(fault) => warn!(
                        "Packet {id}/{total}: {fault} [{}]",
                        hex_preview(&raw, 10)
                    ),
                }
                current.record(id, raw, fault);
                progress(current.valid_count(), total);
            }

            self.channel.send_frame(&Command::transfer_done())?;
            info!(
                "Round {round}: {}/{total} packets valid",
                current.valid_count()
            );

            if current.is_complete() {
                return session.ok_or_else(|| Error::Protocol("transfer session lost".into()));
            }
        }

        let session = session.ok_or_else(|| Error::Protocol("transfer session lost".into()))?;
        Err(Error::SessionExhausted {
            rounds: self.config.max_rounds,
            missing: session.missing(),
            session: Box::new(session),
        })
    }

    fn request_picture(&mut self) -> Result<TransferLayout> {
        let ack = self
            .channel
            .send_command_after(&Command::get_picture(PictureKind::Snapshot), self.config.request_settle)?;
        let size = picture_size(ack.bytes())?;
        let layout = TransferLayout::new(size, self.config.package_size)?;
        info!(
            "Picture size: {size} bytes in {} packets",
            layout.package_count()
        );
        Ok(layout)
    }

    fn fetch_packet(&mut self, id: u16) -> Result<Vec<u8>> {
        let frames = self.channel.frames_mut();
        frames.cancel_token().check()?;
        frames.clear()?;
        self.channel.send_frame(&Command::ack_package(id - 1))?;
        let frames = self.channel.frames_mut();
        frames.clock().sleep(self.config.request_settle);
        frames.recv_within(self.config.packet_wait)
    }
}
