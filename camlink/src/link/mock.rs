//! Test doubles: a MAX3100 register model, a scripted link, a manual
//! clock and a simulated camera.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::error::Result;
use crate::link::max3100::reg;
use crate::link::spi::SpiBus;
use crate::link::{ChipLink, check_baud};
use crate::poll::Clock;
use crate::protocol::packet::{PACKET_OVERHEAD, Packet};

/// MAX3100 behind a fake SPI bus.
///
/// Bytes in `incoming` are what the UART has received from the far end.
/// With `deliver_on_write` they stay hidden until the first data word is
/// written, which models a reply arriving during a transmission.
#[derive(Debug, Default)]
pub(crate) struct FakeMax3100 {
    pub config_writes: Vec<u16>,
    pub transmitted: Vec<u8>,
    pub incoming: VecDeque<u8>,
    pub tx_busy_polls: u32,
    pub deliver_on_write: bool,
    pub fail: bool,
    written: bool,
}

impl FakeMax3100 {
    pub fn new() -> Self {
        Self::default()
    }

    fn withheld(&self) -> bool {
        self.deliver_on_write && !self.written
    }

    fn pop_incoming(&mut self) -> u16 {
        if self.withheld() {
            return 0;
        }
        match self.incoming.pop_front() {
            Some(byte) => reg::FLAG_R | u16::from(byte),
            None => 0,
        }
    }

    fn respond(&mut self, word: u16) -> u16 {
        match word & 0xC000 {
            reg::CMD_WRITE_CONF => {
                self.config_writes.push(word);
                0
            },
            reg::CMD_READ_CONF => {
                if !self.incoming.is_empty() && !self.withheld() {
                    reg::FLAG_R
                } else if self.tx_busy_polls > 0 {
                    self.tx_busy_polls = self.tx_busy_polls.saturating_sub(1);
                    0
                } else {
                    reg::FLAG_T
                }
            },
            reg::CMD_WRITE_DATA => {
                self.transmitted.push((word & 0xFF) as u8);
                self.written = true;
                self.pop_incoming()
            },
            _ => self.pop_incoming(),
        }
    }
}

impl SpiBus for FakeMax3100 {
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::other("SPI bus unavailable"));
        }
        let word = u16::from_be_bytes([write[0], write[1]]);
        let reply = self.respond(word).to_be_bytes();
        read.copy_from_slice(&reply);
        Ok(())
    }
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8>>;

/// In-memory link whose replies come from a closure called on every
/// `write` with the bytes written.
pub(crate) struct ScriptedLink {
    baud: u32,
    rx: VecDeque<u8>,
    responder: Responder,
    pub frames: Vec<Vec<u8>>,
    pub misses: u64,
}

impl ScriptedLink {
    pub fn new(responder: impl FnMut(&[u8]) -> Vec<u8> + 'static) -> Self {
        Self {
            baud: 9600,
            rx: VecDeque::new(),
            responder: Box::new(responder),
            frames: Vec::new(),
            misses: 0,
        }
    }

    /// A link that never answers.
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    /// A link that sends back whatever it is given.
    pub fn echo() -> Self {
        Self::new(|data| data.to_vec())
    }

    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// Everything written, flattened.
    pub fn written(&self) -> Vec<u8> {
        self.frames.concat()
    }
}

impl ChipLink for ScriptedLink {
    fn configure(&mut self, baud: u32) -> Result<()> {
        self.baud = check_baud(baud)?;
        Ok(())
    }

    fn baud(&self) -> u32 {
        self.baud
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.frames.push(data.to_vec());
        let reply = (self.responder)(data);
        self.rx.extend(reply);
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.rx.len())
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.rx.pop_front())
    }

    fn miss_count(&self) -> u64 {
        self.misses
    }

    fn clear(&mut self) -> Result<()> {
        self.rx.clear();
        Ok(())
    }
}

/// Clock that only moves when something sleeps on it.
#[derive(Debug, Default)]
pub(crate) struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }
}

type Corruptor = Box<dyn FnMut(u32, u16, &mut Vec<u8>)>;

/// Device-side model of the camera protocol.
///
/// `corrupt` is called with `(round, id, packet)` before each packet is
/// sent, where `round` counts GET PICTURE requests from 1. An entry
/// `(id, n)` in `muted` leaves the `n`-th receipt of command `id`
/// (counted from 1) unanswered.
pub(crate) struct FakeCamera {
    pub image: Vec<u8>,
    pub package_size: u16,
    pub sync_on_attempt: u32,
    pub short_sync_reply: bool,
    pub wrong_echo: Option<u8>,
    pub silent_commands: Vec<u8>,
    pub muted: Vec<(u8, u32)>,
    pub corrupt: Option<Corruptor>,
    pub syncs: u32,
    pub sync_acks: u32,
    pub commands: Vec<[u8; 6]>,
    pub requests: Vec<u16>,
    pub rounds: u32,
    pub done: u32,
    received: HashMap<u8, u32>,
}

impl FakeCamera {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            package_size: 64,
            sync_on_attempt: 1,
            short_sync_reply: false,
            wrong_echo: None,
            silent_commands: Vec::new(),
            muted: Vec::new(),
            corrupt: None,
            syncs: 0,
            sync_acks: 0,
            commands: Vec::new(),
            requests: Vec::new(),
            rounds: 0,
            done: 0,
            received: HashMap::new(),
        }
    }

    /// Wire the camera to a scripted link; the handle stays usable for
    /// inspection after the link is moved into a driver.
    pub fn attach(self) -> (ScriptedLink, Rc<RefCell<FakeCamera>>) {
        let camera = Rc::new(RefCell::new(self));
        let handle = Rc::clone(&camera);
        let link = ScriptedLink::new(move |frame| camera.borrow_mut().respond(frame));
        (link, handle)
    }

    fn ack(&self, id: u8) -> Vec<u8> {
        let echoed = self.wrong_echo.filter(|_| id != 0x0D).unwrap_or(id);
        vec![0xAA, 0x0E, echoed, 0x00, 0x00, 0x00]
    }

    fn packet(&mut self, id: u16) -> Vec<u8> {
        let capacity = usize::from(self.package_size) - PACKET_OVERHEAD;
        let start = (usize::from(id) - 1) * capacity;
        let end = (start + capacity).min(self.image.len());
        let mut raw = Packet::encode(id, &self.image[start.min(end)..end]).unwrap();
        let round = self.rounds;
        if let Some(corrupt) = self.corrupt.as_mut() {
            corrupt(round, id, &mut raw);
        }
        raw
    }

    pub fn respond(&mut self, frame: &[u8]) -> Vec<u8> {
        let Ok(frame) = <[u8; 6]>::try_from(frame) else {
            return Vec::new();
        };
        if frame[0] != 0xAA {
            return Vec::new();
        }
        let id = frame[1];
        if id != 0x0D && id != 0x0E {
            self.commands.push(frame);
        }
        let seen = self.received.entry(id).or_insert(0);
        *seen += 1;
        if self.silent_commands.contains(&id) || self.muted.contains(&(id, *seen)) {
            return Vec::new();
        }

        match id {
            0x0D => {
                self.syncs += 1;
                if self.sync_on_attempt == 0 || self.syncs < self.sync_on_attempt {
                    return Vec::new();
                }
                let mut reply = vec![0xAA, 0x0E, 0x0D, 0x00, 0x00, 0x00];
                if !self.short_sync_reply {
                    reply.extend([0xAA, 0x0D, 0x00, 0x00, 0x00, 0x00]);
                }
                reply
            },
            0x0E => match frame[2..] {
                [0x0D, ..] => {
                    self.sync_acks += 1;
                    Vec::new()
                },
                [0x00, 0x00, 0xF0, 0xF0] => {
                    self.done += 1;
                    Vec::new()
                },
                [0x00, 0x00, lo, hi] => {
                    let request = u16::from_le_bytes([lo, hi]);
                    self.requests.push(request);
                    self.packet(request + 1)
                },
                _ => Vec::new(),
            },
            0x04 => {
                self.rounds += 1;
                let size = (self.image.len() as u32).to_le_bytes();
                let mut reply = self.ack(id);
                reply.extend([0xAA, 0x0A, 0x01, size[0], size[1], size[2]]);
                reply
            },
            0x06 => {
                self.package_size = u16::from_le_bytes([frame[3], frame[4]]);
                self.ack(id)
            },
            _ => self.ack(id),
        }
    }
}
