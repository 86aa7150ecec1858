//! Sending side of a transfer: fixed-width window, duplicate-ack fast
//! retransmit and whole-window retransmission on timeout. The client runs
//! it for firmware uploads, the device emulator for photo downloads.

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::config::SEGMENT_SIZE;
use crate::protocol::connection::state::SessionEvent;
use crate::protocol::connection::Link;
use crate::protocol::packets::Packet;
use crate::protocol::sequence::{to_wire, SequenceReconstructor};
use crate::protocol::teardown;
use crate::protocol::transport::Transport;

const SEGMENT: u64 = SEGMENT_SIZE as u64;
const WIRE_CYCLE: u64 = 1 << 16;

/// What the sender has to do after an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    /// Behind the window or beyond the data; nothing to do.
    Ignored,
    /// Transmit the chunks starting inside `[from, to)`.
    Send { from: u64, to: u64 },
    /// First repeat of an ack, packets are probably still in flight.
    Wait,
    /// Repeated duplicate: resend the single chunk at `offset`.
    FastRetransmit { offset: u64 },
}

/// Byte range `[start, end)` that may be in flight, plus the duplicate-ack
/// bookkeeping. `start` only moves forward.
#[derive(Debug, Clone)]
pub struct SendWindow {
    start: u64,
    end: u64,
    width: u64,
    limit: u64,
    prev_ack: Option<u64>,
    ack_count: u32,
}

impl SendWindow {
    /// Window of `width` bytes over a payload of `limit` bytes.
    pub fn new(width: u64, limit: u64) -> SendWindow {
        SendWindow {
            start: 0,
            end: width,
            width,
            limit,
            prev_ack: None,
            ack_count: 0,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    fn slide_to(&mut self, offset: u64) {
        self.start = offset.max(self.start);
        self.end = self.start + self.width;
    }

    pub fn on_ack(&mut self, ack: u64) -> AckAction {
        if ack < self.start || ack > self.limit {
            return AckAction::Ignored;
        }
        if self.prev_ack == Some(ack) {
            self.ack_count += 1;
        } else {
            self.ack_count = 0;
            self.prev_ack = Some(ack);
        }

        match self.ack_count {
            0 if ack > self.end => {
                self.slide_to(ack);
                AckAction::Send { from: self.start, to: self.end }
            }
            0 => {
                // the ack consumed data already inside the window; only the
                // newly exposed tail is sent
                let exposed = self.end;
                self.slide_to(ack);
                AckAction::Send { from: exposed, to: self.end }
            }
            1 => AckAction::Wait,
            _ => AckAction::FastRetransmit { offset: self.start },
        }
    }
}

enum Progress {
    Acked,
    Ignored,
    TimedOut,
}

pub struct SendSession<'a, T> {
    link: &'a mut Link<T>,
    data: &'a [u8],
    window: SendWindow,
    reconstructor: SequenceReconstructor,
    // offset of the short chunk that ends the transfer
    final_offset: u64,
    sent_final: bool,
    complete: bool,
}

impl<'a, T: Transport> SendSession<'a, T> {
    pub fn new(link: &'a mut Link<T>, data: &'a [u8]) -> SendSession<'a, T> {
        let total = data.len() as u64;
        let window = SendWindow::new(link.config().window_bytes(), total);
        SendSession {
            link,
            data,
            window,
            reconstructor: SequenceReconstructor::new(),
            final_offset: total / SEGMENT * SEGMENT,
            sent_final: false,
            complete: false,
        }
    }

    pub fn window(&self) -> &SendWindow {
        &self.window
    }

    /**
     * Push the whole payload, then close with the confirming FIN exchange
     */
    pub fn run(mut self) -> Result<()> {
        self.link.transition(SessionEvent::DataStarted)?;
        let (from, to) = (self.window.start(), self.window.end());
        self.send_range(from, to, false)?;

        let max_retries = self.link.config().max_retries;
        let mut failures = 0;
        while !self.complete {
            match self.step() {
                Ok(Progress::Acked) => failures = 0,
                Ok(Progress::Ignored) => {}
                Ok(Progress::TimedOut) => failures += 1,
                Err(Error::Io(e)) => {
                    warn!(error = %e, "transient I/O failure while sending");
                    failures += 1;
                }
                Err(e) => return Err(e),
            }
            if failures >= max_retries {
                return Err(Error::RetriesExhausted { phase: "sending data", attempts: failures });
            }
        }

        self.link.transition(SessionEvent::DataFinished)?;
        let total = self.data.len() as u64;
        teardown::close(self.link, total)?;
        info!(bytes = total, stats = ?self.link.stats(), "transfer sent");
        Ok(())
    }

    fn step(&mut self) -> Result<Progress> {
        let timeout = self.link.config().ack_timeout;
        let Some(packet) = self.link.recv(Some(timeout))? else {
            self.link.stats_mut().timeouts += 1;
            warn!(start = self.window.start(), "ack timeout, resending the window");
            let (from, to) = (self.window.start(), self.window.end());
            self.send_range(from, to, true)?;
            return Ok(Progress::TimedOut);
        };
        if packet.is_fin() {
            debug!("FIN before the data was acknowledged, ignored");
            return Ok(Progress::Ignored);
        }

        let ack = self.reconstruct(packet.get_acked());
        let action = self.window.on_ack(ack);
        debug!(ack, ?action, start = self.window.start(), end = self.window.end(), "ack");
        match action {
            AckAction::Ignored => return Ok(Progress::Ignored),
            AckAction::Send { from, to } => self.send_range(from, to, false)?,
            AckAction::Wait => self.link.stats_mut().duplicate_acks += 1,
            AckAction::FastRetransmit { offset } => {
                let stats = self.link.stats_mut();
                stats.duplicate_acks += 1;
                stats.fast_retransmits += 1;
                stats.retransmissions += 1;
                self.send_chunk(offset)?;
            }
        }
        self.reconstructor.advance(self.window.start());

        if self.sent_final && ack == self.data.len() as u64 {
            self.complete = true;
        }
        Ok(Progress::Acked)
    }

    /// The final ack equals the payload length, which is usually not
    /// segment aligned; every other ack goes through the reconstructor.
    fn reconstruct(&self, wire: u16) -> u64 {
        let total = self.data.len() as u64;
        if wire == to_wire(total) && total.saturating_sub(self.window.start()) < WIRE_CYCLE {
            total
        } else {
            self.reconstructor.byte_offset(wire)
        }
    }

    fn send_range(&mut self, from: u64, to: u64, again: bool) -> Result<()> {
        let mut offset = from.div_ceil(SEGMENT) * SEGMENT;
        while offset < to && offset <= self.final_offset {
            self.send_chunk(offset)?;
            if again {
                self.link.stats_mut().retransmissions += 1;
            }
            offset += SEGMENT;
        }
        Ok(())
    }

    fn send_chunk(&mut self, offset: u64) -> Result<()> {
        let begin = offset as usize;
        let end = (begin + SEGMENT_SIZE).min(self.data.len());
        let content = self.data[begin..end].to_vec();
        if content.len() < SEGMENT_SIZE && !self.sent_final {
            debug!(offset, size = content.len(), "final chunk transmitted");
            self.sent_final = true;
        }
        let connection_id = self.link.connection_id();
        self.link.send(&Packet::new_data(connection_id, to_wire(offset), content))
    }
}
