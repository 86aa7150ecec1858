//! Receiving side of a transfer: out-of-order reassembly and cumulative
//! acknowledgments. The client runs it for photo downloads, the device
//! emulator for firmware uploads.

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::config::SEGMENT_SIZE;
use crate::protocol::connection::state::{SessionEvent, SessionState};
use crate::protocol::connection::Link;
use crate::protocol::packets::Packet;
use crate::protocol::sequence::{to_wire, SequenceReconstructor};
use crate::protocol::teardown;
use crate::protocol::transport::Transport;

/// Segment payloads indexed by logical segment index. A `None` slot is a
/// hole; slots are never removed.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    segments: Vec<Option<Vec<u8>>>,
    // contiguous prefix of present segments and its length in bytes
    acked_segments: usize,
    acked_bytes: u64,
    // index of the first segment shorter than a full one
    end_index: Option<usize>,
}

impl ReceiveBuffer {
    pub fn new() -> ReceiveBuffer {
        ReceiveBuffer::default()
    }

    /// Store the payload of segment `index`. Returns false when the slot
    /// was already filled or the segment lies past the end of the transfer.
    pub fn insert(&mut self, index: usize, payload: Vec<u8>) -> bool {
        if matches!(self.end_index, Some(end) if index > end) {
            return false;
        }
        if index >= self.segments.len() {
            self.segments.resize_with(index + 1, || None);
        }
        if self.segments[index].is_some() {
            return false;
        }
        if payload.len() < SEGMENT_SIZE {
            self.end_index = Some(index);
        }
        self.segments[index] = Some(payload);

        while let Some(Some(segment)) = self.segments.get(self.acked_segments) {
            self.acked_bytes += segment.len() as u64;
            self.acked_segments += 1;
        }
        true
    }

    /// Bytes received without a hole from the start of the transfer.
    pub fn cumulative_ack(&self) -> u64 {
        self.acked_bytes
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_present(&self, index: usize) -> bool {
        matches!(self.segments.get(index), Some(Some(_)))
    }

    /// True once the short final segment and everything before it arrived.
    pub fn is_complete(&self) -> bool {
        self.end_index.is_some_and(|end| self.acked_segments > end)
    }

    /// Holes among the slots known so far.
    pub fn missing(&self) -> usize {
        self.segments.iter().filter(|slot| slot.is_none()).count()
    }

    /**
     * Concatenate all segments in index order
     */
    pub fn assemble(self) -> Result<Vec<u8>> {
        let missing = self.missing();
        if missing > 0 {
            return Err(Error::Incomplete { missing });
        }
        let mut data = Vec::with_capacity(self.acked_bytes as usize);
        for segment in self.segments.into_iter().flatten() {
            data.extend_from_slice(&segment);
        }
        Ok(data)
    }
}

pub struct ReceiveSession<'a, T> {
    link: &'a mut Link<T>,
    buffer: ReceiveBuffer,
    reconstructor: SequenceReconstructor,
}

impl<'a, T: Transport> ReceiveSession<'a, T> {
    pub fn new(link: &'a mut Link<T>) -> ReceiveSession<'a, T> {
        ReceiveSession {
            link,
            buffer: ReceiveBuffer::new(),
            reconstructor: SequenceReconstructor::new(),
        }
    }

    /**
     * Receive until the peer's FIN, answer it with the FIN burst and return
     * the reassembled payload
     */
    pub fn run(mut self) -> Result<Vec<u8>> {
        loop {
            let timeout = self.link.config().idle_timeout;
            let Some(packet) = self.link.recv(timeout)? else {
                return Err(Error::RetriesExhausted { phase: "waiting for data", attempts: 1 });
            };
            if packet.is_fin() {
                debug!(ack = self.buffer.cumulative_ack(), "peer finished sending");
                break;
            }
            if self.link.state() == SessionState::Established {
                self.link.transition(SessionEvent::DataStarted)?;
            }
            self.on_data(packet)?;
        }

        self.link.transition(SessionEvent::DataFinished)?;
        let ack = self.buffer.cumulative_ack();
        teardown::answer_fin(self.link, ack)?;

        let data = self.buffer.assemble()?;
        info!(bytes = data.len(), "transfer received");
        Ok(data)
    }

    fn on_data(&mut self, packet: Packet) -> Result<()> {
        if packet.get_size() > SEGMENT_SIZE {
            warn!(size = packet.get_size(), "oversized segment ignored");
            return Ok(());
        }
        let index = self.reconstructor.segment_index(packet.get_sequence()) as usize;
        if !self.buffer.insert(index, packet.into_content()) {
            debug!(index, "segment already held");
        }

        let ack = self.buffer.cumulative_ack();
        self.reconstructor.advance(ack);
        // acked even when unchanged: repeats drive the sender's fast retransmit
        let connection_id = self.link.connection_id();
        self.link.send(&Packet::new_ack(connection_id, to_wire(ack)))
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    use super::*;

    fn segments_of(data: &[u8]) -> Vec<Vec<u8>> {
        let mut segments: Vec<Vec<u8>> = data.chunks(SEGMENT_SIZE).map(<[u8]>::to_vec).collect();
        if data.len() % SEGMENT_SIZE == 0 {
            segments.push(Vec::new());
        }
        segments
    }

    #[test]
    fn in_order_segments_advance_ack() {
        let mut buffer = ReceiveBuffer::new();
        assert!(buffer.insert(0, vec![1; 255]));
        assert_eq!(buffer.cumulative_ack(), 255);
        assert!(buffer.insert(1, vec![2; 255]));
        assert!(buffer.insert(2, vec![3; 10]));
        assert_eq!(buffer.cumulative_ack(), 520);
        assert!(buffer.is_complete());
    }

    #[test]
    fn hole_holds_back_the_ack() {
        let mut buffer = ReceiveBuffer::new();
        buffer.insert(0, vec![0; 255]);
        buffer.insert(2, vec![0; 255]);
        buffer.insert(3, vec![0; 255]);
        assert_eq!(buffer.cumulative_ack(), 255);
        assert_eq!(buffer.len(), 4);
        assert!(!buffer.is_present(1));
        assert_eq!(buffer.missing(), 1);

        buffer.insert(1, vec![0; 255]);
        assert_eq!(buffer.cumulative_ack(), 4 * 255);
    }

    #[test]
    fn duplicate_keeps_first_copy() {
        let mut buffer = ReceiveBuffer::new();
        assert!(buffer.insert(0, vec![7; 255]));
        assert!(!buffer.insert(0, vec![9; 255]));
        buffer.insert(1, vec![1]);
        assert_eq!(buffer.assemble().unwrap()[0], 7);
    }

    #[test]
    fn segments_past_the_end_are_refused() {
        let mut buffer = ReceiveBuffer::new();
        buffer.insert(1, vec![0; 12]);
        assert!(!buffer.insert(5, vec![0; 255]));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn assemble_reports_holes() {
        let mut buffer = ReceiveBuffer::new();
        buffer.insert(3, vec![0; 4]);
        let err = buffer.assemble().unwrap_err();
        assert!(matches!(err, Error::Incomplete { missing: 3 }));
    }

    #[test]
    fn ack_is_monotonic_for_any_arrival_order() {
        let data: Vec<u8> = (0..9000u32).map(|i| (i % 251) as u8).collect();
        let segments = segments_of(&data);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let mut order: Vec<usize> = (0..segments.len()).collect();
            order.shuffle(&mut rng);
            let mut buffer = ReceiveBuffer::new();
            let mut last = 0;
            for &index in &order {
                buffer.insert(index, segments[index].clone());
                assert!(buffer.cumulative_ack() >= last);
                last = buffer.cumulative_ack();
            }
            assert_eq!(last, data.len() as u64);
        }
    }

    #[test]
    fn any_permutation_with_duplicates_reassembles() {
        let mut rng = StdRng::seed_from_u64(42);
        for len in [0usize, 1, 254, 255, 256, 510, 4321, 70_000] {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
            let segments = segments_of(&data);
            let mut order: Vec<usize> = (0..segments.len()).collect();
            let extra: Vec<usize> = order.iter().copied().filter(|i| i % 3 == 0).collect();
            order.extend(extra);
            order.shuffle(&mut rng);

            let mut buffer = ReceiveBuffer::new();
            for index in order {
                buffer.insert(index, segments[index].clone());
            }
            assert!(buffer.is_complete());
            assert_eq!(buffer.assemble().unwrap(), data, "length {len}");
        }
    }
}
