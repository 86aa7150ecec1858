//! Recovery of logical offsets from the 16-bit wire counters.
//!
//! Offsets advance in 255-byte segments while the counters wrap at 65536.
//! Because `65536 mod 255 == 1`, every wrap shifts the segment alignment by
//! one byte, so the number of wraps a counter went through can be read off
//! its remainder modulo 255. This identifies a segment uniquely within a
//! cycle of 65536 segments; beyond that the candidate nearest to the last
//! known offset of the session is chosen.

use tracing::debug;

use super::config::SEGMENT_SIZE;

const WIRE_CYCLE: u64 = 1 << 16;
const SEGMENT: u64 = SEGMENT_SIZE as u64;

/// Segment indices repeat after this many segments (255 * 65536 bytes).
pub const INDEX_PERIOD: u64 = 1 << 16;

/// Segment index, within the current alignment cycle, of the segment whose
/// wire counter reads `wire`.
pub fn index_in_cycle(wire: u16) -> u64 {
    let seq = u64::from(wire);
    let rem = seq % SEGMENT;
    if rem == 0 {
        seq / SEGMENT
    } else {
        // `pad` is the number of wraps folded into the counter
        let pad = SEGMENT - rem;
        (pad * WIRE_CYCLE + seq + pad) / SEGMENT
    }
}

/// Per-session reconstruction state, shared by both transfer directions.
#[derive(Debug, Default, Clone)]
pub struct SequenceReconstructor {
    overflow_count: u64,
    last_offset: u64,
}

impl SequenceReconstructor {
    pub fn new() -> SequenceReconstructor {
        SequenceReconstructor::default()
    }

    /// Number of wire-counter wraps observed so far.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn last_offset(&self) -> u64 {
        self.last_offset
    }

    /// Record the latest offset the session has settled on (the cumulative
    /// ack when receiving, the window start when sending). Never moves back.
    pub fn advance(&mut self, offset: u64) {
        if offset <= self.last_offset {
            return;
        }
        self.last_offset = offset;
        let wraps = offset / WIRE_CYCLE;
        if wraps > self.overflow_count {
            debug!(wraps, offset, "wire counter wrapped");
            self.overflow_count = wraps;
        }
    }

    /// Logical segment index of a segment-aligned wire counter.
    pub fn segment_index(&self, wire: u16) -> u64 {
        let base = index_in_cycle(wire);
        let floor = (self.last_offset / SEGMENT).saturating_sub(INDEX_PERIOD / 2);
        let cycles = floor.saturating_sub(base).div_ceil(INDEX_PERIOD);
        base + cycles * INDEX_PERIOD
    }

    /// Logical byte offset of a segment-aligned wire counter.
    pub fn byte_offset(&self, wire: u16) -> u64 {
        self.segment_index(wire) * SEGMENT
    }
}

/// Wire representation of a logical offset.
pub fn to_wire(offset: u64) -> u16 {
    (offset % WIRE_CYCLE) as u16
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn wire_of_segment(index: u64) -> u16 {
        to_wire(index * SEGMENT)
    }

    #[test]
    fn first_segments_need_no_correction() {
        assert_eq!(index_in_cycle(0), 0);
        assert_eq!(index_in_cycle(255), 1);
        assert_eq!(index_in_cycle(510), 2);
    }

    #[test]
    fn segments_around_the_first_wrap() {
        // 257 * 255 = 65535 is the last aligned offset before the wrap
        assert_eq!(index_in_cycle(65535), 257);
        // 258 * 255 = 65790 -> 254 on the wire
        assert_eq!(index_in_cycle(254), 258);
        assert_eq!(index_in_cycle(wire_of_segment(259)), 259);
    }

    #[test]
    fn whole_cycle_is_recovered() {
        for index in 0..INDEX_PERIOD {
            assert_eq!(index_in_cycle(wire_of_segment(index)), index, "segment {index}");
        }
    }

    #[test]
    fn streaming_across_several_cycles() {
        let mut reconstructor = SequenceReconstructor::new();
        let last = 3 * INDEX_PERIOD + 1000;
        for index in 0..last {
            assert_eq!(reconstructor.segment_index(wire_of_segment(index)), index);
            reconstructor.advance(index * SEGMENT);
        }
        assert_eq!(reconstructor.overflow_count(), ((last - 1) * SEGMENT) / WIRE_CYCLE);
    }

    #[test]
    fn reordered_arrivals_near_the_reference() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut reconstructor = SequenceReconstructor::new();
        for step in 0..200_000u64 {
            let reference = step * 3;
            reconstructor.advance(reference * SEGMENT);
            // late retransmissions and segments still ahead in the window
            let index = (reference + rng.gen_range(0..24)).saturating_sub(12);
            assert_eq!(reconstructor.segment_index(wire_of_segment(index)), index);
        }
    }

    #[test]
    fn byte_offset_of_aligned_acks() {
        let mut reconstructor = SequenceReconstructor::new();
        for offset in (0..2_000_000u64).step_by(SEGMENT as usize) {
            assert_eq!(reconstructor.byte_offset(to_wire(offset)), offset);
            reconstructor.advance(offset);
        }
    }

    #[test]
    fn advance_never_moves_back() {
        let mut reconstructor = SequenceReconstructor::new();
        reconstructor.advance(70_000);
        reconstructor.advance(10);
        assert_eq!(reconstructor.last_offset(), 70_000);
        assert_eq!(reconstructor.overflow_count(), 1);
    }
}
