//! A small, fully deterministic PRNG.
//!
//! This is not a general-purpose random number generator: it exists so that
//! a fuzzing run is bit-for-bit replayable from a seed. The state transition
//! below (a 32-bit linear congruential generator, Microsoft's classic
//! `rand()` constants) is part of the contract, not an implementation
//! detail — changing the multiplier, the addend, or which bits of the state
//! are returned breaks replay for anyone who saved a seed.

use std::ops::Range;

const MULTIPLIER: u32 = 214_013;
const ADDEND: u32 = 2_531_011;

/// Deterministic 32-bit LCG. `Rng::new(seed)` with the same seed always
/// produces the same stream (testable property 5 in the corpus this engine
/// maintains: "PRNG reproducibility").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rng {
    state: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Advances the state and returns the high 15 bits as the next draw.
    fn next15(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(MULTIPLIER).wrapping_add(ADDEND);
        (self.state >> 16) & 0x7FFF
    }

    /// Packs successive 15-bit draws MSB-first until at least `n` bits have
    /// been collected, then masks down to exactly `n` bits.
    fn bits(&mut self, n: u32) -> u64 {
        debug_assert!(n > 0 && n <= 64);
        let mut result: u64 = 0;
        let mut collected = 0u32;
        while collected < n {
            let draw = self.next15() as u64;
            result = (result << 15) | draw;
            collected += 15;
        }
        if n < 64 {
            result &= (1u64 << n) - 1;
        }
        result
    }

    /// Low bit of a 31-bit draw.
    pub fn bool(&mut self) -> bool {
        (self.bits(31) & 1) != 0
    }

    pub fn uint16(&mut self) -> u16 {
        self.bits(16) as u16
    }

    pub fn uint32(&mut self) -> u32 {
        self.bits(32) as u32
    }

    pub fn uint64(&mut self) -> u64 {
        self.bits(64)
    }

    /// `low + (uint64 mod (high - low))`. Panics if the range is empty —
    /// this is a programmer error, not a recoverable condition.
    pub fn int_in_range(&mut self, range: Range<u64>) -> u64 {
        assert!(range.start < range.end, "int_in_range: empty range {:?}", range);
        let span = range.end - range.start;
        range.start + (self.uint64() % span)
    }

    /// Draws `r = (uint64 mod total) + 1` and returns the smallest index `i`
    /// with `cumulative_weights[i] >= r`, found by binary search.
    ///
    /// `cumulative_weights` must be non-decreasing and non-empty; the last
    /// entry is the total weight.
    pub fn weighted_pick(&mut self, cumulative_weights: &[u64]) -> usize {
        assert!(!cumulative_weights.is_empty(), "weighted_pick: no weights to pick from");
        let total = *cumulative_weights.last().unwrap();
        assert!(total > 0, "weighted_pick: total weight is zero");
        let r = (self.uint64() % total) + 1;
        let mut lo = 0usize;
        let mut hi = cumulative_weights.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cumulative_weights[mid] >= r {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// Fisher–Yates shuffle, walking from the end towards the start.
    pub fn shuffle<T>(&mut self, seq: &mut [T]) {
        if seq.len() < 2 {
            return;
        }
        for i in (1..seq.len()).rev() {
            let j = self.int_in_range(0..(i as u64 + 1)) as usize;
            seq.swap(i, j);
        }
    }
}
