//! The closed set of observable events the sensor turns into corpus
//! feedback, and their reduction to small, deduplicatable keys.
//!
//! Deliberately a closed sum type rather than anything open/polymorphic:
//! both the total order below and `collect_features`'s exhaustive dispatch
//! depend on there being exactly three variants.

use crate::config::FeatureScores;

/// An unsigned machine-word-sized instruction location. Opaque outside of
/// equality, hashing, and the masking used to build reduced keys.
pub type Pc = usize;

/// Maps a raw hit count (`n >= 1`) to its 3-bit bucket. This bucketing is
/// load-bearing: edges with different buckets are distinct features.
/// Boundaries: `1->0, 2->1, 3->2, 4..=7->3, 8..=15->4, 16..=31->5,
/// 32..=127->6, >=128->7`.
pub fn counter_bucket(n: u32) -> u8 {
    match n {
        0 => 0,
        1 => 0,
        2 => 1,
        3 => 2,
        4..=7 => 3,
        8..=15 => 4,
        16..=31 => 5,
        32..=127 => 6,
        _ => 7,
    }
}

/// Number of bits popcount(arg1 ^ arg2) can take, bucketed into a 6-bit
/// quantity per §4.3. A raw popcount of a 64-bit comparison already fits
/// in 7 bits (0..=64); we keep the value as-is, matching "a 6-bit 'bit
/// distance' bucket" loosely enough to still distinguish 0 from 64.
pub fn bit_distance(a: u64, b: u64) -> u8 {
    (a ^ b).count_ones() as u8
}

/// A visited edge, an indirect call, or a comparison — tagged so the total
/// order and exhaustive dispatch the pool relies on are enforced by the
/// compiler rather than by convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feature {
    Edge { guard_id: u32, counter_bucket: u8 },
    Indirect { caller: Pc, callee: Pc },
    Comparison { pc: Pc, arg1: u64, arg2: u64 },
}

/// The bucketed form of a [`Feature`], used to deduplicate "equivalent"
/// events and to key the pool's simplest-complexity map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReducedKey {
    Edge { guard_id: u32, counter_bucket: u8 },
    Indirect(u32),
    Comparison { pc_low: u32, bit_distance: u8 },
}

fn variant_tag(f: &Feature) -> u8 {
    match f {
        Feature::Edge { .. } => 0,
        Feature::Indirect { .. } => 1,
        Feature::Comparison { .. } => 2,
    }
}

impl Feature {
    pub fn edge(guard_id: u32, counter: u8) -> Self {
        Feature::Edge {
            guard_id,
            counter_bucket: counter_bucket(counter as u32),
        }
    }

    pub fn reduced(&self) -> ReducedKey {
        match *self {
            Feature::Edge { guard_id, counter_bucket } => ReducedKey::Edge { guard_id, counter_bucket },
            Feature::Indirect { caller, callee } => {
                ReducedKey::Indirect(indirect_reduced_key(caller, callee))
            }
            Feature::Comparison { pc, arg1, arg2 } => {
                let (pc_low, distance) = comparison_reduced_key(pc, arg1, arg2);
                ReducedKey::Comparison { pc_low, bit_distance: distance }
            }
        }
    }

    /// The fixed per-variant contribution this feature pays into the
    /// pool's scoring equation (see `UnitPool::update_scores_and_weights`).
    pub fn score(&self, scores: &FeatureScores) -> f64 {
        match self {
            Feature::Edge { .. } => scores.edge,
            Feature::Indirect { .. } => scores.indirect,
            Feature::Comparison { .. } => scores.comparison,
        }
    }
}

/// `(caller & 0xFFF) | ((callee & 0xFFF) << 12)` — the low 12 bits of each
/// PC concatenated.
pub fn indirect_reduced_key(caller: Pc, callee: Pc) -> u32 {
    ((caller as u32) & 0xFFF) | (((callee as u32) & 0xFFF) << 12)
}

/// `(pc & 0xFFF, popcount(arg1 ^ arg2))`.
pub fn comparison_reduced_key(pc: Pc, arg1: u64, arg2: u64) -> (u32, u8) {
    ((pc as u32) & 0xFFF, bit_distance(arg1, arg2))
}

impl PartialOrd for Feature {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Feature {
    /// Total order required for deterministic corpus acceptance: by
    /// `variant_tag` first, then by reduced key, then by raw payload.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        variant_tag(self)
            .cmp(&variant_tag(other))
            .then_with(|| self.reduced().cmp(&other.reduced()))
            .then_with(|| match (self, other) {
                (
                    Feature::Edge { guard_id: g1, counter_bucket: c1 },
                    Feature::Edge { guard_id: g2, counter_bucket: c2 },
                ) => (g1, c1).cmp(&(g2, c2)),
                (
                    Feature::Indirect { caller: c1, callee: ce1 },
                    Feature::Indirect { caller: c2, callee: ce2 },
                ) => (c1, ce1).cmp(&(c2, ce2)),
                (
                    Feature::Comparison { pc: p1, arg1: a1, arg2: b1 },
                    Feature::Comparison { pc: p2, arg1: a2, arg2: b2 },
                ) => (p1, a1, b1).cmp(&(p2, a2, b2)),
                _ => unreachable!("variant_tag ordering already separated the variants"),
            })
    }
}
