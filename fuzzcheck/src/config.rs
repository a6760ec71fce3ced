//! Start-up tuning knobs for the sensor and the pool, grouped into one
//! struct rather than scattered constants so a driver can construct it once
//! and thread it explicitly into `TracePc::new`/`UnitPool::new`.

/// Per-[`crate::feature::Feature`]-variant score constants. Open question
/// (see DESIGN.md): only the ordering "edge ≥ indirect > comparison, stable
/// within a run" is required; the exact values are a tuning knob.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeatureScores {
    pub edge: f64,
    pub indirect: f64,
    pub comparison: f64,
}

impl Default for FeatureScores {
    fn default() -> Self {
        Self {
            edge: 5.0,
            indirect: 5.0,
            comparison: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    /// Upper bound on instrumented edges; beyond this, guard ids saturate
    /// modulo the max and a one-shot warning is printed.
    pub max_num_guards: usize,
    /// Slots per [`crate::torc::Torc`].
    pub torc_size: usize,
    /// Bits backing the [`crate::value_bitmap::ValueBitMap`]; must be a power of 2.
    pub value_map_size_bits: usize,
    /// Denominator of the probability of picking the favored unit (default
    /// 1/4, i.e. this field defaults to 4).
    pub favored_selection_odds_denominator: u64,
    pub feature_score: FeatureScores,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_num_guards: 1 << 21,
            torc_size: crate::torc::TORC_SIZE,
            value_map_size_bits: crate::value_bitmap::MAP_SIZE_IN_BITS,
            favored_selection_odds_denominator: 4,
            feature_score: FeatureScores::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_respects_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.max_num_guards, 1 << 21);
        assert_eq!(config.torc_size, 32);
        assert_eq!(config.value_map_size_bits, 1 << 16);
        assert_eq!(config.favored_selection_odds_denominator, 4);
        assert!(config.feature_score.edge >= config.feature_score.indirect);
        assert!(config.feature_score.indirect > config.feature_score.comparison);
    }
}
