//! The in-process table of instrumentation events (the "TracePC" sensor):
//! per-guard edge counters, the indirect-call and comparison lists, and the
//! deterministic extraction of a [`Feature`] stream from them once an
//! execution finishes.

mod hooks;

pub use hooks::shared_sensor;

use crate::bitset::FixedBitSet;
use crate::config::Config;
use crate::feature::{comparison_reduced_key, counter_bucket, indirect_reduced_key, Feature, Pc};
use crate::torc::Torc;
use crate::value_bitmap::ValueBitMap;

/// Owns the guard table, the cumulative edge-seen bitmap, the per-execution
/// indirect/comparison lists, and the two TORCs. Logically a process-wide
/// singleton (the instrumentation ABI has no user-data slot) — see
/// [`hooks::shared_sensor`] for how that singleton is exposed; this struct
/// itself holds no global state and is fully unit-testable on its own.
pub struct TracePc {
    max_num_guards: usize,
    num_guards: usize,
    warned_overflow: bool,
    counters: Vec<u8>,
    cumulative_edge_seen: FixedBitSet,
    indirect_events: Vec<(Pc, Pc)>,
    comparison_events: Vec<(Pc, u64, u64)>,
    torc4: Torc<u32>,
    torc8: Torc<u64>,
    value_profile: ValueBitMap,
}

impl TracePc {
    pub fn new(config: &Config) -> Self {
        debug_assert_eq!(
            config.torc_size,
            crate::torc::TORC_SIZE,
            "Torc's slot count is a compile-time constant; config.torc_size must match it"
        );
        debug_assert_eq!(
            config.value_map_size_bits,
            crate::value_bitmap::MAP_SIZE_IN_BITS,
            "ValueBitMap's size is a compile-time constant; config.value_map_size_bits must match it"
        );
        Self {
            max_num_guards: config.max_num_guards,
            num_guards: 0,
            warned_overflow: false,
            counters: vec![0],
            cumulative_edge_seen: FixedBitSet::with_capacity(1),
            indirect_events: Vec::new(),
            comparison_events: Vec::new(),
            torc4: Torc::new(),
            torc8: Torc::new(),
            value_profile: ValueBitMap::new(),
        }
    }

    pub fn num_guards(&self) -> usize {
        self.num_guards
    }

    /// Total number of distinct guard ids ever bumped at acceptance time
    /// (see `record_edge_observed`): a well-defined, testable quantity once
    /// the cumulative bitmap is updated only on acceptance (open question,
    /// resolved in DESIGN.md).
    pub fn total_edges_ever_observed(&self) -> usize {
        self.cumulative_edge_seen.count_ones()
    }

    /// Assigns `count` fresh, increasing guard ids, folding beyond
    /// `max_num_guards` by wrapping modulo the max and warning once. Grows
    /// the counter and cumulative-edge buffers to fit. Returns the assigned
    /// ids in order, for the ABI trampoline to write back into the guard
    /// slots it owns.
    fn assign_guard_ids(&mut self, count: usize) -> Vec<u32> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            self.num_guards += 1;
            let id = if self.num_guards > self.max_num_guards {
                if !self.warned_overflow {
                    eprintln!(
                        "fuzzcheck_core: number of instrumented edges exceeds max_num_guards ({}); \
                         folding further guards modulo the max",
                        self.max_num_guards
                    );
                    self.warned_overflow = true;
                }
                ((self.num_guards - 1) % self.max_num_guards) + 1
            } else {
                self.num_guards
            };
            ids.push(id as u32);
        }
        let needed = self.num_guards.min(self.max_num_guards) + 1;
        if self.counters.len() < needed {
            self.counters.resize(needed, 0);
            self.cumulative_edge_seen.grow(needed);
        }
        ids
    }

    /// `pc_guard_init(start, stop)` over a raw guard range. Idempotent: a
    /// range whose first slot is already nonzero is assumed already
    /// initialized and is silently ignored (not an error).
    ///
    /// # Safety
    /// `start..stop` must be a valid, writable range of `u32` guard slots,
    /// as supplied by the Sanitizer Coverage instrumentation ABI.
    pub unsafe fn handle_pc_guard_init(&mut self, start: *mut u32, stop: *mut u32) {
        if start == stop {
            return;
        }
        if unsafe { *start } != 0 {
            return;
        }
        let count = unsafe { stop.offset_from(start) } as usize;
        let ids = self.assign_guard_ids(count);
        for (i, id) in ids.into_iter().enumerate() {
            unsafe {
                *start.add(i) = id;
            }
        }
    }

    /// Same guard-id assignment as `handle_pc_guard_init`, without raw
    /// pointers, for direct unit testing of bucketing/collection behavior.
    #[cfg(test)]
    pub(crate) fn init_guards_for_test(&mut self, count: usize) -> Vec<u32> {
        self.assign_guard_ids(count)
    }

    /// Increments the saturating 8-bit counter at `guard_id`.
    pub fn bump_guard(&mut self, guard_id: usize) {
        let counter = &mut self.counters[guard_id];
        *counter = counter.saturating_add(1);
    }

    #[cfg(test)]
    pub(crate) fn set_counter_for_test(&mut self, guard_id: usize, value: u8) {
        self.counters[guard_id] = value;
    }

    pub fn handle_pc_indir(&mut self, caller: Pc, callee: Pc) {
        self.indirect_events.push((caller, callee));
    }

    fn handle_trace_cmp(&mut self, pc: Pc, a: u64, b: u64) {
        self.comparison_events.push((pc, a, b));
    }

    pub fn handle_trace_cmp_u8(&mut self, pc: Pc, a: u8, b: u8) {
        self.handle_trace_cmp(pc, a as u64, b as u64);
    }

    pub fn handle_trace_cmp_u16(&mut self, pc: Pc, a: u16, b: u16) {
        self.handle_trace_cmp(pc, a as u64, b as u64);
    }

    pub fn handle_trace_cmp_u32(&mut self, pc: Pc, a: u32, b: u32) {
        self.handle_trace_cmp(pc, a as u64, b as u64);
        self.record_torc4_if_fresh(pc, a, b);
    }

    pub fn handle_trace_cmp_u64(&mut self, pc: Pc, a: u64, b: u64) {
        self.handle_trace_cmp(pc, a, b);
        self.record_torc8_if_fresh(pc, a, b);
    }

    /// Gates TORC writes on the comparison's reduced key having never been
    /// observed before in the process lifetime, so one hot comparison site
    /// doesn't dominate the 32 TORC slots. Does not affect the deterministic
    /// emission order of `collect_features`, which is governed purely by
    /// the per-execution lists.
    fn record_torc4_if_fresh(&mut self, pc: Pc, a: u32, b: u32) {
        let (pc_low, distance) = comparison_reduced_key(pc, a as u64, b as u64);
        let hash = (pc_low as u64) | ((distance as u64) << 32);
        if self.value_profile.add_value_mod_prime(hash) {
            let slot_key = (a ^ b).count_ones() as u64 + 1;
            self.torc4.record(slot_key, a, b);
        }
    }

    fn record_torc8_if_fresh(&mut self, pc: Pc, a: u64, b: u64) {
        let (pc_low, distance) = comparison_reduced_key(pc, a, b);
        let hash = (pc_low as u64) | ((distance as u64) << 32);
        if self.value_profile.add_value_mod_prime(hash) {
            let slot_key = (a ^ b).count_ones() as u64 + 1;
            self.torc8.record(slot_key, a, b);
        }
    }

    pub fn torc4(&self) -> &Torc<u32> {
        &self.torc4
    }

    pub fn torc8(&self) -> &Torc<u64> {
        &self.torc8
    }

    /// Sets the cumulative edge-seen bit for `guard_id`. Called by the
    /// fuzzer only once a feature has actually been accepted into the pool
    /// (see DESIGN.md's resolution of the corresponding open question).
    pub fn record_edge_observed(&mut self, guard_id: usize) {
        self.cumulative_edge_seen.put(guard_id);
    }

    /// Emits the features of one execution in deterministic order: edges by
    /// ascending guard id, then indirect calls sorted and deduplicated by
    /// reduced key, then comparisons likewise.
    pub fn collect_features<F: FnMut(Feature)>(&self, mut handle: F) {
        for (guard_id, &count) in self.counters.iter().enumerate() {
            if guard_id == 0 || count == 0 {
                continue;
            }
            handle(Feature::edge(guard_id as u32, count));
        }

        let mut indirect = self.indirect_events.clone();
        indirect.sort_by_key(|&(caller, callee)| indirect_reduced_key(caller, callee));
        let mut last_key: Option<u32> = None;
        for (caller, callee) in indirect {
            let key = indirect_reduced_key(caller, callee);
            if last_key == Some(key) {
                continue;
            }
            last_key = Some(key);
            handle(Feature::Indirect { caller, callee });
        }

        let mut comparisons = self.comparison_events.clone();
        comparisons.sort_by_key(|&(pc, a, b)| comparison_reduced_key(pc, a, b));
        let mut last_cmp_key: Option<(u32, u8)> = None;
        for (pc, arg1, arg2) in comparisons {
            let key = comparison_reduced_key(pc, arg1, arg2);
            if last_cmp_key == Some(key) {
                continue;
            }
            last_cmp_key = Some(key);
            handle(Feature::Comparison { pc, arg1, arg2 });
        }
    }

    /// Zeros the counter buffer and clears the per-execution lists,
    /// preserving their allocated capacity. Does *not* clear the cumulative
    /// edge-seen bitmap.
    pub fn reset_collected_features(&mut self) {
        for c in &mut self.counters {
            *c = 0;
        }
        self.indirect_events.clear();
        self.comparison_events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor() -> TracePc {
        TracePc::new(&Config::default())
    }

    // S3: counter values [0, 1, 3, 4, 128] at guards 1..5.
    #[test]
    fn s3_edge_bucketing() {
        let mut pc = sensor();
        pc.init_guards_for_test(5);
        let values = [0u8, 1, 3, 4, 128];
        for (i, &v) in values.iter().enumerate() {
            pc.set_counter_for_test(i + 1, v);
        }
        let mut emitted = Vec::new();
        pc.collect_features(|f| emitted.push(f));
        assert_eq!(
            emitted,
            vec![
                Feature::Edge { guard_id: 2, counter_bucket: 0 },
                Feature::Edge { guard_id: 3, counter_bucket: 2 },
                Feature::Edge { guard_id: 4, counter_bucket: 3 },
                Feature::Edge { guard_id: 5, counter_bucket: 7 },
            ]
        );
    }

    // S2 (adapted — see DESIGN.md): distinct reduced keys are both emitted,
    // ascending; an exact repeat of an event is not emitted twice.
    #[test]
    fn s2_indirect_feature_dedup_and_order() {
        let mut pc = sensor();
        pc.handle_pc_indir(0x3001, 0x1001); // reduced key 0x1001
        pc.handle_pc_indir(0x1001, 0x2002); // reduced key 0x2001
        pc.handle_pc_indir(0x3001, 0x1001); // exact repeat, deduped

        let mut emitted = Vec::new();
        pc.collect_features(|f| emitted.push(f));
        assert_eq!(
            emitted,
            vec![
                Feature::Indirect { caller: 0x3001, callee: 0x1001 },
                Feature::Indirect { caller: 0x1001, callee: 0x2002 },
            ]
        );
    }

    #[test]
    fn comparisons_with_same_reduced_key_collapse_to_one() {
        let mut pc = sensor();
        pc.handle_trace_cmp_u32(0x10, 1, 2); // popcount(1^2) = 2
        pc.handle_trace_cmp_u32(0x10, 5, 6); // popcount(5^6) = 1 -> different bucket
        pc.handle_trace_cmp_u32(0x10, 3, 0); // popcount(3^0) = 2 -> same reduced key as first

        let mut emitted = Vec::new();
        pc.collect_features(|f| emitted.push(f));
        assert_eq!(emitted.len(), 2);
    }

    // Testable property 4: deterministic emission, independent of callback
    // arrival order.
    #[test]
    fn emission_order_is_independent_of_callback_arrival_order() {
        let mut a = sensor();
        a.init_guards_for_test(3);
        a.set_counter_for_test(1, 5);
        a.handle_trace_cmp_u32(1, 10, 20);
        a.handle_pc_indir(1, 2);
        a.set_counter_for_test(2, 9);

        let mut b = sensor();
        b.init_guards_for_test(3);
        b.set_counter_for_test(2, 9);
        b.handle_pc_indir(1, 2);
        b.set_counter_for_test(1, 5);
        b.handle_trace_cmp_u32(1, 10, 20);

        let collect = |pc: &TracePc| {
            let mut v = Vec::new();
            pc.collect_features(|f| v.push(f));
            v
        };
        assert_eq!(collect(&a), collect(&b));
    }

    #[test]
    fn reset_zeroes_counters_and_clears_lists_but_not_cumulative_bitmap() {
        let mut pc = sensor();
        pc.init_guards_for_test(2);
        pc.set_counter_for_test(1, 4);
        pc.handle_pc_indir(1, 2);
        pc.record_edge_observed(1);

        pc.reset_collected_features();

        let mut emitted = Vec::new();
        pc.collect_features(|f| emitted.push(f));
        assert!(emitted.is_empty());
        assert_eq!(pc.total_edges_ever_observed(), 1);
    }

    #[test]
    fn guard_init_is_idempotent_for_an_already_initialized_range() {
        let mut pc = sensor();
        let first = pc.init_guards_for_test(4);
        assert_eq!(pc.num_guards(), 4);
        // A second call on the same (already-nonzero) range is modeled at
        // the raw-pointer trampoline layer; here we just confirm that
        // assigning fresh ids for a second, distinct module still grows
        // monotonically rather than resetting.
        let second = pc.init_guards_for_test(2);
        assert_eq!(second, vec![5, 6]);
        assert_eq!(first.len() + second.len(), pc.num_guards());
    }

    #[test]
    fn guard_ids_saturate_beyond_max_num_guards() {
        let mut config = Config::default();
        config.max_num_guards = 3;
        let mut pc = TracePc::new(&config);
        let ids = pc.init_guards_for_test(5);
        assert_eq!(ids, vec![1, 2, 3, 1, 2]);
    }
}
