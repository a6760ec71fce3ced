//! Vocabulary shared between the fuzzing core and whatever driver embeds it:
//! the stats a driver reports periodically, and the events the core itself
//! can raise. Kept deliberately tiny — this crate carries no I/O and no
//! dependencies, only data.

/// Snapshot of execution throughput, refreshed by the driver loop and
/// printed (or otherwise surfaced) alongside [`FuzzerEvent`]s.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FuzzerStats {
    pub total_number_of_runs: usize,
    pub number_of_runs_since_last_reset_time: usize,
    pub exec_per_s: usize,
}

/// Notable occurrences a driver may want to report. This is not a logging
/// facility: it is a closed set of events the core itself can identify,
/// left to the caller to print, forward, or ignore.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FuzzerEvent {
    Start,
    Pulse,
    /// An input was replaced by a strictly simpler one carrying the same
    /// features: `Replace(old_complexity_as_units, new_complexity_as_units)`.
    Replace(usize, usize),
    CaughtSignal(i32),
    CrashNoInput,
    TestFailure,
    Done,
}
