//! The pool never touches I/O directly; every persistence effect is
//! expressed as a [`WorldAction`] and carried out through a [`World`]
//! implementation chosen by the driver. This keeps the pool testable
//! without a filesystem (see [`NullWorld`]) while still supporting a real
//! on-disk corpus (see [`FsWorld`]).

use fuzzcheck_common::{FuzzerEvent, FuzzerStats};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::PathBuf;

/// The two effects a pool update can have on the persisted corpus.
#[derive(Clone, Debug)]
pub enum WorldAction<Unit> {
    Add(Unit),
    Remove(Unit),
}

/// The only surface the pool depends on. Kept to exactly the two
/// operations a corpus needs, plus a default no-op event hook a driver can
/// override to surface [`FuzzerEvent`]s.
pub trait World {
    type Unit;

    fn add_to_output_corpus(&mut self, unit: Self::Unit) -> io::Result<()>;
    fn remove_from_output_corpus(&mut self, unit: Self::Unit) -> io::Result<()>;

    fn report_event(&mut self, _event: FuzzerEvent, _stats: FuzzerStats) {}
}

/// Computes a stable, content-addressed file name for a unit, the same way
/// regardless of which `World` stores it.
fn hash_of_bytes(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Filesystem-backed [`World`]: each unit is serialized to bytes by the
/// caller and written under `corpus_dir`, named by the hash of its
/// contents so re-adding the same input is a no-op write.
pub struct FsWorld {
    corpus_dir: PathBuf,
}

impl FsWorld {
    pub fn new(corpus_dir: PathBuf) -> Self {
        Self { corpus_dir }
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        self.corpus_dir.join(hash)
    }
}

impl World for FsWorld {
    type Unit = Vec<u8>;

    fn add_to_output_corpus(&mut self, unit: Vec<u8>) -> io::Result<()> {
        if !self.corpus_dir.is_dir() {
            std::fs::create_dir_all(&self.corpus_dir)?;
        }
        let hash = hash_of_bytes(&unit);
        std::fs::write(self.path_for(&hash), unit)
    }

    fn remove_from_output_corpus(&mut self, unit: Vec<u8>) -> io::Result<()> {
        let hash = hash_of_bytes(&unit);
        match std::fs::remove_file(self.path_for(&hash)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn report_event(&mut self, event: FuzzerEvent, stats: FuzzerStats) {
        print_event(event, stats);
    }
}

/// In-memory [`World`] used by tests and by embedders that don't want a
/// persisted corpus: every action is recorded verbatim instead of being
/// applied to a filesystem.
#[derive(Default)]
pub struct NullWorld<Unit> {
    pub actions: Vec<WorldAction<Unit>>,
}

impl<Unit> NullWorld<Unit> {
    pub fn new() -> Self {
        Self { actions: Vec::new() }
    }
}

impl<Unit> World for NullWorld<Unit> {
    type Unit = Unit;

    fn add_to_output_corpus(&mut self, unit: Unit) -> io::Result<()> {
        self.actions.push(WorldAction::Add(unit));
        Ok(())
    }

    fn remove_from_output_corpus(&mut self, unit: Unit) -> io::Result<()> {
        self.actions.push(WorldAction::Remove(unit));
        Ok(())
    }

    fn report_event(&mut self, event: FuzzerEvent, stats: FuzzerStats) {
        print_event(event, stats);
    }
}

fn print_event(event: FuzzerEvent, stats: FuzzerStats) {
    match event {
        FuzzerEvent::Start => {
            println!("START");
            return;
        }
        FuzzerEvent::Done => {
            println!("DONE");
            return;
        }
        FuzzerEvent::CrashNoInput => {
            println!("\n=================== CRASH DETECTED ===================");
            println!(
                r#"A crash was detected, but the fuzzer cannot recover the crashing input."#
            );
            return;
        }
        FuzzerEvent::CaughtSignal(signal) => {
            println!("\n================ SIGNAL {} ================", signal);
        }
        FuzzerEvent::TestFailure => {
            println!("\n================ TEST FAILED ================");
        }
        FuzzerEvent::Pulse => {
            print!("PULSE\t");
        }
        FuzzerEvent::Replace(old_complexity_units, new_complexity_units) => {
            print!("RPLC {} -> {}\t", old_complexity_units, new_complexity_units);
        }
    }
    print!("{}\t", stats.total_number_of_runs);
    print!("exec/s: {}\t", stats.exec_per_s);
    println!();
}
