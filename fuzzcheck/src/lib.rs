//! Core of a coverage-guided, in-process fuzzing engine: feedback
//! collection (the sensor, fed by Sanitizer Coverage instrumentation),
//! corpus evolution (the unit pool and its scoring equation), and the
//! input-selection primitives (the deterministic PRNG) that together
//! drive a test program towards new behavior.
//!
//! This crate has no opinion on how inputs are generated or mutated, and
//! no opinion on how a driver loop is structured; it owns only the three
//! subsystems above plus the small persistence seam ([`world::World`])
//! that lets the pool be exercised without a filesystem.

#![feature(link_llvm_intrinsics)]

mod bitset;
mod code_coverage_sensor;
mod config;
mod feature;
mod pool;
mod rng;
mod torc;
mod value_bitmap;
mod world;

pub use code_coverage_sensor::{shared_sensor, TracePc};
pub use config::{Config, FeatureScores};
pub use feature::{Feature, Pc, ReducedKey};
pub use pool::{AddCallback, CorpusIndex, RemoveCallback, UnitInfo, UnitPool};
pub use rng::Rng;
pub use torc::{Torc, TORC_SIZE};
pub use value_bitmap::ValueBitMap;
pub use world::{FsWorld, NullWorld, World, WorldAction};

pub use fuzzcheck_common::{FuzzerEvent, FuzzerStats};
