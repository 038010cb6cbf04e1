//! Deterministic building blocks for scripted boss encounters.
//!
//! `encounter-core` defines the data an encounter reasons about (context,
//! flags, pattern catalog, phase thresholds) and the pure algorithms over it:
//! no-repeat pattern selection and ordered, one-shot phase progression. It
//! never performs I/O or logging; the `encounter-runtime` crate drives these
//! types from the host's game loop and reports what they return.
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod phase;
pub mod rng;
pub mod state;
pub mod types;

pub use catalog::{PatternCatalog, PatternDefinition};
pub use config::EncounterConfig;
pub use context::{EncounterContext, EncounterFlags};
pub use error::{ConfigError, EncounterFault, ErrorSeverity};
pub use phase::{PhaseAction, PhaseController, PhaseCrossing, PhaseThreshold};
pub use rng::{EncounterRng, PcgRng, RngOracle, compute_seed};
pub use state::{DeathCause, EncounterOutcome, EncounterState, InterruptOutcome, PatternOutcome};
pub use types::{Clock, Frame, PatternId, Vec2};
