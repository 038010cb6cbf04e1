//! Public encounter API surface.
//!
//! This module gathers the capability traits the host implements, the
//! interrupt gateway it calls into, and the error types surfaced to callers.

pub mod errors;
pub mod providers;

pub use errors::{EncounterError, Result};
pub use providers::{
    EffectTrigger, HealthProvider, InterruptGateway, NoEffects, NoPersistence, NoSpawnService,
    PersistenceHook, SpawnError, SpawnService,
};
