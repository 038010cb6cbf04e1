//! Runtime orchestration for scripted boss encounters.
//!
//! This crate drives the deterministic building blocks of `encounter-core`
//! from the host's game loop. Consumers build an [`Encounter`] from a pattern
//! catalog, a threshold list and their own capability implementations, call
//! [`Encounter::tick`] once per frame, and subscribe to events.
//!
//! Modules are organized by responsibility:
//! - [`encounter`] hosts the state machine and its builder
//! - [`api`] exposes the capability traits and error types hosts interact with
//! - [`task`] provides cooperative tasks, scripts and the task arena
//! - [`scheduler`] runs catalog patterns one at a time
//! - [`hazard`] scopes spawned entities to the tasks that spawned them
//! - [`events`] provides topic-based event bus for flexible event routing
//! - [`table`] loads phase tables from RON
pub mod api;
pub mod encounter;
pub mod events;
pub mod hazard;
pub mod scheduler;
pub mod table;
pub mod task;

pub use api::{
    EffectTrigger, EncounterError, HealthProvider, InterruptGateway, NoEffects, NoPersistence,
    NoSpawnService, PersistenceHook, Result, SpawnError, SpawnService,
};
pub use encounter::{Encounter, EncounterBuilder};
pub use events::{Event, EventBus, LifecycleEvent, PatternEvent, PhaseEvent, Topic};
pub use hazard::{HazardHandle, HazardRegistry, RegistryError};
pub use scheduler::{ActivePattern, PatternEnd, PatternFactory, PatternScheduler, RunKind, pattern};
pub use table::{PhaseTable, load_phase_table, load_phase_table_file};
pub use task::{
    Script, Step, TaskArena, TaskBody, TaskCx, TaskError, TaskId, TaskOutcome, TaskState, Wait,
    WaitOutcome, WaitProbe, from_fn,
};
