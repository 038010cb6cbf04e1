//! Capabilities the encounter consumes from the host.
//!
//! The orchestration core never owns health math, entity simulation,
//! presentation or persistence. Each boss plugs in implementations of these
//! traits; tests plug in recording doubles.
use encounter_core::{EncounterOutcome, InterruptOutcome, Vec2};

use super::errors::Result;
use crate::hazard::HazardHandle;

/// Source of the boss's health, polled once per frame.
pub trait HealthProvider {
    /// Current health as a ratio of maximum health, in `[0, 1]`.
    fn current_ratio(&self) -> f32;

    fn is_dead(&self) -> bool {
        self.current_ratio() <= 0.0
    }

    /// Asks the host to keep health at or above `floor` until released.
    ///
    /// The encounter treats the effective ratio as `max(raw, floor)` either
    /// way; implementing this keeps the host's own health bar consistent.
    fn hold_at_floor(&mut self, _floor: f32) {}

    fn release_floor(&mut self) {}
}

/// Errors a spawn service can report for a single request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpawnError {
    #[error("unknown hazard kind `{0}`")]
    UnknownKind(String),

    #[error("`{kind}` cannot spawn at {position}")]
    InvalidPosition { kind: String, position: Vec2 },

    #[error("no spawn service configured for `{0}`")]
    Unavailable(String),
}

impl SpawnError {
    /// Name of the missing resource, for fault reporting.
    pub fn resource(&self) -> String {
        match self {
            Self::UnknownKind(kind) | Self::Unavailable(kind) => kind.clone(),
            Self::InvalidPosition { kind, position } => format!("{kind}@{position}"),
        }
    }
}

/// Creates and destroys world entities (projectiles, obstacles) for patterns.
pub trait SpawnService {
    fn spawn(&mut self, kind: &str, position: Vec2, velocity: Vec2)
    -> std::result::Result<HazardHandle, SpawnError>;

    /// Destroys a live entity. Called at most once per handle.
    fn destroy(&mut self, handle: HazardHandle);
}

/// Fire-and-forget presentation cues (animation, audio, VFX).
pub trait EffectTrigger {
    fn trigger(&mut self, cue: &str);
}

/// Save/checkpoint trigger points.
pub trait PersistenceHook {
    fn on_phase_advanced(&mut self, _phase_index: u32) {}

    fn on_encounter_ended(&mut self, _outcome: EncounterOutcome) {}
}

/// Entry points for quiz, dialogue and cutscene systems.
pub trait InterruptGateway {
    /// Suspends pattern cycling; the running pattern is cancelled.
    fn request_interrupt(&mut self) -> Result<()>;

    /// Ends the interrupt: success resumes the battle, failure forces death.
    fn resolve_interrupt(&mut self, outcome: InterruptOutcome) -> Result<()>;
}

/// Spawn service used when the host provides none; every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSpawnService;

impl SpawnService for NoSpawnService {
    fn spawn(
        &mut self,
        kind: &str,
        _position: Vec2,
        _velocity: Vec2,
    ) -> std::result::Result<HazardHandle, SpawnError> {
        Err(SpawnError::Unavailable(kind.to_string()))
    }

    fn destroy(&mut self, _handle: HazardHandle) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoEffects;

impl EffectTrigger for NoEffects {
    fn trigger(&mut self, cue: &str) {
        tracing::trace!(target: "encounter::effects", cue, "cue dropped (no effect trigger)");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoPersistence;

impl PersistenceHook for NoPersistence {}
