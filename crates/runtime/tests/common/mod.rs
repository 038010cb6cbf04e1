//! Host doubles shared by the integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use encounter_core::{EncounterOutcome, Vec2};
use encounter_runtime::{
    EffectTrigger, Event, HazardHandle, HealthProvider, PersistenceHook, SpawnError, SpawnService,
};
use tokio::sync::broadcast;

pub const FRAME: Duration = Duration::from_millis(100);

/// Everything the host side observed, shared between the doubles.
#[derive(Debug, Default)]
pub struct Log {
    pub spawned: Vec<(String, HazardHandle)>,
    pub destroyed: Vec<HazardHandle>,
    pub cues: Vec<String>,
    pub phases: Vec<u32>,
    pub endings: Vec<EncounterOutcome>,
    pub floors: Vec<f32>,
    pub floor_releases: usize,
}

/// Owns the shared state and hands out capability doubles wired to it.
#[derive(Clone, Default)]
pub struct Host {
    pub log: Rc<RefCell<Log>>,
    health: Rc<Cell<f32>>,
    refused: Rc<RefCell<Vec<String>>>,
}

impl Host {
    pub fn new() -> Self {
        let host = Self::default();
        host.health.set(1.0);
        host
    }

    pub fn set_health(&self, ratio: f32) {
        self.health.set(ratio);
    }

    /// Spawn requests for `kind` fail with `UnknownKind`.
    pub fn refuse(&self, kind: &str) {
        self.refused.borrow_mut().push(kind.to_string());
    }

    pub fn health(&self) -> ScriptedHealth {
        ScriptedHealth(self.clone())
    }

    pub fn spawner(&self) -> RecordingSpawner {
        RecordingSpawner {
            host: self.clone(),
            next: 0,
        }
    }

    pub fn effects(&self) -> RecordingEffects {
        RecordingEffects(self.clone())
    }

    pub fn persistence(&self) -> RecordingPersistence {
        RecordingPersistence(self.clone())
    }

    pub fn cues(&self) -> Vec<String> {
        self.log.borrow().cues.clone()
    }

    pub fn destroyed(&self) -> Vec<HazardHandle> {
        self.log.borrow().destroyed.clone()
    }

    pub fn spawned(&self) -> usize {
        self.log.borrow().spawned.len()
    }
}

pub struct ScriptedHealth(Host);

impl HealthProvider for ScriptedHealth {
    fn current_ratio(&self) -> f32 {
        self.0.health.get()
    }

    fn hold_at_floor(&mut self, floor: f32) {
        self.0.log.borrow_mut().floors.push(floor);
    }

    fn release_floor(&mut self) {
        self.0.log.borrow_mut().floor_releases += 1;
    }
}

pub struct RecordingSpawner {
    host: Host,
    next: u64,
}

impl SpawnService for RecordingSpawner {
    fn spawn(
        &mut self,
        kind: &str,
        _position: Vec2,
        _velocity: Vec2,
    ) -> Result<HazardHandle, SpawnError> {
        if self.host.refused.borrow().iter().any(|refused| refused == kind) {
            return Err(SpawnError::UnknownKind(kind.to_string()));
        }
        self.next += 1;
        let handle = HazardHandle(self.next);
        self.host
            .log
            .borrow_mut()
            .spawned
            .push((kind.to_string(), handle));
        Ok(handle)
    }

    fn destroy(&mut self, handle: HazardHandle) {
        self.host.log.borrow_mut().destroyed.push(handle);
    }
}

pub struct RecordingEffects(Host);

impl EffectTrigger for RecordingEffects {
    fn trigger(&mut self, cue: &str) {
        self.0.log.borrow_mut().cues.push(cue.to_string());
    }
}

pub struct RecordingPersistence(Host);

impl PersistenceHook for RecordingPersistence {
    fn on_phase_advanced(&mut self, phase_index: u32) {
        self.0.log.borrow_mut().phases.push(phase_index);
    }

    fn on_encounter_ended(&mut self, outcome: EncounterOutcome) {
        self.0.log.borrow_mut().endings.push(outcome);
    }
}

/// Installs a test subscriber once; `RUST_LOG=encounter=debug` shows the
/// runtime's logs for a failing test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Everything published since the last drain.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
