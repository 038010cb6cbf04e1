//! Top-level encounter state machine.
//!
//! [`Encounter`] owns the encounter context, the phase controller, the pattern
//! scheduler, the task arena and the hazard registry, and drives all of them
//! from one [`Encounter::tick`] per frame:
//!
//! 1. observe health (clamped, floor applied) and check for death, which is
//!    refused while a floor is held or still owed by an unfired threshold
//! 2. evaluate phase thresholds (Battling only, at most one per tick)
//! 3. start the next rotation pattern if the scheduler is idle
//! 4. poll every task once
//! 5. route finished tasks back to the scheduler and the state machine
//!
//! Phase changes therefore apply before any pattern started in the same tick.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use encounter_core::{
    Clock, DeathCause, EncounterConfig, EncounterContext, EncounterFault, EncounterFlags,
    EncounterOutcome, EncounterState, Frame, InterruptOutcome, PatternCatalog, PatternDefinition,
    PatternId, PatternOutcome, PhaseAction, PhaseController, PhaseCrossing, PhaseThreshold,
};
use tokio::sync::broadcast;

use crate::api::{
    EffectTrigger, EncounterError, HealthProvider, InterruptGateway, NoEffects, NoPersistence,
    NoSpawnService, PersistenceHook, Result, SpawnService,
};
use crate::events::{Event, EventBus, LifecycleEvent, PatternEvent, PhaseEvent, Topic};
use crate::hazard::{HazardHandle, HazardRegistry};
use crate::scheduler::{ActivePattern, PatternEnd, PatternFactory, PatternScheduler, RunKind};
use crate::table::PhaseTable;
use crate::task::{
    PollEnv, PollReport, Services, TaskArena, TaskBody, TaskId, TaskOutcome, TaskState,
};

/// One boss fight: a pattern catalog, a threshold list and the host's
/// capabilities, composed into a single state machine.
pub struct Encounter {
    config: EncounterConfig,
    state: EncounterState,
    context: Option<EncounterContext>,
    phases: PhaseController,
    scheduler: PatternScheduler,
    arena: TaskArena,
    hazards: HazardRegistry,
    clock: Clock,
    health: Box<dyn HealthProvider>,
    spawner: Box<dyn SpawnService>,
    effects: Box<dyn EffectTrigger>,
    persistence: Box<dyn PersistenceHook>,
    bus: EventBus,
    rush: Option<TaskId>,
    death_cause: Option<DeathCause>,
    outcome: Option<EncounterOutcome>,
}

impl Encounter {
    /// Create a new encounter builder
    pub fn builder() -> EncounterBuilder {
        EncounterBuilder::new()
    }

    // ===== lifecycle =====

    /// Leaves `Idle`: creates the context and runs the intro, if any.
    ///
    /// Without an intro the encounter moves to `Battling` on the first tick.
    pub fn start(&mut self) -> Result<()> {
        if self.state != EncounterState::Idle {
            return Err(EncounterError::invalid("start", self.state));
        }

        let mut context = EncounterContext::new(self.config.seed);
        context.observe_health(self.health.current_ratio());
        self.context = Some(context);
        info!(
            target: "encounter::state",
            seed = self.config.seed,
            patterns = self.scheduler.catalog().len(),
            thresholds = self.phases.thresholds().len(),
            "encounter started"
        );

        self.transition(EncounterState::Intro);
        if let Some(intro) = self.config.intro {
            self.run_scripted(intro);
        }
        Ok(())
    }

    /// Advances the encounter by one frame of `dt`.
    ///
    /// A no-op before [`Encounter::start`] and after the encounter ended.
    pub fn tick(&mut self, dt: Duration) {
        if !(self.state.is_engaged() || self.state == EncounterState::Dying) {
            return;
        }
        self.clock.advance(dt);

        let Some(ratio) = self.observe_health() else {
            return;
        };

        if self.state.is_engaged() && self.is_depleted(ratio) {
            self.enter_dying(DeathCause::HealthDepleted);
        }

        if self.state == EncounterState::Battling
            && let Some(crossing) = self.evaluate_phases(ratio)
        {
            self.apply_crossing(crossing);
        }

        if self.state == EncounterState::Intro && self.scheduler.active().is_none() {
            self.transition(EncounterState::Battling);
        }

        if self.state == EncounterState::Battling && self.scheduler.wants_next(self.clock.now) {
            self.run_next_pattern();
        }

        let report = self.poll_tasks();
        self.absorb(report);

        if self.state == EncounterState::Dying && self.scheduler.active().is_none() {
            self.finish(EncounterOutcome::Dead);
        }
    }

    /// Suspends pattern cycling, cancelling the running pattern.
    ///
    /// Only accepted from `Battling`. An interlude is never preempted: its
    /// threshold has already fired, so it could not run again.
    pub fn force_interrupt(&mut self) -> Result<()> {
        self.request_interrupt()
    }

    /// Forces the encounter into `Dying` regardless of health.
    pub fn notify_death(&mut self) -> Result<()> {
        if !self.state.is_engaged() {
            return Err(EncounterError::invalid("notify death", self.state));
        }
        self.enter_dying(DeathCause::Forced);
        Ok(())
    }

    /// Skips the rest of the intro.
    pub fn finish_intro(&mut self) -> Result<()> {
        if self.state != EncounterState::Intro {
            return Err(EncounterError::invalid("finish intro", self.state));
        }
        self.cancel_active_pattern();
        self.transition(EncounterState::Battling);
        Ok(())
    }

    /// Tears the encounter down from any non-terminal state.
    pub fn abort(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(EncounterError::invalid("abort", self.state));
        }
        warn!(target: "encounter::state", state = %self.state, "encounter aborted");
        self.finish(EncounterOutcome::Abandoned);
        Ok(())
    }

    // ===== phases =====

    /// Fires the next threshold regardless of health.
    pub fn force_advance_phase(&mut self) -> Result<Option<u32>> {
        match self.phases.next_index() {
            Some(index) => self.force_threshold(index),
            None => Ok(None),
        }
    }

    /// Fires threshold `index` regardless of health. Thresholds still fire in
    /// order: any other index is clamped to the next unfired one.
    pub fn force_threshold(&mut self, index: usize) -> Result<Option<u32>> {
        if self.state != EncounterState::Battling {
            return Err(EncounterError::invalid("advance phase", self.state));
        }
        let crossing = match self.context.as_mut() {
            Some(ctx) => self.phases.fire(index, ctx),
            None => None,
        };
        Ok(crossing.map(|crossing| {
            let phase_index = crossing.phase_index;
            self.apply_crossing(crossing);
            phase_index
        }))
    }

    /// Lets health fall below a held floor again.
    pub fn release_health_floor(&mut self) -> bool {
        let released = self
            .context
            .as_mut()
            .and_then(EncounterContext::release_floor);
        if let Some(floor) = released {
            self.health.release_floor();
            debug!(target: "encounter::phase", floor, "health floor released");
            self.emit(PhaseEvent::FloorReleased {
                frame: self.clock.frame,
            });
        }
        released.is_some()
    }

    // ===== tasks and hazards =====

    /// Runs an extra top-level task alongside the pattern rotation.
    pub fn spawn_task(&mut self, body: impl TaskBody + 'static) -> Result<TaskId> {
        if !(self.state.is_engaged() || self.state == EncounterState::Dying) {
            return Err(EncounterError::invalid("spawn task", self.state));
        }
        Ok(self
            .arena
            .start(Box::new(body), TaskId::ROOT, &mut self.hazards))
    }

    /// Requests cancellation; the task unwinds on the next tick.
    pub fn cancel_task(&mut self, task: TaskId) -> bool {
        self.arena.cancel(task)
    }

    /// `None` once the task has been removed from the arena.
    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.arena.state(task)
    }

    /// Live children forked by `task`.
    pub fn task_children(&self, task: TaskId) -> &[TaskId] {
        self.arena.children(task)
    }

    /// Forgets a hazard whose entity despawned on its own.
    pub fn hazard_expired(&mut self, handle: HazardHandle) -> bool {
        self.hazards.expire(handle)
    }

    /// Gives a host-created entity to a task's scope so it is cleaned up with
    /// the task.
    pub fn adopt_hazard(&mut self, task: TaskId, handle: HazardHandle) -> Result<()> {
        Ok(self.hazards.register(task, handle)?)
    }

    // ===== observation =====

    /// Current state machine state.
    pub fn state(&self) -> EncounterState {
        self.state
    }

    /// `None` before start and after the encounter ended.
    pub fn context(&self) -> Option<&EncounterContext> {
        self.context.as_ref()
    }

    /// Configuration the encounter was built with.
    pub fn config(&self) -> &EncounterConfig {
        &self.config
    }

    /// Threshold list and which thresholds have fired.
    pub fn phases(&self) -> &PhaseController {
        &self.phases
    }

    /// Encounter time, advanced only by [`Encounter::tick`].
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Number of ticks processed so far.
    pub fn frame(&self) -> Frame {
        self.clock.frame
    }

    /// The single top-level pattern currently running, rotation or scripted.
    pub fn active_pattern(&self) -> Option<ActivePattern> {
        self.scheduler.active()
    }

    /// Hazards registered across every task scope.
    pub fn live_hazards(&self) -> usize {
        self.hazards.total_live()
    }

    /// Tasks still held by the arena, including ones that are unwinding.
    pub fn live_tasks(&self) -> usize {
        self.arena.len()
    }

    /// Set exactly once, when the encounter reaches `Dead`.
    pub fn outcome(&self) -> Option<EncounterOutcome> {
        self.outcome
    }

    /// Why the encounter entered `Dying`, if it did.
    pub fn death_cause(&self) -> Option<DeathCause> {
        self.death_cause
    }

    /// The event bus; clone it to hand subscriptions to other systems.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribe to one topic. Only events published after this call are
    /// received.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.bus.subscribe(topic)
    }

    // ===== internals =====

    fn emit(&self, event: impl Into<Event>) {
        self.bus.publish(event);
    }

    fn transition(&mut self, to: EncounterState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(target: "encounter::state", %from, %to, frame = %self.clock.frame, "state changed");
        self.emit(LifecycleEvent::StateChanged {
            from,
            to,
            frame: self.clock.frame,
        });
    }

    fn observe_health(&mut self) -> Option<f32> {
        let raw = self.health.current_ratio();
        self.context.as_mut().map(|ctx| ctx.observe_health(raw))
    }

    /// Death is ignored while a health floor is held, and while a threshold
    /// that holds one has yet to fire: its interlude must run first.
    fn is_depleted(&self, ratio: f32) -> bool {
        let floor_held = self
            .context
            .as_ref()
            .is_some_and(|ctx| ctx.health_floor().is_some());
        let floor_owed = self.phases.pending_floor().is_some();
        !floor_held && !floor_owed && (ratio <= 0.0 || self.health.is_dead())
    }

    fn evaluate_phases(&mut self, ratio: f32) -> Option<PhaseCrossing> {
        let ctx = self.context.as_mut()?;
        self.phases.evaluate(ratio, ctx)
    }

    fn apply_crossing(&mut self, crossing: PhaseCrossing) {
        if let Some(requested) = crossing.clamped_from {
            let fault = EncounterFault::InvalidPhaseOrder {
                requested,
                expected: crossing.index,
            };
            error!(target: "encounter::phase", severity = fault.severity().as_str(), "{fault}");
        }

        info!(
            target: "encounter::phase",
            phase = crossing.phase_index,
            threshold = crossing.ratio,
            actions = crossing.actions.len(),
            "phase changed"
        );
        self.emit(PhaseEvent::PhaseChanged {
            phase_index: crossing.phase_index,
            ratio: crossing.ratio,
            frame: self.clock.frame,
        });
        self.persistence.on_phase_advanced(crossing.phase_index);

        for cue in crossing.cues() {
            self.effects.trigger(cue);
        }

        if let Some(floor) = crossing.holds_floor() {
            self.health.hold_at_floor(floor);
            debug!(target: "encounter::phase", floor, "health floor held");
            self.emit(PhaseEvent::FloorHeld {
                floor,
                frame: self.clock.frame,
            });
        }

        if crossing.cancels_active() {
            self.cancel_active_pattern();
        }

        if let Some(rush) = crossing.rush() {
            self.start_rush(rush);
        }
    }

    fn start_rush(&mut self, rush: PatternId) {
        self.cancel_active_pattern();

        let Some(task) = self.run_scripted(rush) else {
            self.release_health_floor();
            return;
        };

        self.rush = Some(task);
        self.transition(EncounterState::Rushing);
        self.emit(PhaseEvent::RushStarted {
            pattern: rush,
            frame: self.clock.frame,
        });
    }

    fn run_next_pattern(&mut self) {
        let next = match self.context.as_mut() {
            Some(ctx) => self.scheduler.select_next(ctx),
            None => None,
        };
        let Some(id) = next else {
            return;
        };

        if let Ok(task) = self
            .scheduler
            .run_pattern(id, RunKind::Rotation, &mut self.arena, &mut self.hazards)
        {
            self.emit(PatternEvent::Started {
                pattern: id,
                task,
                frame: self.clock.frame,
            });
        }
    }

    fn run_scripted(&mut self, id: PatternId) -> Option<TaskId> {
        let task = self
            .scheduler
            .run_pattern(id, RunKind::Scripted, &mut self.arena, &mut self.hazards)
            .ok()?;
        self.emit(PatternEvent::Started {
            pattern: id,
            task,
            frame: self.clock.frame,
        });
        Some(task)
    }

    fn enter_interrupted(&mut self) {
        self.transition(EncounterState::Interrupted);
        if let Some(ctx) = self.context.as_mut() {
            ctx.insert_flags(EncounterFlags::INTERRUPTED);
        }
        self.cancel_active_pattern();
    }

    fn enter_dying(&mut self, cause: DeathCause) {
        if !self.state.is_engaged() {
            return;
        }
        info!(target: "encounter::state", %cause, "boss is dying");
        self.death_cause = Some(cause);
        self.transition(EncounterState::Dying);

        let report = self.cancel_all_tasks();
        self.absorb(report);

        if let Some(sequence) = self.config.death_sequence {
            self.run_scripted(sequence);
        }
    }

    /// Ends the encounter exactly once.
    fn finish(&mut self, outcome: EncounterOutcome) {
        if self.outcome.is_some() {
            return;
        }
        self.transition(EncounterState::Dead);

        let report = self.cancel_all_tasks();
        self.absorb(report);
        let destroyed = self
            .hazards
            .release_scope(TaskId::ROOT, &mut *self.spawner);
        if destroyed > 0 {
            self.emit(PatternEvent::HazardsPurged {
                count: destroyed,
                frame: self.clock.frame,
            });
        }

        self.scheduler.clear();
        self.rush = None;
        self.context = None;
        self.outcome = Some(outcome);

        info!(target: "encounter::state", %outcome, frame = %self.clock.frame, "encounter ended");
        self.persistence.on_encounter_ended(outcome);
        self.emit(LifecycleEvent::EncounterEnded {
            outcome,
            frame: self.clock.frame,
        });
    }

    fn cancel_active_pattern(&mut self) {
        let mut services = Services {
            hazards: &mut self.hazards,
            spawner: &mut *self.spawner,
            effects: &mut *self.effects,
        };
        let report = self.scheduler.cancel_active(&mut self.arena, &mut services);
        self.absorb(report);
    }

    fn cancel_all_tasks(&mut self) -> PollReport {
        let mut services = Services {
            hazards: &mut self.hazards,
            spawner: &mut *self.spawner,
            effects: &mut *self.effects,
        };
        self.arena.cancel_all(&mut services)
    }

    fn poll_tasks(&mut self) -> PollReport {
        let Some(context) = self.context.as_ref() else {
            return PollReport::default();
        };
        let env = PollEnv {
            context,
            clock: self.clock,
            seed: self.config.seed,
            wait_timeout: self.config.wait_timeout,
            max_steps: self.config.max_steps_per_poll,
        };
        let mut services = Services {
            hazards: &mut self.hazards,
            spawner: &mut *self.spawner,
            effects: &mut *self.effects,
        };
        self.arena.poll(&env, &mut services)
    }

    /// Publishes what happened to tasks and hands pattern runs back to the
    /// scheduler and state machine.
    fn absorb(&mut self, report: PollReport) {
        for trip in report.watchdogs {
            self.emit(PatternEvent::WatchdogFired {
                task: trip.task,
                timeout: trip.timeout,
                purged: trip.purged,
                frame: self.clock.frame,
            });
        }

        let purged: usize = report
            .finished
            .iter()
            .filter(|finished| finished.outcome != TaskOutcome::Completed)
            .map(|finished| finished.destroyed)
            .sum();

        for finished in &report.finished {
            let Some(ctx) = self.context.as_mut() else {
                break;
            };
            if let Some(end) = self.scheduler.on_finished(finished, ctx, self.clock.now) {
                self.pattern_ended(end);
            }
        }

        if purged > 0 {
            self.emit(PatternEvent::HazardsPurged {
                count: purged,
                frame: self.clock.frame,
            });
        }
    }

    fn pattern_ended(&mut self, end: PatternEnd) {
        let frame = self.clock.frame;
        if let Some(error) = &end.error {
            warn!(target: "encounter::scheduler", pattern = %end.id, %error, "pattern faulted");
            self.emit(PatternEvent::Faulted {
                pattern: end.id,
                error: error.clone(),
                frame,
            });
        }
        self.emit(PatternEvent::Finished {
            pattern: end.id,
            outcome: end.outcome,
            frame,
        });

        if end.kind != RunKind::Scripted {
            return;
        }

        if self.rush == Some(end.task) {
            self.rush = None;
            if end.outcome == PatternOutcome::Completed
                && let Some(ctx) = self.context.as_mut()
            {
                ctx.insert_flags(EncounterFlags::RUSH_DONE);
            }
            self.release_health_floor();
            if self.state == EncounterState::Rushing {
                self.transition(EncounterState::Battling);
            }
        } else if self.state == EncounterState::Intro {
            self.transition(EncounterState::Battling);
        }
    }
}

impl InterruptGateway for Encounter {
    fn request_interrupt(&mut self) -> Result<()> {
        if self.state != EncounterState::Battling {
            return Err(EncounterError::invalid("interrupt", self.state));
        }
        self.enter_interrupted();
        Ok(())
    }

    fn resolve_interrupt(&mut self, outcome: InterruptOutcome) -> Result<()> {
        if self.state != EncounterState::Interrupted {
            return Err(EncounterError::invalid("resolve interrupt", self.state));
        }
        if let Some(ctx) = self.context.as_mut() {
            ctx.remove_flags(EncounterFlags::INTERRUPTED);
        }
        info!(target: "encounter::state", %outcome, "interrupt resolved");

        match outcome {
            InterruptOutcome::Success => self.transition(EncounterState::Battling),
            InterruptOutcome::Failure => self.enter_dying(DeathCause::InterruptFailed),
        }
        Ok(())
    }
}

/// Builder for [`Encounter`]
pub struct EncounterBuilder {
    config: EncounterConfig,
    patterns: Vec<PatternDefinition<PatternFactory>>,
    thresholds: Vec<PhaseThreshold>,
    health: Option<Box<dyn HealthProvider>>,
    spawner: Box<dyn SpawnService>,
    effects: Box<dyn EffectTrigger>,
    persistence: Box<dyn PersistenceHook>,
    event_capacity: usize,
}

impl EncounterBuilder {
    fn new() -> Self {
        Self {
            config: EncounterConfig::default(),
            patterns: Vec::new(),
            thresholds: Vec::new(),
            health: None,
            spawner: Box::new(NoSpawnService),
            effects: Box::new(NoEffects),
            persistence: Box::new(NoPersistence),
            event_capacity: EventBus::DEFAULT_CAPACITY,
        }
    }

    /// Override encounter configuration
    pub fn config(mut self, config: EncounterConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed for pattern selection and per-task rolls
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Add a pattern definition; see [`crate::scheduler::pattern`].
    pub fn pattern(mut self, definition: PatternDefinition<PatternFactory>) -> Self {
        self.patterns.push(definition);
        self
    }

    pub fn patterns(
        mut self,
        definitions: impl IntoIterator<Item = PatternDefinition<PatternFactory>>,
    ) -> Self {
        self.patterns.extend(definitions);
        self
    }

    /// Add a phase threshold; ratios must be strictly decreasing
    pub fn threshold(mut self, threshold: PhaseThreshold) -> Self {
        self.thresholds.push(threshold);
        self
    }

    pub fn thresholds(mut self, thresholds: impl IntoIterator<Item = PhaseThreshold>) -> Self {
        self.thresholds.extend(thresholds);
        self
    }

    /// Replace the thresholds with a loaded phase table
    pub fn phase_table(mut self, table: PhaseTable) -> Self {
        self.thresholds = table.thresholds;
        self
    }

    /// Set the required health provider
    pub fn health(mut self, provider: impl HealthProvider + 'static) -> Self {
        self.health = Some(Box::new(provider));
        self
    }

    /// Set the spawn service (optional; every spawn fails without one)
    pub fn spawner(mut self, spawner: impl SpawnService + 'static) -> Self {
        self.spawner = Box::new(spawner);
        self
    }

    /// Set the presentation cue sink (optional)
    pub fn effects(mut self, effects: impl EffectTrigger + 'static) -> Self {
        self.effects = Box::new(effects);
        self
    }

    /// Set the checkpoint hook (optional)
    pub fn persistence(mut self, persistence: impl PersistenceHook + 'static) -> Self {
        self.persistence = Box::new(persistence);
        self
    }

    /// Per-topic event buffer size
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration and build an idle encounter
    pub fn build(self) -> Result<Encounter> {
        let health = self.health.ok_or(EncounterError::MissingHealthProvider)?;

        if self.patterns.is_empty() {
            return Err(encounter_core::ConfigError::EmptyCatalog.into());
        }
        let catalog = PatternCatalog::from_definitions(self.patterns)?;
        let phases = PhaseController::new(self.thresholds)?;

        let check = |id: PatternId, usage: &'static str| {
            if catalog.contains(id) {
                Ok(())
            } else {
                Err(encounter_core::ConfigError::UnknownPattern { id, usage })
            }
        };
        if let Some(intro) = self.config.intro {
            check(intro, "intro")?;
        }
        if let Some(death) = self.config.death_sequence {
            check(death, "death sequence")?;
        }
        for threshold in phases.thresholds() {
            for action in &threshold.actions {
                if let PhaseAction::Rush(id) = action {
                    check(*id, "rush")?;
                }
            }
        }

        debug!(
            target: "encounter::state",
            patterns = catalog.len(),
            thresholds = phases.thresholds().len(),
            "encounter built"
        );

        Ok(Encounter {
            scheduler: PatternScheduler::new(catalog, self.config.pattern_gap),
            config: self.config,
            state: EncounterState::Idle,
            context: None,
            phases,
            arena: TaskArena::new(),
            hazards: HazardRegistry::new(),
            clock: Clock::new(),
            health,
            spawner: self.spawner,
            effects: self.effects,
            persistence: self.persistence,
            bus: EventBus::with_capacity(self.event_capacity),
            rush: None,
            death_cause: None,
            outcome: None,
        })
    }

    /// Build and start the encounter
    pub fn start(self) -> Result<Encounter> {
        let mut encounter = self.build()?;
        encounter.start()?;
        Ok(encounter)
    }
}
