//! Runs catalog patterns as top-level tasks, one at a time.

use std::time::Duration;

use tracing::{debug, warn};

use encounter_core::{
    EncounterContext, EncounterFault, PatternCatalog, PatternDefinition, PatternId, PatternOutcome,
};

use crate::hazard::HazardRegistry;
use crate::task::{
    FinishedTask, PollReport, Services, TaskArena, TaskBody, TaskId, TaskOutcome, TaskState,
};

/// Builds a fresh body for every run of a pattern.
pub type PatternFactory = Box<dyn Fn() -> Box<dyn TaskBody>>;

/// Defines a pattern whose body is built by `factory`.
pub fn pattern<B, F>(
    id: PatternId,
    name: &'static str,
    factory: F,
) -> PatternDefinition<PatternFactory>
where
    B: TaskBody + 'static,
    F: Fn() -> B + 'static,
{
    PatternDefinition::new(
        id,
        name,
        Box::new(move || Box::new(factory()) as Box<dyn TaskBody>),
    )
}

/// Why a pattern is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunKind {
    /// Picked by [`PatternScheduler::select_next`] during normal cycling.
    Rotation,
    /// Started on purpose: intro, rush or death sequence.
    Scripted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivePattern {
    pub id: PatternId,
    pub task: TaskId,
    pub kind: RunKind,
}

/// A pattern run that left the arena.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatternEnd {
    pub id: PatternId,
    pub task: TaskId,
    pub kind: RunKind,
    pub outcome: PatternOutcome,
    /// Set when the run faulted.
    pub error: Option<String>,
}

/// Owns the pattern catalog and the single top-level pattern task.
pub struct PatternScheduler {
    catalog: PatternCatalog<PatternFactory>,
    active: Option<ActivePattern>,
    gap: Duration,
    idle_until: Duration,
}

impl PatternScheduler {
    pub fn new(catalog: PatternCatalog<PatternFactory>, gap: Duration) -> Self {
        Self {
            catalog,
            active: None,
            gap,
            idle_until: Duration::ZERO,
        }
    }

    pub fn catalog(&self) -> &PatternCatalog<PatternFactory> {
        &self.catalog
    }

    pub fn active(&self) -> Option<ActivePattern> {
        self.active
    }

    /// True when no pattern is running and the gap since the last one elapsed.
    pub fn wants_next(&self, now: Duration) -> bool {
        self.active.is_none() && now >= self.idle_until
    }

    /// Picks the next rotation pattern; see [`PatternCatalog::select_next`].
    pub fn select_next(&self, ctx: &mut EncounterContext) -> Option<PatternId> {
        let picked = self.catalog.select_next(ctx);
        debug!(
            target: "encounter::scheduler",
            phase = ctx.phase_index(),
            last = ?ctx.last_pattern_id(),
            ?picked,
            "selected next pattern"
        );
        picked
    }

    /// Starts pattern `id` as the sole top-level pattern task.
    ///
    /// Refused while another pattern task is still running.
    pub fn run_pattern(
        &mut self,
        id: PatternId,
        kind: RunKind,
        arena: &mut TaskArena,
        hazards: &mut HazardRegistry,
    ) -> Result<TaskId, EncounterFault> {
        if let Some(active) = self.active
            && arena.state(active.task) == Some(TaskState::Running)
        {
            let fault = EncounterFault::ConcurrencyViolation {
                requested: id,
                active: active.id,
            };
            warn!(
                target: "encounter::scheduler",
                severity = fault.severity().as_str(),
                task = %active.task,
                "{fault}; request ignored"
            );
            return Err(fault);
        }

        let Some(definition) = self.catalog.get(id) else {
            let fault = EncounterFault::MissingResource {
                resource: id.to_string(),
            };
            warn!(target: "encounter::scheduler", severity = fault.severity().as_str(), "{fault}");
            return Err(fault);
        };

        let body = (definition.factory)();
        let task = arena.start(body, TaskId::ROOT, hazards);
        debug!(
            target: "encounter::scheduler",
            pattern = %id,
            name = definition.name,
            %task,
            ?kind,
            "pattern started"
        );

        self.active = Some(ActivePattern { id, task, kind });
        Ok(task)
    }

    /// Cancels and unwinds the running pattern, if any.
    ///
    /// The pattern stays active until its finish record is handed back through
    /// [`PatternScheduler::on_finished`].
    pub fn cancel_active(
        &mut self,
        arena: &mut TaskArena,
        services: &mut Services<'_>,
    ) -> PollReport {
        match self.active {
            Some(active) => arena.cancel_now(active.task, services),
            None => PollReport::default(),
        }
    }

    /// Matches a finished task against the active pattern.
    ///
    /// Only a rotation pattern that ran to completion becomes the context's
    /// last pattern; cancelled and faulted runs leave it untouched.
    pub fn on_finished(
        &mut self,
        finished: &FinishedTask,
        ctx: &mut EncounterContext,
        now: Duration,
    ) -> Option<PatternEnd> {
        let active = self.active.filter(|active| active.task == finished.id)?;
        self.active = None;
        self.idle_until = now + self.gap;

        let (outcome, error) = match &finished.outcome {
            TaskOutcome::Completed => (PatternOutcome::Completed, None),
            TaskOutcome::Cancelled => (PatternOutcome::Cancelled, None),
            TaskOutcome::Faulted(error) => (PatternOutcome::Faulted, Some(error.clone())),
        };

        if outcome == PatternOutcome::Completed && active.kind == RunKind::Rotation {
            ctx.record_completed_pattern(active.id);
        }

        debug!(
            target: "encounter::scheduler",
            pattern = %active.id,
            task = %active.task,
            %outcome,
            "pattern finished"
        );

        Some(PatternEnd {
            id: active.id,
            task: active.task,
            kind: active.kind,
            outcome,
            error,
        })
    }

    /// Forgets the active pattern without touching the arena.
    pub(crate) fn clear(&mut self) {
        self.active = None;
    }
}
