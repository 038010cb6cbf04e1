use std::time::Duration;

use tracing::{trace, warn};

use encounter_core::{Clock, EncounterContext, Frame, PcgRng, RngOracle, Vec2, compute_seed};

use super::arena::{PollEnv, Services, TaskArena};
use super::{TaskBody, TaskError, TaskId, TaskState, WaitOutcome};
use crate::hazard::HazardHandle;

/// What a task body can see and do during one step.
///
/// Borrowed for the duration of a single [`TaskBody::resume`] call.
pub struct TaskCx<'a, 'b> {
    id: TaskId,
    arena: &'a mut TaskArena,
    env: PollEnv<'a>,
    services: &'a mut Services<'b>,
}

impl<'a, 'b> TaskCx<'a, 'b> {
    pub(super) fn new(
        id: TaskId,
        arena: &'a mut TaskArena,
        env: PollEnv<'a>,
        services: &'a mut Services<'b>,
    ) -> Self {
        Self {
            id,
            arena,
            env,
            services,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn clock(&self) -> Clock {
        self.env.clock
    }

    pub fn now(&self) -> Duration {
        self.env.clock.now
    }

    pub fn frame(&self) -> Frame {
        self.env.clock.frame
    }

    pub fn context(&self) -> &EncounterContext {
        self.env.context
    }

    /// Spawns an entity owned by this task's scope.
    ///
    /// Spawn failures come back as [`TaskError::MissingResource`], so `?`
    /// skips the rest of the step and the task carries on next step.
    pub fn spawn(
        &mut self,
        kind: &str,
        position: Vec2,
        velocity: Vec2,
    ) -> Result<HazardHandle, TaskError> {
        let handle = self.services.spawner.spawn(kind, position, velocity)?;

        if let Err(error) = self.services.hazards.register(self.id, handle) {
            warn!(target: "encounter::hazard", task = %self.id, %error, "orphaned spawn destroyed");
            self.services.spawner.destroy(handle);
            return Err(TaskError::Script(error.to_string()));
        }

        trace!(target: "encounter::hazard", task = %self.id, %handle, kind, "spawned");
        Ok(handle)
    }

    /// Live hazards owned by this task and its descendants.
    pub fn live_hazards(&self) -> usize {
        self.services.hazards.live_in(self.id)
    }

    /// Fires a presentation cue.
    pub fn cue(&mut self, name: &str) {
        self.services.effects.trigger(name);
    }

    /// Starts a child task. It runs from the next frame on and is cancelled
    /// with this task.
    pub fn fork(&mut self, body: impl TaskBody + 'static) -> TaskId {
        self.fork_boxed(Box::new(body))
    }

    pub fn fork_boxed(&mut self, body: Box<dyn TaskBody>) -> TaskId {
        self.arena.start(body, self.id, &mut *self.services.hazards)
    }

    pub fn children(&self) -> &[TaskId] {
        self.arena.children(self.id)
    }

    /// Requests cancellation of another task (or this one).
    pub fn cancel(&mut self, task: TaskId) -> bool {
        self.arena.cancel(task)
    }

    pub fn state(&self, task: TaskId) -> Option<TaskState> {
        self.arena.state(task)
    }

    pub fn is_done(&self, task: TaskId) -> bool {
        self.arena.is_done(task)
    }

    /// How this task's most recent wait resolved.
    pub fn last_wait(&self) -> WaitOutcome {
        self.arena.last_wait(self.id)
    }

    /// Deterministic value in `0..bound` from this task's own random stream.
    ///
    /// Tasks never draw from the scheduler's stream, so pattern bodies cannot
    /// shift which pattern is picked next.
    pub fn roll(&mut self, bound: u32) -> u32 {
        let draw = self.arena.next_draw(self.id);
        let seed = compute_seed(self.env.seed, self.env.clock.frame.0, self.id.0, draw);
        PcgRng.below(seed, bound)
    }
}

/// Snapshot handed to [`super::Wait::Until`] conditions.
pub struct WaitProbe<'a> {
    pub(super) context: &'a EncounterContext,
    pub(super) now: Duration,
    pub(super) waited: Duration,
    pub(super) live_hazards: usize,
}

impl WaitProbe<'_> {
    pub fn context(&self) -> &EncounterContext {
        self.context
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Time since the wait began.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Live hazards owned by the waiting task and its descendants.
    pub fn live_hazards(&self) -> usize {
        self.live_hazards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{NoEffects, NoSpawnService};
    use crate::hazard::HazardRegistry;
    use crate::task::{Step, from_fn};

    #[test]
    fn rolls_are_deterministic_per_task_and_frame() {
        let draws = |seed: u64| {
            let context = EncounterContext::new(seed);
            let mut arena = TaskArena::new();
            let mut hazards = HazardRegistry::new();
            let noop = Box::new(from_fn("noop", |_| Ok(Step::Done)));
            let id = arena.start(noop, TaskId::ROOT, &mut hazards);
            let env = PollEnv {
                context: &context,
                clock: Clock::new(),
                seed,
                wait_timeout: Duration::from_secs(1),
                max_steps: 8,
            };
            let mut spawner = NoSpawnService;
            let mut effects = NoEffects;
            let mut services = Services {
                hazards: &mut hazards,
                spawner: &mut spawner,
                effects: &mut effects,
            };
            let mut cx = TaskCx::new(id, &mut arena, env, &mut services);
            (0..4).map(|_| cx.roll(1000)).collect::<Vec<_>>()
        };

        assert_eq!(draws(11), draws(11));
        assert_ne!(draws(11), draws(12));
    }

    #[test]
    fn failed_spawn_is_a_missing_resource() {
        let context = EncounterContext::new(0);
        let mut arena = TaskArena::new();
        let mut hazards = HazardRegistry::new();
        let noop = Box::new(from_fn("noop", |_| Ok(Step::Done)));
        let id = arena.start(noop, TaskId::ROOT, &mut hazards);
        let env = PollEnv {
            context: &context,
            clock: Clock::new(),
            seed: 0,
            wait_timeout: Duration::from_secs(1),
            max_steps: 8,
        };
        let mut spawner = NoSpawnService;
        let mut effects = NoEffects;
        let mut services = Services {
            hazards: &mut hazards,
            spawner: &mut spawner,
            effects: &mut effects,
        };
        let mut cx = TaskCx::new(id, &mut arena, env, &mut services);

        let result = cx.spawn("laser", Vec2::ZERO, Vec2::ZERO);

        assert_eq!(result, Err(TaskError::MissingResource("laser".into())));
        assert_eq!(cx.live_hazards(), 0);
    }
}
