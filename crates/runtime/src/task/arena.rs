use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, trace, warn};

use encounter_core::{Clock, EncounterContext, EncounterFault};

use super::cx::{TaskCx, WaitProbe};
use super::{Step, TaskBody, TaskError, TaskId, TaskState, Wait, WaitOutcome};
use crate::api::{EffectTrigger, SpawnService};
use crate::hazard::HazardRegistry;

/// Read-only view of the encounter handed to every task during a poll.
#[derive(Clone, Copy)]
pub struct PollEnv<'a> {
    pub context: &'a EncounterContext,
    pub clock: Clock,
    pub seed: u64,
    /// Watchdog bound for waits that do not carry their own.
    pub wait_timeout: Duration,
    pub max_steps: u32,
}

/// Host capabilities a task may use while it runs or unwinds.
pub struct Services<'a> {
    pub hazards: &'a mut HazardRegistry,
    pub spawner: &'a mut dyn SpawnService,
    pub effects: &'a mut dyn EffectTrigger,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Cancelled,
    Faulted(String),
}

/// A task that left the arena during a poll or a forced cancellation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinishedTask {
    pub id: TaskId,
    pub parent: TaskId,
    pub label: String,
    pub outcome: TaskOutcome,
    /// Hazards destroyed when the task's scope was released.
    pub destroyed: usize,
}

/// A blocking wait that hit its watchdog bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchdogTrip {
    pub task: TaskId,
    pub label: String,
    pub timeout: Duration,
    /// Hazards destroyed by the purge that follows the timeout.
    pub purged: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    pub finished: Vec<FinishedTask>,
    pub watchdogs: Vec<WatchdogTrip>,
}

impl PollReport {
    pub fn is_empty(&self) -> bool {
        self.finished.is_empty() && self.watchdogs.is_empty()
    }

    pub fn extend(&mut self, other: PollReport) {
        self.finished.extend(other.finished);
        self.watchdogs.extend(other.watchdogs);
    }
}

struct Pending {
    wait: Wait,
    since: Duration,
    deadline: Option<Duration>,
}

struct TaskSlot {
    parent: TaskId,
    children: Vec<TaskId>,
    state: TaskState,
    label: String,
    /// `None` only while the body is being resumed.
    body: Option<Box<dyn TaskBody>>,
    wait: Option<Pending>,
    last_wait: WaitOutcome,
    /// The body returned `Done` with children still live; the task completes
    /// once they have.
    finishing: bool,
    draws: u32,
}

/// Owns every live task and drives them once per frame.
///
/// Tasks are polled in registration order. A task started during a poll
/// (forked children, patterns started by the state machine) is first resumed
/// on the following poll.
pub struct TaskArena {
    slots: BTreeMap<TaskId, TaskSlot>,
    next_id: u64,
}

impl TaskArena {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Registers a body as a new task and opens its hazard scope.
    ///
    /// `parent` is [`TaskId::ROOT`] for top-level tasks. A parent that already
    /// finished falls back to the root.
    pub fn start(
        &mut self,
        body: Box<dyn TaskBody>,
        parent: TaskId,
        hazards: &mut HazardRegistry,
    ) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;

        let parent = match self.slots.get_mut(&parent) {
            Some(slot) => {
                slot.children.push(id);
                parent
            }
            None => {
                if parent != TaskId::ROOT {
                    warn!(
                        target: "encounter::task",
                        task = %id,
                        %parent,
                        "parent finished; starting at root"
                    );
                }
                TaskId::ROOT
            }
        };

        hazards.open_scope(id, parent);
        let label = body.label().to_string();
        debug!(target: "encounter::task", task = %id, %parent, label = %label, "task started");

        self.slots.insert(
            id,
            TaskSlot {
                parent,
                children: Vec::new(),
                state: TaskState::Running,
                label,
                body: Some(body),
                wait: None,
                last_wait: WaitOutcome::Ready,
                finishing: false,
                draws: 0,
            },
        );
        id
    }

    /// Marks a task and all of its descendants as cancelling.
    ///
    /// Nothing unwinds until the next poll. Returns `false` if the task is not
    /// live.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        if !self.slots.contains_key(&id) {
            return false;
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(slot) = self.slots.get_mut(&current) {
                if slot.state == TaskState::Running {
                    trace!(target: "encounter::task", task = %current, "cancel requested");
                    slot.state = TaskState::Cancelling;
                }
                stack.extend(slot.children.iter().copied());
            }
        }
        true
    }

    /// Cancels and unwinds a task and its descendants immediately.
    pub fn cancel_now(&mut self, id: TaskId, services: &mut Services<'_>) -> PollReport {
        let mut report = PollReport::default();
        if self.slots.contains_key(&id) {
            self.cancel(id);
            self.unwind(id, services, &mut report, TaskOutcome::Cancelled);
        }
        report
    }

    /// Unwinds every live task, top-level tasks in registration order.
    pub fn cancel_all(&mut self, services: &mut Services<'_>) -> PollReport {
        let roots: Vec<TaskId> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.parent == TaskId::ROOT)
            .map(|(id, _)| *id)
            .collect();

        let mut report = PollReport::default();
        for id in roots {
            report.extend(self.cancel_now(id, services));
        }
        report
    }

    /// `None` for ids this arena never issued.
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        match self.slots.get(&id) {
            Some(slot) => Some(slot.state),
            None if id != TaskId::ROOT && id.0 < self.next_id => Some(TaskState::Done),
            None => None,
        }
    }

    pub fn is_done(&self, id: TaskId) -> bool {
        !self.slots.contains_key(&id)
    }

    pub fn label(&self, id: TaskId) -> Option<&str> {
        self.slots.get(&id).map(|slot| slot.label.as_str())
    }

    pub fn children(&self, id: TaskId) -> &[TaskId] {
        self.slots
            .get(&id)
            .map(|slot| slot.children.as_slice())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Advances every live task by one frame.
    pub fn poll(&mut self, env: &PollEnv<'_>, services: &mut Services<'_>) -> PollReport {
        let mut report = PollReport::default();
        let ids: Vec<TaskId> = self.slots.keys().copied().collect();

        for id in ids {
            match self.slots.get(&id).map(|slot| slot.state) {
                Some(TaskState::Cancelling) => {
                    self.unwind(id, services, &mut report, TaskOutcome::Cancelled);
                }
                Some(TaskState::Running) => self.drive(id, env, services, &mut report),
                Some(TaskState::Done) | None => {}
            }
        }

        report
    }

    fn drive(
        &mut self,
        id: TaskId,
        env: &PollEnv<'_>,
        services: &mut Services<'_>,
        report: &mut PollReport,
    ) {
        let pending = self.slots.get_mut(&id).and_then(|slot| slot.wait.take());
        if let Some(mut pending) = pending {
            let Some(outcome) = self.resolve(id, &mut pending, env, services) else {
                if let Some(slot) = self.slots.get_mut(&id) {
                    slot.wait = Some(pending);
                }
                return;
            };

            if outcome == WaitOutcome::TimedOut {
                self.trip_watchdog(id, &pending, services, report);
            }

            let Some(slot) = self.slots.get_mut(&id) else {
                return;
            };
            slot.last_wait = outcome;
            if slot.finishing {
                self.complete(id, services, report);
                return;
            }
        }

        self.resume(id, env, services, report);
    }

    /// `None` while the wait is still pending.
    fn resolve(
        &self,
        id: TaskId,
        pending: &mut Pending,
        env: &PollEnv<'_>,
        services: &Services<'_>,
    ) -> Option<WaitOutcome> {
        let now = env.clock.now;
        let waited = now.saturating_sub(pending.since);

        let ready = match &mut pending.wait {
            Wait::Delay(duration) => waited >= *duration,
            Wait::Until { condition, .. } => {
                let probe = WaitProbe {
                    context: env.context,
                    now,
                    waited,
                    live_hazards: services.hazards.live_in(id),
                };
                condition(&probe)
            }
            Wait::JoinAll { children, .. } => children.iter().all(|child| self.is_done(*child)),
            Wait::HazardsCleared { .. } => services.hazards.live_in(id) == 0,
        };

        if ready {
            return Some(WaitOutcome::Ready);
        }
        match pending.deadline {
            Some(deadline) if now >= deadline => Some(WaitOutcome::TimedOut),
            _ => None,
        }
    }

    fn trip_watchdog(
        &mut self,
        id: TaskId,
        pending: &Pending,
        services: &mut Services<'_>,
        report: &mut PollReport,
    ) {
        let timeout = pending
            .deadline
            .map(|deadline| deadline.saturating_sub(pending.since))
            .unwrap_or_default();
        let label = self.label(id).unwrap_or_default().to_string();
        let fault = EncounterFault::WatchdogTimeout { timeout };
        warn!(
            target: "encounter::task",
            task = %id,
            label = %label,
            severity = fault.severity().as_str(),
            wait = ?pending.wait,
            "{fault}"
        );

        if let Wait::JoinAll { children, .. } = &pending.wait {
            for child in children {
                if !self.is_done(*child) {
                    report.extend(self.cancel_now(*child, services));
                }
            }
        }

        let purged = services.hazards.purge(id, &mut *services.spawner);
        report.watchdogs.push(WatchdogTrip {
            task: id,
            label,
            timeout,
            purged,
        });
    }

    fn resume(
        &mut self,
        id: TaskId,
        env: &PollEnv<'_>,
        services: &mut Services<'_>,
        report: &mut PollReport,
    ) {
        let Some(mut body) = self.slots.get_mut(&id).and_then(|slot| slot.body.take()) else {
            return;
        };

        let mut steps = 0;
        let result = loop {
            if steps >= env.max_steps {
                break Err(format!(
                    "exceeded {} synchronous steps in one frame",
                    env.max_steps
                ));
            }
            steps += 1;

            let mut cx = TaskCx::new(id, self, *env, services);
            let step = body.resume(&mut cx);
            let cancelling = self.state(id) == Some(TaskState::Cancelling);

            match step {
                Ok(Step::Next) if cancelling => break Ok(Step::Next),
                Ok(Step::Next) => continue,
                Ok(step) => break Ok(step),
                Err(TaskError::MissingResource(resource)) => {
                    let fault = EncounterFault::MissingResource { resource };
                    warn!(
                        target: "encounter::task",
                        task = %id,
                        label = body.label(),
                        severity = fault.severity().as_str(),
                        "{fault}; step skipped"
                    );
                    if cancelling {
                        break Ok(Step::Next);
                    }
                }
                Err(TaskError::Script(message)) => break Err(message),
            }
        };

        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        slot.body = Some(body);

        if slot.state == TaskState::Cancelling {
            if matches!(result, Ok(Step::Done)) {
                let fault = EncounterFault::CancellationRace { task: id.0 };
                warn!(
                    target: "encounter::task",
                    task = %id,
                    severity = fault.severity().as_str(),
                    "{fault}; completion discarded"
                );
            }
            self.unwind(id, services, report, TaskOutcome::Cancelled);
            return;
        }

        match result {
            Ok(Step::Wait(wait)) => {
                let deadline = wait
                    .watchdog()
                    .map(|timeout| env.clock.now + timeout.unwrap_or(env.wait_timeout));
                trace!(target: "encounter::task", task = %id, ?wait, "suspended");
                slot.wait = Some(Pending {
                    wait,
                    since: env.clock.now,
                    deadline,
                });
            }
            Ok(Step::Done) => {
                let live: Vec<TaskId> = slot.children.clone();
                if live.is_empty() {
                    self.complete(id, services, report);
                } else {
                    trace!(
                        target: "encounter::task",
                        task = %id,
                        children = live.len(),
                        "awaiting children"
                    );
                    slot.finishing = true;
                    slot.wait = Some(Pending {
                        wait: Wait::join_all(live),
                        since: env.clock.now,
                        deadline: Some(env.clock.now + env.wait_timeout),
                    });
                }
            }
            Ok(Step::Next) => {}
            Err(message) => {
                warn!(
                    target: "encounter::task",
                    task = %id,
                    label = %slot.label,
                    error = %message,
                    "task faulted; cancelling"
                );
                self.cancel(id);
                self.unwind(id, services, report, TaskOutcome::Faulted(message));
            }
        }
    }

    fn complete(&mut self, id: TaskId, services: &mut Services<'_>, report: &mut PollReport) {
        let Some(slot) = self.slots.remove(&id) else {
            return;
        };
        self.detach(id, slot.parent);
        let destroyed = services.hazards.release_scope(id, &mut *services.spawner);
        debug!(
            target: "encounter::task",
            task = %id,
            label = %slot.label,
            destroyed,
            "task completed"
        );

        report.finished.push(FinishedTask {
            id,
            parent: slot.parent,
            label: slot.label,
            outcome: TaskOutcome::Completed,
            destroyed,
        });
    }

    /// Children first, then the task's cancel hook, then its hazards.
    fn unwind(
        &mut self,
        id: TaskId,
        services: &mut Services<'_>,
        report: &mut PollReport,
        outcome: TaskOutcome,
    ) {
        let children = self.children(id).to_vec();
        for child in children {
            self.unwind(child, services, report, TaskOutcome::Cancelled);
        }

        let Some(mut slot) = self.slots.remove(&id) else {
            return;
        };
        self.detach(id, slot.parent);
        if let Some(body) = slot.body.as_mut() {
            body.on_cancel(&mut *services.effects);
        }
        let destroyed = services.hazards.release_scope(id, &mut *services.spawner);
        debug!(
            target: "encounter::task",
            task = %id,
            label = %slot.label,
            ?outcome,
            destroyed,
            "task unwound"
        );

        report.finished.push(FinishedTask {
            id,
            parent: slot.parent,
            label: slot.label,
            outcome,
            destroyed,
        });
    }

    fn detach(&mut self, id: TaskId, parent: TaskId) {
        if let Some(slot) = self.slots.get_mut(&parent) {
            slot.children.retain(|child| *child != id);
        }
    }

    pub(super) fn last_wait(&self, id: TaskId) -> WaitOutcome {
        self.slots
            .get(&id)
            .map(|slot| slot.last_wait)
            .unwrap_or_default()
    }

    /// Next draw index for a task's random stream.
    pub(super) fn next_draw(&mut self, id: TaskId) -> u32 {
        match self.slots.get_mut(&id) {
            Some(slot) => {
                let draw = slot.draws;
                slot.draws = slot.draws.wrapping_add(1);
                draw
            }
            None => 0,
        }
    }
}

impl Default for TaskArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use encounter_core::Vec2;

    use super::*;
    use crate::api::SpawnError;
    use crate::hazard::HazardHandle;
    use crate::task::from_fn;

    #[derive(Default)]
    struct Spawner {
        next: u64,
        destroyed: Vec<HazardHandle>,
    }

    impl SpawnService for Spawner {
        fn spawn(&mut self, _: &str, _: Vec2, _: Vec2) -> Result<HazardHandle, SpawnError> {
            self.next += 1;
            Ok(HazardHandle(self.next))
        }

        fn destroy(&mut self, handle: HazardHandle) {
            self.destroyed.push(handle);
        }
    }

    #[derive(Default)]
    struct Cues(Vec<String>);

    impl EffectTrigger for Cues {
        fn trigger(&mut self, cue: &str) {
            self.0.push(cue.to_string());
        }
    }

    struct Harness {
        arena: TaskArena,
        hazards: HazardRegistry,
        spawner: Spawner,
        cues: Cues,
        context: EncounterContext,
        clock: Clock,
        timeout: Duration,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                arena: TaskArena::new(),
                hazards: HazardRegistry::new(),
                spawner: Spawner::default(),
                cues: Cues::default(),
                context: EncounterContext::new(7),
                clock: Clock::new(),
                timeout: Duration::from_secs(10),
            }
        }

        fn start(&mut self, body: impl TaskBody + 'static) -> TaskId {
            self.arena
                .start(Box::new(body), TaskId::ROOT, &mut self.hazards)
        }

        fn tick(&mut self, dt: Duration) -> PollReport {
            self.clock.advance(dt);
            let env = PollEnv {
                context: &self.context,
                clock: self.clock,
                seed: 7,
                wait_timeout: self.timeout,
                max_steps: 64,
            };
            let mut services = Services {
                hazards: &mut self.hazards,
                spawner: &mut self.spawner,
                effects: &mut self.cues,
            };
            self.arena.poll(&env, &mut services)
        }
    }

    const FRAME: Duration = Duration::from_millis(100);

    #[test]
    fn delay_resumes_after_duration() {
        let mut h = Harness::new();
        let resumed = Rc::new(RefCell::new(0));
        let seen = resumed.clone();
        let mut waited = false;
        let task = h.start(from_fn("delay", move |_| {
            if waited {
                *seen.borrow_mut() += 1;
                return Ok(Step::Done);
            }
            waited = true;
            Ok(Step::Wait(Wait::delay(Duration::from_millis(250))))
        }));

        h.tick(FRAME);
        h.tick(FRAME);
        h.tick(FRAME);
        assert_eq!(*resumed.borrow(), 0);
        let report = h.tick(FRAME);

        assert_eq!(*resumed.borrow(), 1);
        assert_eq!(report.finished[0].outcome, TaskOutcome::Completed);
        assert_eq!(h.arena.state(task), Some(TaskState::Done));
    }

    #[test]
    fn cancelled_task_is_never_resumed() {
        let mut h = Harness::new();
        let resumes = Rc::new(RefCell::new(0));
        let count = resumes.clone();
        let task = h.start(from_fn("loop", move |_| {
            *count.borrow_mut() += 1;
            Ok(Step::Wait(Wait::delay(FRAME)))
        }));

        h.tick(FRAME);
        assert!(h.arena.cancel(task));
        assert_eq!(h.arena.state(task), Some(TaskState::Cancelling));
        let report = h.tick(FRAME);
        h.tick(FRAME);

        assert_eq!(*resumes.borrow(), 1);
        assert_eq!(report.finished[0].outcome, TaskOutcome::Cancelled);
        assert!(h.arena.is_empty());
    }

    #[test]
    fn cancellation_unwinds_children_before_parent() {
        let mut h = Harness::new();
        let mut forked = false;
        let parent = h.start(from_fn("parent", move |cx| {
            if !forked {
                forked = true;
                for _ in 0..2 {
                    cx.fork(from_fn("child", |cx| {
                        cx.spawn("orb", Vec2::ZERO, Vec2::ZERO)?;
                        Ok(Step::Wait(Wait::hazards_cleared()))
                    }));
                }
            }
            Ok(Step::Wait(Wait::delay(Duration::from_secs(60))))
        }));

        h.tick(FRAME);
        h.tick(FRAME);
        assert_eq!(h.hazards.live_in(parent), 2);

        h.arena.cancel(parent);
        let report = h.tick(FRAME);

        let order: Vec<u64> = report.finished.iter().map(|f| f.id.0).collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert_eq!(h.hazards.total_live(), 0);
        assert_eq!(h.spawner.destroyed.len(), 2);
    }

    #[test]
    fn watchdog_releases_blocked_wait() {
        let mut h = Harness::new();
        h.timeout = Duration::from_millis(300);
        let mut blocked = false;
        let task = h.start(from_fn("stuck", move |cx| {
            if blocked {
                assert_eq!(cx.last_wait(), WaitOutcome::TimedOut);
                return Ok(Step::Done);
            }
            blocked = true;
            cx.spawn("wall", Vec2::ZERO, Vec2::ZERO)?;
            Ok(Step::Wait(Wait::until(|_| false)))
        }));

        h.tick(FRAME);
        h.tick(FRAME);
        h.tick(FRAME);
        let report = h.tick(FRAME);

        assert_eq!(report.watchdogs.len(), 1);
        assert_eq!(report.watchdogs[0].purged, 1);
        assert_eq!(h.arena.state(task), Some(TaskState::Done));
        assert_eq!(h.hazards.total_live(), 0);
    }

    #[test]
    fn runaway_task_is_faulted() {
        let mut h = Harness::new();
        h.start(from_fn("spin", |_| Ok(Step::Next)));

        let report = h.tick(FRAME);

        assert!(matches!(
            report.finished[0].outcome,
            TaskOutcome::Faulted(_)
        ));
    }

    #[test]
    fn missing_resource_skips_step() {
        let mut h = Harness::new();
        let mut calls = 0;
        h.start(from_fn("flaky", move |_| {
            calls += 1;
            if calls == 1 {
                return Err(TaskError::MissingResource("laser".into()));
            }
            Ok(Step::Done)
        }));

        let report = h.tick(FRAME);

        assert_eq!(report.finished[0].outcome, TaskOutcome::Completed);
    }
}
