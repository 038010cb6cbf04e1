//! Sequential task bodies built from small steps.
//!
//! A [`Script`] runs its steps in order; synchronous steps (actions, spawns,
//! cues, forks) take one step each and suspending steps hand a [`Wait`] to the
//! arena. Most pattern bodies are written as scripts:
//!
//! ```ignore
//! Script::new("fan")
//!     .cue("boss_windup")
//!     .delay(Duration::from_millis(400))
//!     .repeat(3, || Script::new("volley").spawn("orb", origin, dir).delay(gap))
//!     .wait_hazards_cleared()
//! ```

use std::mem;
use std::time::Duration;

use encounter_core::Vec2;

use super::cx::{TaskCx, WaitProbe};
use super::{Step, TaskBody, TaskError, TaskId, Wait};
use crate::api::EffectTrigger;

type Action = Box<dyn FnMut(&mut TaskCx<'_, '_>) -> Result<(), TaskError>>;

enum Op {
    Action(Action),
    Spawn {
        kind: String,
        position: Vec2,
        velocity: Vec2,
    },
    Cue(String),
    /// Taken when reached.
    Wait(Option<Wait>),
    /// Taken when reached.
    Fork(Vec<Box<dyn TaskBody>>),
    /// Joins every child forked by this script since the previous join.
    Join {
        timeout: Option<Duration>,
    },
    Repeat {
        remaining: u32,
        make: Box<dyn Fn() -> Script>,
        current: Option<Box<Script>>,
    },
    Run(Box<dyn TaskBody>),
}

/// Ordered list of steps that forms a task body.
pub struct Script {
    label: String,
    ops: Vec<Op>,
    cursor: usize,
    forked: Vec<TaskId>,
    cancel_cue: Option<String>,
}

impl Script {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ops: Vec::new(),
            cursor: 0,
            forked: Vec::new(),
            cancel_cue: None,
        }
    }

    /// Runs arbitrary code as one synchronous step.
    pub fn then<F>(mut self, action: F) -> Self
    where
        F: FnMut(&mut TaskCx<'_, '_>) -> Result<(), TaskError> + 'static,
    {
        self.ops.push(Op::Action(Box::new(action)));
        self
    }

    /// Spawns a hazard owned by the running task. A failed spawn is logged
    /// and skipped.
    pub fn spawn(mut self, kind: impl Into<String>, position: Vec2, velocity: Vec2) -> Self {
        self.ops.push(Op::Spawn {
            kind: kind.into(),
            position,
            velocity,
        });
        self
    }

    pub fn cue(mut self, name: impl Into<String>) -> Self {
        self.ops.push(Op::Cue(name.into()));
        self
    }

    pub fn wait(mut self, wait: Wait) -> Self {
        self.ops.push(Op::Wait(Some(wait)));
        self
    }

    pub fn delay(self, duration: Duration) -> Self {
        self.wait(Wait::delay(duration))
    }

    pub fn wait_until(self, condition: impl FnMut(&WaitProbe<'_>) -> bool + 'static) -> Self {
        self.wait(Wait::until(condition))
    }

    pub fn wait_until_within(
        self,
        condition: impl FnMut(&WaitProbe<'_>) -> bool + 'static,
        timeout: Duration,
    ) -> Self {
        self.wait(Wait::until(condition).with_timeout(timeout))
    }

    /// Waits until every hazard this task (and its children) spawned is gone.
    pub fn wait_hazards_cleared(self) -> Self {
        self.wait(Wait::hazards_cleared())
    }

    pub fn wait_hazards_cleared_within(self, timeout: Duration) -> Self {
        self.wait(Wait::hazards_cleared().with_timeout(timeout))
    }

    /// Starts a child task; see [`Script::join`].
    pub fn fork(mut self, body: impl TaskBody + 'static) -> Self {
        match self.ops.last_mut() {
            Some(Op::Fork(bodies)) => bodies.push(Box::new(body)),
            _ => self.ops.push(Op::Fork(vec![Box::new(body)])),
        }
        self
    }

    /// Suspends until every child forked since the previous join has finished.
    pub fn join(mut self) -> Self {
        self.ops.push(Op::Join { timeout: None });
        self
    }

    pub fn join_within(mut self, timeout: Duration) -> Self {
        self.ops.push(Op::Join {
            timeout: Some(timeout),
        });
        self
    }

    /// Runs a freshly built script `times` times in a row.
    pub fn repeat(mut self, times: u32, make: impl Fn() -> Script + 'static) -> Self {
        self.ops.push(Op::Repeat {
            remaining: times,
            make: Box::new(make),
            current: None,
        });
        self
    }

    /// Runs another body inline, on this task, until it is done.
    pub fn run(mut self, body: impl TaskBody + 'static) -> Self {
        self.ops.push(Op::Run(Box::new(body)));
        self
    }

    /// Cue fired if the task is cancelled before it finishes.
    pub fn on_cancel_cue(mut self, cue: impl Into<String>) -> Self {
        self.cancel_cue = Some(cue.into());
        self
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.ops.len()
    }
}

impl TaskBody for Script {
    fn label(&self) -> &str {
        &self.label
    }

    fn resume(&mut self, cx: &mut TaskCx<'_, '_>) -> Result<Step, TaskError> {
        let Some(op) = self.ops.get_mut(self.cursor) else {
            return Ok(Step::Done);
        };

        match op {
            Op::Action(action) => {
                self.cursor += 1;
                action(cx)?;
                Ok(Step::Next)
            }
            Op::Spawn {
                kind,
                position,
                velocity,
            } => {
                self.cursor += 1;
                cx.spawn(kind, *position, *velocity)?;
                Ok(Step::Next)
            }
            Op::Cue(name) => {
                self.cursor += 1;
                cx.cue(name);
                Ok(Step::Next)
            }
            Op::Wait(wait) => {
                self.cursor += 1;
                Ok(wait.take().map_or(Step::Next, Step::Wait))
            }
            Op::Fork(bodies) => {
                self.cursor += 1;
                for body in bodies.drain(..) {
                    let child = cx.fork_boxed(body);
                    self.forked.push(child);
                }
                Ok(Step::Next)
            }
            Op::Join { timeout } => {
                self.cursor += 1;
                let mut wait = Wait::join_all(mem::take(&mut self.forked));
                if let Some(timeout) = timeout {
                    wait = wait.with_timeout(*timeout);
                }
                Ok(Step::Wait(wait))
            }
            Op::Repeat {
                remaining,
                make,
                current,
            } => {
                if current.is_none() {
                    if *remaining == 0 {
                        self.cursor += 1;
                        return Ok(Step::Next);
                    }
                    *remaining -= 1;
                    *current = Some(Box::new(make()));
                }
                let Some(script) = current.as_mut() else {
                    return Ok(Step::Next);
                };

                match script.resume(cx)? {
                    Step::Done => {
                        *current = None;
                        Ok(Step::Next)
                    }
                    step => Ok(step),
                }
            }
            Op::Run(body) => match body.resume(cx)? {
                Step::Done => {
                    self.cursor += 1;
                    Ok(Step::Next)
                }
                step => Ok(step),
            },
        }
    }

    fn on_cancel(&mut self, effects: &mut dyn EffectTrigger) {
        match self.ops.get_mut(self.cursor) {
            Some(Op::Repeat {
                current: Some(script),
                ..
            }) => script.on_cancel(effects),
            Some(Op::Run(body)) => body.on_cancel(effects),
            _ => {}
        }
        if let Some(cue) = &self.cancel_cue {
            effects.trigger(cue);
        }
    }
}

/// Task body backed by a closure, resumed once per step.
pub struct FnTask<F> {
    label: String,
    step: F,
}

/// Wraps a closure as a [`TaskBody`].
pub fn from_fn<F>(label: impl Into<String>, step: F) -> FnTask<F>
where
    F: FnMut(&mut TaskCx<'_, '_>) -> Result<Step, TaskError>,
{
    FnTask {
        label: label.into(),
        step,
    }
}

impl<F> TaskBody for FnTask<F>
where
    F: FnMut(&mut TaskCx<'_, '_>) -> Result<Step, TaskError>,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn resume(&mut self, cx: &mut TaskCx<'_, '_>) -> Result<Step, TaskError> {
        (self.step)(cx)
    }
}
