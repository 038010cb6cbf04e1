//! Cooperative tasks: resumable units of work driven once per frame.
//!
//! A task body is resumed by the [`TaskArena`] and answers with a [`Step`]:
//! continue synchronously, suspend on a [`Wait`], or finish. Suspension points
//! are the only places a task observes cancellation; a cancelled task is never
//! resumed again. Instead it unwinds: children first (depth-first), then its
//! own hazard scope, then it is `Done`.
//!
//! # Architecture
//!
//! - [`TaskBody`]: the trait every pattern body implements
//! - [`TaskArena`]: owns running tasks, polls them in registration order
//! - [`TaskCx`]: what a body can do during a step (spawn, fork, cue, roll)
//! - [`Script`]: a sequence of steps, the usual way to write a body

mod arena;
mod cx;
mod script;

pub use arena::{
    FinishedTask, PollEnv, PollReport, Services, TaskArena, TaskOutcome, WatchdogTrip,
};
pub use cx::{TaskCx, WaitProbe};
pub use script::{FnTask, Script, from_fn};

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::{EffectTrigger, SpawnError};

/// Handle to a task; also names the task's hazard scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// Scope that every top-level task nests under. Never a running task.
    pub const ROOT: Self = Self(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ROOT {
            write!(f, "task#root")
        } else {
            write!(f, "task#{}", self.0)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Running,
    /// Cancel requested; unwinds the next time the task is polled.
    Cancelling,
    Done,
}

/// Result of one resume of a task body.
#[derive(Debug)]
pub enum Step {
    /// The step completed synchronously; resume again in the same poll.
    Next,
    /// Suspend until the wait resolves.
    Wait(Wait),
    /// The body has nothing left to do.
    Done,
}

/// Predicate evaluated once per poll while a task waits on [`Wait::Until`].
pub type Condition = Box<dyn FnMut(&WaitProbe<'_>) -> bool>;

/// Suspension request.
///
/// Every blocking wait (`Until`, `JoinAll`, `HazardsCleared`) carries a
/// watchdog; when `timeout` is `None` the encounter's default applies. On
/// timeout the wait completes anyway, unfinished children are cancelled and
/// the waiting task's remaining hazards are destroyed.
pub enum Wait {
    Delay(Duration),
    Until {
        condition: Condition,
        timeout: Option<Duration>,
    },
    JoinAll {
        children: Vec<TaskId>,
        timeout: Option<Duration>,
    },
    HazardsCleared {
        timeout: Option<Duration>,
    },
}

impl Wait {
    pub fn delay(duration: Duration) -> Self {
        Self::Delay(duration)
    }

    pub fn until(condition: impl FnMut(&WaitProbe<'_>) -> bool + 'static) -> Self {
        Self::Until {
            condition: Box::new(condition),
            timeout: None,
        }
    }

    pub fn join_all(children: Vec<TaskId>) -> Self {
        Self::JoinAll {
            children,
            timeout: None,
        }
    }

    pub fn hazards_cleared() -> Self {
        Self::HazardsCleared { timeout: None }
    }

    /// Overrides the watchdog bound. Has no effect on `Delay`.
    pub fn with_timeout(mut self, bound: Duration) -> Self {
        match &mut self {
            Self::Delay(_) => {}
            Self::Until { timeout, .. }
            | Self::JoinAll { timeout, .. }
            | Self::HazardsCleared { timeout } => *timeout = Some(bound),
        }
        self
    }

    pub(crate) fn watchdog(&self) -> Option<Option<Duration>> {
        match self {
            Self::Delay(_) => None,
            Self::Until { timeout, .. }
            | Self::JoinAll { timeout, .. }
            | Self::HazardsCleared { timeout } => Some(*timeout),
        }
    }
}

impl fmt::Debug for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delay(d) => f.debug_tuple("Delay").field(d).finish(),
            Self::Until { timeout, .. } => f
                .debug_struct("Until")
                .field("timeout", timeout)
                .finish_non_exhaustive(),
            Self::JoinAll { children, timeout } => f
                .debug_struct("JoinAll")
                .field("children", children)
                .field("timeout", timeout)
                .finish(),
            Self::HazardsCleared { timeout } => f
                .debug_struct("HazardsCleared")
                .field("timeout", timeout)
                .finish(),
        }
    }
}

/// How the task's most recent wait resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WaitOutcome {
    #[default]
    Ready,
    TimedOut,
}

/// Error returned from a task step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// Recoverable: the step is skipped and the task carries on.
    #[error("missing resource `{0}`")]
    MissingResource(String),

    /// Faults the task: it is force-cancelled and reported.
    #[error("{0}")]
    Script(String),
}

impl From<SpawnError> for TaskError {
    fn from(error: SpawnError) -> Self {
        Self::MissingResource(error.resource())
    }
}

/// A resumable unit of work.
pub trait TaskBody {
    /// Name used in logs.
    fn label(&self) -> &str {
        "task"
    }

    /// Runs the body until its next step boundary.
    fn resume(&mut self, cx: &mut TaskCx<'_, '_>) -> Result<Step, TaskError>;

    /// Called once while the task unwinds after cancellation or a fault, after
    /// its children have unwound and before its hazards are destroyed.
    fn on_cancel(&mut self, _effects: &mut dyn EffectTrigger) {}
}

impl TaskBody for Box<dyn TaskBody> {
    #[inline]
    fn label(&self) -> &str {
        (**self).label()
    }

    #[inline]
    fn resume(&mut self, cx: &mut TaskCx<'_, '_>) -> Result<Step, TaskError> {
        (**self).resume(cx)
    }

    #[inline]
    fn on_cancel(&mut self, effects: &mut dyn EffectTrigger) {
        (**self).on_cancel(effects)
    }
}
