//! Event types for different topics.
//!
//! Every event carries the frame it was published on.

use std::time::Duration;

use encounter_core::{EncounterOutcome, EncounterState, Frame, PatternId, PatternOutcome};
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Events on the [`Topic::Phase`](super::Topic::Phase) topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhaseEvent {
    /// A threshold fired and the encounter moved to a new phase
    PhaseChanged {
        phase_index: u32,
        /// Ratio of the threshold that fired
        ratio: f32,
        frame: Frame,
    },

    /// Pattern cycling was preempted by a one-shot interlude
    RushStarted { pattern: PatternId, frame: Frame },

    /// Health is held at `floor` until the next interlude completes
    FloorHeld { floor: f32, frame: Frame },

    FloorReleased { frame: Frame },
}

/// Events on the [`Topic::Pattern`](super::Topic::Pattern) topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatternEvent {
    Started {
        pattern: PatternId,
        task: TaskId,
        frame: Frame,
    },

    Finished {
        pattern: PatternId,
        outcome: PatternOutcome,
        frame: Frame,
    },

    /// A pattern step returned an error; the pattern was force-cancelled
    Faulted {
        pattern: PatternId,
        error: String,
        frame: Frame,
    },

    /// A blocking wait hit its bound and was force-completed
    WatchdogFired {
        task: TaskId,
        timeout: Duration,
        purged: usize,
        frame: Frame,
    },

    /// Hazards destroyed by a cancellation or teardown
    HazardsPurged { count: usize, frame: Frame },
}

/// Events on the [`Topic::Lifecycle`](super::Topic::Lifecycle) topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    StateChanged {
        from: EncounterState,
        to: EncounterState,
        frame: Frame,
    },

    /// Published exactly once per encounter
    EncounterEnded {
        outcome: EncounterOutcome,
        frame: Frame,
    },
}
