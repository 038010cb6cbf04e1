//! Common error infrastructure for encounter-core.
//!
//! Two families live here:
//!
//! - [`EncounterFault`]: conditions detected while the encounter runs. All of
//!   them are recovered locally by the runtime (logged, then skipped, clamped
//!   or forced to completion); none aborts gameplay.
//! - [`ConfigError`]: problems with pattern catalogs and phase tables, detected
//!   before the encounter starts.

use core::time::Duration;

use crate::types::PatternId;

/// Severity level of an error, used for categorization and recovery strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Expected at runtime; the encounter carries on.
    ///
    /// Examples: watchdog timeout, unavailable spawn kind
    Recoverable,

    /// A caller asked for something the current state does not allow.
    ///
    /// Examples: running a pattern while another is active
    Validation,

    /// Configuration or bookkeeping inconsistency that indicates a bug.
    ///
    /// Examples: threshold fired out of order, completion after cancel
    Internal,

    /// The encounter cannot start or continue.
    Fatal,
}

impl ErrorSeverity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recoverable => "recoverable",
            Self::Validation => "validation",
            Self::Internal => "internal",
            Self::Fatal => "fatal",
        }
    }

    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable)
    }

    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal | Self::Fatal)
    }
}

/// Locally recovered faults raised while an encounter runs.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum EncounterFault {
    /// A pattern step referenced a spawn kind, position or pattern that is not available.
    #[error("missing resource `{resource}`; step skipped")]
    MissingResource { resource: String },

    /// A pattern was started while another top-level pattern was still running.
    #[error("cannot run {requested}: {active} is still running")]
    ConcurrencyViolation {
        requested: PatternId,
        active: PatternId,
    },

    /// A threshold other than the next unfired one was asked to fire.
    #[error("threshold {requested} fired out of order; clamped to {expected}")]
    InvalidPhaseOrder { requested: usize, expected: usize },

    /// A task reported completion after it had been marked for cancellation.
    #[error("task {task} completed after cancellation was requested; completion discarded")]
    CancellationRace { task: u64 },

    /// A blocking wait exceeded its watchdog bound and was forced to complete.
    #[error("wait exceeded watchdog bound of {timeout:?}; forced completion")]
    WatchdogTimeout { timeout: Duration },
}

impl EncounterFault {
    pub const fn severity(&self) -> ErrorSeverity {
        match self {
            Self::MissingResource { .. } | Self::WatchdogTimeout { .. } => {
                ErrorSeverity::Recoverable
            }
            Self::ConcurrencyViolation { .. } => ErrorSeverity::Validation,
            Self::InvalidPhaseOrder { .. } | Self::CancellationRace { .. } => {
                ErrorSeverity::Internal
            }
        }
    }
}

/// Invalid encounter configuration.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{count} thresholds configured; at most {max} are supported")]
    TooManyThresholds { count: usize, max: usize },

    #[error("threshold {index} has ratio {ratio}, expected a value in [0, 1]")]
    ThresholdOutOfRange { index: usize, ratio: f32 },

    #[error("threshold {index} ratio {ratio} is not below the previous ratio {previous}")]
    ThresholdsNotDescending {
        index: usize,
        previous: f32,
        ratio: f32,
    },

    #[error("pattern catalog is empty")]
    EmptyCatalog,

    #[error("{0} is defined more than once")]
    DuplicatePattern(PatternId),

    #[error("{usage} references unknown {id}")]
    UnknownPattern { id: PatternId, usage: &'static str },
}
