use core::time::Duration;

use crate::types::PatternId;

/// Encounter configuration constants and tunable parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EncounterConfig {
    /// Seed for every random draw in the encounter.
    pub seed: u64,
    /// Watchdog bound applied to blocking waits that do not carry their own.
    pub wait_timeout: Duration,
    /// Synchronous steps a task may take in one poll before it is faulted.
    pub max_steps_per_poll: u32,
    /// Idle time between the end of one pattern and the start of the next.
    pub pattern_gap: Duration,
    /// Scripted pattern run while in `Intro`.
    pub intro: Option<PatternId>,
    /// Scripted pattern run while in `Dying`.
    pub death_sequence: Option<PatternId>,
}

impl EncounterConfig {
    // ===== compile-time constants used as type parameters =====
    pub const MAX_THRESHOLDS: usize = 8;

    // ===== runtime-tunable defaults =====
    pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_MAX_STEPS_PER_POLL: u32 = 64;

    pub fn new() -> Self {
        Self {
            seed: 0,
            wait_timeout: Self::DEFAULT_WAIT_TIMEOUT,
            max_steps_per_poll: Self::DEFAULT_MAX_STEPS_PER_POLL,
            pattern_gap: Duration::ZERO,
            intro: None,
            death_sequence: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_pattern_gap(mut self, pattern_gap: Duration) -> Self {
        self.pattern_gap = pattern_gap;
        self
    }

    pub fn with_intro(mut self, intro: PatternId) -> Self {
        self.intro = Some(intro);
        self
    }

    pub fn with_death_sequence(mut self, death_sequence: PatternId) -> Self {
        self.death_sequence = Some(death_sequence);
        self
    }
}

impl Default for EncounterConfig {
    fn default() -> Self {
        Self::new()
    }
}
