//! Encounter lifecycle states and outcomes.

/// Top-level states of the encounter state machine.
///
/// ```text
/// Idle -> Intro -> Battling <-> Rushing
///                  Battling <-> Interrupted
///   Intro | Battling | Rushing | Interrupted -> Dying -> Dead
/// ```
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum EncounterState {
    /// Configured, not started.
    #[default]
    Idle,
    /// Running the optional intro sequence.
    Intro,
    /// Normal pattern cycling.
    Battling,
    /// Suspended by an external system (quiz, dialogue, cutscene).
    Interrupted,
    /// A one-shot interlude preempting pattern cycling.
    Rushing,
    /// Running the optional death sequence.
    Dying,
    /// Terminal; nothing is scheduled any more.
    Dead,
}

impl EncounterState {
    /// States in which the encounter is started and not yet dying.
    pub const fn is_engaged(&self) -> bool {
        matches!(
            self,
            Self::Intro | Self::Battling | Self::Interrupted | Self::Rushing
        )
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Dead)
    }
}

/// How an encounter ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum EncounterOutcome {
    /// The boss went through `Dying` and reached `Dead`.
    Dead,
    /// The host tore the encounter down before it finished.
    Abandoned,
}

/// Why the encounter entered `Dying`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum DeathCause {
    /// Health reached zero with no floor held.
    HealthDepleted,
    /// The host called `notify_death`.
    Forced,
    /// An interrupt was resolved as a failure.
    InterruptFailed,
}

/// Result reported by the system that requested an interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum InterruptOutcome {
    Success,
    Failure,
}

/// How a pattern run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum PatternOutcome {
    Completed,
    Cancelled,
    Faulted,
}
