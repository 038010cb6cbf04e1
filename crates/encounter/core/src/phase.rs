//! Health-driven phase progression.
//!
//! A [`PhaseController`] owns an ordered list of [`PhaseThreshold`]s with
//! strictly decreasing ratios. Each frame the runtime hands it the effective
//! health ratio; the controller fires **at most one** threshold per call, always
//! the next unfired one, and each threshold fires exactly once. A large hit that
//! drops health through several bands therefore advances one phase per frame,
//! in order, so each phase's one-shot effects apply before the next phase's.
//!
//! Context-local effects (phase index, flags, health floor) are applied here.
//! Effects on the outside world (rush, cancellation, cues, the host's health
//! clamp) are returned in the [`PhaseCrossing`] for the runtime to carry out.

use arrayvec::ArrayVec;

use crate::config::EncounterConfig;
use crate::context::{EncounterContext, EncounterFlags};
use crate::error::ConfigError;
use crate::types::PatternId;

/// Side effect of crossing a threshold.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PhaseAction {
    /// Sets encounter flags (e.g. `ENRAGED`).
    SetFlags(EncounterFlags),
    /// Clears encounter flags.
    ClearFlags(EncounterFlags),
    /// Preempts pattern cycling with a one-shot interlude.
    Rush(PatternId),
    /// Holds health at the given ratio instead of allowing death until the
    /// next interlude completes.
    HoldAtFloor(f32),
    /// Cancels the running pattern when the phase changes.
    CancelActive,
    /// Fires a fire-and-forget cue (animation, audio, VFX).
    Cue(String),
}

/// One health band boundary.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseThreshold {
    pub ratio: f32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub actions: Vec<PhaseAction>,
    #[cfg_attr(feature = "serde", serde(skip))]
    fired: bool,
}

impl PhaseThreshold {
    pub fn new(ratio: f32) -> Self {
        Self {
            ratio,
            actions: Vec::new(),
            fired: false,
        }
    }

    pub fn with_action(mut self, action: PhaseAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn is_fired(&self) -> bool {
        self.fired
    }
}

/// Record of a threshold that fired on this call.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseCrossing {
    /// Index of the threshold that fired.
    pub index: usize,
    pub ratio: f32,
    /// Phase index after the crossing.
    pub phase_index: u32,
    /// Every action of the threshold; context-local ones are already applied.
    pub actions: Vec<PhaseAction>,
    /// Set when a different threshold was requested and the request was clamped.
    pub clamped_from: Option<usize>,
}

impl PhaseCrossing {
    /// Interlude requested by this crossing, if any (the first one wins).
    pub fn rush(&self) -> Option<PatternId> {
        self.actions.iter().find_map(|a| match a {
            PhaseAction::Rush(id) => Some(*id),
            _ => None,
        })
    }

    pub fn holds_floor(&self) -> Option<f32> {
        self.actions.iter().find_map(|a| match a {
            PhaseAction::HoldAtFloor(floor) => Some(*floor),
            _ => None,
        })
    }

    pub fn cancels_active(&self) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a, PhaseAction::CancelActive))
    }

    pub fn cues(&self) -> impl Iterator<Item = &str> + '_ {
        self.actions.iter().filter_map(|a| match a {
            PhaseAction::Cue(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Fires ordered, one-shot thresholds as health decreases.
#[derive(Clone, Debug)]
pub struct PhaseController {
    thresholds: ArrayVec<PhaseThreshold, { EncounterConfig::MAX_THRESHOLDS }>,
    next: usize,
    lowest: f32,
}

impl PhaseController {
    /// Validates and takes ownership of the threshold list.
    ///
    /// Ratios must lie in `[0, 1]` and be strictly decreasing.
    pub fn new(thresholds: Vec<PhaseThreshold>) -> Result<Self, ConfigError> {
        validate(&thresholds)?;

        let mut list = ArrayVec::new();
        for mut threshold in thresholds {
            threshold.fired = false;
            list.push(threshold);
        }

        Ok(Self {
            thresholds: list,
            next: 0,
            lowest: 1.0,
        })
    }

    pub fn thresholds(&self) -> &[PhaseThreshold] {
        &self.thresholds
    }

    /// Index of the next threshold to fire.
    pub fn next_index(&self) -> Option<usize> {
        (self.next < self.thresholds.len()).then_some(self.next)
    }

    pub fn remaining(&self) -> usize {
        self.thresholds.len() - self.next
    }

    pub fn is_exhausted(&self) -> bool {
        self.next >= self.thresholds.len()
    }

    /// Lowest effective ratio observed so far.
    pub fn lowest_ratio(&self) -> f32 {
        self.lowest
    }

    /// Floor of the first unfired threshold that holds one.
    ///
    /// While this is `Some`, a scripted interlude is still owed and the boss
    /// must not die before that threshold has fired.
    pub fn pending_floor(&self) -> Option<f32> {
        self.thresholds[self.next..].iter().find_map(|threshold| {
            threshold.actions.iter().find_map(|action| match action {
                PhaseAction::HoldAtFloor(floor) => Some(*floor),
                _ => None,
            })
        })
    }

    /// Observes the effective ratio and fires the next threshold if it has been
    /// reached.
    ///
    /// Crossing is judged against the lowest ratio seen so far, so healing never
    /// un-crosses a band and thresholds left pending after a large hit keep
    /// firing on following calls, one per call.
    pub fn evaluate(&mut self, ratio: f32, ctx: &mut EncounterContext) -> Option<PhaseCrossing> {
        if ratio < self.lowest {
            self.lowest = ratio;
        }

        let next = self.next_index()?;
        if self.lowest <= self.thresholds[next].ratio {
            Some(self.fire_next(ctx, None))
        } else {
            None
        }
    }

    /// Fires threshold `index` regardless of health.
    ///
    /// Only the next unfired threshold may fire; any other index is clamped to
    /// it and reported through [`PhaseCrossing::clamped_from`]. Returns `None`
    /// when every threshold has fired.
    pub fn fire(&mut self, index: usize, ctx: &mut EncounterContext) -> Option<PhaseCrossing> {
        let next = self.next_index()?;
        let clamped_from = (index != next).then_some(index);
        Some(self.fire_next(ctx, clamped_from))
    }

    fn fire_next(
        &mut self,
        ctx: &mut EncounterContext,
        clamped_from: Option<usize>,
    ) -> PhaseCrossing {
        let index = self.next;
        let threshold = &mut self.thresholds[index];
        threshold.fired = true;
        self.next += 1;

        let phase_index = ctx.advance_phase();
        for action in &threshold.actions {
            match action {
                PhaseAction::SetFlags(flags) => ctx.insert_flags(*flags),
                PhaseAction::ClearFlags(flags) => ctx.remove_flags(*flags),
                PhaseAction::HoldAtFloor(floor) => ctx.hold_at_floor(*floor),
                PhaseAction::Rush(_) | PhaseAction::CancelActive | PhaseAction::Cue(_) => {}
            }
        }

        PhaseCrossing {
            index,
            ratio: threshold.ratio,
            phase_index,
            actions: threshold.actions.clone(),
            clamped_from,
        }
    }
}

fn validate(thresholds: &[PhaseThreshold]) -> Result<(), ConfigError> {
    if thresholds.len() > EncounterConfig::MAX_THRESHOLDS {
        return Err(ConfigError::TooManyThresholds {
            count: thresholds.len(),
            max: EncounterConfig::MAX_THRESHOLDS,
        });
    }

    let mut previous: Option<f32> = None;
    for (index, threshold) in thresholds.iter().enumerate() {
        let ratio = threshold.ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ConfigError::ThresholdOutOfRange { index, ratio });
        }
        if let Some(previous) = previous
            && ratio >= previous
        {
            return Err(ConfigError::ThresholdsNotDescending {
                index,
                previous,
                ratio,
            });
        }
        previous = Some(ratio);
    }

    Ok(())
}
