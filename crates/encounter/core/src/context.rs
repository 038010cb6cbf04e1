//! Encounter-wide state shared between the state machine and pattern bodies.
//!
//! The context has a single writer (the runtime's state machine and phase
//! controller, between pattern resumes) and many readers (pattern bodies see
//! it through a shared reference), so no synchronisation is needed inside a
//! frame.
use bitflags::bitflags;

use crate::rng::EncounterRng;
use crate::types::PatternId;

bitflags! {
    /// Phase flags that alter pattern eligibility and encounter behavior.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[cfg_attr(feature = "serde", serde(transparent))]
    pub struct EncounterFlags: u8 {
        const ENRAGED     = 1 << 0;
        const RUSH_DONE   = 1 << 1;
        const LOW_PHASE   = 1 << 2;
        const INTERRUPTED = 1 << 3;
    }
}

/// Mutable encounter state, created at start and dropped when the encounter
/// reaches `Dead`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EncounterContext {
    health_ratio: f32,
    last_pattern_id: Option<PatternId>,
    phase_index: u32,
    flags: EncounterFlags,
    health_floor: Option<f32>,
    rng: EncounterRng,
}

impl EncounterContext {
    pub fn new(seed: u64) -> Self {
        Self {
            health_ratio: 1.0,
            last_pattern_id: None,
            phase_index: 0,
            flags: EncounterFlags::empty(),
            health_floor: None,
            rng: EncounterRng::new(seed),
        }
    }

    /// Effective health ratio observed on the latest frame, in `[0, 1]`.
    pub fn health_ratio(&self) -> f32 {
        self.health_ratio
    }

    /// Pattern that last ran to normal completion.
    pub fn last_pattern_id(&self) -> Option<PatternId> {
        self.last_pattern_id
    }

    pub fn phase_index(&self) -> u32 {
        self.phase_index
    }

    pub fn flags(&self) -> EncounterFlags {
        self.flags
    }

    pub fn has_flags(&self, flags: EncounterFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Floor the effective health ratio is held at, if any.
    pub fn health_floor(&self) -> Option<f32> {
        self.health_floor
    }

    pub fn rng(&self) -> &EncounterRng {
        &self.rng
    }

    pub fn rng_mut(&mut self) -> &mut EncounterRng {
        &mut self.rng
    }

    /// Records the raw ratio reported by the host and returns the effective one.
    ///
    /// The raw value is clamped to `[0, 1]` (NaN reads as 0); while a floor is
    /// held the effective ratio never drops below it.
    pub fn observe_health(&mut self, raw: f32) -> f32 {
        let mut ratio = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) };
        if let Some(floor) = self.health_floor {
            ratio = ratio.max(floor);
        }
        self.health_ratio = ratio;
        ratio
    }

    /// Moves to the next phase and returns the new index.
    pub fn advance_phase(&mut self) -> u32 {
        self.phase_index += 1;
        self.phase_index
    }

    pub fn insert_flags(&mut self, flags: EncounterFlags) {
        self.flags.insert(flags);
    }

    pub fn remove_flags(&mut self, flags: EncounterFlags) {
        self.flags.remove(flags);
    }

    /// Commits a pattern as the last one picked. Called on normal completion only.
    pub fn record_completed_pattern(&mut self, id: PatternId) {
        self.last_pattern_id = Some(id);
    }

    /// Holds the effective ratio at `floor` until released.
    pub fn hold_at_floor(&mut self, floor: f32) {
        let floor = floor.clamp(0.0, 1.0);
        self.health_floor = Some(floor);
        self.health_ratio = self.health_ratio.max(floor);
    }

    /// Releases a held floor, returning it.
    pub fn release_floor(&mut self) -> Option<f32> {
        self.health_floor.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_health_clamps_raw_values() {
        let mut ctx = EncounterContext::new(0);

        assert_eq!(ctx.observe_health(1.5), 1.0);
        assert_eq!(ctx.observe_health(-0.2), 0.0);
        assert_eq!(ctx.observe_health(f32::NAN), 0.0);
    }

    #[test]
    fn floor_holds_effective_ratio() {
        let mut ctx = EncounterContext::new(0);
        ctx.hold_at_floor(0.01);

        assert_eq!(ctx.observe_health(0.0), 0.01);
        assert_eq!(ctx.release_floor(), Some(0.01));
        assert_eq!(ctx.observe_health(0.0), 0.0);
    }

    #[test]
    fn phase_index_only_moves_forward() {
        let mut ctx = EncounterContext::new(0);
        assert_eq!(ctx.advance_phase(), 1);
        assert_eq!(ctx.advance_phase(), 2);
        assert_eq!(ctx.phase_index(), 2);
    }
}
