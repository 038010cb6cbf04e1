//! Pattern definitions and next-pattern selection.
//!
//! A catalog is configured once before the encounter starts and never changes
//! afterwards. It is generic over the factory payload so this crate stays
//! independent of how the runtime represents a running task.

use std::collections::BTreeSet;

use crate::context::{EncounterContext, EncounterFlags};
use crate::error::ConfigError;
use crate::types::PatternId;

/// One attack routine the scheduler can pick.
pub struct PatternDefinition<F> {
    pub id: PatternId,
    pub name: &'static str,
    /// Phases in which the pattern joins the rotation. Empty means the pattern
    /// is scripted-only (intro, rush, death sequence) and never picked.
    pub eligible_phases: BTreeSet<u32>,
    /// Relative selection weight. Zero is treated as 1.
    pub weight: u32,
    /// Flags that must all be set for the pattern to be eligible.
    pub requires: EncounterFlags,
    /// Flags of which none may be set for the pattern to be eligible.
    pub excludes: EncounterFlags,
    pub factory: F,
}

impl<F> PatternDefinition<F> {
    pub fn new(id: PatternId, name: &'static str, factory: F) -> Self {
        Self {
            id,
            name,
            eligible_phases: BTreeSet::new(),
            weight: 1,
            requires: EncounterFlags::empty(),
            excludes: EncounterFlags::empty(),
            factory,
        }
    }

    pub fn phases(mut self, phases: impl IntoIterator<Item = u32>) -> Self {
        self.eligible_phases.extend(phases);
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn requires(mut self, flags: EncounterFlags) -> Self {
        self.requires = flags;
        self
    }

    pub fn excludes(mut self, flags: EncounterFlags) -> Self {
        self.excludes = flags;
        self
    }

    pub fn is_scripted_only(&self) -> bool {
        self.eligible_phases.is_empty()
    }

    /// Whether the pattern may be picked for the current phase and flags.
    pub fn is_eligible(&self, ctx: &EncounterContext) -> bool {
        self.eligible_phases.contains(&ctx.phase_index())
            && ctx.flags().contains(self.requires)
            && !ctx.flags().intersects(self.excludes)
    }
}

impl<F> core::fmt::Debug for PatternDefinition<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PatternDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("eligible_phases", &self.eligible_phases)
            .field("weight", &self.weight)
            .field("requires", &self.requires)
            .field("excludes", &self.excludes)
            .finish_non_exhaustive()
    }
}

/// Immutable set of pattern definitions, kept in insertion order.
pub struct PatternCatalog<F> {
    patterns: Vec<PatternDefinition<F>>,
}

impl<F> PatternCatalog<F> {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Builds a catalog, rejecting duplicate ids.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = PatternDefinition<F>>,
    ) -> Result<Self, ConfigError> {
        let mut catalog = Self::new();
        for definition in definitions {
            catalog.insert(definition)?;
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, definition: PatternDefinition<F>) -> Result<(), ConfigError> {
        if self.contains(definition.id) {
            return Err(ConfigError::DuplicatePattern(definition.id));
        }
        self.patterns.push(definition);
        Ok(())
    }

    pub fn get(&self, id: PatternId) -> Option<&PatternDefinition<F>> {
        self.patterns.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: PatternId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatternDefinition<F>> + '_ {
        self.patterns.iter()
    }

    /// Patterns eligible for the current phase and flags, in catalog order.
    pub fn eligible<'a>(
        &'a self,
        ctx: &'a EncounterContext,
    ) -> impl Iterator<Item = &'a PatternDefinition<F>> + 'a {
        self.patterns.iter().filter(move |p| p.is_eligible(ctx))
    }

    /// Picks the next pattern to run.
    ///
    /// The last completed pattern is excluded while at least two eligible
    /// patterns exist; with a single candidate it may repeat. The pick is
    /// weighted by [`PatternDefinition::weight`] using the context RNG, which
    /// is uniform when all weights are equal. Returns `None` when nothing is
    /// eligible.
    pub fn select_next(&self, ctx: &mut EncounterContext) -> Option<PatternId> {
        let mut candidates: Vec<(PatternId, u32)> =
            self.eligible(ctx).map(|p| (p.id, p.weight.max(1))).collect();

        if candidates.len() >= 2
            && let Some(last) = ctx.last_pattern_id()
        {
            candidates.retain(|(id, _)| *id != last);
        }

        match candidates.as_slice() {
            [] => None,
            [(only, _)] => Some(*only),
            _ => {
                let total = candidates
                    .iter()
                    .fold(0u32, |total, (_, weight)| total.saturating_add(*weight));
                let mut roll = ctx.rng_mut().below(total);
                for (id, weight) in &candidates {
                    if roll < *weight {
                        return Some(*id);
                    }
                    roll -= weight;
                }
                candidates.last().map(|(id, _)| *id)
            }
        }
    }
}

impl<F> Default for PatternCatalog<F> {
    fn default() -> Self {
        Self::new()
    }
}
