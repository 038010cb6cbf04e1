//! Unified error types surfaced by the encounter API.
//!
//! Everything that goes wrong while an encounter is running is recovered
//! locally and logged; these errors are what a caller can observe directly
//! from builder and gateway calls.
use thiserror::Error;

use encounter_core::{ConfigError, EncounterState};

use crate::hazard::RegistryError;

pub type Result<T> = std::result::Result<T, EncounterError>;

#[derive(Debug, Error)]
pub enum EncounterError {
    #[error("encounter requires a health provider before it can start")]
    MissingHealthProvider,

    #[error("cannot {action} while the encounter is {state}")]
    InvalidTransition {
        action: &'static str,
        state: EncounterState,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid phase table: {0}")]
    PhaseTable(String),
}

impl EncounterError {
    pub(crate) fn invalid(action: &'static str, state: EncounterState) -> Self {
        Self::InvalidTransition { action, state }
    }
}
