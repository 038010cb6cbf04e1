//! Phase tables authored in RON.
//!
//! ```ron
//! PhaseTable(
//!     thresholds: [
//!         (ratio: 0.7, actions: [Cue("boss_roar")]),
//!         (ratio: 0.4, actions: [SetFlags("ENRAGED"), CancelActive]),
//!         (ratio: 0.15, actions: [HoldAtFloor(0.01), Rush(9)]),
//!     ],
//! )
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use encounter_core::{PhaseController, PhaseThreshold};

use crate::api::{EncounterError, Result};

/// Threshold list for one boss, highest ratio first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTable {
    pub thresholds: Vec<PhaseThreshold>,
}

impl PhaseTable {
    pub fn into_controller(self) -> Result<PhaseController> {
        Ok(PhaseController::new(self.thresholds)?)
    }
}

/// Parses and validates a phase table.
pub fn load_phase_table(source: &str) -> Result<PhaseTable> {
    let table: PhaseTable = ron::from_str(source)
        .map_err(|e| EncounterError::PhaseTable(format!("failed to parse phase table RON: {e}")))?;

    PhaseController::new(table.thresholds.clone())?;
    Ok(table)
}

/// Load a phase table from a RON file.
///
/// # Arguments
///
/// * `path` - Path to the RON file containing a PhaseTable
pub fn load_phase_table_file(path: &Path) -> Result<PhaseTable> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        EncounterError::PhaseTable(format!("failed to read {}: {e}", path.display()))
    })?;

    load_phase_table(&content)
}

#[cfg(test)]
mod tests {
    use encounter_core::{ConfigError, EncounterFlags, PatternId, PhaseAction};

    use super::*;

    const TABLE: &str = r#"
        PhaseTable(
            thresholds: [
                (ratio: 0.7),
                (ratio: 0.4, actions: [SetFlags("ENRAGED"), CancelActive]),
                (ratio: 0.15, actions: [HoldAtFloor(0.01), Rush(9)]),
            ],
        )
    "#;

    #[test]
    fn parses_actions() {
        let table = load_phase_table(TABLE).unwrap();

        assert_eq!(table.thresholds.len(), 3);
        assert!(table.thresholds[0].actions.is_empty());
        assert_eq!(
            table.thresholds[1].actions,
            vec![
                PhaseAction::SetFlags(EncounterFlags::ENRAGED),
                PhaseAction::CancelActive
            ]
        );
        assert_eq!(
            table.thresholds[2].actions[1],
            PhaseAction::Rush(PatternId(9))
        );
    }

    #[test]
    fn rejects_unordered_thresholds() {
        let result = load_phase_table("PhaseTable(thresholds: [(ratio: 0.2), (ratio: 0.5)])");

        assert!(matches!(
            result,
            Err(EncounterError::Config(ConfigError::ThresholdsNotDescending { .. }))
        ));
    }

    #[test]
    fn reports_syntax_errors() {
        let result = load_phase_table("PhaseTable(thresholds: [(ratio: )])");

        assert!(matches!(result, Err(EncounterError::PhaseTable(_))));
    }
}
