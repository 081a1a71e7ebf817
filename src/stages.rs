//! Order stages and the two progression tables that move orders through them.
//!
//! - [`FULL_PROGRESSION`] backs the explicit "advance to next status" action and
//!   rejects any step past `completed`.
//! - [`AUTO_ADVANCE_PROGRESSION`] backs timer-driven advances. It skips
//!   `approved`, stops at `ready` and clamps there instead of failing.

use rusqlite::types::{ToSql, ToSqlOutput};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::data_helpers::normalize_label;
use crate::error::OrderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Approved,
    Washing,
    Drying,
    Folding,
    Ready,
    Completed,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Pending,
        Stage::Approved,
        Stage::Washing,
        Stage::Drying,
        Stage::Folding,
        Stage::Ready,
        Stage::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Approved => "approved",
            Stage::Washing => "washing",
            Stage::Drying => "drying",
            Stage::Folding => "folding",
            Stage::Ready => "ready",
            Stage::Completed => "completed",
        }
    }

    /// Lenient parse of a stored stage label. Unknown labels yield `None`.
    pub fn parse(raw: &str) -> Option<Stage> {
        let label = normalize_label(raw);
        Stage::ALL.into_iter().find(|s| s.as_str() == label)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for Stage {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromStr for Stage {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::parse(s).ok_or_else(|| OrderError::InvalidArgument(format!("unknown stage '{s}'")))
    }
}

/// What a progression does when asked to step past its last stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtEnd {
    Reject,
    Clamp,
}

/// Why a progression could not produce a next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepError {
    /// The current stage is not part of this progression.
    Unrecognized,
    /// The current stage is the last one and the progression rejects.
    Exhausted,
}

/// A named, ordered transition table.
#[derive(Debug)]
pub struct Progression {
    pub name: &'static str,
    pub stages: &'static [Stage],
    pub at_end: AtEnd,
}

pub const FULL_PROGRESSION: Progression = Progression {
    name: "full",
    stages: &[
        Stage::Pending,
        Stage::Approved,
        Stage::Washing,
        Stage::Drying,
        Stage::Folding,
        Stage::Ready,
        Stage::Completed,
    ],
    at_end: AtEnd::Reject,
};

pub const AUTO_ADVANCE_PROGRESSION: Progression = Progression {
    name: "auto_advance",
    stages: &[
        Stage::Pending,
        Stage::Washing,
        Stage::Drying,
        Stage::Folding,
        Stage::Ready,
    ],
    at_end: AtEnd::Clamp,
};

impl Progression {
    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn last(&self) -> Stage {
        self.stages[self.stages.len() - 1]
    }

    pub fn next(&self, current: Stage) -> Result<Stage, StepError> {
        let idx = self
            .stages
            .iter()
            .position(|s| *s == current)
            .ok_or(StepError::Unrecognized)?;
        match self.stages.get(idx + 1) {
            Some(next) => Ok(*next),
            None => match self.at_end {
                AtEnd::Reject => Err(StepError::Exhausted),
                AtEnd::Clamp => Ok(current),
            },
        }
    }

    /// Every legal `(from, to)` pair, including the clamp self-loop.
    pub fn transitions(&self) -> Vec<(Stage, Stage)> {
        self.stages
            .iter()
            .filter_map(|s| self.next(*s).ok().map(|n| (*s, n)))
            .collect()
    }
}

/// Stage the auto-advance progression starts from: `process_stage` when it is
/// a recognized auto-advance stage, else `status`, else `pending`.
pub fn auto_advance_origin(status: &str, process_stage: Option<&str>) -> Stage {
    process_stage
        .into_iter()
        .chain(std::iter::once(status))
        .filter_map(Stage::parse)
        .find(|s| AUTO_ADVANCE_PROGRESSION.contains(*s))
        .unwrap_or(Stage::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_progression_transitions() {
        assert_eq!(
            FULL_PROGRESSION.transitions(),
            vec![
                (Stage::Pending, Stage::Approved),
                (Stage::Approved, Stage::Washing),
                (Stage::Washing, Stage::Drying),
                (Stage::Drying, Stage::Folding),
                (Stage::Folding, Stage::Ready),
                (Stage::Ready, Stage::Completed),
            ]
        );
        assert_eq!(
            FULL_PROGRESSION.next(Stage::Completed),
            Err(StepError::Exhausted)
        );
    }

    #[test]
    fn test_auto_progression_transitions_clamp_at_ready() {
        assert_eq!(
            AUTO_ADVANCE_PROGRESSION.transitions(),
            vec![
                (Stage::Pending, Stage::Washing),
                (Stage::Washing, Stage::Drying),
                (Stage::Drying, Stage::Folding),
                (Stage::Folding, Stage::Ready),
                (Stage::Ready, Stage::Ready),
            ]
        );
        assert_eq!(
            AUTO_ADVANCE_PROGRESSION.next(Stage::Approved),
            Err(StepError::Unrecognized)
        );
        assert_eq!(AUTO_ADVANCE_PROGRESSION.last(), Stage::Ready);
    }

    #[test]
    fn test_full_progression_reaches_completed_in_six_steps() {
        let mut stage = Stage::Pending;
        for _ in 0..6 {
            stage = FULL_PROGRESSION.next(stage).unwrap();
        }
        assert_eq!(stage, Stage::Completed);
        assert!(FULL_PROGRESSION.next(stage).is_err());
    }

    #[test]
    fn test_stage_parse_is_lenient() {
        assert_eq!(Stage::parse(" Washing "), Some(Stage::Washing));
        assert_eq!(Stage::parse("READY"), Some(Stage::Ready));
        assert_eq!(Stage::parse("cancelled"), None);
        assert!("spinning".parse::<Stage>().is_err());
        assert_eq!("drying".parse::<Stage>().unwrap(), Stage::Drying);
    }

    #[test]
    fn test_auto_advance_origin() {
        assert_eq!(auto_advance_origin("pending", None), Stage::Pending);
        assert_eq!(auto_advance_origin("pending", Some("drying")), Stage::Drying);
        assert_eq!(auto_advance_origin("folding", Some("")), Stage::Folding);
        assert_eq!(auto_advance_origin("washing", Some("bogus")), Stage::Washing);
        assert_eq!(auto_advance_origin("approved", Some("approved")), Stage::Pending);
        assert_eq!(auto_advance_origin("mystery", None), Stage::Pending);
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(Stage::Folding).unwrap(),
            serde_json::json!("folding")
        );
    }
}
