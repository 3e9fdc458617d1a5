// Player-fixture rows: the unit of prediction and selection.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ensemble::ScoringError;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// FPL position category. Declaration order is the lineup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Position {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
}

impl Position {
    pub const ALL: [Position; 4] = [
        Position::Goalkeeper,
        Position::Defender,
        Position::Midfielder,
        Position::Forward,
    ];

    /// Parse a position from an FPL `element_type` code ("1".."4"), a short
    /// code ("GK", "GKP", "DEF", "MID", "FWD") or the full name.
    pub fn from_str_pos(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "1" | "GK" | "GKP" | "GOALKEEPER" => Some(Position::Goalkeeper),
            "2" | "DEF" | "DEFENDER" => Some(Position::Defender),
            "3" | "MID" | "MIDFIELDER" => Some(Position::Midfielder),
            "4" | "FWD" | "FW" | "FORWARD" => Some(Position::Forward),
            _ => None,
        }
    }

    /// The FPL `element_type` code.
    pub fn element_type(&self) -> u8 {
        match self {
            Position::Goalkeeper => 1,
            Position::Defender => 2,
            Position::Midfielder => 3,
            Position::Forward => 4,
        }
    }

    pub fn display_str(&self) -> &'static str {
        match self {
            Position::Goalkeeper => "Goalkeeper",
            Position::Defender => "Defender",
            Position::Midfielder => "Midfielder",
            Position::Forward => "Forward",
        }
    }

    /// Index into per-position arrays (`[T; 4]`).
    pub fn index(&self) -> usize {
        self.element_type() as usize - 1
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_str())
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// A single model feature value from the opaque feature bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Category(String),
}

/// Borrowed view of a feature, covering both the named row attributes and
/// the feature bag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Feature<'a> {
    Number(f64),
    Category(&'a str),
}

impl<'a> Feature<'a> {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Feature::Number(v) => Some(*v),
            Feature::Category(_) => None,
        }
    }

    /// Categorical view. Numbers are rendered with their shortest decimal
    /// form so that `2.0` and `"2"` encode identically.
    pub fn to_category(&self) -> String {
        match self {
            Feature::Category(s) => (*s).to_string(),
            Feature::Number(v) if v.fract() == 0.0 && v.is_finite() => format!("{}", *v as i64),
            Feature::Number(v) => v.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// FeatureRow
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RowError {
    #[error("player {player_id}: cost must be greater than 0")]
    ZeroCost { player_id: u32 },

    #[error("player {player_id}: gameweek must be at least 1")]
    ZeroGameweek { player_id: u32 },

    #[error("player {player_id}: ownership {value} is not a finite percentage")]
    InvalidOwnership { player_id: u32, value: f64 },
}

/// One player at one fixture, already joined with fixture metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub player_id: u32,
    pub web_name: String,
    pub team_name: String,
    pub opponent_team_name: String,
    pub position: Position,
    pub was_home: bool,
    pub gameweek: u32,
    /// Price in tenths of a currency unit (FPL `value`, e.g. 55 = 5.5m).
    pub cost: u32,
    pub selected_by_percent: f64,
    #[serde(default)]
    pub features: BTreeMap<String, FeatureValue>,
}

impl FeatureRow {
    pub fn validate(&self) -> Result<(), RowError> {
        if self.cost == 0 {
            return Err(RowError::ZeroCost {
                player_id: self.player_id,
            });
        }
        if self.gameweek == 0 {
            return Err(RowError::ZeroGameweek {
                player_id: self.player_id,
            });
        }
        if !self.selected_by_percent.is_finite() {
            return Err(RowError::InvalidOwnership {
                player_id: self.player_id,
                value: self.selected_by_percent,
            });
        }
        Ok(())
    }

    /// Look up a feature by its FPL column name. Named attributes shadow
    /// bag entries of the same name.
    pub fn feature(&self, name: &str) -> Option<Feature<'_>> {
        match name {
            "web_name" => Some(Feature::Category(&self.web_name)),
            "team_name" => Some(Feature::Category(&self.team_name)),
            "opponent_team_name" => Some(Feature::Category(&self.opponent_team_name)),
            "was_home" => Some(Feature::Number(if self.was_home { 1.0 } else { 0.0 })),
            "gameweek" => Some(Feature::Number(f64::from(self.gameweek))),
            "value" => Some(Feature::Number(f64::from(self.cost))),
            "selected_by_percent" => Some(Feature::Number(self.selected_by_percent)),
            "element_type" => Some(Feature::Number(f64::from(self.position.element_type()))),
            _ => self.features.get(name).map(|v| match v {
                FeatureValue::Number(n) => Feature::Number(*n),
                FeatureValue::Category(s) => Feature::Category(s),
            }),
        }
    }

    /// Numeric feature lookup that reports missing and mistyped features.
    pub fn number(&self, name: &str) -> Result<f64, ScoringError> {
        match self.feature(name) {
            Some(Feature::Number(v)) => Ok(v),
            Some(Feature::Category(value)) => Err(ScoringError::InvalidFeature {
                feature: name.to_string(),
                value: value.to_string(),
            }),
            None => Err(ScoringError::MissingFeature {
                feature: name.to_string(),
            }),
        }
    }

    /// Categorical feature lookup; numbers are accepted and rendered.
    pub fn category(&self, name: &str) -> Result<String, ScoringError> {
        self.feature(name)
            .map(|f| f.to_category())
            .ok_or_else(|| ScoringError::MissingFeature {
                feature: name.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// ScoredRow
// ---------------------------------------------------------------------------

/// Per-row outcome of ensemble scoring.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    Scored(f64),
    Failed(ScoringError),
}

/// A FeatureRow together with its scoring outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRow {
    pub row: FeatureRow,
    pub outcome: ScoreOutcome,
}

impl ScoredRow {
    pub fn scored(row: FeatureRow, expected_points: f64) -> Self {
        ScoredRow {
            row,
            outcome: ScoreOutcome::Scored(expected_points),
        }
    }

    pub fn failed(row: FeatureRow, error: ScoringError) -> Self {
        ScoredRow {
            row,
            outcome: ScoreOutcome::Failed(error),
        }
    }

    /// Expected points, or `None` when scoring failed for this row.
    pub fn expected_points(&self) -> Option<f64> {
        match self.outcome {
            ScoreOutcome::Scored(points) => Some(points),
            ScoreOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ScoringError> {
        match &self.outcome {
            ScoreOutcome::Scored(_) => None,
            ScoreOutcome::Failed(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
