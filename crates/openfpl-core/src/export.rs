// Scout report: the published form of a selected team, saved as JSON.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::optimizer::{Role, Team, TeamEntry};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoutReport {
    pub gameweek: u32,
    /// e.g. "1-4-4-2"
    pub formation: String,
    pub scout_team: Vec<TeamEntry>,
    pub total_cost: u32,
    pub budget_cap: u32,
    pub total_expected_points: f64,
    pub generated_at: DateTime<Utc>,
}

impl ScoutReport {
    pub fn new(gameweek: u32, team: &Team) -> Self {
        ScoutReport {
            gameweek,
            formation: team.formation().to_string(),
            scout_team: team.entries(),
            total_cost: team.total_cost(),
            budget_cap: team.budget_cap(),
            total_expected_points: team.total_expected_points(),
            generated_at: Utc::now(),
        }
    }

    pub fn file_name(gameweek: u32) -> String {
        format!("scout_team_gw{gameweek}.json")
    }
}

/// Plain-text team table for terminal output.
impl fmt::Display for ScoutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Gameweek {} ({}), cost {:.1}/{:.1}, {:.2} expected points",
            self.gameweek,
            self.formation,
            f64::from(self.total_cost) / 10.0,
            f64::from(self.budget_cap) / 10.0,
            self.total_expected_points
        )?;
        for entry in &self.scout_team {
            let role = match entry.role {
                Some(Role::Captain) => " (C)",
                Some(Role::Vice) => " (V)",
                None => "",
            };
            let venue = if entry.was_home { "H" } else { "A" };
            writeln!(
                f,
                "{:<11} {:<20} {:<16} vs {:<16} {} {:>5.1} {:>6.2}",
                entry.position.display_str(),
                format!("{}{role}", entry.web_name),
                entry.team_name,
                entry.opponent_team_name,
                venue,
                f64::from(entry.cost) / 10.0,
                entry.expected_points
            )?;
        }
        Ok(())
    }
}

/// Write `report` as pretty JSON to `dir/scout_team_gw{N}.json`, creating
/// `dir` if needed. Returns the written path.
pub fn save_report(report: &ScoutReport, dir: &Path) -> Result<PathBuf, ExportError> {
    std::fs::create_dir_all(dir).map_err(|e| ExportError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let path = dir.join(ScoutReport::file_name(report.gameweek));
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json).map_err(|e| ExportError::Io {
        path: path.clone(),
        source: e,
    })?;
    info!("Saved scout report to {}", path.display());
    Ok(path)
}
