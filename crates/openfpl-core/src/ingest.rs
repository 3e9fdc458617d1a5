// Upload ingestion: already-joined player-fixture CSV into FeatureRows, cut
// to each player's recent fixtures.
//
// Named columns (with their common aliases) fill the FeatureRow attributes.
// Every other column lands in the feature bag: numeric when it parses as a
// finite number, categorical otherwise. Malformed rows are skipped with a
// warning rather than failing the upload.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::{SeasonConfig, TargetGameweek};
use crate::player::{FeatureRow, FeatureValue, Position};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("upload is missing required column `{column}`")]
    MissingColumn { column: &'static str },

    #[error("upload contains no usable rows")]
    Empty,
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

const PLAYER_ID: &[&str] = &["element", "player_id", "id"];
const WEB_NAME: &[&str] = &["web_name", "name"];
const TEAM_NAME: &[&str] = &["team_name", "team"];
const OPPONENT: &[&str] = &["opponent_team_name", "opponent_team", "opponent"];
const POSITION: &[&str] = &["element_type", "position"];
const WAS_HOME: &[&str] = &["was_home", "is_home"];
const GAMEWEEK: &[&str] = &["gameweek", "GW", "round"];
const COST: &[&str] = &["value", "cost", "now_cost"];
const OWNERSHIP: &[&str] = &["selected_by_percent", "ownership"];

/// Header positions of the named attributes.
#[derive(Debug)]
struct Columns {
    player_id: usize,
    web_name: usize,
    team_name: usize,
    opponent: usize,
    position: usize,
    was_home: usize,
    gameweek: usize,
    cost: usize,
    ownership: Option<usize>,
    /// Everything else, by header name.
    extra: Vec<(usize, String)>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, IngestError> {
        let names: Vec<&str> = headers.iter().map(str::trim).collect();
        let find = |aliases: &[&str]| names.iter().position(|h| aliases.contains(h));
        let require = |aliases: &[&'static str]| {
            find(aliases).ok_or(IngestError::MissingColumn { column: aliases[0] })
        };

        let mut columns = Columns {
            player_id: require(PLAYER_ID)?,
            web_name: require(WEB_NAME)?,
            team_name: require(TEAM_NAME)?,
            opponent: require(OPPONENT)?,
            position: require(POSITION)?,
            was_home: require(WAS_HOME)?,
            gameweek: require(GAMEWEEK)?,
            cost: require(COST)?,
            ownership: find(OWNERSHIP),
            extra: Vec::new(),
        };

        let named = [
            Some(columns.player_id),
            Some(columns.web_name),
            Some(columns.team_name),
            Some(columns.opponent),
            Some(columns.position),
            Some(columns.was_home),
            Some(columns.gameweek),
            Some(columns.cost),
            columns.ownership,
        ];
        columns.extra = names
            .iter()
            .enumerate()
            .filter(|(i, name)| !name.is_empty() && !named.contains(&Some(*i)))
            .map(|(i, name)| (i, name.to_string()))
            .collect();
        Ok(columns)
    }

    fn parse(&self, record: &csv::StringRecord) -> Result<FeatureRow, String> {
        let field = |i: usize| record.get(i).map(str::trim).unwrap_or("");

        let position_raw = field(self.position);
        let position = Position::from_str_pos(position_raw)
            .ok_or_else(|| format!("unknown position '{position_raw}'"))?;

        let mut features = BTreeMap::new();
        for (i, name) in &self.extra {
            let raw = field(*i);
            if raw.is_empty() {
                continue;
            }
            let value = match raw.parse::<f64>() {
                Ok(n) if n.is_finite() => FeatureValue::Number(n),
                _ => FeatureValue::Category(raw.to_string()),
            };
            features.insert(name.clone(), value);
        }

        let ownership = match self.ownership.map(field) {
            Some(raw) if !raw.is_empty() => parse_number("selected_by_percent", raw)?,
            _ => 0.0,
        };

        Ok(FeatureRow {
            player_id: parse_count("element", field(self.player_id))?,
            web_name: non_empty("web_name", field(self.web_name))?,
            team_name: non_empty("team_name", field(self.team_name))?,
            opponent_team_name: non_empty("opponent_team_name", field(self.opponent))?,
            position,
            was_home: parse_bool(field(self.was_home))?,
            gameweek: parse_count("gameweek", field(self.gameweek))?,
            cost: parse_count("value", field(self.cost))?,
            selected_by_percent: ownership,
            features,
        })
    }
}

fn non_empty(column: &str, raw: &str) -> Result<String, String> {
    if raw.is_empty() {
        Err(format!("empty {column}"))
    } else {
        Ok(raw.to_string())
    }
}

fn parse_number(column: &str, raw: &str) -> Result<f64, String> {
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(format!("invalid {column} '{raw}'")),
    }
}

/// Whole, non-negative number. Accepts float spellings such as "10.0".
fn parse_count(column: &str, raw: &str) -> Result<u32, String> {
    let n = parse_number(column, raw)?;
    if n < 0.0 || n.fract() != 0.0 || n > f64::from(u32::MAX) {
        return Err(format!("invalid {column} '{raw}'"));
    }
    Ok(n as u32)
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(format!("invalid was_home '{raw}'")),
    }
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

/// Read rows from any CSV source. Rows whose gameweek falls outside
/// `1..=season_gameweeks` are dropped.
pub fn load_rows_from_reader<R: Read>(
    rdr: R,
    season_gameweeks: u32,
) -> Result<Vec<FeatureRow>, IngestError> {
    let csv_err = |source| IngestError::Csv {
        path: "upload".into(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(rdr);
    let headers = reader.headers().map_err(csv_err)?.clone();
    let columns = Columns::from_headers(&headers)?;

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("skipping malformed row {}: {}", line + 1, e);
                continue;
            }
        };
        let row = match columns.parse(&record) {
            Ok(row) => row,
            Err(reason) => {
                warn!("skipping row {}: {}", line + 1, reason);
                continue;
            }
        };
        if let Err(e) = row.validate() {
            warn!("skipping row {}: {}", line + 1, e);
            continue;
        }
        if row.gameweek > season_gameweeks {
            debug!(
                "skipping player {}: gameweek {} beyond season end",
                row.player_id, row.gameweek
            );
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Load rows from a CSV file on disk.
pub fn load_rows(path: &Path, season_gameweeks: u32) -> Result<Vec<FeatureRow>, IngestError> {
    let file = std::fs::File::open(path).map_err(|e| IngestError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_rows_from_reader(file, season_gameweeks).map_err(|e| match e {
        IngestError::Csv { source, .. } => IngestError::Csv {
            path: path.display().to_string(),
            source,
        },
        other => other,
    })
}

// ---------------------------------------------------------------------------
// Upload batch
// ---------------------------------------------------------------------------

/// Each player's recent fixtures, keyed by the gameweek they are scouted
/// for. Ready for `Scout::upload`.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadBatch {
    pub gameweek: u32,
    /// Grouped by player in first-appearance order, most recent fixture
    /// first, every row carrying the target gameweek.
    pub rows: Vec<FeatureRow>,
}

impl UploadBatch {
    /// Key the batch by the target gameweek (the one after the latest
    /// present, or the latest itself, clamped to the season) and keep each
    /// player's `recent_games` most recent rows.
    pub fn from_rows(rows: Vec<FeatureRow>, season: &SeasonConfig) -> Result<Self, IngestError> {
        let latest = rows
            .iter()
            .map(|r| r.gameweek)
            .max()
            .ok_or(IngestError::Empty)?;
        let last = season.gameweeks.max(1);
        let gameweek = match season.target {
            TargetGameweek::Next => latest.saturating_add(1).clamp(1, last),
            TargetGameweek::Latest => latest.clamp(1, last),
        };

        let total = rows.len();
        let rows = recent_window(rows, season.recent_games, gameweek);
        if rows.is_empty() {
            return Err(IngestError::Empty);
        }
        info!(
            "Keeping {} of {} rows (up to {} per player) for gameweek {gameweek}",
            rows.len(),
            total,
            season.recent_games
        );
        Ok(UploadBatch { gameweek, rows })
    }

    /// Parse an in-memory CSV upload.
    pub fn parse(csv: &str, season: &SeasonConfig) -> Result<Self, IngestError> {
        let rows = load_rows_from_reader(csv.as_bytes(), season.gameweeks)?;
        Self::from_rows(rows, season)
    }

    /// Load and key a CSV file.
    pub fn load(path: &Path, season: &SeasonConfig) -> Result<Self, IngestError> {
        let rows = load_rows(path, season.gameweeks)?;
        Self::from_rows(rows, season)
    }
}

/// Group rows by player, newest fixture first, and cut each player's history
/// to `limit` rows stamped with `gameweek`.
fn recent_window(rows: Vec<FeatureRow>, limit: usize, gameweek: u32) -> Vec<FeatureRow> {
    let mut order = Vec::new();
    let mut history: HashMap<u32, Vec<FeatureRow>> = HashMap::new();
    for row in rows {
        let id = row.player_id;
        history
            .entry(id)
            .or_insert_with(|| {
                order.push(id);
                Vec::new()
            })
            .push(row);
    }

    let mut out = Vec::new();
    for id in order {
        let Some(mut games) = history.remove(&id) else {
            continue;
        };
        games.sort_by(|a, b| b.gameweek.cmp(&a.gameweek));
        if games.len() > limit {
            debug!(
                "player {id}: scoring {limit} most recent of {} fixtures",
                games.len()
            );
            games.truncate(limit);
        }
        out.extend(games.into_iter().map(|mut row| {
            row.gameweek = gameweek;
            row
        }));
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
