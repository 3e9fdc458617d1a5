// Configuration loading and parsing (config/scout.toml).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::combiner::PostProcess;
use crate::optimizer::LineupRules;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub squad: SquadConfig,
    pub scoring: ScoringConfig,
    pub season: SeasonConfig,
    pub server: ServerConfig,
    pub export: ExportConfig,
    pub models: Vec<ModelEntry>,
    /// Directory relative paths (models, export dir) resolve against.
    pub base_dir: PathBuf,
}

/// Raw deserialization target for scout.toml.
#[derive(Debug, Clone, Deserialize)]
struct ScoutFile {
    squad: SquadConfig,
    scoring: ScoringConfig,
    #[serde(default)]
    season: SeasonConfig,
    server: ServerConfig,
    export: ExportConfig,
    models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SquadConfig {
    /// Maximum total lineup cost, in tenths (1000 = 100.0m).
    pub budget_cap: u32,
    #[serde(default)]
    pub formation: LineupRules,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Scoring threads; 0 uses the available CPU parallelism.
    #[serde(default)]
    pub workers: usize,
    pub deadline_ms: u64,
    #[serde(default)]
    pub floor: Option<f64>,
    #[serde(default)]
    pub ceiling: Option<f64>,
}

impl ScoringConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn post_process(&self) -> PostProcess {
        PostProcess {
            floor: self.floor,
            ceiling: self.ceiling,
        }
    }
}

/// Which gameweek an upload's team is picked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetGameweek {
    /// The gameweek after the latest one in the upload.
    #[default]
    Next,
    /// The latest gameweek in the upload.
    Latest,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SeasonConfig {
    pub gameweeks: u32,
    /// Most recent fixtures per player scored and averaged.
    pub recent_games: usize,
    pub target: TargetGameweek,
}

impl Default for SeasonConfig {
    fn default() -> Self {
        SeasonConfig {
            gameweeks: 38,
            recent_games: 5,
            target: TargetGameweek::Next,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub path: String,
}

impl Config {
    pub fn export_dir(&self) -> PathBuf {
        self.base_dir.join(&self.export.dir)
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/scout.toml` relative to `base_dir`, without
/// copying defaults. Prefer `load_config()`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("scout.toml");
    let text = read_file(&path)?;
    let file: ScoutFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        squad: file.squad,
        scoring: file.scoring,
        season: file.season,
        server: file.server,
        export: file.export,
        models: file.models,
        base_dir: base_dir.to_path_buf(),
    };

    validate(&config)?;

    Ok(config)
}

/// Files read from `config/`, each seeded from `defaults/` when absent.
const CONFIG_FILES: &[&str] = &["scout.toml"];

/// Seed missing config files from `defaults/`. Returns the files created;
/// existing files are never touched.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let config_dir = base_dir.join("config");
    let mut seeded = Vec::new();

    for name in CONFIG_FILES {
        let target = config_dir.join(name);
        if target.is_file() {
            continue;
        }
        let default = base_dir.join("defaults").join(name);
        if !default.is_file() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "{} is missing and there is no {} to seed it from",
                    target.display(),
                    default.display()
                ),
            });
        }

        std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", config_dir.display()),
        })?;
        std::fs::copy(&default, &target).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to copy {} to {}: {e}", default.display(), target.display()),
        })?;
        info!("Seeded {} from defaults", target.display());
        seeded.push(target);
    }

    Ok(seeded)
}

/// Loads config relative to the current working directory, copying defaults
/// first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.squad.budget_cap == 0 {
        return Err(invalid("squad.budget_cap", "must be greater than 0"));
    }

    config
        .squad
        .formation
        .validate()
        .map_err(|v| invalid(&format!("squad.formation.{}", v.field), v.message))?;

    if config.scoring.deadline_ms == 0 {
        return Err(invalid("scoring.deadline_ms", "must be > 0"));
    }
    let post = config.scoring.post_process();
    for (name, value) in [("scoring.floor", post.floor), ("scoring.ceiling", post.ceiling)] {
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(invalid(name, "must be finite"));
        }
    }
    if let (Some(floor), Some(ceiling)) = (post.floor, post.ceiling) {
        if floor > ceiling {
            return Err(invalid(
                "scoring.floor",
                format!("floor {floor} exceeds ceiling {ceiling}"),
            ));
        }
    }

    if config.season.gameweeks == 0 {
        return Err(invalid("season.gameweeks", "must be > 0"));
    }
    if config.season.recent_games == 0 {
        return Err(invalid("season.recent_games", "must be > 0"));
    }

    if config.models.is_empty() {
        return Err(invalid("models", "at least one model is required"));
    }
    if let Some(dup) = config
        .models
        .iter()
        .enumerate()
        .find(|(i, m)| config.models[..*i].iter().any(|o| o.name == m.name))
        .map(|(_, m)| m)
    {
        return Err(invalid("models", format!("duplicate model name `{}`", dup.name)));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Position;
    use std::fs;

    /// Workspace root, where `defaults/` lives (works from the crate dir or
    /// the workspace root).
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        if cwd.join("defaults").exists() {
            cwd
        } else if cwd.join("../../defaults").exists() {
            cwd.join("../..")
        } else {
            panic!("Cannot locate defaults/ directory from CWD {:?}", cwd);
        }
    }

    fn default_toml() -> String {
        fs::read_to_string(project_root().join("defaults/scout.toml")).unwrap()
    }

    /// Write `scout.toml` into a fresh temp project and return its root.
    fn temp_project(name: &str, scout_toml: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config/scout.toml"), scout_toml).unwrap();
        tmp
    }

    fn expect_field(err: ConfigError, expected: &str) {
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, expected),
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn load_default_config() {
        let tmp = temp_project("openfpl_config_defaults", &default_toml());
        let config = load_config_from(&tmp).expect("should load default config");

        assert_eq!(config.squad.budget_cap, 1000);
        let rules = &config.squad.formation;
        assert_eq!(rules.size, 11);
        assert_eq!(rules.range(Position::Goalkeeper).min, 1);
        assert_eq!(rules.range(Position::Goalkeeper).max, 1);
        assert_eq!(rules.range(Position::Defender).min, 3);
        assert_eq!(rules.range(Position::Defender).max, 5);
        assert_eq!(rules.range(Position::Midfielder).max, 5);
        assert_eq!(rules.range(Position::Forward).max, 3);
        assert_eq!(config.scoring.floor, Some(0.0));
        assert_eq!(config.season.gameweeks, 38);
        assert_eq!(config.season.recent_games, 5);
        assert_eq!(config.season.target, TargetGameweek::Next);
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.models.len(), 3);
        assert_eq!(config.models[0].name, "ridge");
        assert_eq!(config.base_dir, tmp);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn worker_count_defaults_to_cpu_parallelism() {
        let tmp = temp_project("openfpl_config_workers", &default_toml());
        let mut config = load_config_from(&tmp).unwrap();
        config.scoring.workers = 0;
        assert!(config.scoring.worker_count() >= 1);
        config.scoring.workers = 3;
        assert_eq!(config.scoring.worker_count(), 3);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_budget_cap() {
        let toml = default_toml().replace("budget_cap = 1000", "budget_cap = 0");
        let tmp = temp_project("openfpl_config_zero_budget", &toml);
        expect_field(load_config_from(&tmp).unwrap_err(), "squad.budget_cap");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_inverted_slot_range() {
        let toml = default_toml().replace("defender = [3, 5]", "defender = [5, 3]");
        let tmp = temp_project("openfpl_config_inverted_range", &toml);
        expect_field(load_config_from(&tmp).unwrap_err(), "squad.formation.defender");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_unreachable_squad_size() {
        let toml = default_toml().replace("size = 11", "size = 15");
        let tmp = temp_project("openfpl_config_bad_size", &toml);
        expect_field(load_config_from(&tmp).unwrap_err(), "squad.formation.size");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn season_target_and_window_parse() {
        let toml = default_toml().replace(
            "gameweeks = 38",
            "gameweeks = 38\nrecent_games = 3\ntarget = \"latest\"",
        );
        let tmp = temp_project("openfpl_config_season", &toml);
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.season.recent_games, 3);
        assert_eq!(config.season.target, TargetGameweek::Latest);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_empty_recent_window() {
        let toml = default_toml().replace("gameweeks = 38", "gameweeks = 38\nrecent_games = 0");
        let tmp = temp_project("openfpl_config_zero_window", &toml);
        expect_field(load_config_from(&tmp).unwrap_err(), "season.recent_games");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_floor_above_ceiling() {
        let toml = default_toml().replace("floor = 0.0", "floor = 5.0\nceiling = 2.0");
        let tmp = temp_project("openfpl_config_floor_ceiling", &toml);
        expect_field(load_config_from(&tmp).unwrap_err(), "scoring.floor");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_duplicate_model_names() {
        let toml = default_toml().replace("name = \"xgboost\"", "name = \"ridge\"");
        let tmp = temp_project("openfpl_config_dup_models", &toml);
        expect_field(load_config_from(&tmp).unwrap_err(), "models");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_scout_toml() {
        let tmp = std::env::temp_dir().join("openfpl_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();

        match load_config_from(&tmp).unwrap_err() {
            ConfigError::FileNotFound { path } => assert!(path.ends_with("scout.toml")),
            other => panic!("expected FileNotFound, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = temp_project("openfpl_config_invalid_toml", "this is not valid [[[ toml");
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with("scout.toml")),
            other => panic!("expected ParseError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_seeds_scout_toml_once() {
        let tmp = std::env::temp_dir().join("openfpl_config_seed");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults/scout.toml"), default_toml()).unwrap();
        fs::write(tmp.join("defaults/notes.md"), "# not config\n").unwrap();

        let seeded = ensure_config_files(&tmp).expect("should succeed");
        assert_eq!(seeded, vec![tmp.join("config/scout.toml")]);
        assert!(!tmp.join("config/notes.md").exists());
        assert!(load_config_from(&tmp).is_ok());

        // Local edits survive a second run.
        fs::write(tmp.join("config/scout.toml"), "# custom\n").unwrap();
        assert!(ensure_config_files(&tmp).unwrap().is_empty());
        assert_eq!(fs::read_to_string(tmp.join("config/scout.toml")).unwrap(), "# custom\n");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn existing_config_needs_no_defaults() {
        let tmp = temp_project("openfpl_config_no_defaults", &default_toml());
        assert!(ensure_config_files(&tmp).unwrap().is_empty());
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_config_and_default_is_an_error() {
        let tmp = std::env::temp_dir().join("openfpl_config_nothing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        match ensure_config_files(&tmp).unwrap_err() {
            ConfigError::DefaultsCopyError { message } => {
                assert!(message.contains("scout.toml is missing"));
            }
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }
}
