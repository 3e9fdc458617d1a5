// Scout service: uploaded gameweek data in, cached optimal team out.
//
// Scoring is CPU-bound, so each computation runs on a blocking worker that
// hands the batch to the orchestrator's rayon pool. The cache guarantees one
// computation per gameweek no matter how many requests arrive.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::info;

use crate::cache::{CacheComputationError, ResultCache};
use crate::combiner::average_by_player;
use crate::config::Config;
use crate::ingest::UploadBatch;
use crate::optimizer::{select, LineupRules, SelectionError, Team};
use crate::orchestrator::{BatchCancelled, Orchestrator};
use crate::player::FeatureRow;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoutError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Cancelled(#[from] BatchCancelled),

    #[error("no uploaded data for gameweek {gameweek}")]
    NoData { gameweek: u32 },

    #[error("scoring worker failed: {0}")]
    Worker(String),
}

/// Selection parameters applied to every computation.
#[derive(Debug, Clone)]
pub struct ScoutSettings {
    pub budget_cap: u32,
    pub rules: LineupRules,
    pub deadline: Duration,
}

impl ScoutSettings {
    pub fn from_config(config: &Config) -> Self {
        ScoutSettings {
            budget_cap: config.squad.budget_cap,
            rules: config.squad.formation.clone(),
            deadline: config.scoring.deadline(),
        }
    }
}

#[derive(Debug)]
pub struct Scout {
    orchestrator: Arc<Orchestrator>,
    settings: ScoutSettings,
    uploads: RwLock<HashMap<u32, Arc<Vec<FeatureRow>>>>,
    cache: ResultCache<u32, Team>,
}

impl Scout {
    pub fn new(orchestrator: Arc<Orchestrator>, settings: ScoutSettings) -> Self {
        Scout {
            orchestrator,
            settings,
            uploads: RwLock::new(HashMap::new()),
            cache: ResultCache::new(),
        }
    }

    pub fn settings(&self) -> &ScoutSettings {
        &self.settings
    }

    /// Store a gameweek's rows, replacing any earlier upload, and drop its
    /// cached team. Returns the gameweek key.
    pub async fn upload(&self, batch: UploadBatch) -> u32 {
        let gameweek = batch.gameweek;
        let count = batch.rows.len();
        self.uploads
            .write()
            .await
            .insert(gameweek, Arc::new(batch.rows));
        self.cache.invalidate(&gameweek).await;
        info!("Uploaded {count} rows for gameweek {gameweek}");
        gameweek
    }

    /// Gameweeks with uploaded data, ascending.
    pub async fn gameweeks(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.uploads.read().await.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// The cached team for `gameweek`, computing it on first request.
    pub async fn get_or_compute(&self, gameweek: u32) -> Result<Arc<Team>, CacheComputationError> {
        if !self.uploads.read().await.contains_key(&gameweek) {
            return Err(CacheComputationError {
                key: gameweek.to_string(),
                source: ScoutError::NoData { gameweek },
            });
        }
        self.cache
            .get_or_compute(gameweek, || self.compute(gameweek))
            .await
    }

    async fn compute(&self, gameweek: u32) -> Result<Team, ScoutError> {
        let rows = self
            .uploads
            .read()
            .await
            .get(&gameweek)
            .cloned()
            .ok_or(ScoutError::NoData { gameweek })?;

        let orchestrator = Arc::clone(&self.orchestrator);
        let settings = self.settings.clone();
        let deadline = Instant::now() + settings.deadline;

        tokio::task::spawn_blocking(move || -> Result<Team, ScoutError> {
            let scored = orchestrator.score_all_until(&rows, deadline)?;
            let players = average_by_player(scored);
            Ok(select(&players, settings.budget_cap, &settings.rules)?)
        })
        .await
        .map_err(|e| ScoutError::Worker(e.to_string()))?
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combiner::PostProcess;
    use crate::ensemble::tests::fixed;
    use crate::ensemble::Ensemble;
    use crate::player::tests::row;
    use crate::player::Position;

    fn scout(deadline: Duration) -> Scout {
        let ensemble = Arc::new(Ensemble::new(vec![fixed(2.0), fixed(4.0)]));
        let orchestrator = Orchestrator::new(ensemble, 2, PostProcess::default()).unwrap();
        Scout::new(
            Arc::new(orchestrator),
            ScoutSettings {
                budget_cap: 1000,
                rules: LineupRules::default(),
                deadline,
            },
        )
    }

    fn batch(gameweek: u32, keepers: u32) -> UploadBatch {
        let mut rows = Vec::new();
        let mut id = 1;
        for (pos, n) in [
            (Position::Goalkeeper, keepers),
            (Position::Defender, 5),
            (Position::Midfielder, 5),
            (Position::Forward, 3),
        ] {
            for _ in 0..n {
                let mut r = row(id, pos, 40 + id);
                r.gameweek = gameweek;
                rows.push(r);
                id += 1;
            }
        }
        UploadBatch { gameweek, rows }
    }

    #[tokio::test]
    async fn computes_team_for_uploaded_gameweek() {
        let scout = scout(Duration::from_secs(30));
        scout.upload(batch(10, 2)).await;

        let team = scout.get_or_compute(10).await.unwrap();
        assert_eq!(team.len(), 11);
        assert!(team.total_cost() <= 1000);
        assert!((team.captain().expected_points - 3.0).abs() < 1e-9);
        assert_eq!(scout.gameweeks().await, vec![10]);
    }

    #[tokio::test]
    async fn unknown_gameweek_is_no_data() {
        let scout = scout(Duration::from_secs(30));
        let err = scout.get_or_compute(4).await.unwrap_err();
        assert_eq!(err.source, ScoutError::NoData { gameweek: 4 });
    }

    #[tokio::test]
    async fn failed_requests_leave_cache_empty() {
        let scout = scout(Duration::from_secs(30));
        for gameweek in 1..=200 {
            assert!(scout.get_or_compute(gameweek).await.is_err());
        }
        assert_eq!(scout.cache.entry_count().await, 0);

        scout.upload(batch(10, 0)).await;
        assert!(scout.get_or_compute(10).await.is_err());
        assert_eq!(scout.cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_requests_share_team() {
        let scout = scout(Duration::from_secs(30));
        scout.upload(batch(10, 2)).await;

        let (a, b) = tokio::join!(scout.get_or_compute(10), scout.get_or_compute(10));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test]
    async fn reupload_invalidates_cached_team() {
        let scout = scout(Duration::from_secs(30));
        scout.upload(batch(10, 2)).await;
        let first = scout.get_or_compute(10).await.unwrap();

        scout.upload(batch(10, 1)).await;
        let second = scout.get_or_compute(10).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn missing_goalkeeper_surfaces_selection_error() {
        let scout = scout(Duration::from_secs(30));
        scout.upload(batch(10, 0)).await;
        let err = scout.get_or_compute(10).await.unwrap_err();
        assert!(matches!(
            err.source,
            ScoutError::Selection(SelectionError::InsufficientCandidates {
                position: Position::Goalkeeper,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn zero_deadline_cancels() {
        let scout = scout(Duration::ZERO);
        scout.upload(batch(10, 2)).await;
        let err = scout.get_or_compute(10).await.unwrap_err();
        assert!(matches!(err.source, ScoutError::Cancelled(_)));
    }
}
