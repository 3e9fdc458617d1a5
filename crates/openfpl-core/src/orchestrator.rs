// Prediction orchestrator: scores a batch of rows on a dedicated rayon pool.
//
// Rows are independent. A failing row is recorded as a failed ScoredRow and
// never affects its neighbours. Output order always matches input order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::combiner::PostProcess;
use crate::config::ScoringConfig;
use crate::ensemble::Ensemble;
use crate::player::{FeatureRow, ScoredRow};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("failed to build scoring thread pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// The batch did not finish before its deadline. Partial results are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("scoring cancelled at deadline after {scored} of {total} rows")]
pub struct BatchCancelled {
    pub scored: usize,
    pub total: usize,
}

pub struct Orchestrator {
    ensemble: Arc<Ensemble>,
    pool: rayon::ThreadPool,
    post: PostProcess,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipelines", &self.ensemble.len())
            .field("workers", &self.pool.current_num_threads())
            .field("post", &self.post)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        ensemble: Arc<Ensemble>,
        workers: usize,
        post: PostProcess,
    ) -> Result<Self, OrchestratorError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("openfpl-score-{i}"))
            .build()?;
        info!(
            "Scoring pool ready: {} workers, {} pipelines",
            pool.current_num_threads(),
            ensemble.len()
        );
        Ok(Orchestrator {
            ensemble,
            pool,
            post,
        })
    }

    pub fn from_config(
        ensemble: Arc<Ensemble>,
        scoring: &ScoringConfig,
    ) -> Result<Self, OrchestratorError> {
        Self::new(ensemble, scoring.worker_count(), scoring.post_process())
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn score_row(&self, row: &FeatureRow) -> ScoredRow {
        match self.ensemble.score(row) {
            Ok(points) => {
                let points = self.post.apply(points);
                debug!("player {} ({}): {points:.3}", row.player_id, row.web_name);
                ScoredRow::scored(row.clone(), points)
            }
            Err(e) => {
                warn!("player {} ({}) not scored: {e}", row.player_id, row.web_name);
                ScoredRow::failed(row.clone(), e)
            }
        }
    }

    /// Score every row. `result[i]` corresponds to `rows[i]`.
    pub fn score_all(&self, rows: &[FeatureRow]) -> Vec<ScoredRow> {
        let started = Instant::now();
        let scored: Vec<ScoredRow> = self
            .pool
            .install(|| rows.par_iter().map(|row| self.score_row(row)).collect());
        log_batch(&scored, started);
        scored
    }

    /// Like [`score_all`](Self::score_all), but any row not started by
    /// `deadline` cancels the whole batch.
    pub fn score_all_until(
        &self,
        rows: &[FeatureRow],
        deadline: Instant,
    ) -> Result<Vec<ScoredRow>, BatchCancelled> {
        let started = Instant::now();
        let cancelled = AtomicBool::new(false);
        let done = AtomicUsize::new(0);

        let scored: Option<Vec<ScoredRow>> = self.pool.install(|| {
            rows.par_iter()
                .map(|row| {
                    if cancelled.load(Ordering::Relaxed) || Instant::now() >= deadline {
                        cancelled.store(true, Ordering::Relaxed);
                        return None;
                    }
                    let scored = self.score_row(row);
                    done.fetch_add(1, Ordering::Relaxed);
                    Some(scored)
                })
                .collect()
        });

        match scored {
            Some(scored) => {
                log_batch(&scored, started);
                Ok(scored)
            }
            None => {
                let err = BatchCancelled {
                    scored: done.load(Ordering::Relaxed),
                    total: rows.len(),
                };
                warn!("{err}");
                Err(err)
            }
        }
    }
}

fn log_batch(scored: &[ScoredRow], started: Instant) {
    let failed = scored.iter().filter(|r| r.failure().is_some()).count();
    info!(
        "Scored {} rows ({} failed) in {:?}",
        scored.len(),
        failed,
        started.elapsed()
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
