// Application layer: turns protocol requests into scout service calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use openfpl_core::config::{Config, SeasonConfig};
use openfpl_core::export::{save_report, ScoutReport};
use openfpl_core::ingest::UploadBatch;
use openfpl_core::scout::Scout;
use tracing::{info, warn};

use crate::protocol::{ClientMessage, ServerMessage};

/// Shared state for every connection.
#[derive(Debug)]
pub struct AppContext {
    pub scout: Arc<Scout>,
    pub season: SeasonConfig,
    pub export_dir: PathBuf,
}

impl AppContext {
    pub fn new(scout: Arc<Scout>, config: &Config) -> Self {
        AppContext {
            scout,
            season: config.season.clone(),
            export_dir: config.export_dir(),
        }
    }

    /// Ingest a CSV upload, compute its team and save the report.
    pub async fn upload(&self, csv: &str) -> anyhow::Result<ScoutReport> {
        let batch = UploadBatch::parse(csv, &self.season).context("invalid upload")?;
        self.publish(batch).await
    }

    /// Same as [`upload`](Self::upload) for a CSV file on disk.
    pub async fn upload_file(&self, path: &Path) -> anyhow::Result<ScoutReport> {
        let batch = UploadBatch::load(path, &self.season)
            .with_context(|| format!("failed to load {}", path.display()))?;
        self.publish(batch).await
    }

    async fn publish(&self, batch: UploadBatch) -> anyhow::Result<ScoutReport> {
        let gameweek = self.scout.upload(batch).await;
        let report = self.report(gameweek).await?;
        if let Err(e) = save_report(&report, &self.export_dir) {
            warn!("report for gameweek {gameweek} not saved: {e}");
        }
        Ok(report)
    }

    /// The team for `gameweek` as a report, computing it if needed.
    pub async fn report(&self, gameweek: u32) -> anyhow::Result<ScoutReport> {
        let team = self.scout.get_or_compute(gameweek).await?;
        Ok(ScoutReport::new(gameweek, &team))
    }

    async fn latest_gameweek(&self) -> Option<u32> {
        self.scout.gameweeks().await.last().copied()
    }
}

/// Handle one raw text message. Every request gets exactly one reply.
pub async fn handle_message(ctx: &AppContext, text: &str) -> ServerMessage {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse client message: {e}");
            return ServerMessage::error(format!("invalid message: {e}"));
        }
    };

    match msg {
        ClientMessage::Health => ServerMessage::healthy(),
        ClientMessage::Info => ServerMessage::Info {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        ClientMessage::Upload { csv } => {
            info!("Received UPLOAD ({} bytes)", csv.len());
            reply(ctx.upload(&csv).await)
        }
        ClientMessage::Scout { gameweek } => {
            let gameweek = match gameweek {
                Some(gw) => gw,
                None => match ctx.latest_gameweek().await {
                    Some(gw) => gw,
                    None => return ServerMessage::error("no gameweek data uploaded yet"),
                },
            };
            info!("Received SCOUT for gameweek {gameweek}");
            reply(ctx.report(gameweek).await)
        }
    }
}

fn reply(result: anyhow::Result<ScoutReport>) -> ServerMessage {
    match result {
        Ok(report) => ServerMessage::ScoutTeam { report },
        Err(e) => {
            warn!("request failed: {e:#}");
            ServerMessage::error(format!("{e:#}"))
        }
    }
}
