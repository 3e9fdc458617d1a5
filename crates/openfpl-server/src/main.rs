// openfpl entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config (copying defaults on first run)
// 3. Load the model ensemble
// 4. Build the scoring pool and scout service
// 5. Serve WebSocket requests, or run a one-shot `scout <csv>`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use openfpl_core::config;
use openfpl_core::ensemble::load_ensemble;
use openfpl_core::orchestrator::Orchestrator;
use openfpl_core::scout::{Scout, ScoutSettings};
use openfpl_server::app::AppContext;
use openfpl_server::ws_server;
use tracing::{error, info};

const USAGE: &str = "usage: openfpl [serve | scout <upload.csv>]";

#[derive(Debug)]
enum Command {
    Serve,
    Scout(PathBuf),
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Command> {
    match args.next().as_deref() {
        None | Some("serve") => Ok(Command::Serve),
        Some("scout") => match args.next() {
            Some(path) => Ok(Command::Scout(PathBuf::from(path))),
            None => bail!("missing CSV path\n{USAGE}"),
        },
        Some(other) => bail!("unknown command `{other}`\n{USAGE}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = parse_args(std::env::args().skip(1))?;

    // 1. Initialize tracing
    init_tracing()?;
    info!("openfpl starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: budget cap {}, {} models, {}-gameweek season",
        config.squad.budget_cap,
        config.models.len(),
        config.season.gameweeks
    );

    // 3. Load models
    let ensemble = load_ensemble(&config.models, &config.base_dir)
        .context("failed to load model ensemble")?;

    // 4. Scoring pool and scout service
    let orchestrator = Orchestrator::from_config(Arc::new(ensemble), &config.scoring)
        .context("failed to start scoring pool")?;
    let scout = Scout::new(Arc::new(orchestrator), ScoutSettings::from_config(&config));
    let ctx = Arc::new(AppContext::new(Arc::new(scout), &config));

    // 5. Run
    match command {
        Command::Scout(path) => {
            let report = ctx.upload_file(&path).await?;
            println!("{report}");
            info!("Scouted gameweek {} from {}", report.gameweek, path.display());
        }
        Command::Serve => {
            let listener = ws_server::bind(config.server.port)
                .await
                .with_context(|| format!("failed to bind port {}", config.server.port))?;
            println!("openfpl listening on ws://127.0.0.1:{}", config.server.port);

            tokio::select! {
                result = ws_server::run(listener, ctx) => {
                    if let Err(e) = &result {
                        error!("WebSocket server error: {e}");
                    }
                    result?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down");
                }
            }
        }
    }

    info!("openfpl shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to `logs/openfpl.log`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("openfpl.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("openfpl=info,openfpl_core=info,openfpl_server=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
