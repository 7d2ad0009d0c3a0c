mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc};

use lineup_core::events::DraftEvent;
use lineup_core::ids::ParticipantId;
use lineup_engine::DraftEngine;
use lineup_settings::{load_settings, load_settings_from_path, LineupSettings};
use lineup_store::{Database, SnapshotRepo};
use lineup_telemetry::{init_telemetry, TelemetryConfig};

use crate::console::ConsoleGateway;

/// Slot draft engine driven by JSON lines on stdin.
#[derive(Debug, Parser)]
#[command(name = "lineup", version)]
struct Cli {
    /// Settings file (default: ~/.lineup/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Do not persist draft snapshots.
    #[arg(long)]
    no_store: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Participants whose direct messages always fail.
    #[arg(long = "block-direct", value_name = "ID")]
    blocked_directs: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => load_settings().context("loading settings")?,
    };
    if cli.log_json {
        settings.logging.json = true;
    }
    init_telemetry(&telemetry_config(&settings));

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting lineup");

    let store = if settings.store.enabled && !cli.no_store {
        Some(open_store(&settings)?)
    } else {
        None
    };

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let gateway = Arc::new(ConsoleGateway::new(
        out_tx,
        cli.blocked_directs.into_iter().map(ParticipantId::from_raw),
    ));
    let writer = tokio::spawn(console::write_actions(out_rx, tokio::io::stdout()));

    let (event_tx, _) = broadcast::channel::<DraftEvent>(1024);
    let mut engine = DraftEngine::new(gateway.clone(), &settings, event_tx)?;
    if let Some(repo) = store {
        engine = engine.with_store(repo);
    }
    let engine = Arc::new(engine);
    let event_log = tokio::spawn(log_events(engine.subscribe()));

    tokio::select! {
        res = run_console(gateway.clone(), engine.clone()) => {
            res.context("reading stdin")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
        }
    }

    let stopped = engine.shutdown(Duration::from_secs(5)).await;
    tracing::info!(sessions = stopped, "shutting down");

    event_log.abort();
    drop(engine);
    drop(gateway);
    match tokio::time::timeout(Duration::from_secs(1), writer).await {
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "stdout writer failed"),
        Ok(_) => {}
        Err(_) => tracing::warn!("stdout writer did not drain"),
    }
    Ok(())
}

/// Feed stdin to the engine, then let running drafts finish.
async fn run_console(
    gateway: Arc<ConsoleGateway>,
    engine: Arc<DraftEngine>,
) -> std::io::Result<()> {
    console::read_events(BufReader::new(tokio::io::stdin()), gateway, engine.clone()).await?;
    while engine.active_sessions() > 0 {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    Ok(())
}

fn telemetry_config(settings: &LineupSettings) -> TelemetryConfig {
    TelemetryConfig::from_names(
        &settings.logging.level,
        settings
            .logging
            .modules
            .iter()
            .map(|(module, level)| (module.as_str(), level.as_str())),
        settings.logging.json,
    )
}

/// Open the snapshot store and close out anything a previous run left open.
fn open_store(settings: &LineupSettings) -> anyhow::Result<SnapshotRepo> {
    let path = &settings.store.path;
    let db = Database::open(path)
        .map_err(|e| anyhow::anyhow!("opening {}: {e}", path.display()))?;
    let repo = SnapshotRepo::new(db);
    let abandoned = repo
        .abandon_unfinished()
        .map_err(|e| anyhow::anyhow!("closing abandoned drafts: {e}"))?;
    for snapshot in &abandoned {
        tracing::warn!(
            session_id = %snapshot.session_id,
            channel_id = %snapshot.channel_id,
            state = %snapshot.state,
            claimed = snapshot.claimed_count(),
            "draft from a previous run abandoned"
        );
    }
    Ok(repo)
}

async fn log_events(mut rx: broadcast::Receiver<DraftEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => tracing::debug!(
                session_id = %event.session_id(),
                event = event.event_type(),
                "draft event"
            ),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
