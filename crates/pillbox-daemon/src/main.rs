use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pillbox_core::{Clock, PillboxConfig, SystemClock};
use pillbox_delivery::{DeliveryWorker, LogNotifier, Notifier, RateLimiter, WorkerSettings};
use pillbox_scheduler::{SchedulerEngine, SchedulerHandle};
use pillbox_service::{Dispatcher, ReconciliationSweep, ReminderService, ServiceSettings};
use pillbox_store::ReminderStore;
use pillbox_telegram::TelegramAdapter;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const DEFAULT_LOG_FILTER: &str = "pillbox_daemon=info,pillbox_core=info,pillbox_store=info,\
pillbox_scheduler=info,pillbox_delivery=info,pillbox_service=info,pillbox_telegram=info";

/// How often idle per-owner rate-limit entries are dropped.
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(600);

/// Medication and lab-test reminder daemon.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file. Without it `PILLBOX_CONFIG`, then
    /// `~/.pillbox/pillbox.toml` is used.
    #[arg(short, long)]
    config: Option<String>,

    /// Run one reconciliation sweep, print its report as JSON and exit.
    #[arg(long)]
    sweep_once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let args = Args::parse();

    // load config: explicit path > PILLBOX_CONFIG env > ~/.pillbox/pillbox.toml
    let config = PillboxConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        PillboxConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    // store and job queue each get their own connection to the same file
    let store = Arc::new(ReminderStore::new(open_db(db_path)?)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let jobs = SchedulerHandle::new(open_db(db_path)?, Arc::clone(&clock))?;
    info!("database migrations complete");

    let service = Arc::new(ReminderService::new(
        Arc::clone(&store),
        jobs.clone(),
        Arc::clone(&clock),
        ServiceSettings::from(&config),
    ));
    let sweep = ReconciliationSweep::new(Arc::clone(&service));

    if args.sweep_once {
        let report = sweep.run_once()?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    // heal whatever happened while the process was down before serving
    if config.sweep.on_startup {
        match sweep.run_once() {
            Ok(report) => info!(
                drift = report.drift.len(),
                overdue = report.overdue,
                restored = report.postponed_restored,
                "startup sweep complete"
            ),
            Err(e) => error!("startup sweep failed: {e}"),
        }
    }

    let token = config.telegram.bot_token.as_deref();
    let telegram = match TelegramAdapter::new(token, Arc::clone(&service)) {
        Ok(adapter) => Some(adapter),
        Err(e) => {
            warn!("Telegram disabled ({e}), notifications are written to the log");
            None
        }
    };
    let notifier: Arc<dyn Notifier> = match &telegram {
        Some(adapter) => Arc::new(adapter.notifier(config.telegram.parse_mode_markdown)),
        None => Arc::new(LogNotifier),
    };

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.global_concurrency,
        config.rate_limit.per_owner_interval(),
    ));
    let worker = Arc::new(DeliveryWorker::new(
        store,
        notifier,
        Arc::clone(&limiter),
        Arc::clone(&clock),
        WorkerSettings::from(&config.delivery),
    ));

    // Fired-job channel: SchedulerEngine → Dispatcher
    let (fired_tx, fired_rx) = mpsc::channel(config.scheduler.channel_capacity);
    let engine = SchedulerEngine::new(
        jobs,
        fired_tx,
        config.scheduler.poll_interval(),
        config.scheduler.misfire_grace(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();
    tasks.spawn(engine.run(shutdown_rx.clone()));
    tasks.spawn(Dispatcher::new(worker, fired_rx).run(shutdown_rx.clone()));
    tasks.spawn(sweep.run(config.sweep.interval(), shutdown_rx.clone()));
    tasks.spawn(prune_limiter(limiter, shutdown_rx.clone()));
    if let Some(adapter) = telegram {
        tasks.spawn(adapter.run(shutdown_rx));
        info!("Telegram bot started");
    }

    info!("pillbox running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("background task failed: {e}");
        }
    }
    info!("pillbox stopped");
    Ok(())
}

fn open_db(path: &str) -> anyhow::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)
        .with_context(|| format!("failed to open database at {path}"))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), "could not create database directory: {e}");
        }
    }
}

async fn prune_limiter(limiter: Arc<RateLimiter>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => limiter.prune(),
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_database_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("state/pillbox/pillbox.db");
        ensure_parent_dir(db.to_str().unwrap());
        assert!(db.parent().unwrap().is_dir());
    }

    #[test]
    fn unusable_parent_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let occupied = dir.path().join("occupied");
        std::fs::write(&occupied, b"").unwrap();
        ensure_parent_dir(occupied.join("pillbox.db").to_str().unwrap());
        assert!(occupied.is_file());
    }
}
