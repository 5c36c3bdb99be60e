use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_guard::config::Config;
use event_guard::dispatch::Dispatcher;
use event_guard::executor::{HttpExecutor, HttpExecutorConfig};
use event_guard::guard::EventGuard;
use event_guard::ledger::FileLedger;
use event_guard::notify::SlackNotifier;
use event_guard::server::{AppState, build_router};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "event_guard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    info!(config = ?config, "Starting event guard");

    let ledger = FileLedger::open(config.ledger_dir())?;
    let guard = EventGuard::new(ledger.clone(), config.ledger_ttl());

    let mut executor_config = HttpExecutorConfig::new(config.executor_url.clone());
    executor_config.timeout = config.work_timeout;
    let executor = HttpExecutor::new(executor_config)?;

    let notifier = SlackNotifier::new(config.slack_api_base.clone(), config.slack_bot_token.clone())?;

    let dispatcher = Dispatcher::new(guard, Arc::new(executor), notifier)
        .with_bot_user_id(config.slack_bot_user_id.clone())
        .with_work_timeout(config.work_timeout);

    if config.slack_signing_secret.is_none() {
        warn!("SLACK_SIGNING_SECRET is not set; request signatures will not be verified");
    }
    let app_state = AppState::new(
        dispatcher,
        config.slack_signing_secret.clone().map(String::into_bytes),
    );

    let tasks = app_state.tasks().clone();

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(sweep_ledger(ledger, config.clone(), shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutting down");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();

    // Every acknowledged event reaches `done` or `failed` before exit.
    tasks.close();
    if !tasks.is_empty() {
        info!(in_flight = tasks.len(), "Waiting for in-flight events");
    }
    tasks.wait().await;

    if let Err(e) = sweeper.await {
        warn!(error = %e, "Ledger sweeper ended abnormally");
    }
    Ok(())
}

/// Periodically removes expired records until `shutdown` is cancelled.
///
/// Records are kept for one extra TTL after expiry, so a reader that saw the
/// record just before it expired never races the sweep.
async fn sweep_ledger(ledger: FileLedger, config: Config, shutdown: CancellationToken) {
    let grace = config.ledger_ttl();
    let mut interval = tokio::time::interval(config.prune_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let ledger = ledger.clone();
        match tokio::task::spawn_blocking(move || ledger.prune_expired(Utc::now(), grace)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(reclaimed)) => info!(reclaimed, "Swept expired ledger records"),
            Ok(Err(e)) => warn!(error = %e, "Ledger sweep failed"),
            Err(e) => warn!(error = %e, "Ledger sweep task panicked"),
        }
    }
}
