use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;

use random_coffee::api::{ApiState, admin_routes};
use random_coffee::channels::{Messenger, TelegramChannel};
use random_coffee::config::AppConfig;
use random_coffee::coordinator::Coordinator;
use random_coffee::dialog::DialogDeps;
use random_coffee::dispatch::{DEFAULT_IDLE_TIMEOUT, EventDispatcher};
use random_coffee::error::ConfigError;
use random_coffee::meetings::Matchmaker;
use random_coffee::scheduler::{self, Scheduler};
use random_coffee::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;
    let bot_token = config
        .bot_token
        .clone()
        .ok_or_else(|| ConfigError::MissingEnvVar("RANDOM_COFFEE_BOT_TOKEN".to_string()))?;

    eprintln!("☕ Random Coffee v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Community: {}", config.community);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Core ─────────────────────────────────────────────────────────────
    let telegram = Arc::new(TelegramChannel::new(bot_token));
    let messenger: Arc<dyn Messenger> = telegram.clone();
    let deps = Arc::new(DialogDeps {
        db: Arc::clone(&db),
        messenger,
        matchmaker: Arc::new(Matchmaker::new(Arc::clone(&db))),
        community: config.community.clone(),
    });
    let coordinator = Arc::new(Coordinator::new(deps, config.delivery_pause));

    // ── Admin API ────────────────────────────────────────────────────────
    match config.api_token.clone() {
        Some(token) => {
            let app = admin_routes(ApiState {
                coordinator: Arc::clone(&coordinator),
                token: Arc::new(token),
            });
            let port = config.api_port;
            let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
                .await
                .with_context(|| format!("failed to bind admin API port {port}"))?;
            tokio::spawn(async move {
                tracing::info!(port, "Admin API started");
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(error = %e, "Admin API stopped");
                }
            });
            eprintln!("   Admin API: http://0.0.0.0:{port}/api");
        }
        None => eprintln!("   Admin API: disabled (RANDOM_COFFEE_API_TOKEN not set)"),
    }

    // ── Scheduler ────────────────────────────────────────────────────────
    if config.schedule.is_empty() {
        eprintln!("   Scheduler: no jobs configured");
    } else {
        let scheduler = Scheduler::new(Arc::clone(&coordinator), &config.schedule);
        eprintln!(
            "   Scheduler: {} (tick every {}s)",
            scheduler.jobs().iter().map(|j| j.name()).collect::<Vec<_>>().join(", "),
            config.schedule.tick.as_secs(),
        );
        let _scheduler_handle = scheduler::spawn_scheduler(scheduler, config.schedule.tick);
    }

    // ── Bot loop ─────────────────────────────────────────────────────────
    let mut events = telegram.start().await?;
    eprintln!("   Telegram: listening\n");

    let mut dispatcher = EventDispatcher::new(Arc::clone(&coordinator), DEFAULT_IDLE_TIMEOUT);
    while let Some(event) = events.next().await {
        dispatcher.dispatch(event);
    }

    Ok(())
}
