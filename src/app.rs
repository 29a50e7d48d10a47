use std::{sync::Arc, time::Instant};

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    ai::{CompletionClient, OpenAiClient},
    config::AppConfig,
    db::{MemoryProfileStore, PgProfileStore, ProfileStore},
    error::AppResult,
    jobs::spawn_scheduled_jobs,
    monitoring,
    resolver::Resolver,
    session_store::{MemorySessionStore, SessionStore},
    types::AppState,
    webhook,
};

/// `RUST_LOG` wins; otherwise `LOG_LEVEL` (default `info`). `LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(format!("{level},tower_http=debug"))
    });
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if result.is_err() {
        warn!("tracing subscriber already installed");
    }
}

pub fn assemble_state(
    config: AppConfig,
    sessions: Arc<dyn SessionStore>,
    profiles: Arc<dyn ProfileStore>,
    ai: Arc<dyn CompletionClient>,
) -> Arc<AppState> {
    let resolver = Resolver::new(sessions.clone(), ai, config.ai_timeout);
    Arc::new(AppState {
        config,
        sessions,
        profiles,
        resolver,
        started_at: Instant::now(),
    })
}

pub async fn build_state(config: AppConfig) -> AppResult<Arc<AppState>> {
    let profiles: Arc<dyn ProfileStore> = match config.database_url.as_deref() {
        Some(url) => Arc::new(PgProfileStore::connect(url).await?),
        None => {
            warn!(
                production = config.is_production(),
                "DATABASE_URL not set, profiles are kept in memory"
            );
            Arc::new(MemoryProfileStore::new())
        }
    };
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(config.session_ttl));
    let ai: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::from_config(&config)?);
    if !ai.is_configured() {
        warn!("OPENAI_API_KEY not set, replies fall back to templates");
    }

    Ok(assemble_state(config, sessions, profiles, ai))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(monitoring::root))
        .route("/health", get(monitoring::health))
        .route("/api/webhook", post(webhook::transport_webhook))
        .route(
            "/webhook/manychat",
            get(webhook::webhook_usage).post(webhook::generic_webhook),
        )
        .route("/webhook/health", get(webhook::webhook_health))
        .route("/monitoring/health", get(monitoring::monitoring_health))
        .route(
            "/monitoring/database-status",
            get(monitoring::database_status),
        )
        .route("/monitoring/test", get(monitoring::monitoring_test))
        .fallback(monitoring::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

pub async fn run() -> AppResult<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env()?;
    let port = config.port;
    info!(
        environment = %config.environment,
        model = %config.openai_model,
        jobs_enabled = config.jobs.enabled,
        "configuration loaded"
    );

    let state = build_state(config).await?;
    let jobs = if state.config.jobs.enabled {
        spawn_scheduled_jobs(state.clone())
    } else {
        Vec::new()
    };

    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("goat bot server running at http://localhost:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for job in jobs {
        job.abort();
    }
    Ok(())
}
