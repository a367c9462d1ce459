mod config;
mod contracts;
mod db;
mod errors;
mod exposure;
mod generation;
mod items;
mod llm_client;
mod locator;
mod repository;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::{create_pool, migrate};
use crate::exposure::ExposurePolicy;
use crate::generation::diff::BaselineDiff;
use crate::generation::fallback::FallbackBank;
use crate::generation::manuals::ManualLibrary;
use crate::generation::orchestrator::Orchestrator;
use crate::generation::settings::GenerationSettings;
use crate::llm_client::LlmClient;
use crate::repository::postgres::PgItemStore;
use crate::repository::ItemRepository;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting itembank v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    migrate(&db).await?;

    // Generation stack
    let settings = GenerationSettings::load(config.generation_config_path.as_deref());
    info!(
        "Model tiers: {}",
        settings
            .models
            .iter()
            .map(|t| format!("{} x{}", t.name, t.retries))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let diff = BaselineDiff::load(
        config.grammar_baseline_path.as_deref(),
        &settings.baseline_label,
    );
    let manuals = Arc::new(ManualLibrary::new(&config.manual_dir));
    info!("Manual directory: {}", manuals.dir().display());
    let llm = LlmClient::new(config.anthropic_api_key.clone());
    let orchestrator = Orchestrator::new(
        Arc::new(llm),
        settings,
        manuals,
        FallbackBank::builtin(),
        diff,
        Duration::from_secs(config.generation_deadline_secs),
    );

    let repository = ItemRepository::new(
        Arc::new(PgItemStore::new(db)),
        ExposurePolicy::default(),
        config.item_cache_limit,
    );

    // Build app state
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        repository: Arc::new(repository),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
