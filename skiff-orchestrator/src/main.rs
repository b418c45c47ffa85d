use anyhow::Context;
use skiff_engine::cloud::ProviderRegistry;
use skiff_engine::{Engine, MemoryStore, Services, Store};
use skiff_runner::RunnerFactory;
use skiff_templates::TemplateRegistry;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod service;
pub mod store;

use config::Config;
use store::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "skiff_orchestrator=debug,skiff_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Skiff Orchestrator...");

    let config = Config::from_env()?;
    config.validate()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let templates = TemplateRegistry::init(config.templates_dir.as_deref())
        .context("Failed to load script templates")?;
    let runners = RunnerFactory::new(
        config.dry_run,
        config.host_key_policy()?,
        config.ssh_io_timeout,
    );
    if config.dry_run {
        tracing::warn!("Dry run: scripts are rendered but never executed");
    }

    let engine = Engine::new(Services {
        store,
        templates,
        runners: Arc::new(runners),
        providers: ProviderRegistry::new(config.digitalocean_api.clone()),
        settings: config.engine_settings(),
    })
    .context("Invalid pipeline definitions")?;

    // Build router with all API endpoints
    let app = api::create_router(engine);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
