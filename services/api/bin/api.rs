//! Main Entrypoint for the Vidya API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Opening the SQLite database and running migrations.
//! 3. Initializing shared services (the LLM client, curriculum and directive channel).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use vidya_api::{config::Config, db::Db, router::create_router, state::AppState};
use vidya_core::{
    channel::DirectiveChannel,
    curriculum::{CurriculumProvider, DirectoryCurriculum},
    llm_client::OpenAICompatibleClient,
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let db = Arc::new(
        Db::connect(&config.database_url)
            .await
            .context("Failed to open database")?,
    );
    db.run_migrations().await?;
    info!("Database ready and migrations are up-to-date.");

    // --- 4. Initialize Shared Services ---
    let api_key = config
        .api_key()
        .context("No API key configured for the selected provider")?;
    let openai_config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(config.provider.api_base());
    let llm_client = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));

    let curriculum = DirectoryCurriculum::new(&config.curriculum_path);
    let subjects = curriculum.list_subjects().await;
    if subjects.is_empty() {
        warn!(path = %config.curriculum_path.display(), "No curriculum subjects found");
    } else {
        info!(?subjects, "Curriculum loaded");
    }

    let app_state = Arc::new(AppState {
        db,
        channel: DirectiveChannel::new(),
        curriculum: Arc::new(curriculum),
        llm_client,
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
