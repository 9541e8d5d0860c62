//! Rallyd Engine - Main entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rallyd_engine::api::routes;
use rallyd_engine::game::pong::PongEngineFactory;
use rallyd_engine::ports::memory::{
    DevTokenAuth, InMemoryHistory, InMemoryNotifications, InMemoryUserDirectory,
};
use rallyd_engine::state::{AppState, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rallyd_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Rallyd Engine");

    let config = EngineConfig::from_env();

    // In-memory collaborators; real deployments swap these adapters out
    // behind the same ports.
    let directory = Arc::new(InMemoryUserDirectory::new());
    let auth = Arc::new(DevTokenAuth::new(config.token_ttl_secs, directory.clone()));
    let history = Arc::new(InMemoryHistory::new());
    let notifications = Arc::new(InMemoryNotifications::new());
    let engine_factory = Arc::new(PongEngineFactory);

    let state = AppState::new(
        config.clone(),
        auth,
        directory,
        history,
        notifications,
        engine_factory,
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = routes::router(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
