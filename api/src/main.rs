use std::net::SocketAddr;
use std::sync::Arc;

use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use summon_mcp_runtime::audit::StderrAuditSink;

mod auth;
mod error;
mod github;
mod middleware;
mod routes;
mod sessions;
mod state;

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "summon_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = state::ServerConfig::from_env();

    // The anonymous deployment can run without upstream credentials; the
    // authenticated one cannot.
    let github = if config.require_auth {
        github::GitHubClient::new(
            std::env::var("SUMMON_GITHUB_CLIENT_ID")
                .expect("SUMMON_GITHUB_CLIENT_ID must be set"),
            std::env::var("SUMMON_GITHUB_CLIENT_SECRET")
                .expect("SUMMON_GITHUB_CLIENT_SECRET must be set"),
        )
    } else {
        github::GitHubClient::new(
            std::env::var("SUMMON_GITHUB_CLIENT_ID").unwrap_or_default(),
            std::env::var("SUMMON_GITHUB_CLIENT_SECRET").unwrap_or_default(),
        )
    };

    let app_state = state::AppState::new(github, config, Arc::new(StderrAuditSink));

    let cors_layer = middleware::cors::build_cors_layer();

    let app = routes::router()
        .layer(auth::InjectAuthLayer::new(app_state.tokens.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Summon API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}
