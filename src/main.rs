use std::path::PathBuf;
use std::sync::Arc;

use brief_core::gateway::TextGateway;
use brief_engine::{BriefSynthesizer, SessionService};
use brief_llm::AnthropicGateway;
use brief_store::Database;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting brief server");

    // Database path
    let data_dir = dirs_home().join(".briefd").join("database");
    std::fs::create_dir_all(&data_dir).expect("Failed to create database directory");
    let db_path = data_dir.join("briefd.db");

    let db = Database::open(&db_path).expect("Failed to open database");
    tracing::info!(path = %db_path.display(), "Database opened");

    // Credentials are checked here, not on the first request
    let gateway = AnthropicGateway::from_env()
        .expect("Failed to configure model gateway (is ANTHROPIC_API_KEY set?)");
    tracing::info!(model = gateway.model(), "Model gateway configured");

    let synthesizer = BriefSynthesizer::new(Arc::new(gateway));
    let service = Arc::new(SessionService::new(db, synthesizer));

    // Start server
    let config = brief_server::ServerConfig::default();
    let handle = brief_server::start(config, service)
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "Brief server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
