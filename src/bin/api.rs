use std::sync::Arc;
use stockchat::api::{start_server, SessionManager};
use stockchat::groq::GroqClient;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    if std::env::var("GROQ_API_KEY").unwrap_or_default().is_empty() {
        eprintln!("⚠️  GROQ_API_KEY not set in .env");
        eprintln!("📌 Chat requests will answer with a setup instruction until it is configured");
    }

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("🚀 Stock Chat Orchestrator - API Server");
    info!("📍 Port: {}", api_port);

    let model = Arc::new(GroqClient::from_env());
    let sessions = Arc::new(SessionManager::new(model));

    info!("✅ Session manager initialized");
    info!("📡 Starting API server...");

    start_server(sessions, api_port).await?;

    Ok(())
}
