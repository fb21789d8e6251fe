mod config;
mod directory;
mod routes;
mod signaling;
mod state;
mod translation;
mod ws;

use std::sync::Arc;
use tokio::net::TcpListener;

use config::{generate_config_template, Config};
use directory::{OpenDirectory, RosterDirectory, UserDirectory};
use translation::connector::{TranslationConnector, UnavailableConnector};
use translation::openai::OpenAiRealtimeConnector;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "translink_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "translink_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("translink-server v{} starting", env!("CARGO_PKG_VERSION"));

    // Translation backend: capability-checked. Without an API key the
    // coordinator runs against the unavailable connector and every
    // activation degrades to "translation unavailable".
    let translation_config = config.translation.clone().unwrap_or_default();
    let connector: Arc<dyn TranslationConnector> = if translation_config.api_key.is_empty() {
        tracing::info!("No translation API key configured, translation disabled");
        Arc::new(UnavailableConnector)
    } else {
        tracing::info!(
            model = %translation_config.model,
            "Translation backend configured"
        );
        Arc::new(OpenAiRealtimeConnector::new(
            translation_config.api_key,
            translation_config.model,
            translation_config.session_url,
        ))
    };

    // User directory gating registration
    let directory_config = config.directory.clone().unwrap_or_default();
    let directory: Arc<dyn UserDirectory> = match directory_config.mode.as_str() {
        "roster" => {
            tracing::info!(
                members = directory_config.roster.len(),
                "Roster directory enabled"
            );
            Arc::new(RosterDirectory::new(directory_config.roster))
        }
        _ => Arc::new(OpenDirectory),
    };

    // Build application state and router
    let app_state = state::AppState::new(connector, directory);
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
