use std::sync::Arc;

use tokio::net::TcpListener;

use chat_relay::auth::jwt::{self, JwtVerifier};
use chat_relay::config::{generate_config_template, Config};
use chat_relay::db::{self, SqliteStore};
use chat_relay::hub::Hub;
use chat_relay::routes;
use chat_relay::state::AppState;

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
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("chat_relay=info"))?;
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .init();
    }

    tracing::info!("chat-relay v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let pool = db::init_db(&config.data_dir)?;
    let store = Arc::new(SqliteStore::new(pool));

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Start the event hub; its dispatcher runs on its own task
    let hub_config = &config.hub;
    let hub = Hub::spawn(hub_config.hub_settings());
    tracing::info!(
        outbound_queue_capacity = hub_config.outbound_queue_capacity,
        overflow_policy = ?hub_config.overflow_policy,
        "Event hub started"
    );

    let app_state = AppState {
        messages: store.clone(),
        rooms: store,
        verifier: Arc::new(JwtVerifier::new(jwt_secret)),
        hub,
        keepalive: hub_config.keepalive_settings(),
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
