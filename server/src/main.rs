use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use duet_server::config::{generate_config_template, Config};
use duet_server::{auth, chat, db, routes, state};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("duet_server=info"))
}

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
        tracing_subscriber::fmt().json().with_env_filter(env_filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter()).init();
    }

    tracing::info!("Duet server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let presence = config.presence_settings();
    tracing::info!(
        heartbeat_secs = presence.heartbeat_interval.as_secs(),
        stale_after_secs = presence.stale_after.as_secs(),
        sweep_secs = presence.sweep_interval.as_secs(),
        "Presence windows"
    );

    let app_state =
        state::AppState::new(db, jwt_secret, presence).with_typing_ttl(config.typing_ttl());

    // Reconcile presence left over from a previous run, then keep sweeping
    match chat::presence::sweep_stale(&app_state).await {
        Ok(flipped) if !flipped.is_empty() => {
            tracing::info!(count = flipped.len(), "Cleared stale presence at startup");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Startup presence sweep failed"),
    }
    chat::presence::spawn_presence_sweep(app_state.clone());

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
