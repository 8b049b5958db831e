use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use alfred_core::{validate_command_table, COMMAND_TABLE, REQUIRED_STRUCTURES};
use alfred_server::bootstrap::bootstrap;
use alfred_server::config::{Config, Environment};
use alfred_server::store::SqliteDatabase;
use alfred_server::stream::RedisStreamStore;
use alfred_server::{app, get_version, AppState, Dispatcher};

fn init_tracing(environment: Environment) {
    match environment {
        Environment::Development => {
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        Environment::Production => {
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration from environment")?;

    init_tracing(config.environment);

    info!("Starting alfred {}", get_version());

    validate_command_table(COMMAND_TABLE).context("Command table is invalid")?;

    let db_path = config.database_path();
    info!("Using state database: {}", db_path.display());
    let db = SqliteDatabase::new(&db_path).context("Failed to initialize SQLite database")?;

    let streams = RedisStreamStore::connect(&config.valkey_url)
        .await
        .with_context(|| format!("Failed to connect to stream store at {}", config.valkey_url))?;

    // No traffic until every structure the dispatcher writes to exists.
    let report = bootstrap(&streams, REQUIRED_STRUCTURES)
        .await
        .context("Stream structure bootstrap failed")?;
    info!(
        "Bootstrap complete: {} present, {} created",
        report.present.len(),
        report.created.len()
    );

    let dispatcher = Dispatcher::new(
        Arc::new(db),
        Arc::new(streams),
        config.timeouts,
        config.claim_window_days,
    );

    let app_state = Arc::new(AppState {
        webhook_secret: config.github_webhook_secret,
        dispatcher,
    });

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app(app_state)).await?;

    Ok(())
}
