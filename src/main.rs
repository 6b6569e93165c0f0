use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hoodpost::auth::session;
use hoodpost::config::{Cli, Config};
use hoodpost::db;
use hoodpost::routes;
use hoodpost::state::AppState;
use hoodpost::store::SqliteDocumentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Ensure uploads directory exists
    std::fs::create_dir_all(config.uploads_path())?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;
    let purged = session::purge_expired(&pool)?;
    if purged > 0 {
        tracing::info!("Purged {} expired sessions", purged);
    }

    let store = Arc::new(SqliteDocumentStore::new(pool.clone()));
    let state = AppState::new(pool, config.clone(), store);
    tracing::info!(
        "Feed shows {} posts; deletes cascade to {:?}",
        config.feed.limit,
        config.feed.cascade
    );

    let app = routes::build_app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
