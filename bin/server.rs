// Apartment Finder - REST API server

use anyhow::{Context, Result};
use apartment_finder::api::{router, AppState};
use apartment_finder::config::Config;
use apartment_finder::db::{self, open_database};
use apartment_finder::logging::{init_logging, LogTarget};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "apartment-server", version, about = "Apartment trade REST API")]
struct Cli {
    /// TOML config file (defaults to ./apartment-finder.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on, overrides config and PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(LogTarget::ConsoleAndFile);

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let conn = open_database(&config.database.path)?;
    info!(path = %config.database.path.display(), "Database opened");
    if db::count_trades(&conn)? == 0 {
        warn!("No apartment trades stored yet, run `apartment-finder seed` first");
    }

    let app = router(AppState::new(conn), config.server.static_dir.as_deref());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server running on http://localhost:{}", config.server.port);
    info!("API: http://localhost:{}/api/apartments/trades", config.server.port);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
