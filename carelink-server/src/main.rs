use clap::Parser;
use std::{env, net::SocketAddr};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use carelink_server::{create_app, CareLinkServer};

/// CareLink Sync HTTP Server
#[derive(Parser, Debug)]
#[command(name = "carelink-server")]
#[command(about = "Offline-first sync API server for the CareLink home-care platform")]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "0.0.0.0", env = "CARELINK_HOST")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "8080", env = "CARELINK_PORT")]
    port: u16,

    /// SQLite database file path
    #[arg(short, long, default_value = "carelink-sync.db", env = "CARELINK_DATABASE")]
    database: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_tracing(args.verbose);

    info!("Starting CareLink sync server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", args.database);

    let server = CareLinkServer::new(&args.database).await?;
    let app = create_app(server);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("CareLink sync server running on http://{}", addr);
    info!("Health check available at: http://{}/health", addr);
    info!("API docs available at: http://{}/docs", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "carelink_server={},carelink_sync={},tower_http=info,sqlx=warn",
            level, level
        )
        .into()
    });

    let is_development =
        env::var("CARELINK_ENV").unwrap_or_else(|_| "development".to_string()) == "development";

    if is_development {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .init();
    } else {
        // Structured JSON logging for production
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_ansi(false).json())
            .init();
    }
}
