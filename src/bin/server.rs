use anyhow::Context;
use clap::Parser;
use haulage::{
    config::{create_default_config_file, AppConfig},
    routes::{app, AppState},
    Database, TokenService,
};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "haulage-server")]
#[command(about = "Freight marketplace API: shipments, offers, contracts, tracking and reviews")]
struct Args {
    /// TOML configuration file. Defaults plus environment overrides apply when omitted.
    #[arg(short, long, env = "HAULAGE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    database_url: Option<String>,

    /// Write a default configuration file to this path and exit.
    #[arg(long)]
    init_config: Option<PathBuf>,
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if config.is_json_logging() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(path) = args.init_config {
        create_default_config_file(&path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => AppConfig::load_with_env_overrides(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    config.validate()?;

    init_tracing(&config);

    let db = Database::connect(&config.database).await?;
    let secret = config
        .get_jwt_secret()
        .context("JWT secret is not configured")?;
    let tokens = TokenService::new(secret, config.token_ttl_hours());

    let address = config.get_server_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;
    tracing::info!(address = %address, database = %config.get_database_url(), "haulage server listening");

    axum::serve(listener, app(AppState::new(&db, tokens))).await?;

    Ok(())
}
