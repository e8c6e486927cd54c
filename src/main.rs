use clap::Parser;
use dialect_bridge::config::config_search_paths;
use dialect_bridge::{build_router, AppState, BridgeConfig, HttpBackend, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "dialect-bridge",
    about = "Serve the Responses and Messages APIs on top of a Chat Completions backend",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend base URL (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Exchange log file path
    #[arg(long, default_value = "dialect-bridge.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dialect_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = BridgeConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(base_url) = cli.base_url {
        config.backend.base_url = base_url;
    }

    let logger = SharedLogger::new(&cli.log_file)?;
    let backend = HttpBackend::from_config(&config)?;

    info!("dialect-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Backend:   {}", backend.url());
    info!("  Auth:      {}", if config.backend.api_key_env.is_some() { "bearer" } else { "none" });
    info!("  Timeout:   {}s", config.backend.timeout_secs);
    info!("  Port:      {}", config.port);
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!("Starting dialect-bridge backend={} port={}", backend.url(), config.port),
    );

    let state = Arc::new(AppState { backend, logger });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  Responses: POST http://localhost:{}/v1/responses", config.port);
    info!("  Messages:  POST http://localhost:{}/v1/messages", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
