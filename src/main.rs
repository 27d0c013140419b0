// src/main.rs

//! The main entry point for the citrine proxy.

use anyhow::Result;
use citrine::config::Config;
use citrine::server;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    if std::env::args().any(|arg| arg == "--version") {
        println!("citrine version {VERSION}");
        return Ok(());
    }

    // Configuration comes from the environment. An unusable configuration
    // refuses to start; it never silently degrades.
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    // LOG_LEVEL seeds the filter, RUST_LOG overrides it, and CACHE_DEBUG
    // turns up the cache subsystem on its own.
    let mut default_filter = config.log_level.clone();
    if config.cache.debug {
        default_filter = format!("{default_filter},citrine::core::cache=debug");
    }
    let filter = std::env::var("RUST_LOG").unwrap_or(default_filter);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .compact()
        .with_ansi(true)
        .init();

    if let Err(e) = server::run(config).await {
        error!("Server runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
