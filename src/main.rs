// src/main.rs

//! Command-line entry point: lists the keys of one database of a configured server.

use anyhow::{Result, anyhow};
use keydeck::Browser;
use keydeck::config::Config;
use keydeck::core::client::TcpConnector;
use keydeck::core::events::TracingSink;
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const USAGE: &str =
    "Usage: keydeck [--config config.toml] --server <name> [--db N] [--match PATTERN] [--type TYPE]";

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();
    if args.contains(&"--version".to_string()) {
        println!("keydeck version {VERSION}");
        return Ok(());
    }

    let flag = |name: &str| {
        args.iter()
            .position(|arg| arg == name)
            .and_then(|i| args.get(i + 1))
            .map(|s| s.as_str())
    };

    let config_path = flag("--config").unwrap_or("config.toml");
    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    let Some(server) = flag("--server") else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    let db: u32 = match flag("--db").map(str::parse).transpose() {
        Ok(db) => db.unwrap_or(0),
        Err(_) => {
            eprintln!("Invalid database index");
            std::process::exit(1);
        }
    };
    let pattern = flag("--match").unwrap_or("*");
    let key_type = flag("--type").unwrap_or("");

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .init();

    let browser = Browser::from_config(
        &config,
        Arc::new(TcpConnector),
        Some(Arc::new(TracingSink)),
    );
    let result = tokio::select! {
        res = list_keys(&browser, server, db, pattern, key_type) => res,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
    };
    browser.shutdown().await;

    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

async fn list_keys(
    browser: &Browser,
    server: &str,
    db: u32,
    pattern: &str,
    key_type: &str,
) -> Result<()> {
    let total = browser.open_database(server, db).await?;
    info!("Database {} of '{}' holds {} keys", db, server, total);

    let page = browser.load_all_keys(server, db, pattern, key_type).await?;
    for key in &page.keys {
        println!("{}", serde_json::to_string(key)?);
    }
    info!("Listed {} keys", page.keys.len());
    Ok(())
}
