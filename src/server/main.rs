//! Group Chat Server - Main Entry Point
//!
//! Loads credentials, binds the listener and serves clients.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;

use group_chat::{ChatServer, CredentialStore, ServerConfig};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "chat-server")]
#[command(about = "Authenticated multi-user chat server")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    /// Override host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Override listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override credentials file (`username:password` per line)
    #[arg(short, long)]
    users: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_found = args.config.exists();
    let mut config = if config_found {
        ServerConfig::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        ServerConfig::default()
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(users) = args.users {
        config.users_file = users;
    }
    let log_level = args.log_level.unwrap_or_else(|| config.log_level.clone());

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&log_level))
        .init();

    if !config_found {
        info!("Config file {} not found, using defaults", args.config.display());
    }

    // No credentials, no server
    let credentials = CredentialStore::load(&config.users_file)?;

    let server = ChatServer::new(credentials, config.connection_settings());
    let listener = ChatServer::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("binding {}:{}", config.host, config.port))?;

    server.serve(listener).await?;
    Ok(())
}
