//! Interactive Chat Client
//!
//! Relays stdin lines to the server and prints whatever the server sends,
//! including the login prompts.

use anyhow::Result;
use clap::Parser;
use log::{debug, info};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use group_chat::ClientConfig;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "chat-client")]
#[command(about = "Interactive client for the group chat server")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/client.toml")]
    config: PathBuf,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_found = args.config.exists();
    let config = if config_found {
        ClientConfig::from_file(&args.config)?
    } else {
        ClientConfig::default()
    };
    let log_level = args.log_level.unwrap_or_else(|| config.log_level.clone());

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&log_level))
        .init();

    if !config_found {
        info!("Config file not found, using defaults");
    }

    let host = args.host.unwrap_or(config.server_host.clone());
    let port = args.port.unwrap_or(config.port);

    let stream = TcpStream::connect((host.as_str(), port)).await?;
    info!("Connected to {}:{}", host, port);

    let (read_half, mut write_half) = stream.into_split();

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<String>();
    let mut server_task = tokio::spawn(print_server_output(read_half));
    let input_task = tokio::spawn(read_user_input(cmd_tx));

    loop {
        tokio::select! {
            Some(line) = cmd_rx.recv() => {
                write_half.write_all(format!("{}\n", line).as_bytes()).await?;
            }
            result = &mut server_task => {
                if let Ok(Err(e)) = result {
                    debug!("Server read failed: {}", e);
                }
                println!();
                println!("Connection closed by server");
                break;
            }
        }
    }

    input_task.abort();
    Ok(())
}

/// Copy server output to stdout as it arrives. Prompts carry no newline,
/// so this works on raw chunks rather than lines.
async fn print_server_output<R>(mut reader: R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        stdout.write_all(&buf[..n]).await?;
        stdout.flush().await?;
    }
}

async fn read_user_input(cmd_tx: mpsc::UnboundedSender<String>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        if cmd_tx.send(line).is_err() {
            break;
        }
    }
    Ok(())
}
