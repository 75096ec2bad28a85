//! Mango Chat CLI - listen to a chat room from the terminal.
//!
//! This is the main binary entry point. See the `mango_chat` library for
//! the client itself.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mango_chat::{ChatClient, ClientConfig, EnvToken, MessageType, StaticToken};
use mimalloc::MiMalloc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "mango-chat")]
#[command(version)]
#[command(about = "Real-time chat client for the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to a room, print incoming payloads as JSON lines and send
    /// each stdin line as a message
    Listen {
        /// Room to join
        #[arg(long)]
        room: i64,
        /// Also subscribe to this user's personal notifications
        #[arg(long)]
        user: Option<i64>,
        /// Bearer token (defaults to $MANGO_CHAT_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

/// What a subscription callback forwards to the main loop.
type Delivery = (&'static str, serde_json::Value);

fn init_logging() -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Ok(path) = std::env::var("MANGO_CHAT_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    } else {
        builder.target(env_logger::Target::Stderr);
    }
    builder.init();
    Ok(())
}

fn forward(tx: &mpsc::UnboundedSender<Delivery>, kind: &'static str) -> mango_chat::PayloadCallback {
    let tx = tx.clone();
    Box::new(move |payload| {
        let _ = tx.send((kind, payload));
    })
}

async fn listen(room: i64, user: Option<i64>, token: Option<String>) -> Result<()> {
    let config = ClientConfig::load()?;
    let (mut client, mut events) = match token {
        Some(token) => ChatClient::with_websocket(config, StaticToken::new(token))?,
        None => ChatClient::with_websocket(config, EnvToken::default())?,
    };

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    client.on_connection_status_change(move |connected| {
        let _ = status_tx.send(connected);
    });
    let (payload_tx, mut payload_rx) = mpsc::unbounded_channel::<Delivery>();

    client.connect()?;

    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            Some(event) = events.recv() => client.handle_event(event),
            Some(connected) = status_rx.recv() => {
                if !connected {
                    if let Some(error) = client.last_error() {
                        anyhow::bail!("connection lost: {error}");
                    }
                    break;
                }
                client.subscribe_to_room(
                    room,
                    forward(&payload_tx, "message"),
                    Some(forward(&payload_tx, "read")),
                )?;
                if let Some(user) = user {
                    client.subscribe_to_personal_notifications(user, forward(&payload_tx, "notification"))?;
                }
                eprintln!("Joined room {room}. Type a line to send it.");
            }
            Some((kind, payload)) = payload_rx.recv() => {
                println!("{}", serde_json::json!({ "kind": kind, "payload": payload }));
            }
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    Some(line) if client.is_connected() && !line.trim().is_empty() => {
                        if let Err(e) = client.send_message(room, &line, MessageType::Text) {
                            log::warn!("[Chat] Send failed: {}", e);
                        }
                    }
                    Some(_) => {}
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Listen { room, user, token } => listen(room, user, token).await?,
        Commands::Config => {
            let config = ClientConfig::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
