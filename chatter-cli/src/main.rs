//! Minimal terminal chat client.
//!
//! Lines typed on stdin are sent as chat messages; `/quit` disconnects,
//! `/reconnect` restarts a dead connection, `/who` prints who is online.
//!
//! Usage:
//!   chatter --url ws://127.0.0.1:8080/ws --api-base http://127.0.0.1:8080/api
//!
//! The bearer token comes from `--token` or the `CHATTER_TOKEN` env var.

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use chatter_sdk::{ClientEvent, ClientHandle, ConnectConfig, connect};

#[derive(Parser)]
#[command(name = "chatter", about = "Terminal client for the chatter chat server")]
struct Args {
    /// WebSocket endpoint.
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// REST API root for history and presence snapshots. Both are
    /// skipped when omitted.
    #[arg(long)]
    api_base: Option<String>,

    /// Bearer token minted by the login flow.
    #[arg(long, env = "CHATTER_TOKEN")]
    token: String,

    /// History messages to load after authenticating.
    #[arg(long, default_value_t = 50)]
    history: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatter=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = ConnectConfig {
        url: args.url,
        api_base: args.api_base,
        history_limit: args.history,
        ..ConnectConfig::default()
    };
    let (handle, mut events) = connect(config, args.token);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => render(event),
                    // The client task is gone (intentional disconnect).
                    None => break,
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => handle_input(&handle, line.trim()).await,
                    None => handle.disconnect().await,
                }
            }
        }
    }

    Ok(())
}

async fn handle_input(handle: &ClientHandle, line: &str) {
    match line {
        "" => {}
        "/quit" => handle.disconnect().await,
        "/reconnect" => handle.reconnect().await,
        "/who" => {
            let (mut users, count) = handle.online_users();
            users.sort();
            println!("* {count} online: {}", users.join(", "));
        }
        _ => {
            if let Err(e) = handle.send(line) {
                eprintln!("! send failed: {e}");
            }
        }
    }
}

fn render(event: ClientEvent) {
    match event {
        ClientEvent::Connected => println!("* connected"),
        ClientEvent::Disconnected { reason } => println!("* disconnected: {reason}"),
        ClientEvent::AuthSuccess { username } => println!("* signed in as {username}"),
        ClientEvent::AuthError { message } => eprintln!("! authentication failed: {message}"),
        ClientEvent::Message { entry } => {
            let time = chrono::DateTime::from_timestamp_millis(entry.timestamp)
                .map(|dt| dt.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "--:--:--".to_string());
            let from = entry.sender_username.as_deref().unwrap_or("?");
            let marker = if entry.filtered { " [filtered]" } else { "" };
            println!("[{time}] <{from}> {}{marker}", entry.content);
        }
        ClientEvent::UserJoined {
            username,
            online_count,
        } => println!("* {username} joined ({online_count} online)"),
        ClientEvent::UserLeft {
            username,
            online_count,
        } => println!("* {username} left ({online_count} online)"),
        ClientEvent::MessageDeleted {
            message_id,
            deleted_by,
        } => println!("* message {message_id} recalled by {deleted_by}"),
        ClientEvent::SystemNotice { message } => println!("* {message}"),
        ClientEvent::TransportError { message } => eprintln!("! {message}"),
    }
}
