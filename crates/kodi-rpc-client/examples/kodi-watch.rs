//! # Kodi Watch
//!
//! Connects to a Kodi instance, checks it answers `JSONRPC.Ping`, prints the
//! application volume and then logs player notifications until Ctrl-C.
//!
//! ## Usage
//! ```bash
//! # WebSocket (notifications enabled)
//! cargo run --example kodi-watch -- --host 192.168.1.20 --ws-port 9090
//!
//! # HTTP only, with credentials
//! cargo run --example kodi-watch -- --host 192.168.1.20 --username kodi --password kodi
//! ```
//!
//! Set `RUST_LOG=kodi_rpc_client=debug` to see every call and frame.

use anyhow::{Context, Result};
use clap::Parser;
use kodi_rpc_client::{ClientConfig, KodiClient, KodiEndpoint, ReconnectConfig};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

/// Player notifications worth logging; listeners match method names exactly
const PLAYER_NOTIFICATIONS: &[&str] = &[
    "Player.OnPlay",
    "Player.OnResume",
    "Player.OnPause",
    "Player.OnStop",
    "Player.OnSeek",
    "Player.OnSpeedChanged",
    "Player.OnAVStart",
];

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Kodi host name or address
    #[arg(long, default_value = "localhost")]
    host: String,

    /// HTTP port
    #[arg(long, default_value = "8080")]
    port: u16,

    /// WebSocket port; without it only HTTP is used and no notifications arrive
    #[arg(long)]
    ws_port: Option<u16>,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Use https/wss
    #[arg(long)]
    tls: bool,

    /// Request timeout in seconds
    #[arg(short, long, default_value = "5")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut endpoint = KodiEndpoint::new(args.host, args.port).with_tls(args.tls);
    if let Some(ws_port) = args.ws_port {
        endpoint = endpoint.with_ws_port(ws_port);
    }
    if let Some(username) = args.username {
        endpoint = endpoint.with_credentials(username, args.password.unwrap_or_default());
    }

    let mut config = ClientConfig::default();
    config.timeouts.request = Duration::from_secs(args.timeout);
    config.reconnect = ReconnectConfig {
        enabled: true,
        ..ReconnectConfig::default()
    };

    let client = KodiClient::from_endpoint(endpoint, config)?;
    client
        .connect()
        .await
        .context("Failed to connect to Kodi")?;

    if !client.ping().await? {
        warn!("Kodi answered JSONRPC.Ping with something other than pong");
    }

    let properties = client
        .call(
            "Application.GetProperties",
            json!({"properties": ["name", "version", "volume", "muted"]}),
        )
        .await?;
    info!(
        name = %properties["name"],
        volume = %properties["volume"],
        muted = %properties["muted"],
        "Connected"
    );

    if !client.can_subscribe() {
        info!("No WebSocket port given, notifications are unavailable");
        client.close().await;
        return Ok(());
    }

    for method in PLAYER_NOTIFICATIONS {
        let method = *method;
        client.on(method, move |params| {
            info!(method = method, item = %params["data"]["item"], "Player notification");
        });
    }

    info!("{}", client.connection_status().summary());
    tokio::signal::ctrl_c().await?;

    client.close().await;
    let stats = client.statistics();
    info!(
        calls = stats.calls_started,
        notifications = stats.notifications_received,
        reconnects = stats.reconnects,
        "Bye"
    );
    Ok(())
}
