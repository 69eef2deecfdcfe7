//! # Kodi JSON-RPC Client
//!
//! Connection layer for the JSON-RPC 2.0 API exposed by Kodi. It takes care
//! of the transport, of matching responses to calls, and of fanning out the
//! notifications Kodi pushes over its WebSocket port. Mapping domain verbs
//! (play, pause, library queries) onto method names is left to callers.
//!
//! ## Features
//!
//! - **Two transports**: single-shot HTTP POSTs, or a persistent WebSocket
//! - **Concurrent calls**: any number of calls multiplexed over one socket
//! - **Notifications**: per-method listeners, isolated from each other
//! - **Failure handling**: per-call deadlines, drained calls on disconnect,
//!   optional reconnection with exponential backoff
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kodi_rpc_client::{ClientConfig, KodiClient, KodiEndpoint};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = KodiEndpoint::new("192.168.1.20", 8080).with_ws_port(9090);
//!     let client = KodiClient::from_endpoint(endpoint, ClientConfig::default())?;
//!
//!     client.connect().await?;
//!
//!     client.on("Player.OnPlay", |params| println!("playing: {}", params));
//!
//!     let props = client
//!         .call("Application.GetProperties", json!({"properties": ["volume"]}))
//!         .await?;
//!     println!("volume: {}", props["volume"]);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Transport Types
//!
//! ### HTTP Transport
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use kodi_rpc_client::transport::HttpTransport;
//!
//! let transport = HttpTransport::new("http://localhost:8080/jsonrpc")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### WebSocket Transport
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use kodi_rpc_client::transport::WebSocketTransport;
//!
//! let transport = WebSocketTransport::new("ws://localhost:9090/jsonrpc")?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod prelude;
pub mod router;
pub mod transport;

// Re-export main types
pub use client::{
    ClientStatistics, ConnectionState, ConnectionStatus, KodiClient, KodiClientBuilder,
};
pub use config::{
    ClientConfig, ConnectionConfig, Credentials, KodiEndpoint, ReconnectConfig, TimeoutConfig,
};
pub use correlation::{CorrelationTable, DrainReason, PendingCall};
pub use error::{KodiClientError, KodiClientResult, TransportError, UnmatchedResponse};
pub use router::{DispatchReport, NotificationRouter, Subscription};

// Re-export transport types
pub use transport::{Transport, TransportType};
