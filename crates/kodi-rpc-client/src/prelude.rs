//! # Kodi Client Prelude
//!
//! Convenient re-exports of the most commonly used types and traits.
//!
//! ```rust
//! use kodi_rpc_client::prelude::*;
//! ```

// Core client types
pub use crate::client::{ConnectionState, KodiClient, KodiClientBuilder};
pub use crate::config::{ClientConfig, KodiEndpoint, ReconnectConfig, TimeoutConfig};
pub use crate::error::{KodiClientError, KodiClientResult};
pub use crate::router::Subscription;

// Transport types
pub use crate::transport::{Transport, TransportType};

// Wire types from the codec crate
pub use kodi_json_rpc::prelude::*;

// Standard library types commonly used with the client
pub use std::time::Duration;
