// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flags and remote config Rust SDK for EdgeFlags.
//!
//! This crate keeps a local snapshot of the flags and config values the
//! EdgeFlags server evaluated for a context, so reads never wait on the
//! network.
//!
//! # Features
//!
//! - **Streaming Sync**: WebSocket subscription with keepalive and automatic
//!   reconnect
//! - **Polling Fallback**: Periodic full fetches when streaming is unavailable
//! - **Change Events**: Per-key previous/current values for every update
//! - **Bootstrap Data**: Serve values before the first fetch completes
//! - **Mock Mode**: Offline clients for tests
//!
//! # Example
//!
//! ```ignore
//! use edgeflags::{EvaluationContext, FlagsClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FlagsClient::builder()
//!         .token("ef_live_xxx")
//!         .base_url("https://flags.example.com")
//!         .context(EvaluationContext::new().with_user_id("user123"))
//!         .build()?;
//!
//!     client.on_change(|event| {
//!         for change in &event.flags {
//!             println!("{} changed to {:?}", change.key, change.current);
//!         }
//!     });
//!
//!     client.init().await?;
//!
//!     let enabled = client.bool_flag("new_checkout", false);
//!     let theme = client.str_flag("ui_theme", "light");
//!
//!     client.identify(EvaluationContext::new().with_user_id("user456")).await?;
//!     client.destroy().await;
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
mod emitter;
mod error;
mod fetcher;
mod mock;
mod poller;
mod socket;
mod stream;

#[cfg(test)]
mod test_support;

pub use cache::FlagCache;
pub use client::{ClientConfig, FlagsClient, FlagsClientBuilder, TransportKind, TransportMode};
pub use emitter::{EventEmitter, EventKind, Subscription};
pub use error::{FlagsError, Result};
pub use fetcher::{Fetcher, HttpFetcher};
pub use mock::MockClientBuilder;
pub use poller::Poller;
pub use socket::{Connector, Socket, TungsteniteSocket, WebSocketConnector};
pub use stream::{backoff_delay, stream_url, StreamConfig, StreamListener, StreamTransport};

// Re-export core types for convenience
pub use edgeflags_core::{
	structural_eq, ChangeEvent, ChangeRecord, ClientMessage, ConfigChange, ConfigMap,
	ConnectionStatus, DiffChange, DiffKind, EvaluationContext, EvaluationResponse, FlagChange,
	FlagMap, FlagValue, ServerMessage,
};
