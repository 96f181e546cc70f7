// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Socket abstraction used by the streaming transport.
//!
//! The transport only needs to exchange JSON text frames, so the socket
//! surface is reduced to text send/receive and close. [`WebSocketConnector`]
//! is the production implementation; tests plug in scripted connectors.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::{FlagsError, Result};

/// An open, bidirectional text-frame socket.
#[async_trait]
pub trait Socket: Send {
	/// Sends one text frame.
	async fn send(&mut self, text: String) -> Result<()>;

	/// Waits for the next text frame.
	///
	/// Returns `None` once the peer has closed the connection.
	async fn recv(&mut self) -> Option<Result<String>>;

	/// Closes the socket. Errors are swallowed; the socket is unusable
	/// afterwards either way.
	async fn close(&mut self);
}

/// Opens sockets for the streaming transport.
#[async_trait]
pub trait Connector: Send + Sync {
	/// Opens a socket to `url`, resolving once the connection is open.
	async fn connect(&self, url: &Url) -> Result<Box<dyn Socket>>;
}

/// Opens WebSocket connections with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
	async fn connect(&self, url: &Url) -> Result<Box<dyn Socket>> {
		let (ws, response) = connect_async(url.as_str())
			.await
			.map_err(|e| FlagsError::StreamConnectFailed(e.to_string()))?;
		debug!(status = response.status().as_u16(), "WebSocket handshake complete");
		Ok(Box::new(TungsteniteSocket { ws }))
	}
}

/// A WebSocket opened by [`WebSocketConnector`].
pub struct TungsteniteSocket {
	ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for TungsteniteSocket {
	async fn send(&mut self, text: String) -> Result<()> {
		self.ws
			.send(Message::Text(text))
			.await
			.map_err(|e| FlagsError::StreamError(e.to_string()))
	}

	async fn recv(&mut self) -> Option<Result<String>> {
		loop {
			match self.ws.next().await? {
				Ok(Message::Text(text)) => return Some(Ok(text)),
				Ok(Message::Binary(data)) => match String::from_utf8(data) {
					Ok(text) => return Some(Ok(text)),
					Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
				},
				Ok(Message::Close(_)) => return None,
				// Ping replies are queued by tungstenite itself.
				Ok(_) => {}
				Err(e) => return Some(Err(FlagsError::StreamError(e.to_string()))),
			}
		}
	}

	async fn close(&mut self) {
		if let Err(e) = self.ws.close(None).await {
			debug!(error = %e, "WebSocket close failed");
		}
	}
}
