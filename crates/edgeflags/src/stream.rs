// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Streaming transport for real-time flag updates.
//!
//! This module keeps a WebSocket open to the flag stream, sends the client's
//! subscription, and hands every snapshot and diff to a [`StreamListener`].
//! A lost connection is retried with exponential backoff until the transport
//! is closed; the last subscription is replayed after each reconnect.
//!
//! Keepalive runs on the connection task: a `ping` goes out every
//! [`StreamConfig::keepalive_interval`], and a missing `pong` after
//! [`StreamConfig::pong_timeout`] is treated as a lost connection.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edgeflags_core::{
	ClientMessage, ConfigMap, ConnectionStatus, DiffChange, EvaluationContext, FlagMap,
	ServerMessage,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{FlagsError, Result};
use crate::socket::{Connector, Socket};

const STREAM_PATH: &str = "stream/flags";
const DEFAULT_SERVER_ERROR: &str = "Server error";

/// Timing for keepalive and reconnection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
	/// How often to send a `ping` on an idle connection.
	pub keepalive_interval: Duration,
	/// How long to wait for a `pong` before dropping the connection.
	pub pong_timeout: Duration,
	/// Delay before the first reconnect attempt.
	pub backoff_base: Duration,
	/// Upper bound for the reconnect delay.
	pub backoff_max: Duration,
}

impl Default for StreamConfig {
	fn default() -> Self {
		Self {
			keepalive_interval: Duration::from_secs(30),
			pong_timeout: Duration::from_secs(10),
			backoff_base: Duration::from_secs(1),
			backoff_max: Duration::from_secs(30),
		}
	}
}

/// Returns the delay before reconnect attempt `attempt` (zero-based):
/// `min(base * 2^attempt, max)`.
pub fn backoff_delay(config: &StreamConfig, attempt: u32) -> Duration {
	let factor = 2u32.saturating_pow(attempt.min(16));
	config
		.backoff_base
		.saturating_mul(factor)
		.min(config.backoff_max)
}

/// Builds the stream URL from an HTTP(S) base URL and access token.
///
/// `http` becomes `ws` and `https` becomes `wss`; the token is carried as a
/// URL-encoded query parameter.
pub fn stream_url(base_url: &str, token: &str) -> Result<Url> {
	let mut url = Url::parse(base_url)
		.map_err(|e| FlagsError::InvalidBaseUrl(format!("{base_url}: {e}")))?;

	let scheme = match url.scheme() {
		"http" | "ws" => "ws",
		"https" | "wss" => "wss",
		other => {
			return Err(FlagsError::InvalidBaseUrl(format!(
				"unsupported scheme '{other}'"
			)))
		}
	};
	url.set_scheme(scheme)
		.map_err(|_| FlagsError::InvalidBaseUrl(base_url.to_string()))?;

	let path = format!("{}/{STREAM_PATH}", url.path().trim_end_matches('/'));
	url.set_path(&path);
	url.query_pairs_mut().clear().append_pair("token", token);
	Ok(url)
}

/// Receives everything the transport learns from the server.
///
/// Callbacks run on the connection task and must not block.
pub trait StreamListener: Send + Sync {
	fn on_snapshot(&self, flags: FlagMap, configs: ConfigMap);
	fn on_diff(&self, changes: Vec<DiffChange>);
	fn on_connection_change(&self, status: ConnectionStatus);
	fn on_error(&self, error: FlagsError);
}

#[derive(Debug, Clone)]
struct Subscription {
	env: Option<String>,
	context: EvaluationContext,
}

impl Subscription {
	fn message(&self) -> ClientMessage {
		ClientMessage::Subscribe {
			env: self.env.clone(),
			context: self.context.clone(),
		}
	}
}

#[derive(Debug, Default)]
struct Shared {
	connected: AtomicBool,
	closed: AtomicBool,
	attempts: AtomicU32,
	subscription: Mutex<Option<Subscription>>,
}

#[derive(Debug)]
enum Command {
	Send(String),
	Close,
}

/// Manages one logical streaming connection, across reconnects.
pub struct StreamTransport {
	url: Url,
	config: StreamConfig,
	connector: Arc<dyn Connector>,
	listener: Arc<dyn StreamListener>,
	shared: Arc<Shared>,
	commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
	task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StreamTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StreamTransport")
			.field("url", &redact(&self.url))
			.field("connected", &self.is_connected())
			.field("reconnect_attempts", &self.reconnect_attempts())
			.finish()
	}
}

impl StreamTransport {
	pub fn new(
		url: Url,
		config: StreamConfig,
		connector: Arc<dyn Connector>,
		listener: Arc<dyn StreamListener>,
	) -> Self {
		Self {
			url,
			config,
			connector,
			listener,
			shared: Arc::new(Shared::default()),
			commands: Mutex::new(None),
			task_handle: Mutex::new(None),
		}
	}

	/// Opens the socket and starts the connection task.
	///
	/// Resolves once the socket is open. Calling it on a transport that is
	/// already running does nothing.
	pub async fn connect(&self) -> Result<()> {
		if self.shared.closed.load(Ordering::SeqCst) {
			return Err(FlagsError::StreamClosed);
		}
		if self.task_handle.lock().is_some() {
			return Ok(());
		}

		info!(url = %redact(&self.url), "Connecting to flag stream");
		let mut socket = self.connector.connect(&self.url).await.map_err(|e| {
			warn!(error = %e, "Flag stream connection failed");
			e
		})?;

		if self.shared.closed.load(Ordering::SeqCst) {
			socket.close().await;
			return Err(FlagsError::StreamClosed);
		}

		self.shared.attempts.store(0, Ordering::SeqCst);
		self.shared.connected.store(true, Ordering::SeqCst);
		info!("Flag stream connected");
		self.listener.on_connection_change(ConnectionStatus::Connected);

		let (tx, rx) = mpsc::unbounded_channel();
		*self.commands.lock() = Some(tx);

		let ctx = RunContext {
			url: self.url.clone(),
			config: self.config.clone(),
			connector: Arc::clone(&self.connector),
			listener: Arc::clone(&self.listener),
			shared: Arc::clone(&self.shared),
		};
		*self.task_handle.lock() = Some(tokio::spawn(run_connection(ctx, socket, rx)));
		Ok(())
	}

	/// Subscribes to an environment under the given context.
	///
	/// The arguments are remembered and replayed after every reconnect. The
	/// frame itself is only sent when the socket is currently open.
	pub fn subscribe(&self, env: Option<String>, context: EvaluationContext) {
		let subscription = Subscription { env, context };
		let message = subscription.message();
		*self.shared.subscription.lock() = Some(subscription);
		self.send_message(&message);
	}

	/// Asks the server to re-evaluate under a new context.
	pub fn update_context(&self, context: EvaluationContext) {
		if let Some(subscription) = self.shared.subscription.lock().as_mut() {
			subscription.context = context.clone();
		}
		self.send_message(&ClientMessage::UpdateContext { context });
	}

	/// Closes the connection and stops reconnecting. Safe to call more than
	/// once.
	pub async fn close(&self) {
		if self.shared.closed.swap(true, Ordering::SeqCst) {
			return;
		}

		if let Some(tx) = self.commands.lock().take() {
			let _ = tx.send(Command::Close);
		}
		let handle = self.task_handle.lock().take();
		self.shared.connected.store(false, Ordering::SeqCst);

		if let Some(handle) = handle {
			let _ = handle.await;
		}
		info!("Flag stream closed");
		self.listener.on_connection_change(ConnectionStatus::Disconnected);
	}

	pub fn is_connected(&self) -> bool {
		self.shared.connected.load(Ordering::SeqCst)
	}

	/// Returns the number of reconnect attempts since the last successful
	/// connection.
	pub fn reconnect_attempts(&self) -> u32 {
		self.shared.attempts.load(Ordering::SeqCst)
	}

	pub fn url(&self) -> &Url {
		&self.url
	}

	fn send_message(&self, message: &ClientMessage) {
		if !self.is_connected() {
			debug!(message_type = message.message_type(), "Stream not connected, dropping message");
			return;
		}
		let text = match serde_json::to_string(message) {
			Ok(text) => text,
			Err(e) => {
				warn!(error = %e, "Failed to encode stream message");
				return;
			}
		};
		if let Some(tx) = self.commands.lock().as_ref() {
			let _ = tx.send(Command::Send(text));
		}
	}
}

impl Drop for StreamTransport {
	fn drop(&mut self) {
		if let Some(handle) = self.task_handle.get_mut().take() {
			handle.abort();
		}
	}
}

/// Everything the connection task needs, detached from the transport handle.
struct RunContext {
	url: Url,
	config: StreamConfig,
	connector: Arc<dyn Connector>,
	listener: Arc<dyn StreamListener>,
	shared: Arc<Shared>,
}

enum Exit {
	/// `close()` was called.
	Closed,
	/// The socket went away without being asked to.
	Lost,
}

async fn run_connection(
	ctx: RunContext,
	mut socket: Box<dyn Socket>,
	mut commands: mpsc::UnboundedReceiver<Command>,
) {
	loop {
		let exit = drive(&ctx, socket.as_mut(), &mut commands).await;
		socket.close().await;
		ctx.shared.connected.store(false, Ordering::SeqCst);

		if matches!(exit, Exit::Closed) || ctx.shared.closed.load(Ordering::SeqCst) {
			break;
		}

		ctx.listener.on_connection_change(ConnectionStatus::Reconnecting);
		match reconnect(&ctx, &mut commands).await {
			Some(next) => socket = next,
			None => break,
		}
	}
	debug!("Flag stream task finished");
}

/// Pumps one open socket until it is lost or the transport is closed.
async fn drive(
	ctx: &RunContext,
	socket: &mut dyn Socket,
	commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Exit {
	let keepalive = ctx.config.keepalive_interval;
	let mut ticker = interval_at(Instant::now() + keepalive, keepalive);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	let mut pong_deadline: Option<Instant> = None;

	loop {
		tokio::select! {
			frame = socket.recv() => match frame {
				Some(Ok(text)) => handle_frame(ctx, &text, &mut pong_deadline),
				Some(Err(e)) => {
					warn!(error = %e, "Flag stream read failed");
					return Exit::Lost;
				}
				None => {
					info!("Flag stream closed by server");
					return Exit::Lost;
				}
			},
			_ = ticker.tick() => {
				if let Err(e) = send_frame(socket, &ClientMessage::Ping).await {
					warn!(error = %e, "Failed to send keepalive ping");
					return Exit::Lost;
				}
				// An outstanding ping keeps its original deadline.
				pong_deadline.get_or_insert_with(|| Instant::now() + ctx.config.pong_timeout);
			}
			_ = sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
				warn!(
					timeout_ms = ctx.config.pong_timeout.as_millis() as u64,
					"No pong received, dropping flag stream"
				);
				return Exit::Lost;
			}
			command = commands.recv() => match command {
				Some(Command::Send(text)) => {
					if let Err(e) = socket.send(text).await {
						warn!(error = %e, "Failed to send stream message");
						return Exit::Lost;
					}
				}
				Some(Command::Close) | None => return Exit::Closed,
			}
		}
	}
}

fn handle_frame(ctx: &RunContext, text: &str, pong_deadline: &mut Option<Instant>) {
	let message: ServerMessage = match serde_json::from_str(text) {
		Ok(message) => message,
		Err(e) => {
			warn!(error = %e, "Failed to parse stream message");
			return;
		}
	};

	debug!(message_type = message.message_type(), "Stream message received");

	match message {
		ServerMessage::Snapshot { flags, configs } => ctx.listener.on_snapshot(flags, configs),
		ServerMessage::Diff { changes } => ctx.listener.on_diff(changes),
		ServerMessage::Pong => *pong_deadline = None,
		ServerMessage::Error { error } => {
			let message = error.unwrap_or_else(|| DEFAULT_SERVER_ERROR.to_string());
			warn!(error = %message, "Server reported a stream error");
			ctx.listener.on_error(FlagsError::ServerReported(message));
		}
		ServerMessage::Unknown => {}
	}
}

/// Reconnects with backoff until a socket opens or the transport is closed.
async fn reconnect(
	ctx: &RunContext,
	commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Option<Box<dyn Socket>> {
	loop {
		if ctx.shared.closed.load(Ordering::SeqCst) {
			return None;
		}

		let attempt = ctx.shared.attempts.fetch_add(1, Ordering::SeqCst);
		let delay = backoff_delay(&ctx.config, attempt);
		info!(
			attempt = attempt + 1,
			delay_ms = delay.as_millis() as u64,
			"Reconnecting to flag stream"
		);

		tokio::select! {
			_ = sleep(delay) => {}
			_ = wait_for_close(commands) => return None,
		}

		let result = tokio::select! {
			result = ctx.connector.connect(&ctx.url) => result,
			_ = wait_for_close(commands) => return None,
		};

		match result {
			Ok(mut socket) => {
				if ctx.shared.closed.load(Ordering::SeqCst) {
					socket.close().await;
					return None;
				}

				ctx.shared.attempts.store(0, Ordering::SeqCst);
				ctx.shared.connected.store(true, Ordering::SeqCst);
				info!("Flag stream reconnected");
				ctx.listener.on_connection_change(ConnectionStatus::Connected);

				let subscription = ctx.shared.subscription.lock().clone();
				if let Some(subscription) = subscription {
					if let Err(e) = send_frame(socket.as_mut(), &subscription.message()).await {
						warn!(error = %e, "Failed to replay subscription");
					}
				}
				return Some(socket);
			}
			Err(e) => {
				warn!(error = %e, attempt = attempt + 1, "Reconnect attempt failed");
			}
		}
	}
}

/// Resolves on `Close` or once the transport handle is gone. Frames queued
/// for the lost socket are discarded.
async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<Command>) {
	while let Some(command) = commands.recv().await {
		if let Command::Close = command {
			return;
		}
	}
}

async fn send_frame(socket: &mut dyn Socket, message: &ClientMessage) -> Result<()> {
	let text = serde_json::to_string(message).map_err(|e| FlagsError::ParseFailed(e.to_string()))?;
	socket.send(text).await
}

/// Strips the access token from a stream URL for logging.
fn redact(url: &Url) -> String {
	let mut url = url.clone();
	url.set_query(None);
	url.to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{Attempt, MockConnector};
	use edgeflags_core::FlagValue;
	use serde_json::{json, Value};

	#[derive(Debug, Clone, PartialEq)]
	enum Event {
		Snapshot(FlagMap, ConfigMap),
		Diff(Vec<DiffChange>),
		Status(ConnectionStatus),
		Error(String),
	}

	#[derive(Default)]
	struct RecordingListener {
		events: Mutex<Vec<Event>>,
	}

	impl RecordingListener {
		fn events(&self) -> Vec<Event> {
			self.events.lock().clone()
		}

		fn statuses(&self) -> Vec<ConnectionStatus> {
			self.events()
				.into_iter()
				.filter_map(|e| match e {
					Event::Status(s) => Some(s),
					_ => None,
				})
				.collect()
		}
	}

	impl StreamListener for RecordingListener {
		fn on_snapshot(&self, flags: FlagMap, configs: ConfigMap) {
			self.events.lock().push(Event::Snapshot(flags, configs));
		}

		fn on_diff(&self, changes: Vec<DiffChange>) {
			self.events.lock().push(Event::Diff(changes));
		}

		fn on_connection_change(&self, status: ConnectionStatus) {
			self.events.lock().push(Event::Status(status));
		}

		fn on_error(&self, error: FlagsError) {
			self.events.lock().push(Event::Error(error.to_string()));
		}
	}

	fn transport(
		script: Vec<Attempt>,
	) -> (StreamTransport, Arc<MockConnector>, Arc<RecordingListener>) {
		let connector = Arc::new(MockConnector::new(script));
		let listener = Arc::new(RecordingListener::default());
		let url = stream_url("https://flags.example.com", "tok").unwrap();
		let transport = StreamTransport::new(
			url,
			StreamConfig::default(),
			connector.clone(),
			listener.clone(),
		);
		(transport, connector, listener)
	}

	async fn settle() {
		sleep(Duration::from_millis(1)).await;
	}

	fn context() -> EvaluationContext {
		EvaluationContext::new().with_user_id("u1")
	}

	fn subscribe_frame() -> Value {
		json!({"type": "subscribe", "env": "production", "context": {"user_id": "u1", "custom": {}}})
	}

	#[test]
	fn test_stream_url_swaps_scheme() {
		assert_eq!(
			stream_url("https://flags.example.com", "abc").unwrap().as_str(),
			"wss://flags.example.com/stream/flags?token=abc"
		);
		assert_eq!(
			stream_url("http://localhost:8787/", "abc").unwrap().as_str(),
			"ws://localhost:8787/stream/flags?token=abc"
		);
	}

	#[test]
	fn test_stream_url_keeps_base_path_and_encodes_token() {
		let url = stream_url("https://example.com/edge", "a&b=c").unwrap();
		assert_eq!(url.path(), "/edge/stream/flags");
		assert_eq!(url.query(), Some("token=a%26b%3Dc"));
	}

	#[test]
	fn test_stream_url_rejects_bad_input() {
		assert!(matches!(
			stream_url("not a url", "t"),
			Err(FlagsError::InvalidBaseUrl(_))
		));
		assert!(matches!(
			stream_url("ftp://example.com", "t"),
			Err(FlagsError::InvalidBaseUrl(_))
		));
	}

	#[test]
	fn test_backoff_delay_doubles_and_caps() {
		let config = StreamConfig::default();
		assert_eq!(backoff_delay(&config, 0), Duration::from_secs(1));
		assert_eq!(backoff_delay(&config, 1), Duration::from_secs(2));
		assert_eq!(backoff_delay(&config, 2), Duration::from_secs(4));
		assert_eq!(backoff_delay(&config, 4), Duration::from_secs(16));
		assert_eq!(backoff_delay(&config, 5), Duration::from_secs(30));
		assert_eq!(backoff_delay(&config, u32::MAX), Duration::from_secs(30));
	}

	#[test]
	fn test_redact_strips_token() {
		let url = stream_url("https://flags.example.com", "secret").unwrap();
		assert!(!redact(&url).contains("secret"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_connect_reports_connected_and_sends_subscribe() {
		let (transport, connector, listener) = transport(vec![Attempt::accept()]);

		transport.connect().await.unwrap();
		transport.subscribe(Some("production".to_string()), context());
		settle().await;

		assert!(transport.is_connected());
		assert_eq!(listener.statuses(), vec![ConnectionStatus::Connected]);
		assert_eq!(connector.server(0).sent_json(), vec![subscribe_frame()]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_connect_failure_is_returned() {
		let (transport, _, listener) = transport(vec![Attempt::Refuse]);

		let result = transport.connect().await;

		assert!(matches!(result, Err(FlagsError::StreamConnectFailed(_))));
		assert!(!transport.is_connected());
		assert!(listener.statuses().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_messages_before_open_are_dropped() {
		let (transport, connector, _) = transport(vec![Attempt::accept()]);

		transport.subscribe(Some("production".to_string()), context());
		transport.update_context(context());
		transport.connect().await.unwrap();
		settle().await;

		assert!(connector.server(0).sent().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_snapshot_diff_and_error_reach_listener() {
		let (transport, connector, listener) = transport(vec![Attempt::accept()]);
		transport.connect().await.unwrap();
		let server = connector.server(0);

		server.push_raw("{not json");
		server.push_json(json!({"type": "snapshot", "flags": {"dark": true}, "configs": {"limit": 5}}));
		server.push_json(json!({"type": "diff", "changes": [{"type": "flag", "key": "dark", "value": false}]}));
		server.push_json(json!({"type": "error"}));
		server.push_json(json!({"type": "error", "error": "bad context"}));
		server.push_json(json!({"type": "welcome"}));
		settle().await;

		let events = listener.events();
		assert_eq!(events.len(), 5);
		match &events[1] {
			Event::Snapshot(flags, configs) => {
				assert_eq!(flags["dark"], FlagValue::Bool(true));
				assert_eq!(configs["limit"], json!(5));
			}
			other => panic!("unexpected event: {other:?}"),
		}
		assert_eq!(events[2], Event::Diff(vec![DiffChange::flag("dark", false)]));
		assert_eq!(events[3], Event::Error("Server error".to_string()));
		assert_eq!(events[4], Event::Error("bad context".to_string()));
		assert!(transport.is_connected());
	}

	#[tokio::test(start_paused = true)]
	async fn test_update_context_is_sent_when_connected() {
		let (transport, connector, _) = transport(vec![Attempt::accept()]);
		transport.connect().await.unwrap();

		transport.update_context(EvaluationContext::new().with_user_id("u2"));
		settle().await;

		assert_eq!(
			connector.server(0).sent_json(),
			vec![json!({"type": "update-context", "context": {"user_id": "u2", "custom": {}}})]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_keepalive_ping_and_pong() {
		let (transport, connector, listener) = transport(vec![Attempt::accept()]);
		transport.connect().await.unwrap();
		let server = connector.server(0);

		sleep(Duration::from_millis(29_990)).await;
		assert!(server.sent().is_empty());

		sleep(Duration::from_millis(20)).await;
		assert_eq!(server.sent_json(), vec![json!({"type": "ping"})]);

		server.push_json(json!({"type": "pong"}));
		sleep(Duration::from_secs(15)).await;

		assert!(transport.is_connected());
		assert!(!server.is_closed());
		assert_eq!(listener.statuses(), vec![ConnectionStatus::Connected]);
		assert_eq!(connector.attempt_count(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_missing_pong_drops_the_connection() {
		let (transport, connector, listener) = transport(vec![Attempt::accept()]);
		transport.connect().await.unwrap();
		let server = connector.server(0);

		sleep(Duration::from_millis(39_990)).await;
		assert!(transport.is_connected());

		sleep(Duration::from_millis(20)).await;

		assert!(server.is_closed());
		assert!(!transport.is_connected());
		assert_eq!(
			listener.statuses(),
			vec![ConnectionStatus::Connected, ConnectionStatus::Reconnecting]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_reconnect_backoff_and_resubscribe() {
		let (transport, connector, listener) = transport(vec![
			Attempt::accept(),
			Attempt::Refuse,
			Attempt::accept(),
		]);
		transport.connect().await.unwrap();
		transport.subscribe(Some("production".to_string()), context());
		settle().await;

		let dropped_at = Instant::now();
		connector.server(0).close();
		settle().await;
		assert_eq!(transport.reconnect_attempts(), 1);

		sleep(Duration::from_secs(4)).await;

		let attempts = connector.attempt_times();
		assert_eq!(attempts.len(), 3);
		assert_eq!(attempts[1] - dropped_at, Duration::from_secs(1));
		assert_eq!(attempts[2] - attempts[1], Duration::from_secs(2));

		assert!(transport.is_connected());
		assert_eq!(transport.reconnect_attempts(), 0);
		assert_eq!(connector.servers().len(), 2);
		assert_eq!(connector.server(1).sent_json(), vec![subscribe_frame()]);
		assert_eq!(
			listener.statuses(),
			vec![
				ConnectionStatus::Connected,
				ConnectionStatus::Reconnecting,
				ConnectionStatus::Connected,
			]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_replay_uses_latest_context() {
		let (transport, connector, _) = transport(vec![Attempt::accept(), Attempt::accept()]);
		transport.connect().await.unwrap();
		transport.subscribe(None, context());
		transport.update_context(EvaluationContext::new().with_user_id("u9"));
		settle().await;

		connector.server(0).close();
		sleep(Duration::from_secs(2)).await;

		assert_eq!(
			connector.server(1).sent_json(),
			vec![json!({"type": "subscribe", "context": {"user_id": "u9", "custom": {}}})]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_retries_never_stop_until_closed() {
		let (transport, connector, _) = transport(vec![Attempt::accept()]);
		transport.connect().await.unwrap();

		connector.server(0).close();
		// 1 + 2 + 4 + 8 + 16 + 30 + 30
		sleep(Duration::from_secs(91) + Duration::from_millis(500)).await;

		assert_eq!(connector.attempt_count(), 8);
		assert!(!transport.is_connected());
	}

	#[tokio::test(start_paused = true)]
	async fn test_close_stops_reconnecting() {
		let (transport, connector, listener) = transport(vec![Attempt::accept()]);
		transport.connect().await.unwrap();

		connector.server(0).close();
		settle().await;
		transport.close().await;
		transport.close().await;
		sleep(Duration::from_secs(120)).await;

		assert_eq!(connector.attempt_count(), 1);
		assert!(!transport.is_connected());
		assert_eq!(
			listener.statuses(),
			vec![
				ConnectionStatus::Connected,
				ConnectionStatus::Reconnecting,
				ConnectionStatus::Disconnected,
			]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_close_closes_the_socket() {
		let (transport, connector, _) = transport(vec![Attempt::accept()]);
		transport.connect().await.unwrap();

		transport.close().await;

		assert!(connector.server(0).is_closed());
		assert!(matches!(transport.connect().await, Err(FlagsError::StreamClosed)));
	}

	#[tokio::test(start_paused = true)]
	async fn test_close_before_open_reports_disconnected() {
		let (transport, _, listener) = transport(vec![Attempt::Refuse]);
		assert!(transport.connect().await.is_err());

		transport.close().await;
		transport.close().await;

		assert_eq!(listener.statuses(), vec![ConnectionStatus::Disconnected]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_pong_deadline_survives_later_pings() {
		let connector = Arc::new(MockConnector::new(vec![Attempt::accept()]));
		let listener = Arc::new(RecordingListener::default());
		let config = StreamConfig {
			keepalive_interval: Duration::from_secs(5),
			pong_timeout: Duration::from_secs(12),
			..StreamConfig::default()
		};
		let transport = StreamTransport::new(
			stream_url("https://flags.example.com", "tok").unwrap(),
			config,
			connector.clone(),
			listener.clone(),
		);
		transport.connect().await.unwrap();
		let server = connector.server(0);

		// First ping at 5s, so the deadline is 17s even though pings keep going out.
		sleep(Duration::from_millis(16_990)).await;
		assert!(transport.is_connected());

		sleep(Duration::from_millis(20)).await;

		assert!(server.is_closed());
		assert_eq!(
			server.sent_json(),
			vec![json!({"type": "ping"}), json!({"type": "ping"}), json!({"type": "ping"})]
		);
		assert_eq!(
			listener.statuses(),
			vec![ConnectionStatus::Connected, ConnectionStatus::Reconnecting]
		);
	}
}
