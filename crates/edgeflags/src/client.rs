// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flags client keeping a local snapshot in sync with the EdgeFlags server.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use edgeflags_core::{
	ChangeEvent, ConfigMap, ConnectionStatus, DiffChange, EvaluationContext, EvaluationResponse,
	FlagMap, FlagValue,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::FlagCache;
use crate::emitter::{EventEmitter, Subscription};
use crate::error::{FlagsError, Result};
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::mock::MockClientBuilder;
use crate::poller::Poller;
use crate::socket::{Connector, WebSocketConnector};
use crate::stream::{stream_url, StreamConfig, StreamListener, StreamTransport};

/// Which synchronization strategy `init()` tries first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportMode {
	/// Stream over WebSocket, falling back to polling.
	#[default]
	Streaming,
	/// Poll only.
	Polling,
}

/// The synchronization strategy currently feeding the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
	/// Not initialized, or destroyed.
	#[default]
	None,
	Streaming,
	Polling,
	/// Seeded from local data; never touches the network.
	Mock,
}

/// Configuration for the flags client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Strategy tried first by `init()`.
	pub transport: TransportMode,
	/// Interval between polls on the polling path.
	pub polling_interval: Duration,
	/// How long streaming init waits for the first snapshot.
	pub init_timeout: Duration,
	/// Timeout for individual evaluation requests.
	pub request_timeout: Duration,
	/// Keepalive and reconnect timing.
	pub stream: StreamConfig,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			transport: TransportMode::Streaming,
			polling_interval: Duration::from_secs(60),
			init_timeout: Duration::from_secs(10),
			request_timeout: Duration::from_secs(5),
			stream: StreamConfig::default(),
		}
	}
}

/// Builder for constructing a FlagsClient.
pub struct FlagsClientBuilder {
	token: Option<String>,
	base_url: Option<String>,
	context: EvaluationContext,
	environment: Option<String>,
	bootstrap: Option<EvaluationResponse>,
	config: ClientConfig,
	connector: Option<Arc<dyn Connector>>,
	fetcher: Option<Arc<dyn Fetcher>>,
}

impl FlagsClientBuilder {
	/// Creates a new builder with default settings.
	pub fn new() -> Self {
		Self {
			token: None,
			base_url: None,
			context: EvaluationContext::default(),
			environment: None,
			bootstrap: None,
			config: ClientConfig::default(),
			connector: None,
			fetcher: None,
		}
	}

	/// Sets the access token sent with every request.
	pub fn token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());
		self
	}

	/// Sets the base URL of the EdgeFlags server.
	///
	/// Example: `https://flags.example.com`
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());
		self
	}

	/// Sets the initial evaluation context.
	pub fn context(mut self, context: EvaluationContext) -> Self {
		self.context = context;
		self
	}

	/// Sets the environment sent with stream subscriptions. Defaults to the
	/// context's `environment` field.
	pub fn environment(mut self, environment: impl Into<String>) -> Self {
		self.environment = Some(environment.into());
		self
	}

	/// Seeds the cache before `init()` so reads have values immediately.
	pub fn bootstrap(mut self, bootstrap: EvaluationResponse) -> Self {
		self.bootstrap = Some(bootstrap);
		self
	}

	pub fn transport(mut self, mode: TransportMode) -> Self {
		self.config.transport = mode;
		self
	}

	pub fn polling_interval(mut self, interval: Duration) -> Self {
		self.config.polling_interval = interval;
		self
	}

	pub fn init_timeout(mut self, timeout: Duration) -> Self {
		self.config.init_timeout = timeout;
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;
		self
	}

	pub fn stream_config(mut self, config: StreamConfig) -> Self {
		self.config.stream = config;
		self
	}

	/// Replaces the whole configuration.
	pub fn config(mut self, config: ClientConfig) -> Self {
		self.config = config;
		self
	}

	/// Overrides how stream sockets are opened.
	pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
		self.connector = Some(connector);
		self
	}

	/// Overrides how snapshots are fetched on the polling path.
	pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
		self.fetcher = Some(fetcher);
		self
	}

	/// Builds the client. No network activity happens until
	/// [`FlagsClient::init`].
	pub fn build(self) -> Result<FlagsClient> {
		let token = self
			.token
			.filter(|t| !t.trim().is_empty())
			.ok_or(FlagsError::InvalidToken)?;
		let base_url = self
			.base_url
			.ok_or_else(|| FlagsError::InvalidBaseUrl("missing base URL".to_string()))?;
		let base_url = base_url.trim_end_matches('/').to_string();

		let stream_url = stream_url(&base_url, &token)?;
		let fetcher: Arc<dyn Fetcher> = match self.fetcher {
			Some(fetcher) => fetcher,
			None => Arc::new(HttpFetcher::new(
				&base_url,
				token,
				self.config.request_timeout,
			)?),
		};
		let connector = self
			.connector
			.unwrap_or_else(|| Arc::new(WebSocketConnector));

		let cache = FlagCache::new();
		if let Some(bootstrap) = self.bootstrap {
			debug!(
				flags = bootstrap.flags.len(),
				configs = bootstrap.configs.len(),
				"Bootstrap data loaded"
			);
			cache.seed(bootstrap.flags, bootstrap.configs);
		}

		let remote = Remote {
			stream_url,
			connector,
			fetcher,
		};
		Ok(FlagsClient::from_parts(
			self.config,
			self.context,
			self.environment,
			cache,
			Some(remote),
		))
	}
}

impl Default for FlagsClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Network collaborators of a live client. Absent in mock mode.
pub(crate) struct Remote {
	stream_url: Url,
	connector: Arc<dyn Connector>,
	fetcher: Arc<dyn Fetcher>,
}

/// State changed together with cache writes so that `ready` and `change`
/// events go out in the order the cache saw them.
#[derive(Default)]
struct SyncState {
	/// Set while streaming init waits for the first snapshot.
	snapshot_waiter: Option<oneshot::Sender<()>>,
}

struct ClientInner {
	config: ClientConfig,
	environment: Option<String>,
	remote: Option<Remote>,
	cache: FlagCache,
	emitter: EventEmitter,
	context: Mutex<EvaluationContext>,
	sync: Mutex<SyncState>,
	kind: Mutex<TransportKind>,
	status: Mutex<ConnectionStatus>,
	transport: Mutex<Option<Arc<StreamTransport>>>,
	poller: Mutex<Option<Poller>>,
	ready: AtomicBool,
	initializing: AtomicBool,
	destroyed: AtomicBool,
}

/// Client keeping feature flags and config values in sync with the server.
///
/// Reads (`flag`, `config`, ...) are served from the local cache and never
/// wait on the network. Clones share the same state.
#[derive(Clone)]
pub struct FlagsClient {
	inner: Arc<ClientInner>,
}

impl fmt::Debug for FlagsClient {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FlagsClient")
			.field("ready", &self.is_ready())
			.field("transport", &self.transport_kind())
			.field("connection", &self.connection_status())
			.field("flags", &self.inner.cache.flag_count())
			.field("configs", &self.inner.cache.config_count())
			.finish()
	}
}

impl FlagsClient {
	/// Creates a new builder for constructing a FlagsClient.
	pub fn builder() -> FlagsClientBuilder {
		FlagsClientBuilder::new()
	}

	/// Creates a builder for a client seeded from local data that never
	/// touches the network.
	pub fn mock() -> MockClientBuilder {
		MockClientBuilder::new()
	}

	pub(crate) fn from_parts(
		config: ClientConfig,
		context: EvaluationContext,
		environment: Option<String>,
		cache: FlagCache,
		remote: Option<Remote>,
	) -> Self {
		let mock = remote.is_none();
		let inner = ClientInner {
			config,
			environment,
			remote,
			cache,
			emitter: EventEmitter::new(),
			context: Mutex::new(context),
			sync: Mutex::new(SyncState::default()),
			kind: Mutex::new(if mock { TransportKind::Mock } else { TransportKind::None }),
			status: Mutex::new(ConnectionStatus::Disconnected),
			transport: Mutex::new(None),
			poller: Mutex::new(None),
			ready: AtomicBool::new(mock),
			initializing: AtomicBool::new(false),
			destroyed: AtomicBool::new(false),
		};
		Self {
			inner: Arc::new(inner),
		}
	}

	/// Starts synchronizing with the server.
	///
	/// Streaming mode connects, subscribes and waits up to the init timeout
	/// for the first snapshot. Any streaming failure falls back to polling:
	/// one immediate fetch, then a fetch every polling interval.
	///
	/// Fails only when the initial fetch fails and there is no bootstrap data
	/// to serve. A second call after a successful init does nothing.
	pub async fn init(&self) -> Result<()> {
		let inner = &self.inner;
		if inner.destroyed.load(Ordering::SeqCst) {
			return Err(FlagsError::ClientClosed);
		}

		let Some(remote) = &inner.remote else {
			debug!("Mock client ready");
			inner.emitter.emit_ready();
			return Ok(());
		};

		if inner.ready.load(Ordering::SeqCst) || inner.initializing.swap(true, Ordering::SeqCst) {
			debug!("Flags client already initialized");
			return Ok(());
		}

		let result = self.initialize(remote).await;
		inner.initializing.store(false, Ordering::SeqCst);
		result
	}

	async fn initialize(&self, remote: &Remote) -> Result<()> {
		let inner = &self.inner;

		if inner.config.transport == TransportMode::Streaming {
			match self.start_streaming(remote).await {
				Ok(()) => return Ok(()),
				Err(FlagsError::ClientClosed) => return Err(FlagsError::ClientClosed),
				Err(e) => {
					warn!(error = %e, "Streaming unavailable, falling back to polling");
				}
			}
		}

		self.start_polling(remote).await
	}

	async fn start_streaming(&self, remote: &Remote) -> Result<()> {
		let inner = &self.inner;
		let (tx, rx) = oneshot::channel();
		inner.sync.lock().snapshot_waiter = Some(tx);

		let listener = Arc::new(StreamHandler {
			client: Arc::downgrade(inner),
		});
		let transport = Arc::new(StreamTransport::new(
			remote.stream_url.clone(),
			inner.config.stream.clone(),
			Arc::clone(&remote.connector),
			listener,
		));
		*inner.transport.lock() = Some(Arc::clone(&transport));

		let result = self.await_snapshot(&transport, rx).await;

		let Err(e) = result else {
			info!(
				flags = inner.cache.flag_count(),
				configs = inner.cache.config_count(),
				"Flags client initialized via stream"
			);
			return Ok(());
		};

		// The snapshot may have landed between the timeout and this point.
		let waiting = inner.sync.lock().snapshot_waiter.take().is_some();
		if !waiting && inner.ready.load(Ordering::SeqCst) {
			return Ok(());
		}

		let transport = inner.transport.lock().take();
		if let Some(transport) = transport {
			transport.close().await;
		}
		if inner.destroyed.load(Ordering::SeqCst) {
			return Err(FlagsError::ClientClosed);
		}
		Err(e)
	}

	async fn await_snapshot(
		&self,
		transport: &StreamTransport,
		snapshot: oneshot::Receiver<()>,
	) -> Result<()> {
		let inner = &self.inner;
		transport.connect().await?;

		let context = inner.context.lock().clone();
		let env = inner
			.environment
			.clone()
			.or_else(|| context.environment.clone());
		transport.subscribe(env, context);

		match tokio::time::timeout(inner.config.init_timeout, snapshot).await {
			Ok(Ok(())) => Ok(()),
			Ok(Err(_)) => Err(FlagsError::ClientClosed),
			Err(_) => Err(FlagsError::SnapshotTimeout),
		}
	}

	async fn start_polling(&self, remote: &Remote) -> Result<()> {
		let inner = &self.inner;
		let context = inner.context.lock().clone();

		match remote.fetcher.fetch_all(&context).await {
			Ok(snapshot) => {
				if inner.destroyed.load(Ordering::SeqCst) {
					return Err(FlagsError::ClientClosed);
				}
				let _sync = inner.sync.lock();
				inner.cache.seed(snapshot.flags, snapshot.configs);
				inner.ready.store(true, Ordering::SeqCst);
				*inner.kind.lock() = TransportKind::Polling;
				info!(
					flags = inner.cache.flag_count(),
					configs = inner.cache.config_count(),
					"Flags client initialized via polling"
				);
				inner.emitter.emit_ready();
			}
			Err(e) => {
				if inner.destroyed.load(Ordering::SeqCst) {
					return Err(FlagsError::ClientClosed);
				}
				error!(error = %e, "Initial flag fetch failed");
				inner.emitter.emit_error(&e);

				if inner.cache.is_empty() {
					return Err(e);
				}

				warn!("Using bootstrap data after init failure");
				let _sync = inner.sync.lock();
				inner.ready.store(true, Ordering::SeqCst);
				*inner.kind.lock() = TransportKind::Polling;
				inner.emitter.emit_ready();
			}
		}

		self.start_poller();
		Ok(())
	}

	fn start_poller(&self) {
		let interval = self.inner.config.polling_interval;
		let task_client = Arc::downgrade(&self.inner);
		let error_client = Arc::downgrade(&self.inner);

		let poller = Poller::new(
			interval,
			move || {
				let client = task_client.clone();
				async move {
					match client.upgrade() {
						Some(inner) => inner.fetch_and_apply().await,
						None => Ok(()),
					}
				}
			},
			move |e| {
				if let Some(inner) = error_client.upgrade() {
					inner.emitter.emit_error(&e);
				}
			},
		);
		poller.start();
		info!(interval_ms = interval.as_millis() as u64, "Polling started");
		*self.inner.poller.lock() = Some(poller);
	}

	/// Gets a flag value by key.
	pub fn flag(&self, key: &str) -> Option<FlagValue> {
		self.inner.cache.get_flag(key)
	}

	/// Gets a flag value, or `default` if the key is absent.
	pub fn flag_or(&self, key: &str, default: impl Into<FlagValue>) -> FlagValue {
		self.flag(key).unwrap_or_else(|| default.into())
	}

	/// Gets a boolean flag, or `default` if the key is absent or not a
	/// boolean.
	pub fn bool_flag(&self, key: &str, default: bool) -> bool {
		match self.flag(key) {
			Some(FlagValue::Bool(b)) => b,
			Some(other) => {
				warn!(
					flag_key = key,
					actual_type = other.type_name(),
					"Flag value is not a boolean, using default"
				);
				default
			}
			None => default,
		}
	}

	/// Gets a string flag, or `default` if the key is absent or not a string.
	pub fn str_flag(&self, key: &str, default: &str) -> String {
		match self.flag(key) {
			Some(FlagValue::String(s)) => s,
			Some(other) => {
				warn!(
					flag_key = key,
					actual_type = other.type_name(),
					"Flag value is not a string, using default"
				);
				default.to_string()
			}
			None => default.to_string(),
		}
	}

	/// Gets a config value by key.
	pub fn config(&self, key: &str) -> Option<Value> {
		self.inner.cache.get_config(key)
	}

	/// Gets a config value, or `default` if the key is absent.
	pub fn config_or(&self, key: &str, default: Value) -> Value {
		self.config(key).unwrap_or(default)
	}

	pub fn all_flags(&self) -> HashMap<String, FlagValue> {
		self.inner.cache.all_flags()
	}

	pub fn all_configs(&self) -> HashMap<String, Value> {
		self.inner.cache.all_configs()
	}

	/// Replaces the evaluation context.
	///
	/// Over a connected stream the server is asked to re-evaluate and pushes
	/// the result. Otherwise a ready client re-fetches immediately; a client
	/// that is not ready yet uses the new context on its next fetch or
	/// connect.
	pub async fn identify(&self, context: EvaluationContext) -> Result<()> {
		let inner = &self.inner;
		if inner.destroyed.load(Ordering::SeqCst) {
			return Err(FlagsError::ClientClosed);
		}

		*inner.context.lock() = context.clone();
		debug!(user_id = ?context.user_id, "Context updated");

		let transport = inner.transport.lock().clone();
		if let Some(transport) = transport {
			let connected = transport.is_connected();
			transport.update_context(context);
			if connected {
				return Ok(());
			}
		}

		if inner.remote.is_some() && inner.ready.load(Ordering::SeqCst) {
			return self.refresh().await;
		}
		Ok(())
	}

	/// Fetches a fresh snapshot and emits the resulting changes. Does nothing
	/// in mock mode.
	pub async fn refresh(&self) -> Result<()> {
		if self.inner.destroyed.load(Ordering::SeqCst) {
			return Err(FlagsError::ClientClosed);
		}
		self.inner.fetch_and_apply().await.map_err(|e| {
			self.inner.emitter.emit_error(&e);
			e
		})
	}

	pub fn on_ready<F>(&self, handler: F) -> Subscription
	where
		F: Fn() + Send + Sync + 'static,
	{
		self.inner.emitter.on_ready(handler)
	}

	/// Registers a change handler.
	///
	/// Handlers run on the task that applied the update and must not block.
	pub fn on_change<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&ChangeEvent) + Send + Sync + 'static,
	{
		self.inner.emitter.on_change(handler)
	}

	pub fn on_error<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&FlagsError) + Send + Sync + 'static,
	{
		self.inner.emitter.on_error(handler)
	}

	pub fn on_connection<F>(&self, handler: F) -> Subscription
	where
		F: Fn(ConnectionStatus) + Send + Sync + 'static,
	{
		self.inner.emitter.on_connection(handler)
	}

	pub fn is_ready(&self) -> bool {
		self.inner.ready.load(Ordering::SeqCst)
	}

	pub fn connection_status(&self) -> ConnectionStatus {
		*self.inner.status.lock()
	}

	pub fn transport_kind(&self) -> TransportKind {
		*self.inner.kind.lock()
	}

	/// Returns a copy of the current evaluation context.
	pub fn context(&self) -> EvaluationContext {
		self.inner.context.lock().clone()
	}

	/// Stops all network activity and resets the client.
	///
	/// Closes the stream, stops polling, clears the cache and removes every
	/// listener. Safe to call more than once.
	pub async fn destroy(&self) {
		let inner = &self.inner;
		if inner.destroyed.swap(true, Ordering::SeqCst) {
			return;
		}

		let transport = inner.transport.lock().take();
		if let Some(transport) = transport {
			transport.close().await;
		}
		if let Some(poller) = inner.poller.lock().take() {
			poller.stop();
		}

		{
			let mut sync = inner.sync.lock();
			sync.snapshot_waiter = None;
			inner.cache.clear();
			inner.ready.store(false, Ordering::SeqCst);
		}
		inner.emitter.clear();
		*inner.status.lock() = ConnectionStatus::Disconnected;
		*inner.kind.lock() = TransportKind::None;
		info!("Flags client destroyed");
	}
}

impl ClientInner {
	async fn fetch_and_apply(&self) -> Result<()> {
		let Some(remote) = &self.remote else {
			return Ok(());
		};

		let context = self.context.lock().clone();
		debug!("Fetching evaluations");
		let snapshot = remote.fetcher.fetch_all(&context).await?;

		let _sync = self.sync.lock();
		if self.destroyed.load(Ordering::SeqCst) {
			return Ok(());
		}
		if let Some(event) = self.cache.update(snapshot.flags, snapshot.configs) {
			debug!(
				flags = event.flags.len(),
				configs = event.configs.len(),
				"Changes detected"
			);
			self.emitter.emit_change(&event);
		}
		Ok(())
	}

	fn apply_snapshot(&self, flags: FlagMap, configs: ConfigMap) {
		let mut sync = self.sync.lock();
		if self.destroyed.load(Ordering::SeqCst) {
			return;
		}

		if let Some(waiter) = sync.snapshot_waiter.take() {
			self.cache.seed(flags, configs);
			self.ready.store(true, Ordering::SeqCst);
			*self.kind.lock() = TransportKind::Streaming;
			self.emitter.emit_ready();
			let _ = waiter.send(());
			return;
		}

		if !self.ready.load(Ordering::SeqCst) {
			debug!("Ignoring snapshot received before init");
			return;
		}

		if let Some(event) = self.cache.update(flags, configs) {
			debug!(
				flags = event.flags.len(),
				configs = event.configs.len(),
				"Snapshot changed flags"
			);
			self.emitter.emit_change(&event);
		}
	}

	fn apply_diff(&self, changes: Vec<DiffChange>) {
		let _sync = self.sync.lock();
		if self.destroyed.load(Ordering::SeqCst) || !self.ready.load(Ordering::SeqCst) {
			debug!("Ignoring diff received before init");
			return;
		}

		if let Some(event) = self.cache.apply_diff(changes) {
			debug!(
				flags = event.flags.len(),
				configs = event.configs.len(),
				"Diff changed flags"
			);
			self.emitter.emit_change(&event);
		}
	}

	fn set_status(&self, status: ConnectionStatus) {
		if self.destroyed.load(Ordering::SeqCst) && status != ConnectionStatus::Disconnected {
			return;
		}
		*self.status.lock() = status;
		self.emitter.emit_connection(status);
	}
}

/// Routes transport callbacks into the client without keeping it alive.
struct StreamHandler {
	client: Weak<ClientInner>,
}

impl StreamListener for StreamHandler {
	fn on_snapshot(&self, flags: FlagMap, configs: ConfigMap) {
		if let Some(inner) = self.client.upgrade() {
			inner.apply_snapshot(flags, configs);
		}
	}

	fn on_diff(&self, changes: Vec<DiffChange>) {
		if let Some(inner) = self.client.upgrade() {
			inner.apply_diff(changes);
		}
	}

	fn on_connection_change(&self, status: ConnectionStatus) {
		if let Some(inner) = self.client.upgrade() {
			inner.set_status(status);
		}
	}

	fn on_error(&self, error: FlagsError) {
		if let Some(inner) = self.client.upgrade() {
			inner.emitter.emit_error(&error);
		}
	}
}
