// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fixed-interval scheduler for the polling fallback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{FlagsError, Result};

type PollTask = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;
type PollErrorHandler = Arc<dyn Fn(FlagsError) + Send + Sync>;

/// Runs an async task every `interval` until stopped.
///
/// The first run happens one interval after [`Poller::start`]. A failed run
/// is handed to the error handler and the loop keeps going.
pub struct Poller {
	interval: Duration,
	task: PollTask,
	on_error: PollErrorHandler,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Poller {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Poller")
			.field("interval", &self.interval)
			.field("running", &self.is_running())
			.finish()
	}
}

impl Poller {
	pub fn new<T, Fut, E>(interval: Duration, task: T, on_error: E) -> Self
	where
		T: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
		E: Fn(FlagsError) + Send + Sync + 'static,
	{
		Self {
			interval,
			task: Arc::new(move || task().boxed()),
			on_error: Arc::new(on_error),
			handle: Mutex::new(None),
		}
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	/// Starts the loop. Does nothing if it is already running.
	pub fn start(&self) {
		let mut handle = self.handle.lock();
		if handle.as_ref().is_some_and(|h| !h.is_finished()) {
			return;
		}

		let interval = self.interval;
		let task = Arc::clone(&self.task);
		let on_error = Arc::clone(&self.on_error);

		debug!(interval_ms = interval.as_millis() as u64, "Starting poller");
		*handle = Some(tokio::spawn(async move {
			loop {
				tokio::time::sleep(interval).await;
				if let Err(e) = task().await {
					warn!(error = %e, "Poll failed");
					on_error(e);
				}
			}
		}));
	}

	/// Stops the loop. Does nothing if it is not running.
	pub fn stop(&self) {
		if let Some(handle) = self.handle.lock().take() {
			handle.abort();
			debug!("Poller stopped");
		}
	}

	pub fn is_running(&self) -> bool {
		self.handle
			.lock()
			.as_ref()
			.is_some_and(|h| !h.is_finished())
	}
}

impl Drop for Poller {
	fn drop(&mut self) {
		if let Some(handle) = self.handle.get_mut().take() {
			handle.abort();
		}
	}
}
