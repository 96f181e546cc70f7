// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scripted connector and fetcher for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use edgeflags_core::{EvaluationContext, EvaluationResponse};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use crate::error::{FlagsError, Result};
use crate::fetcher::Fetcher;
use crate::socket::{Connector, Socket};

/// What the next connection attempt does.
pub enum Attempt {
	/// Open a socket and queue these frames as the first server messages.
	Accept(Vec<String>),
	/// Fail to connect.
	Refuse,
}

impl Attempt {
	pub fn accept() -> Self {
		Attempt::Accept(Vec::new())
	}

	pub fn accept_with(frames: Vec<Value>) -> Self {
		Attempt::Accept(frames.iter().map(Value::to_string).collect())
	}
}

enum Incoming {
	Frame(String),
	Close,
}

/// Server side of one accepted mock connection.
#[derive(Clone)]
pub struct MockServer {
	incoming: mpsc::UnboundedSender<Incoming>,
	sent: Arc<Mutex<Vec<String>>>,
	closed: Arc<AtomicBool>,
}

impl MockServer {
	pub fn push_raw(&self, text: &str) {
		let _ = self.incoming.send(Incoming::Frame(text.to_string()));
	}

	pub fn push_json(&self, value: Value) {
		let _ = self.incoming.send(Incoming::Frame(value.to_string()));
	}

	/// Drops the connection from the server side.
	pub fn close(&self) {
		let _ = self.incoming.send(Incoming::Close);
	}

	/// Frames the client has sent on this connection.
	pub fn sent(&self) -> Vec<String> {
		self.sent.lock().clone()
	}

	pub fn sent_json(&self) -> Vec<Value> {
		self.sent()
			.iter()
			.map(|text| serde_json::from_str(text).unwrap())
			.collect()
	}

	/// True once the client has closed its end.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}
}

struct MockSocket {
	incoming: mpsc::UnboundedReceiver<Incoming>,
	sent: Arc<Mutex<Vec<String>>>,
	closed: Arc<AtomicBool>,
}

#[async_trait]
impl Socket for MockSocket {
	async fn send(&mut self, text: String) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(FlagsError::StreamError("socket closed".to_string()));
		}
		self.sent.lock().push(text);
		Ok(())
	}

	async fn recv(&mut self) -> Option<Result<String>> {
		match self.incoming.recv().await? {
			Incoming::Frame(text) => Some(Ok(text)),
			Incoming::Close => None,
		}
	}

	async fn close(&mut self) {
		self.closed.store(true, Ordering::SeqCst);
	}
}

/// Connector that follows a script of attempts and refuses once the script
/// runs out.
#[derive(Default)]
pub struct MockConnector {
	script: Mutex<VecDeque<Attempt>>,
	servers: Mutex<Vec<MockServer>>,
	attempts: Mutex<Vec<Instant>>,
}

impl MockConnector {
	pub fn new(script: Vec<Attempt>) -> Self {
		Self {
			script: Mutex::new(script.into()),
			..Default::default()
		}
	}

	/// Server handle for the `index`th accepted connection.
	pub fn server(&self, index: usize) -> MockServer {
		self.servers.lock()[index].clone()
	}

	pub fn servers(&self) -> Vec<MockServer> {
		self.servers.lock().clone()
	}

	pub fn attempt_count(&self) -> usize {
		self.attempts.lock().len()
	}

	pub fn attempt_times(&self) -> Vec<Instant> {
		self.attempts.lock().clone()
	}
}

#[async_trait]
impl Connector for MockConnector {
	async fn connect(&self, _url: &Url) -> Result<Box<dyn Socket>> {
		self.attempts.lock().push(Instant::now());

		let next = self.script.lock().pop_front().unwrap_or(Attempt::Refuse);
		match next {
			Attempt::Refuse => Err(FlagsError::StreamConnectFailed(
				"connection refused".to_string(),
			)),
			Attempt::Accept(frames) => {
				let (tx, rx) = mpsc::unbounded_channel();
				for frame in frames {
					let _ = tx.send(Incoming::Frame(frame));
				}
				let sent = Arc::new(Mutex::new(Vec::new()));
				let closed = Arc::new(AtomicBool::new(false));
				self.servers.lock().push(MockServer {
					incoming: tx,
					sent: Arc::clone(&sent),
					closed: Arc::clone(&closed),
				});
				Ok(Box::new(MockSocket {
					incoming: rx,
					sent,
					closed,
				}))
			}
		}
	}
}

/// Fetcher that replays scripted results and repeats the last one.
pub struct MockFetcher {
	script: Mutex<VecDeque<Result<EvaluationResponse>>>,
	last: Mutex<Option<EvaluationResponse>>,
	calls: AtomicUsize,
	contexts: Mutex<Vec<EvaluationContext>>,
}

impl MockFetcher {
	pub fn new(script: Vec<Result<EvaluationResponse>>) -> Self {
		Self {
			script: Mutex::new(script.into()),
			last: Mutex::new(None),
			calls: AtomicUsize::new(0),
			contexts: Mutex::new(Vec::new()),
		}
	}

	/// Always answers with `response`.
	pub fn always(response: EvaluationResponse) -> Self {
		Self::new(vec![Ok(response)])
	}

	/// Always fails with a 500.
	pub fn failing() -> Self {
		Self::new(Vec::new())
	}

	/// Queues another result.
	pub fn push(&self, result: Result<EvaluationResponse>) {
		self.script.lock().push_back(result);
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn contexts(&self) -> Vec<EvaluationContext> {
		self.contexts.lock().clone()
	}
}

pub fn server_error() -> FlagsError {
	FlagsError::ServerError {
		status: 500,
		message: "Internal Server Error".to_string(),
	}
}

#[async_trait]
impl Fetcher for MockFetcher {
	async fn fetch_all(&self, context: &EvaluationContext) -> Result<EvaluationResponse> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.contexts.lock().push(context.clone());

		let next = self.script.lock().pop_front();
		match next {
			Some(Ok(response)) => {
				*self.last.lock() = Some(response.clone());
				Ok(response)
			}
			Some(Err(e)) => Err(e),
			None => self.last.lock().clone().ok_or_else(server_error),
		}
	}
}
