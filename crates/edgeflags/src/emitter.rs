// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed event listeners for client lifecycle and flag changes.
//!
//! Handlers run synchronously on the emitting task, in registration order.
//! The registry lock is released before any handler runs, so a handler may
//! register or unsubscribe other handlers.

use std::fmt;
use std::sync::{Arc, Weak};

use edgeflags_core::{ChangeEvent, ConnectionStatus};
use parking_lot::Mutex;

use crate::error::FlagsError;

type ReadyHandler = Arc<dyn Fn() + Send + Sync>;
type ChangeHandler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&FlagsError) + Send + Sync>;
type ConnectionHandler = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// The events a client emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	Ready,
	Change,
	Error,
	Connection,
}

#[derive(Default)]
struct Registry {
	next_id: u64,
	ready: Vec<(u64, ReadyHandler)>,
	change: Vec<(u64, ChangeHandler)>,
	error: Vec<(u64, ErrorHandler)>,
	connection: Vec<(u64, ConnectionHandler)>,
}

impl Registry {
	fn next_id(&mut self) -> u64 {
		self.next_id += 1;
		self.next_id
	}

	fn remove(&mut self, kind: EventKind, id: u64) {
		match kind {
			EventKind::Ready => self.ready.retain(|(i, _)| *i != id),
			EventKind::Change => self.change.retain(|(i, _)| *i != id),
			EventKind::Error => self.error.retain(|(i, _)| *i != id),
			EventKind::Connection => self.connection.retain(|(i, _)| *i != id),
		}
	}

	fn count(&self, kind: EventKind) -> usize {
		match kind {
			EventKind::Ready => self.ready.len(),
			EventKind::Change => self.change.len(),
			EventKind::Error => self.error.len(),
			EventKind::Connection => self.connection.len(),
		}
	}
}

/// Per-client listener registry.
#[derive(Clone, Default)]
pub struct EventEmitter {
	registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for EventEmitter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let registry = self.registry.lock();
		f.debug_struct("EventEmitter")
			.field("ready", &registry.ready.len())
			.field("change", &registry.change.len())
			.field("error", &registry.error.len())
			.field("connection", &registry.connection.len())
			.finish()
	}
}

impl EventEmitter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn on_ready<F>(&self, handler: F) -> Subscription
	where
		F: Fn() + Send + Sync + 'static,
	{
		let mut registry = self.registry.lock();
		let id = registry.next_id();
		registry.ready.push((id, Arc::new(handler)));
		self.subscription(EventKind::Ready, id)
	}

	pub fn on_change<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&ChangeEvent) + Send + Sync + 'static,
	{
		let mut registry = self.registry.lock();
		let id = registry.next_id();
		registry.change.push((id, Arc::new(handler)));
		self.subscription(EventKind::Change, id)
	}

	pub fn on_error<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&FlagsError) + Send + Sync + 'static,
	{
		let mut registry = self.registry.lock();
		let id = registry.next_id();
		registry.error.push((id, Arc::new(handler)));
		self.subscription(EventKind::Error, id)
	}

	pub fn on_connection<F>(&self, handler: F) -> Subscription
	where
		F: Fn(ConnectionStatus) + Send + Sync + 'static,
	{
		let mut registry = self.registry.lock();
		let id = registry.next_id();
		registry.connection.push((id, Arc::new(handler)));
		self.subscription(EventKind::Connection, id)
	}

	pub fn emit_ready(&self) {
		let handlers: Vec<ReadyHandler> = {
			let registry = self.registry.lock();
			registry.ready.iter().map(|(_, h)| Arc::clone(h)).collect()
		};
		for handler in handlers {
			handler();
		}
	}

	pub fn emit_change(&self, event: &ChangeEvent) {
		let handlers: Vec<ChangeHandler> = {
			let registry = self.registry.lock();
			registry.change.iter().map(|(_, h)| Arc::clone(h)).collect()
		};
		for handler in handlers {
			handler(event);
		}
	}

	pub fn emit_error(&self, error: &FlagsError) {
		let handlers: Vec<ErrorHandler> = {
			let registry = self.registry.lock();
			registry.error.iter().map(|(_, h)| Arc::clone(h)).collect()
		};
		for handler in handlers {
			handler(error);
		}
	}

	pub fn emit_connection(&self, status: ConnectionStatus) {
		let handlers: Vec<ConnectionHandler> = {
			let registry = self.registry.lock();
			registry.connection.iter().map(|(_, h)| Arc::clone(h)).collect()
		};
		for handler in handlers {
			handler(status);
		}
	}

	/// Returns the number of handlers registered for `kind`.
	pub fn listener_count(&self, kind: EventKind) -> usize {
		self.registry.lock().count(kind)
	}

	/// Removes every registered handler.
	pub fn clear(&self) {
		let mut registry = self.registry.lock();
		registry.ready.clear();
		registry.change.clear();
		registry.error.clear();
		registry.connection.clear();
	}

	fn subscription(&self, kind: EventKind, id: u64) -> Subscription {
		Subscription {
			registry: Arc::downgrade(&self.registry),
			kind,
			id,
		}
	}
}

/// Handle returned by every `on_*` registration.
///
/// Dropping the handle keeps the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug, Clone)]
pub struct Subscription {
	registry: Weak<Mutex<Registry>>,
	kind: EventKind,
	id: u64,
}

impl Subscription {
	pub fn kind(&self) -> EventKind {
		self.kind
	}

	/// Removes exactly this registration. Safe to call more than once.
	pub fn unsubscribe(&self) {
		if let Some(registry) = self.registry.upgrade() {
			registry.lock().remove(self.kind, self.id);
		}
	}
}
