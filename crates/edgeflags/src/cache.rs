// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Local in-memory cache for flag and config values.
//!
//! The cache stores the last-known value of every flag and config key and
//! reports exactly which keys changed on each write. It has no network
//! awareness; the client decides when to seed, update or clear it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use edgeflags_core::{
	structural_eq, ChangeEvent, ChangeRecord, DiffChange, DiffKind, FlagValue,
};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

/// In-memory cache for flag and config values.
///
/// Clones share the same underlying state. Reads take a shared lock and
/// never wait on the network.
#[derive(Debug, Clone, Default)]
pub struct FlagCache {
	inner: Arc<RwLock<CacheInner>>,
}

#[derive(Debug, Default)]
struct CacheInner {
	/// Cached flag values keyed by flag key.
	flags: HashMap<String, FlagValue>,
	/// Cached config values keyed by config key.
	configs: HashMap<String, Value>,
	/// When the cache was last written.
	last_updated: Option<DateTime<Utc>>,
}

impl FlagCache {
	/// Creates a new empty cache.
	pub fn new() -> Self {
		Self::default()
	}

	/// Gets a flag value by key.
	pub fn get_flag(&self, key: &str) -> Option<FlagValue> {
		self.inner.read().flags.get(key).cloned()
	}

	/// Gets a config value by key.
	pub fn get_config(&self, key: &str) -> Option<Value> {
		self.inner.read().configs.get(key).cloned()
	}

	/// Returns a copy of every cached flag.
	pub fn all_flags(&self) -> HashMap<String, FlagValue> {
		self.inner.read().flags.clone()
	}

	/// Returns a copy of every cached config.
	pub fn all_configs(&self) -> HashMap<String, Value> {
		self.inner.read().configs.clone()
	}

	/// Writes every provided key without computing changes.
	///
	/// Used for bootstrap data and the first network result, where there is
	/// no previous state worth reporting.
	pub fn seed<F, C>(&self, flags: F, configs: C)
	where
		F: IntoIterator<Item = (String, FlagValue)>,
		C: IntoIterator<Item = (String, Value)>,
	{
		let mut inner = self.inner.write();
		inner.flags.extend(flags);
		inner.configs.extend(configs);
		inner.last_updated = Some(Utc::now());
	}

	/// Merges a snapshot into the cache and reports what changed.
	///
	/// Keys missing from the input are left untouched. Change records appear
	/// in the iteration order of the input. Returns `None` when no key
	/// changed.
	pub fn update<F, C>(&self, flags: F, configs: C) -> Option<ChangeEvent>
	where
		F: IntoIterator<Item = (String, FlagValue)>,
		C: IntoIterator<Item = (String, Value)>,
	{
		let mut inner = self.inner.write();
		let mut event = ChangeEvent::default();

		for (key, current) in flags {
			if let Some(change) = merge(&mut inner.flags, key, current, |a, b| a == b) {
				event.flags.push(change);
			}
		}
		for (key, current) in configs {
			if let Some(change) = merge(&mut inner.configs, key, current, structural_eq) {
				event.configs.push(change);
			}
		}

		inner.last_updated = Some(Utc::now());
		event.non_empty()
	}

	/// Applies incremental stream changes with the same semantics as
	/// [`FlagCache::update`].
	///
	/// Entries marked `deleted` evict their key and are reported with
	/// `current: None` when the key was present. Flag entries whose value is
	/// not a valid flag shape are skipped.
	pub fn apply_diff<I>(&self, changes: I) -> Option<ChangeEvent>
	where
		I: IntoIterator<Item = DiffChange>,
	{
		let mut inner = self.inner.write();
		let mut event = ChangeEvent::default();

		for change in changes {
			match (change.kind, change.deleted) {
				(DiffKind::Flag, true) => {
					if let Some(record) = evict(&mut inner.flags, change.key) {
						event.flags.push(record);
					}
				}
				(DiffKind::Config, true) => {
					if let Some(record) = evict(&mut inner.configs, change.key) {
						event.configs.push(record);
					}
				}
				(DiffKind::Flag, false) => match FlagValue::try_from(change.value) {
					Ok(value) => {
						if let Some(record) = merge(&mut inner.flags, change.key, value, |a, b| a == b) {
							event.flags.push(record);
						}
					}
					Err(e) => {
						warn!(flag_key = %change.key, error = %e, "Ignoring diff entry with invalid flag value");
					}
				},
				(DiffKind::Config, false) => {
					if let Some(record) =
						merge(&mut inner.configs, change.key, change.value, structural_eq)
					{
						event.configs.push(record);
					}
				}
			}
		}

		inner.last_updated = Some(Utc::now());
		event.non_empty()
	}

	/// Returns true if neither flags nor configs are cached.
	pub fn is_empty(&self) -> bool {
		let inner = self.inner.read();
		inner.flags.is_empty() && inner.configs.is_empty()
	}

	/// Returns the number of cached flags.
	pub fn flag_count(&self) -> usize {
		self.inner.read().flags.len()
	}

	/// Returns the number of cached configs.
	pub fn config_count(&self) -> usize {
		self.inner.read().configs.len()
	}

	/// Returns the timestamp of the last write.
	pub fn last_updated(&self) -> Option<DateTime<Utc>> {
		self.inner.read().last_updated
	}

	/// Clears all cached data.
	pub fn clear(&self) {
		let mut inner = self.inner.write();
		inner.flags.clear();
		inner.configs.clear();
		inner.last_updated = None;
	}
}

fn merge<V: Clone>(
	store: &mut HashMap<String, V>,
	key: String,
	current: V,
	equal: impl Fn(&V, &V) -> bool,
) -> Option<ChangeRecord<V>> {
	if matches!(store.get(&key), Some(prev) if equal(prev, &current)) {
		return None;
	}
	let previous = store.insert(key.clone(), current.clone());
	Some(ChangeRecord::new(key, previous, Some(current)))
}

fn evict<V>(store: &mut HashMap<String, V>, key: String) -> Option<ChangeRecord<V>> {
	store
		.remove(&key)
		.map(|previous| ChangeRecord::new(key, Some(previous), None))
}
