// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FlagValue;

/// A single key whose value changed between two observations.
///
/// `previous` is `None` when the key was not known before. `current` is
/// `None` only when the key was deleted by a stream diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord<V> {
	pub key: String,
	pub previous: Option<V>,
	pub current: Option<V>,
}

impl<V> ChangeRecord<V> {
	pub fn new(key: impl Into<String>, previous: Option<V>, current: Option<V>) -> Self {
		Self {
			key: key.into(),
			previous,
			current,
		}
	}
}

pub type FlagChange = ChangeRecord<FlagValue>;
pub type ConfigChange = ChangeRecord<Value>;

/// Every flag and config change produced by one cache update.
///
/// An event with both lists empty is never constructed by the cache and is
/// never emitted to listeners.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
	pub flags: Vec<FlagChange>,
	pub configs: Vec<ConfigChange>,
}

impl ChangeEvent {
	pub fn is_empty(&self) -> bool {
		self.flags.is_empty() && self.configs.is_empty()
	}

	/// Returns the change for the given flag key, if any.
	pub fn flag(&self, key: &str) -> Option<&FlagChange> {
		self.flags.iter().find(|c| c.key == key)
	}

	/// Returns the change for the given config key, if any.
	pub fn config(&self, key: &str) -> Option<&ConfigChange> {
		self.configs.iter().find(|c| c.key == key)
	}

	/// Converts an accumulated event into `None` when nothing changed.
	pub fn non_empty(self) -> Option<Self> {
		if self.is_empty() {
			None
		} else {
			Some(self)
		}
	}
}
