// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Offline clients for tests and local development.

use edgeflags_core::{ConfigMap, EvaluationContext, FlagMap, FlagValue};
use serde_json::Value;

use crate::cache::FlagCache;
use crate::client::{ClientConfig, FlagsClient};

/// Builds a [`FlagsClient`] whose values come from local data.
///
/// The client is ready as soon as it is built, never opens a connection and
/// treats `refresh()` as a no-op.
///
/// ```
/// use edgeflags::FlagsClient;
///
/// let client = FlagsClient::mock()
///     .flag("new_checkout", true)
///     .config("theme", serde_json::json!({"primary": "#0af"}))
///     .build();
///
/// assert!(client.is_ready());
/// assert!(client.bool_flag("new_checkout", false));
/// ```
#[derive(Debug, Default)]
pub struct MockClientBuilder {
	flags: FlagMap,
	configs: ConfigMap,
	context: EvaluationContext,
}

impl MockClientBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn flag(mut self, key: impl Into<String>, value: impl Into<FlagValue>) -> Self {
		self.flags.insert(key.into(), value.into());
		self
	}

	pub fn config(mut self, key: impl Into<String>, value: Value) -> Self {
		self.configs.insert(key.into(), value);
		self
	}

	pub fn context(mut self, context: EvaluationContext) -> Self {
		self.context = context;
		self
	}

	pub fn build(self) -> FlagsClient {
		let cache = FlagCache::new();
		cache.seed(self.flags, self.configs);
		FlagsClient::from_parts(ClientConfig::default(), self.context, None, cache, None)
	}
}
