// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::FlagValue;

/// Flag values keyed by flag key, in the order the server sent them.
pub type FlagMap = IndexMap<String, FlagValue>;

/// Config values keyed by config key, in the order the server sent them.
pub type ConfigMap = IndexMap<String, Value>;

/// Identity and attributes sent to the server to obtain an evaluation.
///
/// The client replaces the whole context on re-identification; fields are
/// never merged, so a field dropped by the caller is dropped on the server too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub phone: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub plan: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub segments: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub environment: Option<String>,
	#[serde(default)]
	pub custom: Map<String, Value>,
}

impl EvaluationContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn with_email(mut self, email: impl Into<String>) -> Self {
		self.email = Some(email.into());
		self
	}

	pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
		self.phone = Some(phone.into());
		self
	}

	pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
		self.plan = Some(plan.into());
		self
	}

	pub fn with_segments<I, S>(mut self, segments: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.segments = Some(segments.into_iter().map(Into::into).collect());
		self
	}

	pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
		self.environment = Some(environment.into());
		self
	}

	pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
		self.custom.insert(key.into(), value);
		self
	}
}

/// A full `{flags, configs}` state transfer.
///
/// Returned by the evaluate endpoint and carried by stream snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResponse {
	#[serde(default, deserialize_with = "deserialize_flags")]
	pub flags: FlagMap,
	#[serde(default)]
	pub configs: ConfigMap,
}

impl EvaluationResponse {
	pub fn new(flags: FlagMap, configs: ConfigMap) -> Self {
		Self { flags, configs }
	}

	pub fn is_empty(&self) -> bool {
		self.flags.is_empty() && self.configs.is_empty()
	}
}

/// Decodes a flag map, dropping entries whose value a flag cannot hold
/// (`null`, arrays) instead of rejecting the whole payload.
pub(crate) fn deserialize_flags<'de, D>(deserializer: D) -> Result<FlagMap, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = IndexMap::<String, Value>::deserialize(deserializer)?;
	let mut flags = FlagMap::with_capacity(raw.len());
	for (key, value) in raw {
		match FlagValue::try_from(value) {
			Ok(value) => {
				flags.insert(key, value);
			}
			Err(e) => warn!(flag_key = %key, error = %e, "Ignoring flag with invalid value"),
		}
	}
	Ok(flags)
}
