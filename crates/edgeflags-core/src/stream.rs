// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wire types for the streaming flag channel.
//!
//! The channel carries JSON text frames tagged by a `type` field.
//!
//! # Client → server
//!
//! - `subscribe` - start receiving state for an environment and context
//! - `update-context` - re-evaluate under a new context
//! - `ping` - keepalive probe
//!
//! # Server → client
//!
//! - `snapshot` - full `{flags, configs}` state
//! - `diff` - incremental per-key changes since the last snapshot
//! - `pong` - keepalive answer
//! - `error` - server-reported problem, the connection stays open

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConfigMap, EvaluationContext, FlagMap};

/// Status of the streaming connection as reported by the transport.
///
/// Connecting is implicit: a transport that is opening a socket keeps
/// reporting its previous status until the attempt succeeds or fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
	#[default]
	Disconnected,
	Connected,
	Reconnecting,
}

impl ConnectionStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ConnectionStatus::Disconnected => "disconnected",
			ConnectionStatus::Connected => "connected",
			ConnectionStatus::Reconnecting => "reconnecting",
		}
	}
}

impl fmt::Display for ConnectionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Whether a diff entry targets a flag or a config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
	Flag,
	Config,
}

/// A single incremental update pushed between snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffChange {
	#[serde(rename = "type")]
	pub kind: DiffKind,
	pub key: String,
	#[serde(default)]
	pub value: Value,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub deleted: bool,
}

impl DiffChange {
	pub fn flag(key: impl Into<String>, value: impl Into<Value>) -> Self {
		Self {
			kind: DiffKind::Flag,
			key: key.into(),
			value: value.into(),
			deleted: false,
		}
	}

	pub fn config(key: impl Into<String>, value: impl Into<Value>) -> Self {
		Self {
			kind: DiffKind::Config,
			key: key.into(),
			value: value.into(),
			deleted: false,
		}
	}

	pub fn deleted(kind: DiffKind, key: impl Into<String>) -> Self {
		Self {
			kind,
			key: key.into(),
			value: Value::Null,
			deleted: true,
		}
	}
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
	#[serde(rename = "subscribe")]
	Subscribe {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		env: Option<String>,
		context: EvaluationContext,
	},

	#[serde(rename = "update-context")]
	UpdateContext { context: EvaluationContext },

	#[serde(rename = "ping")]
	Ping,
}

impl ClientMessage {
	pub fn message_type(&self) -> &'static str {
		match self {
			ClientMessage::Subscribe { .. } => "subscribe",
			ClientMessage::UpdateContext { .. } => "update-context",
			ClientMessage::Ping => "ping",
		}
	}
}

/// Frames sent by the server.
///
/// Unrecognised `type` values decode to [`ServerMessage::Unknown`] so newer
/// servers can add message kinds without breaking older clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
	#[serde(rename = "snapshot")]
	Snapshot {
		#[serde(default, deserialize_with = "crate::evaluation::deserialize_flags")]
		flags: FlagMap,
		#[serde(default)]
		configs: ConfigMap,
	},

	#[serde(rename = "diff")]
	Diff {
		#[serde(default)]
		changes: Vec<DiffChange>,
	},

	#[serde(rename = "pong")]
	Pong,

	#[serde(rename = "error")]
	Error {
		#[serde(default)]
		error: Option<String>,
	},

	#[serde(other)]
	Unknown,
}

impl ServerMessage {
	pub fn message_type(&self) -> &'static str {
		match self {
			ServerMessage::Snapshot { .. } => "snapshot",
			ServerMessage::Diff { .. } => "diff",
			ServerMessage::Pong => "pong",
			ServerMessage::Error { .. } => "error",
			ServerMessage::Unknown => "unknown",
		}
	}
}
