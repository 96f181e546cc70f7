// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the EdgeFlags SDK.

use thiserror::Error;

/// Result type alias for the EdgeFlags SDK.
pub type Result<T> = std::result::Result<T, FlagsError>;

/// Errors that can occur in the EdgeFlags SDK.
#[derive(Error, Debug)]
pub enum FlagsError {
	/// Access token is missing or empty.
	#[error("Invalid or missing access token")]
	InvalidToken,

	/// Base URL is missing or cannot be parsed.
	#[error("Invalid base URL: {0}")]
	InvalidBaseUrl(String),

	/// HTTP request failed before a response was received.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[source] reqwest::Error),

	/// Failed to parse a server payload.
	#[error("Failed to parse server response: {0}")]
	ParseFailed(String),

	/// Server answered with a non-success status.
	#[error("Evaluation request failed: {status} {message}")]
	ServerError {
		/// HTTP status code.
		status: u16,
		/// Status text or response body.
		message: String,
	},

	/// The streaming socket could not be opened.
	#[error("Stream connection failed: {0}")]
	StreamConnectFailed(String),

	/// The streaming socket failed after it was opened.
	#[error("WebSocket error: {0}")]
	StreamError(String),

	/// The streaming socket closed before it finished opening, or the
	/// transport has already been closed.
	#[error("Stream closed before open")]
	StreamClosed,

	/// The server reported an error over the stream.
	#[error("{0}")]
	ServerReported(String),

	/// No snapshot arrived on the stream within the init timeout.
	#[error("Timed out waiting for the initial stream snapshot")]
	SnapshotTimeout,

	/// Client has been destroyed.
	#[error("Client has been destroyed")]
	ClientClosed,
}

impl FlagsError {
	/// Returns the HTTP-like status code carried by the error, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			FlagsError::ServerError { status, .. } => Some(*status),
			FlagsError::RequestFailed(e) => e.status().map(|s| s.as_u16()),
			_ => None,
		}
	}

	/// Returns true if retrying the same operation later may succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			FlagsError::RequestFailed(_)
			| FlagsError::StreamConnectFailed(_)
			| FlagsError::StreamError(_)
			| FlagsError::StreamClosed
			| FlagsError::SnapshotTimeout => true,
			FlagsError::ServerError { status, .. } => *status == 429 || *status >= 500,
			_ => false,
		}
	}

	/// Returns true for failures of the streaming socket itself: connecting,
	/// reading or writing, or waiting for the first snapshot.
	pub fn is_transport(&self) -> bool {
		matches!(
			self,
			FlagsError::StreamConnectFailed(_)
				| FlagsError::StreamError(_)
				| FlagsError::StreamClosed
				| FlagsError::SnapshotTimeout
		)
	}
}
