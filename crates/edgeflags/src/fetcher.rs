// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Full-snapshot fetches over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use edgeflags_core::{EvaluationContext, EvaluationResponse};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::{FlagsError, Result};

const EVALUATE_PATH: &str = "api/v1/evaluate";

/// Source of full `{flags, configs}` snapshots for a context.
#[async_trait]
pub trait Fetcher: Send + Sync {
	async fn fetch_all(&self, context: &EvaluationContext) -> Result<EvaluationResponse>;
}

#[derive(Serialize)]
struct EvaluationRequest<'a> {
	context: &'a EvaluationContext,
}

/// Fetches snapshots from the evaluation endpoint.
pub struct HttpFetcher {
	http_client: Client,
	evaluate_url: String,
	token: String,
}

impl std::fmt::Debug for HttpFetcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HttpFetcher")
			.field("evaluate_url", &self.evaluate_url)
			.finish_non_exhaustive()
	}
}

impl HttpFetcher {
	pub fn new(
		base_url: impl AsRef<str>,
		token: impl Into<String>,
		request_timeout: Duration,
	) -> Result<Self> {
		let base_url = base_url.as_ref().trim_end_matches('/');
		let http_client = Client::builder()
			.user_agent(concat!("edgeflags-rust/", env!("CARGO_PKG_VERSION")))
			.timeout(request_timeout)
			.build()
			.map_err(FlagsError::RequestFailed)?;

		Ok(Self {
			http_client,
			evaluate_url: format!("{base_url}/{EVALUATE_PATH}"),
			token: token.into(),
		})
	}

	pub fn evaluate_url(&self) -> &str {
		&self.evaluate_url
	}
}

#[async_trait]
impl Fetcher for HttpFetcher {
	async fn fetch_all(&self, context: &EvaluationContext) -> Result<EvaluationResponse> {
		debug!(url = %self.evaluate_url, "Fetching flag snapshot");

		let response = self
			.http_client
			.post(&self.evaluate_url)
			.header("Authorization", format!("Bearer {}", self.token))
			.json(&EvaluationRequest { context })
			.send()
			.await
			.map_err(FlagsError::RequestFailed)?;

		let status = response.status();
		if !status.is_success() {
			let message = match status.canonical_reason() {
				Some(reason) => reason.to_string(),
				None => response.text().await.unwrap_or_default(),
			};
			return Err(FlagsError::ServerError {
				status: status.as_u16(),
				message,
			});
		}

		let body = response.bytes().await.map_err(FlagsError::RequestFailed)?;
		let snapshot: EvaluationResponse =
			serde_json::from_slice(&body).map_err(|e| FlagsError::ParseFailed(e.to_string()))?;

		debug!(
			flags = snapshot.flags.len(),
			configs = snapshot.configs.len(),
			"Flag snapshot fetched"
		);
		Ok(snapshot)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use edgeflags_core::FlagValue;
	use serde_json::json;
	use wiremock::matchers::{body_json, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn fetcher(server: &MockServer) -> HttpFetcher {
		HttpFetcher::new(server.uri(), "tok_123", Duration::from_secs(5)).unwrap()
	}

	#[test]
	fn test_evaluate_url_normalizes_trailing_slash() {
		let fetcher = HttpFetcher::new("https://flags.example.com/", "t", Duration::from_secs(5)).unwrap();
		assert_eq!(fetcher.evaluate_url(), "https://flags.example.com/api/v1/evaluate");
	}

	#[test]
	fn test_debug_hides_token() {
		let fetcher = HttpFetcher::new("https://flags.example.com", "secret", Duration::from_secs(5)).unwrap();
		assert!(!format!("{fetcher:?}").contains("secret"));
	}

	#[tokio::test]
	async fn test_fetch_sends_token_and_context() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/v1/evaluate"))
			.and(header("Authorization", "Bearer tok_123"))
			.and(header("Content-Type", "application/json"))
			.and(body_json(json!({"context": {"user_id": "u1", "plan": "pro", "custom": {}}})))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"flags": {"dark": true, "limit": 3},
				"configs": {"theme": {"bg": "#fff"}}
			})))
			.expect(1)
			.mount(&server)
			.await;

		let context = EvaluationContext::new().with_user_id("u1").with_plan("pro");
		let snapshot = fetcher(&server).fetch_all(&context).await.unwrap();

		assert_eq!(snapshot.flags["dark"], FlagValue::Bool(true));
		assert_eq!(snapshot.flags["limit"], FlagValue::from(3));
		assert_eq!(snapshot.configs["theme"], json!({"bg": "#fff"}));
	}

	#[tokio::test]
	async fn test_fetch_sends_user_agent() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(header(
				"User-Agent",
				concat!("edgeflags-rust/", env!("CARGO_PKG_VERSION")),
			))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
			.expect(1)
			.mount(&server)
			.await;

		let snapshot = fetcher(&server)
			.fetch_all(&EvaluationContext::new())
			.await
			.unwrap();

		assert!(snapshot.is_empty());
	}

	#[tokio::test]
	async fn test_non_success_status_is_an_error() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(401))
			.mount(&server)
			.await;

		let err = fetcher(&server)
			.fetch_all(&EvaluationContext::new())
			.await
			.unwrap_err();

		assert_eq!(err.status(), Some(401));
		assert_eq!(err.to_string(), "Evaluation request failed: 401 Unauthorized");
	}

	#[tokio::test]
	async fn test_malformed_body_is_a_parse_error() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
			.mount(&server)
			.await;

		let err = fetcher(&server)
			.fetch_all(&EvaluationContext::new())
			.await
			.unwrap_err();

		assert!(matches!(err, FlagsError::ParseFailed(_)));
	}

	#[tokio::test]
	async fn test_invalid_flag_value_does_not_fail_the_fetch() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"flags": {"good": true, "bad": null},
				"configs": {}
			})))
			.mount(&server)
			.await;

		let snapshot = fetcher(&server)
			.fetch_all(&EvaluationContext::new())
			.await
			.unwrap();

		assert_eq!(snapshot.flags.len(), 1);
		assert_eq!(snapshot.flags["good"], FlagValue::Bool(true));
	}

	#[tokio::test]
	async fn test_unreachable_server_is_a_request_error() {
		let fetcher = HttpFetcher::new("http://127.0.0.1:9", "t", Duration::from_secs(1)).unwrap();

		let err = fetcher.fetch_all(&EvaluationContext::new()).await.unwrap_err();

		assert!(matches!(err, FlagsError::RequestFailed(_)));
		assert!(err.is_retryable());
	}
}
