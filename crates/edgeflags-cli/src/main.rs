// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `edgeflags` command-line tool.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgeflags::{EvaluationContext, Fetcher, FlagsClient, HttpFetcher, TransportKind, TransportMode};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Inspect and watch EdgeFlags evaluations
#[derive(Parser, Debug)]
#[command(name = "edgeflags", version, about, long_about = None)]
struct Cli {
	/// Access token
	#[arg(long, env = "EDGEFLAGS_TOKEN", hide_env_values = true)]
	token: String,

	/// EdgeFlags server URL
	#[arg(long, env = "EDGEFLAGS_BASE_URL")]
	base_url: String,

	/// Enable debug logging
	#[arg(short, long)]
	verbose: bool,

	/// Output logs as JSON
	#[arg(long)]
	json_logs: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Args, Debug, Clone)]
struct ContextArgs {
	/// User ID to evaluate for
	#[arg(long)]
	user_id: Option<String>,

	/// Email to evaluate for
	#[arg(long)]
	email: Option<String>,

	/// Plan to evaluate for
	#[arg(long)]
	plan: Option<String>,

	/// Segment membership (repeatable)
	#[arg(long = "segment")]
	segments: Vec<String>,

	/// Environment to evaluate in
	#[arg(long, short)]
	env: Option<String>,
}

impl ContextArgs {
	fn to_context(&self) -> EvaluationContext {
		let mut context = EvaluationContext::new();
		context.user_id = self.user_id.clone();
		context.email = self.email.clone();
		context.plan = self.plan.clone();
		context.environment = self.env.clone();
		if !self.segments.is_empty() {
			context.segments = Some(self.segments.clone());
		}
		context
	}
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Fetch one evaluation and print it as JSON
	Get {
		#[command(flatten)]
		context: ContextArgs,

		/// Request timeout in seconds
		#[arg(long, default_value = "5")]
		timeout: u64,
	},
	/// Keep a client running and print every change until interrupted
	Watch {
		#[command(flatten)]
		context: ContextArgs,

		/// Poll instead of streaming
		#[arg(long)]
		polling: bool,

		/// Polling interval in seconds
		#[arg(long, default_value = "60")]
		interval: u64,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	init_tracing(cli.verbose, cli.json_logs);

	match &cli.command {
		Command::Get { context, timeout } => {
			get(&cli, context.to_context(), Duration::from_secs(*timeout)).await
		}
		Command::Watch {
			context,
			polling,
			interval,
		} => {
			let mode = if *polling {
				TransportMode::Polling
			} else {
				TransportMode::Streaming
			};
			watch(&cli, context.to_context(), mode, Duration::from_secs(*interval)).await
		}
	}
}

fn init_tracing(verbose: bool, json: bool) {
	let default_level = if verbose { "debug" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		EnvFilter::new(format!("edgeflags={default_level},edgeflags_cli={default_level}"))
	});

	if json {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().json().with_writer(std::io::stderr))
			.init();
	} else {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().compact().with_writer(std::io::stderr))
			.init();
	}
}

async fn get(cli: &Cli, context: EvaluationContext, timeout: Duration) -> Result<()> {
	let fetcher = HttpFetcher::new(&cli.base_url, cli.token.clone(), timeout)
		.context("failed to build HTTP client")?;
	let snapshot = fetcher
		.fetch_all(&context)
		.await
		.context("evaluation request failed")?;

	println!("{}", serde_json::to_string_pretty(&snapshot)?);
	Ok(())
}

async fn watch(
	cli: &Cli,
	context: EvaluationContext,
	mode: TransportMode,
	interval: Duration,
) -> Result<()> {
	let client = FlagsClient::builder()
		.token(cli.token.clone())
		.base_url(cli.base_url.clone())
		.context(context)
		.transport(mode)
		.polling_interval(interval)
		.build()
		.context("invalid client configuration")?;

	client.on_change(|event| {
		for change in &event.flags {
			print_change(
				"flag",
				&change.key,
				change.previous.as_ref(),
				change.current.as_ref(),
			);
		}
		for change in &event.configs {
			print_change(
				"config",
				&change.key,
				change.previous.as_ref(),
				change.current.as_ref(),
			);
		}
	});
	client.on_connection(|status| println!("connection: {status}"));
	client.on_error(|e| eprintln!("error: {e}"));

	client.init().await.context("client initialization failed")?;

	let via = match client.transport_kind() {
		TransportKind::Streaming => "stream",
		TransportKind::Polling => "polling",
		TransportKind::Mock | TransportKind::None => "none",
	};
	info!(via, "Watching for changes, press Ctrl-C to stop");
	println!(
		"{}",
		serde_json::to_string_pretty(&serde_json::json!({
			"flags": client.all_flags(),
			"configs": client.all_configs(),
		}))?
	);

	tokio::signal::ctrl_c()
		.await
		.context("failed to listen for Ctrl-C")?;
	client.destroy().await;
	Ok(())
}

fn print_change<T: serde::Serialize>(
	kind: &str,
	key: &str,
	previous: Option<&T>,
	current: Option<&T>,
) {
	let render = |value: Option<&T>| match value {
		Some(v) => serde_json::to_string(v).unwrap_or_else(|_| "?".to_string()),
		None => "(none)".to_string(),
	};
	println!("{kind} {key}: {} -> {}", render(previous), render(current));
}
