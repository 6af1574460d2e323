// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loom sourcemap command-line tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{AiContextArgs, LocateArgs, ParseStackArgs, ValidateArgs};

/// Validate sourcemap uploads and resolve built-code error locations offline.
#[derive(Parser, Debug)]
#[command(name = "loom-sourcemap", about = "Loom sourcemap tooling", version)]
struct Args {
	/// Log filter used when RUST_LOG is unset
	#[arg(long, global = true, default_value = "warn", env = "LOOM_SOURCEMAP_LOG")]
	log_level: String,

	/// Configuration file with a [sourcemap] table
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Check that every script in a source archive has a usable sourcemap
	Validate(ValidateArgs),
	/// Extract frames from a stack trace
	ParseStack(ParseStackArgs),
	/// Resolve a built-code location to its original source
	Locate(LocateArgs),
	/// Collect original source files around an error for analysis
	AiContext(AiContextArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| args.log_level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();

	let config = match &args.config {
		Some(path) => loom_server_sourcemap::load_config_with_file(path)?,
		None => loom_server_sourcemap::load_config()?,
	};

	match args.command {
		Command::Validate(cmd) => commands::handle_validate(cmd, &config),
		Command::ParseStack(cmd) => commands::handle_parse_stack(cmd),
		Command::Locate(cmd) => commands::handle_locate(cmd, config).await,
		Command::AiContext(cmd) => commands::handle_ai_context(cmd, config).await,
	}
}
