// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! spindle job orchestration server binary.

use clap::{Parser, Subcommand};
use spindle_server_jobs::MapJobRegistry;
use std::path::PathBuf;

/// spindle-server - job orchestration with crash recovery.
#[derive(Parser, Debug)]
#[command(name = "spindle-server", about = "spindle job orchestration server", version)]
struct Args {
	/// Configuration file, read instead of /etc/spindle/server.toml
	#[arg(long, env = "SPINDLE_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version and build information
	Version,
}

fn format_version_info() -> String {
	format!(
		"spindle-server version: {}\nPlatform:               {}-{}",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::ARCH,
		std::env::consts::OS,
	)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => spindle_server_config::load_config_with_file(path)?,
		None => spindle_server_config::load_config()?,
	};

	spindle_server::init_tracing(&config.logging)?;

	tracing::info!(
		database = %config.database.url,
		recover_on_init = config.jobs.recover_on_init,
		stop_on_shutdown = config.jobs.stop_on_shutdown,
		"starting spindle-server"
	);

	let shutdown = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %e, "Failed to listen for shutdown signal");
		}
		tracing::info!("Received shutdown signal");
	};

	let summary = spindle_server::run_until(&config, MapJobRegistry::new(), shutdown).await?;

	tracing::info!(pending = summary.pending, "Server shutdown complete");
	Ok(())
}
