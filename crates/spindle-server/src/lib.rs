// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process supervision for the spindle job service.
//!
//! [`Supervisor::start`] opens the database, applies the schema, builds the
//! [`JobService`] and runs the recovery sweep. [`Supervisor::stop`] runs the
//! drain sweep and then gives running executions a grace period to finish.
//! [`run_until`] ties the two to a shutdown future.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spindle_server_config::{ConfigError, LogFormat, LoggingConfig, ServerConfig};
use spindle_server_db::{
	create_pool, run_migrations, DbError, ExecutionRepository, ExecutionStore,
	ParameterDefinitionRepository,
};
use spindle_server_jobs::{
	ChainedDefinitionSource, JobError, JobService, JobServiceOptions, MapJobRegistry,
	ParameterDefinitionSource, StoredParameterDefinitions, SweepReport, TaskJobLauncher,
};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("Database error: {0}")]
	Database(#[from] DbError),

	#[error("Job service error: {0}")]
	Jobs(#[from] JobError),

	#[error("Failed to initialize tracing: {0}")]
	Tracing(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.level.clone().into());

	let (text, json) = match config.format {
		LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
		LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
	};

	tracing_subscriber::registry()
		.with(filter)
		.with(text)
		.with(json)
		.try_init()
		.map_err(|e| ServerError::Tracing(e.to_string()))
}

/// What happened over the lifetime of a [`Supervisor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
	/// Result of the recovery sweep, when it ran.
	pub recovered: Option<SweepReport>,
	/// Result of the drain sweep, when it ran.
	pub drained: Option<SweepReport>,
	/// Executions still running when the grace period ran out.
	pub pending: usize,
}

pub struct Supervisor {
	service: Arc<JobService>,
	launcher: Arc<TaskJobLauncher>,
	grace: Duration,
	recovered: Option<SweepReport>,
}

impl Supervisor {
	pub async fn start(config: &ServerConfig, registry: MapJobRegistry) -> Result<Self> {
		let pool = create_pool(&config.database.url).await?;
		run_migrations(&pool).await?;

		let store: Arc<dyn ExecutionStore> = Arc::new(ExecutionRepository::new(pool.clone()));
		let launcher = Arc::new(TaskJobLauncher::with_max_concurrency(
			Arc::clone(&store),
			config.jobs.max_concurrent_executions as usize,
		));

		// Stored definitions override the ones a job declares in code.
		let registry = Arc::new(registry);
		let stored: Arc<dyn ParameterDefinitionSource> = Arc::new(StoredParameterDefinitions::new(
			Arc::new(ParameterDefinitionRepository::new(pool)),
		));
		let declared: Arc<dyn ParameterDefinitionSource> = registry.clone();
		let definitions = Arc::new(ChainedDefinitionSource::new(vec![stored, declared]));

		let options = JobServiceOptions {
			stop_on_shutdown: config.jobs.stop_on_shutdown,
			recover_on_init: config.jobs.recover_on_init,
			ignore_unknown_parameters: config.jobs.ignore_unknown_parameters,
		};
		let service = Arc::new(JobService::new(
			registry,
			launcher.clone(),
			store,
			definitions,
			options,
		));

		let recovered = service.initialize().await?;
		info!(jobs = ?service.names(), recovered = ?recovered, "Job service ready");

		Ok(Self {
			service,
			launcher,
			grace: Duration::from_secs(config.jobs.shutdown_grace_secs),
			recovered,
		})
	}

	pub fn service(&self) -> Arc<JobService> {
		Arc::clone(&self.service)
	}

	pub async fn stop(self) -> Result<ShutdownSummary> {
		let drained = self.service.shutdown().await?;
		info!(
			grace = %humantime::format_duration(self.grace),
			"Waiting for running executions"
		);
		let pending = self.launcher.await_termination(self.grace).await;
		if pending > 0 {
			warn!(pending, "Leaving executions for the next recovery sweep");
		}

		Ok(ShutdownSummary {
			recovered: self.recovered,
			drained,
			pending,
		})
	}
}

/// Start a [`Supervisor`], wait for `shutdown`, then stop it.
pub async fn run_until<F>(
	config: &ServerConfig,
	registry: MapJobRegistry,
	shutdown: F,
) -> Result<ShutdownSummary>
where
	F: Future<Output = ()>,
{
	let supervisor = Supervisor::start(config, registry).await?;
	shutdown.await;
	info!("Shutting down job service");
	supervisor.stop().await
}
