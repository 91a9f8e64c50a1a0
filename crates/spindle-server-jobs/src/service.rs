// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The orchestration facade.
//!
//! [`JobService`] keeps no state of its own between calls. Every query goes
//! to the [`ExecutionStore`], which is also the only channel to running job
//! logic: a stop is a status write that the job picks up at its next
//! checkpoint.

use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use spindle_server_db::{DbError, ExecutionStore};

use crate::definition::ParameterDefinitionSource;
use crate::error::{JobError, Result};
use crate::launcher::JobLauncher;
use crate::registry::JobRegistry;
use crate::resolver::ParameterResolver;
use crate::types::{BatchStatus, ExitStatus, JobExecution, JobInstance, JobParameters};
use crate::value::RawParameters;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobServiceOptions {
	/// Request a stop of every running execution on [`JobService::shutdown`].
	pub stop_on_shutdown: bool,
	/// Abandon executions left running by a previous process on
	/// [`JobService::initialize`].
	pub recover_on_init: bool,
	/// Drop undeclared parameters instead of passing them through.
	pub ignore_unknown_parameters: bool,
}

/// Statuses a running execution can be forced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStatus {
	Failed,
	Stopped,
	Abandoned,
	Unknown,
}

impl From<ResetStatus> for BatchStatus {
	fn from(status: ResetStatus) -> Self {
		match status {
			ResetStatus::Failed => BatchStatus::Failed,
			ResetStatus::Stopped => BatchStatus::Stopped,
			ResetStatus::Abandoned => BatchStatus::Abandoned,
			ResetStatus::Unknown => BatchStatus::Unknown,
		}
	}
}

impl TryFrom<BatchStatus> for ResetStatus {
	type Error = JobError;

	fn try_from(status: BatchStatus) -> Result<Self> {
		match status {
			BatchStatus::Failed => Ok(ResetStatus::Failed),
			BatchStatus::Stopped => Ok(ResetStatus::Stopped),
			BatchStatus::Abandoned => Ok(ResetStatus::Abandoned),
			BatchStatus::Unknown => Ok(ResetStatus::Unknown),
			other => Err(JobError::InvalidResetStatus(other)),
		}
	}
}

pub struct JobService {
	registry: Arc<dyn JobRegistry>,
	launcher: Arc<dyn JobLauncher>,
	pub(crate) store: Arc<dyn ExecutionStore>,
	resolver: ParameterResolver,
	pub(crate) options: JobServiceOptions,
}

impl JobService {
	pub fn new(
		registry: Arc<dyn JobRegistry>,
		launcher: Arc<dyn JobLauncher>,
		store: Arc<dyn ExecutionStore>,
		definitions: Arc<dyn ParameterDefinitionSource>,
		options: JobServiceOptions,
	) -> Self {
		Self {
			registry,
			launcher,
			store,
			resolver: ParameterResolver::new(definitions, options.ignore_unknown_parameters),
			options,
		}
	}

	pub fn options(&self) -> JobServiceOptions {
		self.options
	}

	/// Registered job names, sorted.
	pub fn names(&self) -> Vec<String> {
		self.registry.names()
	}

	/// Start a new execution, or restart the instance identified by `params`.
	/// Returns the STARTING execution without waiting for the job.
	#[instrument(skip(self, params), fields(parameters = %params))]
	pub async fn start(&self, job_name: &str, params: JobParameters) -> Result<JobExecution> {
		let result = async {
			let job = self.registry.get(job_name)?;
			self.launcher.run(job, params).await
		}
		.await;

		match &result {
			Ok(execution) => info!(
				execution_id = execution.id,
				instance_id = execution.instance_id,
				"Job started"
			),
			Err(e) => error!(error = %e, "Failed to start job"),
		}
		result
	}

	/// Ask a running execution to stop. Does nothing unless the execution is
	/// STARTING or STARTED.
	#[instrument(skip(self))]
	pub async fn stop(&self, execution_id: i64) -> Result<()> {
		self.request_stop(execution_id).await.map(|_| ())
	}

	/// Stop the running execution of the instance identified by `params`.
	#[instrument(skip(self, params), fields(parameters = %params))]
	pub async fn stop_by_parameters(&self, job_name: &str, params: &JobParameters) -> Result<()> {
		let Some(instance) = self.find_instance_by_parameters(job_name, params).await? else {
			info!("No job instance matches, nothing to stop");
			return Ok(());
		};

		match self.find_running_execution(job_name, instance.id).await? {
			Some(execution) => self.stop(execution.id).await,
			None => {
				info!(instance_id = instance.id, "Instance has no running execution, nothing to stop");
				Ok(())
			}
		}
	}

	pub async fn find_instance(&self, instance_id: i64) -> Result<Option<JobInstance>> {
		self
			.store
			.get_instance(instance_id)
			.await
			.map_err(|e| query_failed("find_instance", e))
	}

	/// Locate an instance through its most recent execution. An instance that
	/// never got an execution is not found here.
	pub async fn find_instance_by_parameters(
		&self,
		job_name: &str,
		params: &JobParameters,
	) -> Result<Option<JobInstance>> {
		let last = self
			.store
			.get_last_execution(job_name, params)
			.await
			.map_err(|e| query_failed("find_instance_by_parameters", e))?;
		match last {
			Some(execution) => self.find_instance(execution.instance_id).await,
			None => Ok(None),
		}
	}

	/// A page of instances, newest first. `start` is a zero-based offset.
	pub async fn find_instances(&self, job_name: &str, start: u32, count: u32) -> Result<Vec<JobInstance>> {
		self
			.store
			.list_instances(job_name, start, count)
			.await
			.map_err(|e| query_failed("find_instances", e))
	}

	/// Every instance of a job: counts first, then fetches one page of that
	/// size. Instances created in between may be missed.
	pub async fn find_all_instances(&self, job_name: &str) -> Result<Vec<JobInstance>> {
		let count = self.count_instances(job_name).await?;
		if count <= 0 {
			return Ok(Vec::new());
		}
		let count = u32::try_from(count).unwrap_or(u32::MAX);
		self.find_instances(job_name, 0, count).await
	}

	/// Number of instances, or `-1` when the repository has none for this name.
	pub async fn count_instances(&self, job_name: &str) -> Result<i64> {
		let count = self
			.store
			.count_instances(job_name)
			.await
			.map_err(|e| query_failed("count_instances", e))?;
		Ok(match count {
			Some(count) => i64::try_from(count).unwrap_or(i64::MAX),
			None => -1,
		})
	}

	pub async fn find_execution(&self, execution_id: i64) -> Result<Option<JobExecution>> {
		self
			.store
			.get_execution(execution_id)
			.await
			.map_err(|e| query_failed("find_execution", e))
	}

	/// Executions of an instance, newest first. Empty when the instance does
	/// not exist or belongs to another job.
	pub async fn find_executions(&self, job_name: &str, instance_id: i64) -> Result<Vec<JobExecution>> {
		match self.find_instance(instance_id).await? {
			Some(instance) if instance.job_name == job_name => self
				.store
				.list_executions(instance_id)
				.await
				.map_err(|e| query_failed("find_executions", e)),
			_ => Ok(Vec::new()),
		}
	}

	pub async fn find_executions_by_parameters(
		&self,
		job_name: &str,
		params: &JobParameters,
	) -> Result<Vec<JobExecution>> {
		match self.find_instance_by_parameters(job_name, params).await? {
			Some(instance) => self.find_executions(job_name, instance.id).await,
			None => Ok(Vec::new()),
		}
	}

	/// Running executions of a job, at most one per instance, ordered by
	/// instance id.
	pub async fn find_running_executions(&self, job_name: &str) -> Result<Vec<JobExecution>> {
		self
			.store
			.list_running_executions(job_name)
			.await
			.map_err(|e| query_failed("find_running_executions", e))
	}

	pub async fn find_running_execution(
		&self,
		job_name: &str,
		instance_id: i64,
	) -> Result<Option<JobExecution>> {
		Ok(self
			.find_executions(job_name, instance_id)
			.await?
			.into_iter()
			.find(JobExecution::is_running))
	}

	/// Force the running execution of an instance into `status` without
	/// signalling the job. The end time is set to the creation time since the
	/// real one is unknown. Returns `None` when nothing was running.
	#[instrument(skip(self))]
	pub async fn clear_running_execution(
		&self,
		job_name: &str,
		instance_id: i64,
		status: ResetStatus,
	) -> Result<Option<JobExecution>> {
		let Some(execution) = self.find_running_execution(job_name, instance_id).await? else {
			return Ok(None);
		};
		self.reset_execution(execution, status).await
	}

	/// [`Self::clear_running_execution`] with [`ResetStatus::Abandoned`].
	pub async fn abandon_running_execution(
		&self,
		job_name: &str,
		instance_id: i64,
	) -> Result<Option<JobExecution>> {
		self
			.clear_running_execution(job_name, instance_id, ResetStatus::Abandoned)
			.await
	}

	/// Resolve raw values against the job's declared parameters.
	pub async fn prepare_parameters(&self, job_name: &str, raw: &RawParameters) -> Result<JobParameters> {
		self.resolver.resolve(job_name, raw).await
	}

	/// Parameters made only of declared defaults.
	pub async fn prepare_default_parameters(&self, job_name: &str) -> Result<JobParameters> {
		self.prepare_parameters(job_name, &RawParameters::new()).await
	}

	/// Returns `None` when the execution finished on its own before the reset
	/// could be written.
	pub(crate) async fn reset_execution(
		&self,
		mut execution: JobExecution,
		status: ResetStatus,
	) -> Result<Option<JobExecution>> {
		let previous = loop {
			let previous = execution.status;
			execution.status = status.into();
			execution.exit_status = ExitStatus::Unknown;
			execution.ended_at = Some(execution.created_at);
			match self.store.update_execution(&mut execution).await {
				Ok(()) => break previous,
				Err(DbError::Conflict(_)) => {}
				Err(e) => {
					error!(execution_id = execution.id, error = %e, "Failed to clear running execution");
					return Err(e.into());
				}
			}

			match self.find_execution(execution.id).await? {
				Some(latest) if latest.is_running() => execution = latest,
				_ => {
					info!(execution_id = execution.id, "Execution finished before it could be cleared");
					return Ok(None);
				}
			}
		};

		warn!(
			execution_id = execution.id,
			instance_id = execution.instance_id,
			job_name = %execution.job_name,
			from = %previous,
			to = %execution.status,
			"Cleared running execution"
		);
		Ok(Some(execution))
	}

	/// Returns whether a stop was written. An execution that moves on between
	/// the read and the write is read again.
	pub(crate) async fn request_stop(&self, execution_id: i64) -> Result<bool> {
		loop {
			let Some(mut execution) = self.find_execution(execution_id).await? else {
				return Ok(false);
			};
			if !matches!(execution.status, BatchStatus::Starting | BatchStatus::Started) {
				return Ok(false);
			}

			execution.status = BatchStatus::Stopping;
			match self.store.update_execution(&mut execution).await {
				Ok(()) => {
					info!(execution_id, job_name = %execution.job_name, "Stop requested");
					return Ok(true);
				}
				Err(DbError::Conflict(_)) => {
					debug!(execution_id, "Execution changed while requesting stop, reading again");
				}
				Err(e) => {
					error!(execution_id, error = %e, "Failed to request stop");
					return Err(e.into());
				}
			}
		}
	}
}

fn query_failed(operation: &'static str, e: DbError) -> JobError {
	error!(operation, error = %e, "Job repository query failed");
	e.into()
}
