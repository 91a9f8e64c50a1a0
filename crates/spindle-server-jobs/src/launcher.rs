// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use spindle_server_db::{DbError, ExecutionStore};

use crate::context::JobContext;
use crate::error::{JobError, Result, StartFailure};
use crate::job::Job;
use crate::types::{BatchStatus, ExitStatus, JobExecution, JobParameters};

const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Starts job logic in the background.
#[async_trait]
pub trait JobLauncher: Send + Sync {
	/// Record a STARTING execution for the instance identified by `params` and
	/// hand it to a worker. Returns without waiting for the job.
	async fn run(&self, job: Arc<dyn Job>, params: JobParameters) -> Result<JobExecution>;
}

/// Runs each execution as a tokio task, at most `max_concurrency` at a time.
/// Executions over the limit wait in STARTING.
pub struct TaskJobLauncher {
	store: Arc<dyn ExecutionStore>,
	permits: Arc<Semaphore>,
	launch_lock: Mutex<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskJobLauncher {
	pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
		Self::with_max_concurrency(store, DEFAULT_MAX_CONCURRENCY)
	}

	pub fn with_max_concurrency(store: Arc<dyn ExecutionStore>, max_concurrency: usize) -> Self {
		Self {
			store,
			permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
			launch_lock: Mutex::new(()),
			handles: Mutex::new(Vec::new()),
		}
	}

	/// Wait up to `grace` for spawned executions to finish. Returns how many
	/// were still running when the grace period ran out; those tasks are
	/// detached, not aborted.
	#[instrument(skip(self))]
	pub async fn await_termination(&self, grace: Duration) -> usize {
		let deadline = tokio::time::Instant::now() + grace;
		let mut handles = self.handles.lock().await;
		let mut pending = 0;

		for mut handle in handles.drain(..) {
			if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
				pending += 1;
			}
		}

		if pending > 0 {
			warn!(pending, "Executions still running after grace period");
		} else {
			info!("All executions finished");
		}
		pending
	}

	/// Find the instance to run, rejecting it if its last execution forbids
	/// another attempt.
	async fn claim_instance(&self, job: &dyn Job, params: &JobParameters) -> Result<i64> {
		let job_name = job.name();

		if let Some(last) = self.store.get_last_execution(job_name, params).await? {
			let instance_id = last.instance_id;
			if last.is_running() {
				return Err(StartFailure::AlreadyRunning { instance_id }.into());
			}
			if last.status == BatchStatus::Completed {
				return Err(StartFailure::AlreadyComplete { instance_id }.into());
			}
			if !job.restartable() {
				return Err(
					StartFailure::NotRestartable {
						job_name: job_name.to_string(),
						instance_id,
					}
					.into(),
				);
			}
			return Ok(instance_id);
		}

		match self.store.find_instance_by_key(job_name, params).await? {
			Some(instance) => Ok(instance.id),
			None => Ok(self.store.create_instance(job_name, params).await?.id),
		}
	}
}

#[async_trait]
impl JobLauncher for TaskJobLauncher {
	#[instrument(skip(self, job, params), fields(job_name = %job.name()))]
	async fn run(&self, job: Arc<dyn Job>, params: JobParameters) -> Result<JobExecution> {
		job.validate(&params).map_err(StartFailure::InvalidParameters)?;

		let execution = {
			let _guard = self.launch_lock.lock().await;
			let instance_id = self.claim_instance(job.as_ref(), &params).await?;
			self
				.store
				.create_execution(instance_id, &params)
				.await
				.map_err(|e| match e {
					DbError::Conflict(_) => StartFailure::AlreadyRunning { instance_id }.into(),
					e => JobError::from(e),
				})?
		};

		info!(
			execution_id = execution.id,
			instance_id = execution.instance_id,
			parameters = %params,
			"Job execution created"
		);

		let store = Arc::clone(&self.store);
		let permits = Arc::clone(&self.permits);
		let execution_id = execution.id;
		let handle = tokio::spawn(async move {
			let _permit = match permits.acquire_owned().await {
				Ok(permit) => permit,
				Err(_) => {
					warn!(execution_id, "Launcher closed before execution could start");
					return;
				}
			};
			if let Err(e) = execute(job, store, execution_id).await {
				error!(execution_id, error = %e, "Failed to record execution outcome");
			}
		});

		let mut handles = self.handles.lock().await;
		handles.retain(|h| !h.is_finished());
		handles.push(handle);

		Ok(execution)
	}
}

async fn current(store: &Arc<dyn ExecutionStore>, execution_id: i64) -> Result<JobExecution> {
	store
		.get_execution(execution_id)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("job execution #{execution_id}")).into())
}

async fn execute(job: Arc<dyn Job>, store: Arc<dyn ExecutionStore>, execution_id: i64) -> Result<()> {
	// A stop request can land between the read and the write; re-read and decide again.
	let execution = loop {
		let mut execution = current(&store, execution_id).await?;

		match execution.status {
			BatchStatus::Starting => {}
			BatchStatus::Stopping => {
				info!(execution_id, "Stop requested before start");
				return finish(&store, execution_id, BatchStatus::Stopped, ExitStatus::Stopped, None).await;
			}
			other => {
				warn!(execution_id, status = %other, "Execution is no longer waiting to start");
				return Ok(());
			}
		}

		execution.status = BatchStatus::Started;
		execution.exit_status = ExitStatus::Executing;
		execution.started_at = Some(Utc::now());
		match store.update_execution(&mut execution).await {
			Ok(()) => break execution,
			Err(DbError::Conflict(_)) => continue,
			Err(e) => return Err(e.into()),
		}
	};

	let ctx = JobContext::new(
		execution.id,
		execution.instance_id,
		execution.job_name.clone(),
		execution.parameters.clone(),
		Arc::clone(&store),
	);
	let outcome = AssertUnwindSafe(job.run(&ctx)).catch_unwind().await;

	let (status, exit_status, description) = match outcome {
		Ok(Ok(output)) => (BatchStatus::Completed, output.exit_status, output.message),
		Ok(Err(JobError::Stopped)) => (BatchStatus::Stopped, ExitStatus::Stopped, None),
		Ok(Err(e)) => (BatchStatus::Failed, ExitStatus::Failed, Some(e.to_string())),
		Err(panic) => (
			BatchStatus::Failed,
			ExitStatus::Failed,
			Some(format!("Job panicked: {}", panic_message(panic.as_ref()))),
		),
	};

	finish(&store, execution_id, status, exit_status, description).await
}

/// Record the outcome on the latest copy of the execution. An execution that
/// was reset while the job ran keeps the status it was reset to.
async fn finish(
	store: &Arc<dyn ExecutionStore>,
	execution_id: i64,
	status: BatchStatus,
	exit_status: ExitStatus,
	description: Option<String>,
) -> Result<()> {
	let execution = loop {
		let mut execution = current(store, execution_id).await?;
		if !execution.is_running() {
			warn!(
				execution_id,
				status = %execution.status,
				"Execution was reset while running, keeping the recorded status"
			);
			return Ok(());
		}

		execution.status = status;
		execution.exit_status = exit_status;
		execution.exit_description = description.clone();
		execution.ended_at = Some(Utc::now());
		match store.update_execution(&mut execution).await {
			Ok(()) => break execution,
			Err(DbError::Conflict(_)) => continue,
			Err(e) => return Err(e.into()),
		}
	};

	match status {
		BatchStatus::Failed => warn!(
			execution_id,
			job_name = %execution.job_name,
			error = execution.exit_description.as_deref().unwrap_or_default(),
			"Job execution failed"
		),
		_ => info!(
			execution_id,
			job_name = %execution.job_name,
			status = %status,
			"Job execution finished"
		),
	}
	Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(s) = panic.downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{
		test_store, wait_for_status, BlockingJob, CompletingJob, FailingJob, InterferingStore,
		PanickingJob,
	};
	use crate::types::ParameterValue;
	use std::sync::atomic::Ordering;

	fn params(id: i64) -> JobParameters {
		JobParameters::new().with("datasetId", ParameterValue::Long(id), true)
	}

	#[tokio::test]
	async fn test_run_returns_starting_and_completes() {
		let store = test_store().await;
		let launcher = TaskJobLauncher::new(store.clone());
		let job = Arc::new(CompletingJob::new("report"));

		let execution = launcher.run(job.clone(), params(1)).await.unwrap();
		assert_eq!(execution.status, BatchStatus::Starting);

		let done = wait_for_status(&store, execution.id, BatchStatus::Completed).await;
		assert_eq!(done.exit_status, ExitStatus::Completed);
		assert_eq!(done.exit_description.as_deref(), Some("done"));
		assert!(done.started_at.is_some());
		assert!(done.ended_at.is_some());
		assert_eq!(job.runs.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_failure_is_recorded_and_restartable() {
		let store = test_store().await;
		let launcher = TaskJobLauncher::new(store.clone());
		let job: Arc<dyn Job> = Arc::new(FailingJob::new("sync"));

		let first = launcher.run(job.clone(), params(1)).await.unwrap();
		let failed = wait_for_status(&store, first.id, BatchStatus::Failed).await;
		assert_eq!(failed.exit_status, ExitStatus::Failed);
		assert!(failed
			.exit_description
			.as_deref()
			.unwrap()
			.contains("upstream unavailable"));

		let second = launcher.run(job, params(1)).await.unwrap();
		assert_eq!(second.instance_id, first.instance_id);
		assert_ne!(second.id, first.id);
		wait_for_status(&store, second.id, BatchStatus::Failed).await;
	}

	#[tokio::test]
	async fn test_not_restartable() {
		let store = test_store().await;
		let launcher = TaskJobLauncher::new(store.clone());
		let job: Arc<dyn Job> = Arc::new(FailingJob::not_restartable("once"));

		let first = launcher.run(job.clone(), params(1)).await.unwrap();
		wait_for_status(&store, first.id, BatchStatus::Failed).await;

		let err = launcher.run(job, params(1)).await.unwrap_err();
		assert!(matches!(
			err,
			JobError::ExecutionStart(StartFailure::NotRestartable { instance_id, .. })
				if instance_id == first.instance_id
		));
	}

	#[tokio::test]
	async fn test_panic_is_recorded_as_failure() {
		let store = test_store().await;
		let launcher = TaskJobLauncher::new(store.clone());

		let execution = launcher
			.run(Arc::new(PanickingJob), JobParameters::new())
			.await
			.unwrap();
		let failed = wait_for_status(&store, execution.id, BatchStatus::Failed).await;
		assert!(failed.exit_description.unwrap().contains("boom"));
	}

	#[tokio::test]
	async fn test_stop_before_start_skips_the_job() {
		let store = test_store().await;
		let launcher = TaskJobLauncher::with_max_concurrency(store.clone(), 1);

		let blocker = launcher
			.run(Arc::new(BlockingJob::new("blocker")), JobParameters::new())
			.await
			.unwrap();
		wait_for_status(&store, blocker.id, BatchStatus::Started).await;

		let job = Arc::new(CompletingJob::new("queued"));
		let mut queued = launcher.run(job.clone(), params(1)).await.unwrap();
		assert_eq!(store.get_status(queued.id).await.unwrap(), Some(BatchStatus::Starting));

		queued.status = BatchStatus::Stopping;
		store.update_execution(&mut queued).await.unwrap();

		let mut blocker = store.get_execution(blocker.id).await.unwrap().unwrap();
		blocker.status = BatchStatus::Stopping;
		store.update_execution(&mut blocker).await.unwrap();

		wait_for_status(&store, blocker.id, BatchStatus::Stopped).await;
		let stopped = wait_for_status(&store, queued.id, BatchStatus::Stopped).await;
		assert!(stopped.started_at.is_none());
		assert!(stopped.ended_at.is_some());
		assert_eq!(job.runs.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_stop_between_read_and_start_is_honoured() {
		let inner = test_store().await;
		// First execution in a fresh store.
		let store = Arc::new(InterferingStore::new(
			inner.clone(),
			1,
			BatchStatus::Stopping,
			ExitStatus::Unknown,
		));
		let launcher = TaskJobLauncher::new(store.clone());
		let job = Arc::new(CompletingJob::new("report"));

		let execution = launcher.run(job.clone(), params(1)).await.unwrap();
		assert_eq!(execution.id, 1);

		let stopped = wait_for_status(&inner, execution.id, BatchStatus::Stopped).await;
		assert!(store.fired());
		assert_eq!(stopped.exit_status, ExitStatus::Stopped);
		assert!(stopped.started_at.is_none());
		assert!(stopped.ended_at.is_some());
		assert_eq!(job.runs.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_validation_failure_records_nothing() {
		struct Picky;

		#[async_trait]
		impl Job for Picky {
			fn name(&self) -> &str {
				"picky"
			}

			fn validate(&self, params: &JobParameters) -> std::result::Result<(), String> {
				if params.get("datasetId").is_some() {
					Ok(())
				} else {
					Err("datasetId is required".to_string())
				}
			}

			async fn run(&self, _ctx: &JobContext) -> Result<crate::types::JobOutput> {
				Ok(crate::types::JobOutput::completed())
			}
		}

		let store = test_store().await;
		let launcher = TaskJobLauncher::new(store.clone());
		let err = launcher.run(Arc::new(Picky), JobParameters::new()).await.unwrap_err();
		assert!(matches!(
			err,
			JobError::ExecutionStart(StartFailure::InvalidParameters(_))
		));
		assert_eq!(store.count_instances("picky").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_await_termination_reports_stragglers() {
		let store = test_store().await;
		let launcher = TaskJobLauncher::new(store.clone());

		let execution = launcher
			.run(Arc::new(BlockingJob::new("forever")), JobParameters::new())
			.await
			.unwrap();
		wait_for_status(&store, execution.id, BatchStatus::Started).await;

		assert_eq!(launcher.await_termination(Duration::from_millis(50)).await, 1);
	}

	#[tokio::test]
	async fn test_await_termination_after_completion() {
		let store = test_store().await;
		let launcher = TaskJobLauncher::new(store.clone());

		let execution = launcher
			.run(Arc::new(CompletingJob::new("quick")), JobParameters::new())
			.await
			.unwrap();
		assert_eq!(launcher.await_termination(Duration::from_secs(5)).await, 0);
		assert_eq!(
			store.get_status(execution.id).await.unwrap(),
			Some(BatchStatus::Completed)
		);
	}
}
