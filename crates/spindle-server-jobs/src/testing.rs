// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Jobs and helpers shared by the unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spindle_server_db::testing::create_batch_test_pool;
use spindle_server_db::{ExecutionRepository, ExecutionStore, JobInstance};

use crate::context::JobContext;
use crate::definition::JobParameterDefinition;
use crate::error::JobError;
use crate::job::Job;
use crate::launcher::TaskJobLauncher;
use crate::registry::MapJobRegistry;
use crate::service::{JobService, JobServiceOptions};
use crate::types::{
	BatchStatus, ExitStatus, JobExecution, JobOutput, JobParameters, ParameterType, ParameterValue,
};

/// `datasetId`: required identifying LONG. `mode`: STRING defaulting to "full".
pub fn ingest_definitions() -> Vec<JobParameterDefinition> {
	vec![
		JobParameterDefinition::new("datasetId", ParameterType::Long)
			.required()
			.identifying(),
		JobParameterDefinition::new("mode", ParameterType::String).with_default("full"),
	]
}

pub fn ingest_params(dataset_id: i64, mode: &str) -> JobParameters {
	JobParameters::new()
		.with("datasetId", ParameterValue::Long(dataset_id), true)
		.with("mode", ParameterValue::String(mode.to_string()), false)
}

pub async fn test_store() -> Arc<dyn ExecutionStore> {
	Arc::new(ExecutionRepository::new(create_batch_test_pool().await))
}

/// A service over a fresh in-memory store, using the registry for definitions.
pub async fn service_with(
	registry: MapJobRegistry,
	options: JobServiceOptions,
) -> (JobService, Arc<dyn ExecutionStore>) {
	let store = test_store().await;
	let registry = Arc::new(registry);
	let service = JobService::new(
		registry.clone(),
		Arc::new(TaskJobLauncher::new(store.clone())),
		store.clone(),
		registry,
		options,
	);
	(service, store)
}

/// Leave an `ingest`-shaped execution in STARTED as if its process had died.
pub async fn ghost(store: &Arc<dyn ExecutionStore>, job_name: &str, dataset_id: i64) -> JobExecution {
	let params = ingest_params(dataset_id, "full");
	let instance = store.create_instance(job_name, &params).await.unwrap();
	let mut execution = store.create_execution(instance.id, &params).await.unwrap();
	execution.status = BatchStatus::Started;
	execution.exit_status = ExitStatus::Executing;
	execution.started_at = Some(Utc::now());
	store.update_execution(&mut execution).await.unwrap();
	store.get_execution(execution.id).await.unwrap().unwrap()
}

/// Delegates to another store, but right after the first read of one
/// execution writes `status` to it, the way a concurrent caller would.
pub struct InterferingStore {
	inner: Arc<dyn ExecutionStore>,
	execution_id: i64,
	status: BatchStatus,
	exit_status: ExitStatus,
	fired: AtomicBool,
}

impl InterferingStore {
	pub fn new(
		inner: Arc<dyn ExecutionStore>,
		execution_id: i64,
		status: BatchStatus,
		exit_status: ExitStatus,
	) -> Self {
		Self {
			inner,
			execution_id,
			status,
			exit_status,
			fired: AtomicBool::new(false),
		}
	}

	pub fn fired(&self) -> bool {
		self.fired.load(Ordering::SeqCst)
	}
}

type DbResult<T> = spindle_server_db::Result<T>;

#[async_trait]
impl ExecutionStore for InterferingStore {
	async fn create_instance(&self, job_name: &str, params: &JobParameters) -> DbResult<JobInstance> {
		self.inner.create_instance(job_name, params).await
	}

	async fn get_instance(&self, instance_id: i64) -> DbResult<Option<JobInstance>> {
		self.inner.get_instance(instance_id).await
	}

	async fn find_instance_by_key(
		&self,
		job_name: &str,
		params: &JobParameters,
	) -> DbResult<Option<JobInstance>> {
		self.inner.find_instance_by_key(job_name, params).await
	}

	async fn list_instances(
		&self,
		job_name: &str,
		offset: u32,
		limit: u32,
	) -> DbResult<Vec<JobInstance>> {
		self.inner.list_instances(job_name, offset, limit).await
	}

	async fn count_instances(&self, job_name: &str) -> DbResult<Option<u64>> {
		self.inner.count_instances(job_name).await
	}

	async fn list_job_names(&self) -> DbResult<Vec<String>> {
		self.inner.list_job_names().await
	}

	async fn create_execution(&self, instance_id: i64, params: &JobParameters) -> DbResult<JobExecution> {
		self.inner.create_execution(instance_id, params).await
	}

	async fn get_execution(&self, execution_id: i64) -> DbResult<Option<JobExecution>> {
		let read = self.inner.get_execution(execution_id).await?;
		if execution_id == self.execution_id && !self.fired.swap(true, Ordering::SeqCst) {
			if let Some(mut latest) = self.inner.get_execution(execution_id).await? {
				latest.status = self.status;
				latest.exit_status = self.exit_status;
				if !self.status.is_running() {
					latest.ended_at = Some(Utc::now());
				}
				self.inner.update_execution(&mut latest).await?;
			}
		}
		Ok(read)
	}

	async fn list_executions(&self, instance_id: i64) -> DbResult<Vec<JobExecution>> {
		self.inner.list_executions(instance_id).await
	}

	async fn get_last_execution(
		&self,
		job_name: &str,
		params: &JobParameters,
	) -> DbResult<Option<JobExecution>> {
		self.inner.get_last_execution(job_name, params).await
	}

	async fn list_running_executions(&self, job_name: &str) -> DbResult<Vec<JobExecution>> {
		self.inner.list_running_executions(job_name).await
	}

	async fn update_execution(&self, execution: &mut JobExecution) -> DbResult<()> {
		self.inner.update_execution(execution).await
	}

	async fn get_status(&self, execution_id: i64) -> DbResult<Option<BatchStatus>> {
		self.inner.get_status(execution_id).await
	}
}

pub struct CompletingJob {
	name: String,
	definitions: Vec<JobParameterDefinition>,
	restartable: bool,
	pub runs: Arc<AtomicUsize>,
}

impl CompletingJob {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
			definitions: Vec::new(),
			restartable: true,
			runs: Arc::new(AtomicUsize::new(0)),
		}
	}

	pub fn ingest() -> Self {
		Self {
			definitions: ingest_definitions(),
			..Self::new("ingest")
		}
	}
}

#[async_trait]
impl Job for CompletingJob {
	fn name(&self) -> &str {
		&self.name
	}

	fn parameters(&self) -> Vec<JobParameterDefinition> {
		self.definitions.clone()
	}

	fn restartable(&self) -> bool {
		self.restartable
	}

	async fn run(&self, _ctx: &JobContext) -> Result<JobOutput, JobError> {
		self.runs.fetch_add(1, Ordering::SeqCst);
		Ok(JobOutput::completed_with("done"))
	}
}

pub struct FailingJob {
	name: String,
	restartable: bool,
}

impl FailingJob {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
			restartable: true,
		}
	}

	pub fn not_restartable(name: &str) -> Self {
		Self {
			name: name.to_string(),
			restartable: false,
		}
	}
}

#[async_trait]
impl Job for FailingJob {
	fn name(&self) -> &str {
		&self.name
	}

	fn restartable(&self) -> bool {
		self.restartable
	}

	async fn run(&self, _ctx: &JobContext) -> Result<JobOutput, JobError> {
		Err(JobError::Failed {
			message: "upstream unavailable".to_string(),
		})
	}
}

pub struct PanickingJob;

#[async_trait]
impl Job for PanickingJob {
	fn name(&self) -> &str {
		"panicky"
	}

	async fn run(&self, _ctx: &JobContext) -> Result<JobOutput, JobError> {
		panic!("boom");
	}
}

/// Loops on checkpoints until a stop is requested.
pub struct BlockingJob {
	name: String,
	definitions: Vec<JobParameterDefinition>,
}

impl BlockingJob {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
			definitions: Vec::new(),
		}
	}

	pub fn ingest() -> Self {
		Self {
			name: "ingest".to_string(),
			definitions: ingest_definitions(),
		}
	}
}

#[async_trait]
impl Job for BlockingJob {
	fn name(&self) -> &str {
		&self.name
	}

	fn parameters(&self) -> Vec<JobParameterDefinition> {
		self.definitions.clone()
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		loop {
			ctx.checkpoint().await?;
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	}
}

/// Poll until the execution reaches `status`, failing the test after 5s.
pub async fn wait_for_status(
	store: &Arc<dyn ExecutionStore>,
	execution_id: i64,
	status: BatchStatus,
) -> JobExecution {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	loop {
		let execution = store.get_execution(execution_id).await.unwrap().unwrap();
		if execution.status == status {
			return execution;
		}
		assert!(
			tokio::time::Instant::now() < deadline,
			"execution #{execution_id} stuck in {} waiting for {status}",
			execution.status
		);
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
}
