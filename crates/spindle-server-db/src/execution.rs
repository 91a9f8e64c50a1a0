// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job instances and executions.
//!
//! A job instance is one logical run target of a job, keyed by the identifying
//! subset of its parameters. Each attempt to run an instance is an execution.
//! At most one execution per instance may be in a running status; the schema
//! enforces this with a partial unique index, which surfaces here as
//! [`DbError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};
use crate::params::{JobParameters, ParameterType, ParameterValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
	Starting,
	Started,
	Stopping,
	Stopped,
	Completed,
	Failed,
	Abandoned,
	Unknown,
}

impl BatchStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			BatchStatus::Starting => "STARTING",
			BatchStatus::Started => "STARTED",
			BatchStatus::Stopping => "STOPPING",
			BatchStatus::Stopped => "STOPPED",
			BatchStatus::Completed => "COMPLETED",
			BatchStatus::Failed => "FAILED",
			BatchStatus::Abandoned => "ABANDONED",
			BatchStatus::Unknown => "UNKNOWN",
		}
	}

	pub fn is_running(&self) -> bool {
		matches!(
			self,
			BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
		)
	}
}

impl std::fmt::Display for BatchStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for BatchStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"STARTING" => Ok(BatchStatus::Starting),
			"STARTED" => Ok(BatchStatus::Started),
			"STOPPING" => Ok(BatchStatus::Stopping),
			"STOPPED" => Ok(BatchStatus::Stopped),
			"COMPLETED" => Ok(BatchStatus::Completed),
			"FAILED" => Ok(BatchStatus::Failed),
			"ABANDONED" => Ok(BatchStatus::Abandoned),
			"UNKNOWN" => Ok(BatchStatus::Unknown),
			_ => Err(format!("unknown batch status: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitStatus {
	Unknown,
	Executing,
	Completed,
	Noop,
	Failed,
	Stopped,
}

impl ExitStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ExitStatus::Unknown => "UNKNOWN",
			ExitStatus::Executing => "EXECUTING",
			ExitStatus::Completed => "COMPLETED",
			ExitStatus::Noop => "NOOP",
			ExitStatus::Failed => "FAILED",
			ExitStatus::Stopped => "STOPPED",
		}
	}
}

impl std::str::FromStr for ExitStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"UNKNOWN" => Ok(ExitStatus::Unknown),
			"EXECUTING" => Ok(ExitStatus::Executing),
			"COMPLETED" => Ok(ExitStatus::Completed),
			"NOOP" => Ok(ExitStatus::Noop),
			"FAILED" => Ok(ExitStatus::Failed),
			"STOPPED" => Ok(ExitStatus::Stopped),
			_ => Err(format!("unknown exit status: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
	pub id: i64,
	pub job_name: String,
	pub job_key: String,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
	pub id: i64,
	pub instance_id: i64,
	pub job_name: String,
	pub status: BatchStatus,
	pub exit_status: ExitStatus,
	pub exit_description: Option<String>,
	pub parameters: JobParameters,
	pub created_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub ended_at: Option<DateTime<Utc>>,
	pub updated_at: DateTime<Utc>,
	/// Bumped on every update. A write made from an older copy is rejected.
	pub version: i64,
}

impl JobExecution {
	pub fn is_running(&self) -> bool {
		self.status.is_running()
	}
}

type InstanceRow = (i64, String, String, DateTime<Utc>);

type ExecutionRow = (
	i64,
	i64,
	String,
	String,
	String,
	Option<String>,
	DateTime<Utc>,
	Option<DateTime<Utc>>,
	Option<DateTime<Utc>>,
	DateTime<Utc>,
	i64,
);

const SELECT_EXECUTION: &str = r#"
	SELECT e.id, e.instance_id, i.job_name, e.status, e.exit_status, e.exit_description,
	       e.created_at, e.started_at, e.ended_at, e.updated_at, e.version
	FROM job_executions e
	JOIN job_instances i ON i.id = e.instance_id
"#;

fn instance_from_row((id, job_name, job_key, created_at): InstanceRow) -> JobInstance {
	JobInstance {
		id,
		job_name,
		job_key,
		created_at,
	}
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
	matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[derive(Clone)]
pub struct ExecutionRepository {
	pool: SqlitePool,
}

impl ExecutionRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, params))]
	pub async fn create_instance(&self, job_name: &str, params: &JobParameters) -> Result<JobInstance> {
		let job_key = params.job_key();
		let created_at = Utc::now();

		let result = sqlx::query(
			"INSERT INTO job_instances (job_name, job_key, created_at) VALUES (?, ?, ?)",
		)
		.bind(job_name)
		.bind(&job_key)
		.bind(created_at)
		.execute(&self.pool)
		.await
		.map_err(|e| {
			if is_unique_violation(&e) {
				DbError::Conflict(format!("job instance already exists for {job_name}"))
			} else {
				DbError::Sqlx(e)
			}
		})?;

		Ok(JobInstance {
			id: result.last_insert_rowid(),
			job_name: job_name.to_string(),
			job_key,
			created_at,
		})
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_instance(&self, instance_id: i64) -> Result<Option<JobInstance>> {
		let row = sqlx::query_as::<_, InstanceRow>(
			"SELECT id, job_name, job_key, created_at FROM job_instances WHERE id = ?",
		)
		.bind(instance_id)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(instance_from_row))
	}

	#[tracing::instrument(skip(self, params))]
	pub async fn find_instance_by_key(
		&self,
		job_name: &str,
		params: &JobParameters,
	) -> Result<Option<JobInstance>> {
		let row = sqlx::query_as::<_, InstanceRow>(
			"SELECT id, job_name, job_key, created_at FROM job_instances WHERE job_name = ? AND job_key = ?",
		)
		.bind(job_name)
		.bind(params.job_key())
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(instance_from_row))
	}

	/// Instances of a job, newest first.
	#[tracing::instrument(skip(self))]
	pub async fn list_instances(
		&self,
		job_name: &str,
		offset: u32,
		limit: u32,
	) -> Result<Vec<JobInstance>> {
		let rows = sqlx::query_as::<_, InstanceRow>(
			r#"
			SELECT id, job_name, job_key, created_at
			FROM job_instances
			WHERE job_name = ?
			ORDER BY id DESC
			LIMIT ? OFFSET ?
			"#,
		)
		.bind(job_name)
		.bind(limit as i64)
		.bind(offset as i64)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(instance_from_row).collect())
	}

	/// Number of instances of a job, or `None` when no instance of that job was
	/// ever recorded.
	#[tracing::instrument(skip(self))]
	pub async fn count_instances(&self, job_name: &str) -> Result<Option<u64>> {
		let (count,) =
			sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM job_instances WHERE job_name = ?")
				.bind(job_name)
				.fetch_one(&self.pool)
				.await?;

		Ok((count > 0).then_some(count as u64))
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_job_names(&self) -> Result<Vec<String>> {
		let rows = sqlx::query_as::<_, (String,)>(
			"SELECT DISTINCT job_name FROM job_instances ORDER BY job_name",
		)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(|(name,)| name).collect())
	}

	/// Create a STARTING execution for an instance, storing its parameters.
	#[tracing::instrument(skip(self, params))]
	pub async fn create_execution(
		&self,
		instance_id: i64,
		params: &JobParameters,
	) -> Result<JobExecution> {
		let instance = self
			.get_instance(instance_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("job instance #{instance_id}")))?;
		let now = Utc::now();

		let mut tx = self.pool.begin().await?;

		let result = sqlx::query(
			r#"
			INSERT INTO job_executions (instance_id, status, exit_status, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?)
			"#,
		)
		.bind(instance_id)
		.bind(BatchStatus::Starting.as_str())
		.bind(ExitStatus::Unknown.as_str())
		.bind(now)
		.bind(now)
		.execute(&mut *tx)
		.await
		.map_err(|e| {
			if is_unique_violation(&e) {
				DbError::Conflict(format!(
					"job instance #{instance_id} already has a running execution"
				))
			} else {
				DbError::Sqlx(e)
			}
		})?;
		let execution_id = result.last_insert_rowid();

		for (ordinal, (name, parameter)) in params.iter().enumerate() {
			sqlx::query(
				r#"
				INSERT INTO job_execution_params (execution_id, ordinal, name, parameter_type, value, identifying)
				VALUES (?, ?, ?, ?, ?, ?)
				"#,
			)
			.bind(execution_id)
			.bind(ordinal as i64)
			.bind(name)
			.bind(parameter.value.parameter_type().as_str())
			.bind(parameter.value.encode())
			.bind(parameter.identifying)
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;

		Ok(JobExecution {
			id: execution_id,
			instance_id,
			job_name: instance.job_name,
			status: BatchStatus::Starting,
			exit_status: ExitStatus::Unknown,
			exit_description: None,
			parameters: params.clone(),
			created_at: now,
			started_at: None,
			ended_at: None,
			updated_at: now,
			version: 0,
		})
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_execution(&self, execution_id: i64) -> Result<Option<JobExecution>> {
		let row = sqlx::query_as::<_, ExecutionRow>(&format!("{SELECT_EXECUTION} WHERE e.id = ?"))
			.bind(execution_id)
			.fetch_optional(&self.pool)
			.await?;

		match row {
			Some(row) => Ok(Some(self.hydrate(row).await?)),
			None => Ok(None),
		}
	}

	/// Executions of an instance, newest first.
	#[tracing::instrument(skip(self))]
	pub async fn list_executions(&self, instance_id: i64) -> Result<Vec<JobExecution>> {
		let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
			"{SELECT_EXECUTION} WHERE e.instance_id = ? ORDER BY e.id DESC"
		))
		.bind(instance_id)
		.fetch_all(&self.pool)
		.await?;

		self.hydrate_all(rows).await
	}

	/// Most recent execution of the instance identified by `params`.
	#[tracing::instrument(skip(self, params))]
	pub async fn get_last_execution(
		&self,
		job_name: &str,
		params: &JobParameters,
	) -> Result<Option<JobExecution>> {
		let row = sqlx::query_as::<_, ExecutionRow>(&format!(
			"{SELECT_EXECUTION} WHERE i.job_name = ? AND i.job_key = ? ORDER BY e.id DESC LIMIT 1"
		))
		.bind(job_name)
		.bind(params.job_key())
		.fetch_optional(&self.pool)
		.await?;

		match row {
			Some(row) => Ok(Some(self.hydrate(row).await?)),
			None => Ok(None),
		}
	}

	/// Running executions of a job, ordered by instance id.
	#[tracing::instrument(skip(self))]
	pub async fn list_running_executions(&self, job_name: &str) -> Result<Vec<JobExecution>> {
		let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
			r#"{SELECT_EXECUTION}
			WHERE i.job_name = ? AND e.status IN ('STARTING', 'STARTED', 'STOPPING')
			ORDER BY e.instance_id, e.id"#
		))
		.bind(job_name)
		.fetch_all(&self.pool)
		.await?;

		self.hydrate_all(rows).await
	}

	/// Persist status, exit status and timing of an execution.
	///
	/// The write only lands if the stored row still has `execution.version`;
	/// otherwise someone else updated it since it was read and the call fails
	/// with [`DbError::Conflict`]. On success the copy's version is bumped.
	#[tracing::instrument(skip(self, execution), fields(execution_id = execution.id, status = %execution.status, version = execution.version))]
	pub async fn update_execution(&self, execution: &mut JobExecution) -> Result<()> {
		if !execution.status.is_running() && execution.ended_at.is_none() {
			return Err(DbError::Validation(format!(
				"execution #{} has status {} but no end time",
				execution.id, execution.status
			)));
		}

		let updated_at = Utc::now();
		let result = sqlx::query(
			r#"
			UPDATE job_executions
			SET status = ?,
			    exit_status = ?,
			    exit_description = ?,
			    started_at = ?,
			    ended_at = ?,
			    updated_at = ?,
			    version = version + 1
			WHERE id = ? AND version = ?
			"#,
		)
		.bind(execution.status.as_str())
		.bind(execution.exit_status.as_str())
		.bind(&execution.exit_description)
		.bind(execution.started_at)
		.bind(execution.ended_at)
		.bind(updated_at)
		.bind(execution.id)
		.bind(execution.version)
		.execute(&self.pool)
		.await
		.map_err(|e| {
			if is_unique_violation(&e) {
				DbError::Conflict(format!(
					"job instance #{} already has a running execution",
					execution.instance_id
				))
			} else {
				DbError::Sqlx(e)
			}
		})?;

		if result.rows_affected() == 0 {
			return match self.get_status(execution.id).await? {
				Some(_) => Err(DbError::Conflict(format!(
					"job execution #{} was updated concurrently",
					execution.id
				))),
				None => Err(DbError::NotFound(format!("job execution #{}", execution.id))),
			};
		}

		execution.version += 1;
		execution.updated_at = updated_at;
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_status(&self, execution_id: i64) -> Result<Option<BatchStatus>> {
		let row = sqlx::query_as::<_, (String,)>("SELECT status FROM job_executions WHERE id = ?")
			.bind(execution_id)
			.fetch_optional(&self.pool)
			.await?;

		row
			.map(|(status,)| status.parse().map_err(DbError::Internal))
			.transpose()
	}

	async fn load_parameters(&self, execution_id: i64) -> Result<JobParameters> {
		let rows = sqlx::query_as::<_, (String, String, String, bool)>(
			r#"
			SELECT name, parameter_type, value, identifying
			FROM job_execution_params
			WHERE execution_id = ?
			ORDER BY ordinal
			"#,
		)
		.bind(execution_id)
		.fetch_all(&self.pool)
		.await?;

		let mut params = JobParameters::new();
		for (name, parameter_type, value, identifying) in rows {
			let parameter_type: ParameterType = parameter_type.parse().map_err(DbError::Internal)?;
			let value = ParameterValue::decode(parameter_type, &value).map_err(DbError::Internal)?;
			params.insert(name, value, identifying);
		}
		Ok(params)
	}

	async fn hydrate(&self, row: ExecutionRow) -> Result<JobExecution> {
		let (
			id,
			instance_id,
			job_name,
			status,
			exit_status,
			exit_description,
			created_at,
			started_at,
			ended_at,
			updated_at,
			version,
		) = row;

		Ok(JobExecution {
			id,
			instance_id,
			job_name,
			status: status.parse().map_err(DbError::Internal)?,
			exit_status: exit_status.parse().map_err(DbError::Internal)?,
			exit_description,
			parameters: self.load_parameters(id).await?,
			created_at,
			started_at,
			ended_at,
			updated_at,
			version,
		})
	}

	async fn hydrate_all(&self, rows: Vec<ExecutionRow>) -> Result<Vec<JobExecution>> {
		let mut executions = Vec::with_capacity(rows.len());
		for row in rows {
			executions.push(self.hydrate(row).await?);
		}
		Ok(executions)
	}
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
	async fn create_instance(&self, job_name: &str, params: &JobParameters) -> Result<JobInstance>;
	async fn get_instance(&self, instance_id: i64) -> Result<Option<JobInstance>>;
	async fn find_instance_by_key(
		&self,
		job_name: &str,
		params: &JobParameters,
	) -> Result<Option<JobInstance>>;
	async fn list_instances(&self, job_name: &str, offset: u32, limit: u32)
		-> Result<Vec<JobInstance>>;
	async fn count_instances(&self, job_name: &str) -> Result<Option<u64>>;
	async fn list_job_names(&self) -> Result<Vec<String>>;
	async fn create_execution(&self, instance_id: i64, params: &JobParameters)
		-> Result<JobExecution>;
	async fn get_execution(&self, execution_id: i64) -> Result<Option<JobExecution>>;
	async fn list_executions(&self, instance_id: i64) -> Result<Vec<JobExecution>>;
	async fn get_last_execution(
		&self,
		job_name: &str,
		params: &JobParameters,
	) -> Result<Option<JobExecution>>;
	async fn list_running_executions(&self, job_name: &str) -> Result<Vec<JobExecution>>;
	async fn update_execution(&self, execution: &mut JobExecution) -> Result<()>;
	async fn get_status(&self, execution_id: i64) -> Result<Option<BatchStatus>>;
}

#[async_trait]
impl ExecutionStore for ExecutionRepository {
	async fn create_instance(&self, job_name: &str, params: &JobParameters) -> Result<JobInstance> {
		self.create_instance(job_name, params).await
	}

	async fn get_instance(&self, instance_id: i64) -> Result<Option<JobInstance>> {
		self.get_instance(instance_id).await
	}

	async fn find_instance_by_key(
		&self,
		job_name: &str,
		params: &JobParameters,
	) -> Result<Option<JobInstance>> {
		self.find_instance_by_key(job_name, params).await
	}

	async fn list_instances(
		&self,
		job_name: &str,
		offset: u32,
		limit: u32,
	) -> Result<Vec<JobInstance>> {
		self.list_instances(job_name, offset, limit).await
	}

	async fn count_instances(&self, job_name: &str) -> Result<Option<u64>> {
		self.count_instances(job_name).await
	}

	async fn list_job_names(&self) -> Result<Vec<String>> {
		self.list_job_names().await
	}

	async fn create_execution(
		&self,
		instance_id: i64,
		params: &JobParameters,
	) -> Result<JobExecution> {
		self.create_execution(instance_id, params).await
	}

	async fn get_execution(&self, execution_id: i64) -> Result<Option<JobExecution>> {
		self.get_execution(execution_id).await
	}

	async fn list_executions(&self, instance_id: i64) -> Result<Vec<JobExecution>> {
		self.list_executions(instance_id).await
	}

	async fn get_last_execution(
		&self,
		job_name: &str,
		params: &JobParameters,
	) -> Result<Option<JobExecution>> {
		self.get_last_execution(job_name, params).await
	}

	async fn list_running_executions(&self, job_name: &str) -> Result<Vec<JobExecution>> {
		self.list_running_executions(job_name).await
	}

	async fn update_execution(&self, execution: &mut JobExecution) -> Result<()> {
		self.update_execution(execution).await
	}

	async fn get_status(&self, execution_id: i64) -> Result<Option<BatchStatus>> {
		self.get_status(execution_id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_batch_test_pool;

	fn ingest(dataset_id: i64, mode: &str) -> JobParameters {
		JobParameters::new()
			.with("datasetId", ParameterValue::Long(dataset_id), true)
			.with("mode", ParameterValue::String(mode.to_string()), false)
	}

	async fn finish(repo: &ExecutionRepository, mut execution: JobExecution, status: BatchStatus) {
		execution.status = status;
		execution.ended_at = Some(Utc::now());
		repo.update_execution(&mut execution).await.unwrap();
	}

	#[tokio::test]
	async fn test_create_and_find_instance_by_identity() {
		let repo = ExecutionRepository::new(create_batch_test_pool().await);

		let instance = repo.create_instance("ingest", &ingest(7, "full")).await.unwrap();
		let found = repo
			.find_instance_by_key("ingest", &ingest(7, "delta"))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(found, instance);

		assert!(repo
			.find_instance_by_key("ingest", &ingest(8, "full"))
			.await
			.unwrap()
			.is_none());
		assert!(repo
			.find_instance_by_key("export", &ingest(7, "full"))
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn test_duplicate_instance_is_conflict() {
		let repo = ExecutionRepository::new(create_batch_test_pool().await);

		repo.create_instance("ingest", &ingest(7, "full")).await.unwrap();
		let result = repo.create_instance("ingest", &ingest(7, "delta")).await;
		assert!(matches!(result, Err(DbError::Conflict(_))));
	}

	#[tokio::test]
	async fn test_list_instances_newest_first_with_paging() {
		let repo = ExecutionRepository::new(create_batch_test_pool().await);
		for id in 1..=5 {
			repo.create_instance("ingest", &ingest(id, "full")).await.unwrap();
		}

		let page = repo.list_instances("ingest", 0, 2).await.unwrap();
		let ids: Vec<i64> = page.iter().map(|i| i.id).collect();
		assert_eq!(ids, vec![5, 4]);

		let tail = repo.list_instances("ingest", 4, 2).await.unwrap();
		assert_eq!(tail.len(), 1);
		assert_eq!(tail[0].id, 1);
	}

	#[tokio::test]
	async fn test_count_instances_unknown_job() {
		let repo = ExecutionRepository::new(create_batch_test_pool().await);
		assert_eq!(repo.count_instances("ingest").await.unwrap(), None);

		repo.create_instance("ingest", &ingest(1, "full")).await.unwrap();
		repo.create_instance("ingest", &ingest(2, "full")).await.unwrap();
		assert_eq!(repo.count_instances("ingest").await.unwrap(), Some(2));
	}

	#[tokio::test]
	async fn test_list_job_names() {
		let repo = ExecutionRepository::new(create_batch_test_pool().await);
		repo.create_instance("ingest", &ingest(1, "full")).await.unwrap();
		repo.create_instance("export", &ingest(1, "full")).await.unwrap();
		repo.create_instance("ingest", &ingest(2, "full")).await.unwrap();

		assert_eq!(
			repo.list_job_names().await.unwrap(),
			vec!["export".to_string(), "ingest".to_string()]
		);
	}

	#[tokio::test]
	async fn test_create_execution_persists_parameters() {
		let repo = ExecutionRepository::new(create_batch_test_pool().await);
		let params = ingest(7, "full");
		let instance = repo.create_instance("ingest", &params).await.unwrap();

		let execution = repo.create_execution(instance.id, &params).await.unwrap();
		assert_eq!(execution.status, BatchStatus::Starting);
		assert_eq!(execution.exit_status, ExitStatus::Unknown);
		assert!(execution.ended_at.is_none());

		let stored = repo.get_execution(execution.id).await.unwrap().unwrap();
		assert_eq!(stored.parameters, params);
		assert_eq!(stored.job_name, "ingest");
		assert_eq!(stored.created_at, execution.created_at);
	}

	#[tokio::test]
	async fn test_second_running_execution_is_conflict() {
		let repo = ExecutionRepository::new(create_batch_test_pool().await);
		let params = ingest(7, "full");
		let instance = repo.create_instance("ingest", &params).await.unwrap();

		let first = repo.create_execution(instance.id, &params).await.unwrap();
		let second = repo.create_execution(instance.id, &params).await;
		assert!(matches!(second, Err(DbError::Conflict(_))));

		finish(&repo, first, BatchStatus::Failed).await;
		let restarted = repo.create_execution(instance.id, &params).await.unwrap();
		assert_eq!(restarted.status, BatchStatus::Starting);
		assert_eq!(repo.list_executions(instance.id).await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn test_update_requires_end_time_for_terminal_status() {
		let repo = ExecutionRepository::new(create_batch_test_pool().await);
		let params = ingest(7, "full");
		let instance = repo.create_instance("ingest", &params).await.unwrap();
		let mut execution = repo.create_execution(instance.id, &params).await.unwrap();

		execution.status = BatchStatus::Completed;
		let result = repo.update_execution(&mut execution).await;
		assert!(matches!(result, Err(DbError::Validation(_))));

		execution.status = BatchStatus::Stopping;
		repo.update_execution(&mut execution).await.unwrap();
		assert_eq!(
			repo.get_status(execution.id).await.unwrap(),
			Some(BatchStatus::Stopping)
		);
	}

	#[tokio::test]
	async fn test_update_missing_execution_is_not_found() {
		let repo = ExecutionRepository::new(create_batch_test_pool().await);
		let params = ingest(7, "full");
		let instance = repo.create_instance("ingest", &params).await.unwrap();
		let mut execution = repo.create_execution(instance.id, &params).await.unwrap();

		execution.id = 999;
		let result = repo.update_execution(&mut execution).await;
		assert!(matches!(result, Err(DbError::NotFound(_))));
	}

	#[tokio::test]
	async fn test_update_from_stale_copy_is_conflict() {
		let repo = ExecutionRepository::new(create_batch_test_pool().await);
		let params = ingest(7, "full");
		let instance = repo.create_instance("ingest", &params).await.unwrap();
		let mut execution = repo.create_execution(instance.id, &params).await.unwrap();
		let mut stale = repo.get_execution(execution.id).await.unwrap().unwrap();
		assert_eq!(stale.version, 0);

		execution.status = BatchStatus::Completed;
		execution.ended_at = Some(Utc::now());
		repo.update_execution(&mut execution).await.unwrap();
		assert_eq!(execution.version, 1);

		stale.status = BatchStatus::Stopping;
		let result = repo.update_execution(&mut stale).await;
		assert!(matches!(result, Err(DbError::Conflict(_))));
		assert_eq!(stale.version, 0);

		let stored = repo.get_execution(execution.id).await.unwrap().unwrap();
		assert_eq!(stored.status, BatchStatus::Completed);
		assert!(stored.ended_at.is_some());
		assert_eq!(stored.version, 1);

		let mut fresh = stored;
		fresh.exit_description = Some("checked".to_string());
		repo.update_execution(&mut fresh).await.unwrap();
		assert_eq!(fresh.version, 2);
	}

	#[tokio::test]
	async fn test_last_execution_and_running_listing() {
		let repo = ExecutionRepository::new(create_batch_test_pool().await);

		let a = ingest(1, "full");
		let b = ingest(2, "full");
		let instance_a = repo.create_instance("ingest", &a).await.unwrap();
		let instance_b = repo.create_instance("ingest", &b).await.unwrap();

		let first_a = repo.create_execution(instance_a.id, &a).await.unwrap();
		finish(&repo, first_a, BatchStatus::Failed).await;
		let second_a = repo.create_execution(instance_a.id, &a).await.unwrap();
		let first_b = repo.create_execution(instance_b.id, &b).await.unwrap();
		finish(&repo, first_b, BatchStatus::Completed).await;

		let last = repo
			.get_last_execution("ingest", &ingest(1, "delta"))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(last.id, second_a.id);

		let running = repo.list_running_executions("ingest").await.unwrap();
		assert_eq!(running.len(), 1);
		assert_eq!(running[0].id, second_a.id);
		assert!(repo.list_running_executions("export").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_get_status_missing() {
		let repo = ExecutionRepository::new(create_batch_test_pool().await);
		assert!(repo.get_status(42).await.unwrap().is_none());
		assert!(repo.get_execution(42).await.unwrap().is_none());
	}

	#[test]
	fn test_running_statuses() {
		assert!(BatchStatus::Starting.is_running());
		assert!(BatchStatus::Started.is_running());
		assert!(BatchStatus::Stopping.is_running());
		assert!(!BatchStatus::Stopped.is_running());
		assert!(!BatchStatus::Completed.is_running());
		assert!(!BatchStatus::Failed.is_running());
		assert!(!BatchStatus::Abandoned.is_running());
		assert!(!BatchStatus::Unknown.is_running());
	}

	#[test]
	fn test_status_string_roundtrip() {
		for status in [
			BatchStatus::Starting,
			BatchStatus::Started,
			BatchStatus::Stopping,
			BatchStatus::Stopped,
			BatchStatus::Completed,
			BatchStatus::Failed,
			BatchStatus::Abandoned,
			BatchStatus::Unknown,
		] {
			assert_eq!(status.as_str().parse::<BatchStatus>().unwrap(), status);
		}
		assert!("RUNNING".parse::<BatchStatus>().is_err());
	}
}
