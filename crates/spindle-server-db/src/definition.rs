// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stored parameter definitions, one ordered list per job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};
use crate::params::ParameterType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDefinitionRecord {
	pub job_name: String,
	pub name: String,
	pub parameter_type: ParameterType,
	pub required: bool,
	pub identifying: bool,
	pub default_value: Option<String>,
	pub default_expression: Option<String>,
}

type DefinitionRow = (String, String, String, bool, bool, Option<String>, Option<String>);

#[derive(Clone)]
pub struct ParameterDefinitionRepository {
	pool: SqlitePool,
}

impl ParameterDefinitionRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Definitions of a job in declaration order.
	#[tracing::instrument(skip(self))]
	pub async fn list_for_job(&self, job_name: &str) -> Result<Vec<ParameterDefinitionRecord>> {
		let rows = sqlx::query_as::<_, DefinitionRow>(
			r#"
			SELECT job_name, name, parameter_type, required, identifying, default_value, default_expression
			FROM job_parameter_definitions
			WHERE job_name = ?
			ORDER BY ordinal
			"#,
		)
		.bind(job_name)
		.fetch_all(&self.pool)
		.await?;

		rows
			.into_iter()
			.map(
				|(
					job_name,
					name,
					parameter_type,
					required,
					identifying,
					default_value,
					default_expression,
				)| {
					Ok(ParameterDefinitionRecord {
						job_name,
						name,
						parameter_type: parameter_type.parse().map_err(DbError::Internal)?,
						required,
						identifying,
						default_value,
						default_expression,
					})
				},
			)
			.collect()
	}

	/// Replace every definition of a job. Position in `records` becomes the
	/// declaration order.
	#[tracing::instrument(skip(self, records), fields(count = records.len()))]
	pub async fn replace_for_job(
		&self,
		job_name: &str,
		records: &[ParameterDefinitionRecord],
	) -> Result<()> {
		if let Some(stray) = records.iter().find(|r| r.job_name != job_name) {
			return Err(DbError::Validation(format!(
				"definition {} belongs to job {}, not {job_name}",
				stray.name, stray.job_name
			)));
		}

		let mut tx = self.pool.begin().await?;

		sqlx::query("DELETE FROM job_parameter_definitions WHERE job_name = ?")
			.bind(job_name)
			.execute(&mut *tx)
			.await?;

		for (ordinal, record) in records.iter().enumerate() {
			sqlx::query(
				r#"
				INSERT INTO job_parameter_definitions
				    (job_name, name, ordinal, parameter_type, required, identifying, default_value, default_expression)
				VALUES (?, ?, ?, ?, ?, ?, ?, ?)
				"#,
			)
			.bind(job_name)
			.bind(&record.name)
			.bind(ordinal as i64)
			.bind(record.parameter_type.as_str())
			.bind(record.required)
			.bind(record.identifying)
			.bind(&record.default_value)
			.bind(&record.default_expression)
			.execute(&mut *tx)
			.await
			.map_err(|e| match e {
				sqlx::Error::Database(db) if db.is_unique_violation() => DbError::Conflict(format!(
					"duplicate parameter definition {} for job {job_name}",
					record.name
				)),
				e => DbError::Sqlx(e),
			})?;
		}

		tx.commit().await?;
		Ok(())
	}
}

#[async_trait]
pub trait ParameterDefinitionStore: Send + Sync {
	async fn list_for_job(&self, job_name: &str) -> Result<Vec<ParameterDefinitionRecord>>;
	async fn replace_for_job(
		&self,
		job_name: &str,
		records: &[ParameterDefinitionRecord],
	) -> Result<()>;
}

#[async_trait]
impl ParameterDefinitionStore for ParameterDefinitionRepository {
	async fn list_for_job(&self, job_name: &str) -> Result<Vec<ParameterDefinitionRecord>> {
		self.list_for_job(job_name).await
	}

	async fn replace_for_job(
		&self,
		job_name: &str,
		records: &[ParameterDefinitionRecord],
	) -> Result<()> {
		self.replace_for_job(job_name, records).await
	}
}
