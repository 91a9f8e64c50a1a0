// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use spindle_server_db::ExecutionStore;

use crate::error::{JobError, Result};
use crate::types::{BatchStatus, JobParameters};

/// Handed to [`crate::Job::run`]. Stop requests arrive through the stored
/// execution status, so a job observes them by polling at its own
/// checkpoints.
pub struct JobContext {
	pub execution_id: i64,
	pub instance_id: i64,
	pub job_name: String,
	pub parameters: JobParameters,
	store: Arc<dyn ExecutionStore>,
}

impl JobContext {
	pub fn new(
		execution_id: i64,
		instance_id: i64,
		job_name: String,
		parameters: JobParameters,
		store: Arc<dyn ExecutionStore>,
	) -> Self {
		Self {
			execution_id,
			instance_id,
			job_name,
			parameters,
			store,
		}
	}

	pub async fn stop_requested(&self) -> Result<bool> {
		let status = self.store.get_status(self.execution_id).await?;
		Ok(status == Some(BatchStatus::Stopping))
	}

	/// Returns [`JobError::Stopped`] once a stop was requested, so a job can
	/// bail out with `ctx.checkpoint().await?`.
	pub async fn checkpoint(&self) -> Result<()> {
		if self.stop_requested().await? {
			tracing::info!(execution_id = self.execution_id, job_name = %self.job_name, "Stop requested, leaving at checkpoint");
			return Err(JobError::Stopped);
		}
		Ok(())
	}
}
