// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process start and shutdown sweeps.
//!
//! Only one process owns the execution set at a time, so anything still
//! marked running when that process starts was left behind by a predecessor
//! that died. The recovery sweep abandons those executions so their
//! instances can be started again. The drain sweep asks every running
//! execution to stop; whatever has not finished by the time the process
//! exits is picked up by the next recovery sweep.
//!
//! Both sweeps walk job names known to the repository, keep going past
//! per-record failures and report what they did.

use serde::Serialize;
use tracing::{error, info, instrument};

use crate::error::Result;
use crate::service::{JobService, ResetStatus};
use crate::types::BatchStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
	/// Running executions found.
	pub running: usize,
	/// Executions cleared or asked to stop.
	pub affected: usize,
	/// Executions or job names the sweep failed on.
	pub failed: usize,
}

impl JobService {
	/// Run the recovery sweep when `recover_on_init` is set.
	pub async fn initialize(&self) -> Result<Option<SweepReport>> {
		if !self.options.recover_on_init {
			return Ok(None);
		}
		self.recover_running_executions().await.map(Some)
	}

	/// Run the drain sweep when `stop_on_shutdown` is set. The caller owns the
	/// grace period that follows.
	pub async fn shutdown(&self) -> Result<Option<SweepReport>> {
		if !self.options.stop_on_shutdown {
			return Ok(None);
		}
		self.request_stop_all().await.map(Some)
	}

	/// Abandon every execution still marked running.
	#[instrument(skip(self))]
	pub async fn recover_running_executions(&self) -> Result<SweepReport> {
		let mut report = SweepReport::default();

		for job_name in self.store.list_job_names().await? {
			let running = match self.find_running_executions(&job_name).await {
				Ok(running) => running,
				Err(e) => {
					error!(job_name = %job_name, error = %e, "Failed to list running executions");
					report.failed += 1;
					continue;
				}
			};

			for execution in running {
				report.running += 1;
				let execution_id = execution.id;
				match self.reset_execution(execution, ResetStatus::Abandoned).await {
					Ok(Some(_)) => report.affected += 1,
					Ok(None) => {}
					Err(e) => {
						error!(execution_id, job_name = %job_name, error = %e, "Failed to abandon execution");
						report.failed += 1;
					}
				}
			}
		}

		info!(
			running = report.running,
			abandoned = report.affected,
			failed = report.failed,
			"Recovery sweep finished"
		);
		Ok(report)
	}

	/// Ask every running execution that is not already stopping to stop.
	#[instrument(skip(self))]
	pub async fn request_stop_all(&self) -> Result<SweepReport> {
		let mut report = SweepReport::default();

		for job_name in self.store.list_job_names().await? {
			let running = match self.find_running_executions(&job_name).await {
				Ok(running) => running,
				Err(e) => {
					error!(job_name = %job_name, error = %e, "Failed to list running executions");
					report.failed += 1;
					continue;
				}
			};

			for execution in running {
				report.running += 1;
				if execution.status == BatchStatus::Stopping {
					continue;
				}
				match self.request_stop(execution.id).await {
					Ok(true) => report.affected += 1,
					Ok(false) => {}
					Err(e) => {
						error!(execution_id = execution.id, job_name = %job_name, error = %e, "Failed to request stop");
						report.failed += 1;
					}
				}
			}
		}

		info!(
			running = report.running,
			stopping = report.affected,
			failed = report.failed,
			"Drain sweep finished"
		);
		Ok(report)
	}
}
