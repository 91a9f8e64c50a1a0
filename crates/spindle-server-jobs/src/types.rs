// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

pub use spindle_server_db::{
	BatchStatus, ExitStatus, JobExecution, JobInstance, JobParameter, JobParameters, ParameterType,
	ParameterValue,
};

/// What a finished job reports back to the launcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
	pub exit_status: ExitStatus,
	pub message: Option<String>,
}

impl JobOutput {
	pub fn completed() -> Self {
		Self {
			exit_status: ExitStatus::Completed,
			message: None,
		}
	}

	pub fn completed_with(message: impl Into<String>) -> Self {
		Self {
			exit_status: ExitStatus::Completed,
			message: Some(message.into()),
		}
	}

	/// The job ran but found nothing to do.
	pub fn noop(message: impl Into<String>) -> Self {
		Self {
			exit_status: ExitStatus::Noop,
			message: Some(message.into()),
		}
	}
}
