// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::expression::ExpressionError;
use spindle_server_db::{BatchStatus, DbError, ParameterType};

/// Why a job could not be started or restarted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartFailure {
	#[error("job instance #{instance_id} is already complete")]
	AlreadyComplete { instance_id: i64 },

	#[error("job instance #{instance_id} already has a running execution")]
	AlreadyRunning { instance_id: i64 },

	#[error("job {job_name} is not restartable (instance #{instance_id})")]
	NotRestartable { job_name: String, instance_id: i64 },

	#[error("invalid job parameters: {0}")]
	InvalidParameters(String),
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("No such job: {0}")]
	NoSuchJob(String),

	#[error("Failed to start job: {0}")]
	ExecutionStart(#[from] StartFailure),

	#[error("Missing required job parameter: {0}")]
	MissingParameter(String),

	#[error("Invalid value for job parameter {name}: expected {expected}, got '{value}'")]
	ParameterFormat {
		name: String,
		expected: ParameterType,
		value: String,
	},

	#[error("Invalid default expression for job parameter {name}: {source}")]
	InvalidExpression {
		name: String,
		#[source]
		source: ExpressionError,
	},

	#[error("Status {0} is not a valid status for resetting a running execution")]
	InvalidResetStatus(BatchStatus),

	#[error("Repository error: {0}")]
	Repository(#[from] DbError),

	#[error("Job failed: {message}")]
	Failed { message: String },

	#[error("Job stopped")]
	Stopped,
}

pub type Result<T> = std::result::Result<T, JobError>;
