// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::JobContext;
use crate::definition::JobParameterDefinition;
use crate::error::JobError;
use crate::types::{JobOutput, JobParameters};
use async_trait::async_trait;

#[async_trait]
pub trait Job: Send + Sync {
	fn name(&self) -> &str;

	fn description(&self) -> &str {
		""
	}

	/// Declared parameters, in declaration order.
	fn parameters(&self) -> Vec<JobParameterDefinition> {
		Vec::new()
	}

	/// Whether a failed or stopped instance may be run again.
	fn restartable(&self) -> bool {
		true
	}

	/// Reject a parameter set before anything is recorded.
	fn validate(&self, _params: &JobParameters) -> Result<(), String> {
		Ok(())
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError>;
}
