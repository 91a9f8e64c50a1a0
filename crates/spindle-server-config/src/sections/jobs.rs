// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Jobs configuration section.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
const DEFAULT_MAX_CONCURRENT_EXECUTIONS: u32 = 4;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobsConfigLayer {
	pub stop_on_shutdown: Option<bool>,
	pub recover_on_init: Option<bool>,
	pub ignore_unknown_parameters: Option<bool>,
	pub shutdown_grace_secs: Option<u64>,
	pub max_concurrent_executions: Option<u32>,
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.stop_on_shutdown.is_some() {
			self.stop_on_shutdown = other.stop_on_shutdown;
		}
		if other.recover_on_init.is_some() {
			self.recover_on_init = other.recover_on_init;
		}
		if other.ignore_unknown_parameters.is_some() {
			self.ignore_unknown_parameters = other.ignore_unknown_parameters;
		}
		if other.shutdown_grace_secs.is_some() {
			self.shutdown_grace_secs = other.shutdown_grace_secs;
		}
		if other.max_concurrent_executions.is_some() {
			self.max_concurrent_executions = other.max_concurrent_executions;
		}
	}

	pub fn finalize(self) -> Result<JobsConfig, ConfigError> {
		let max_concurrent_executions = self
			.max_concurrent_executions
			.unwrap_or(DEFAULT_MAX_CONCURRENT_EXECUTIONS);
		if max_concurrent_executions == 0 {
			return Err(ConfigError::Validation(
				"jobs.max_concurrent_executions must be at least 1".to_string(),
			));
		}

		Ok(JobsConfig {
			stop_on_shutdown: self.stop_on_shutdown.unwrap_or(false),
			recover_on_init: self.recover_on_init.unwrap_or(false),
			ignore_unknown_parameters: self.ignore_unknown_parameters.unwrap_or(false),
			shutdown_grace_secs: self
				.shutdown_grace_secs
				.unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
			max_concurrent_executions,
		})
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
	/// Ask running executions to stop when the server shuts down.
	pub stop_on_shutdown: bool,
	/// Abandon executions left running by a previous process at startup.
	pub recover_on_init: bool,
	pub ignore_unknown_parameters: bool,
	/// How long shutdown waits for executions after the drain sweep.
	pub shutdown_grace_secs: u64,
	pub max_concurrent_executions: u32,
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			stop_on_shutdown: false,
			recover_on_init: false,
			ignore_unknown_parameters: false,
			shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
			max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
		}
	}
}
