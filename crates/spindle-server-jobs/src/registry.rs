// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::definition::{JobParameterDefinition, ParameterDefinitionSource};
use crate::error::{JobError, Result};
use crate::job::Job;

pub trait JobRegistry: Send + Sync {
	/// Registered job names, sorted.
	fn names(&self) -> Vec<String>;

	fn get(&self, name: &str) -> Result<Arc<dyn Job>>;
}

/// In-process registry keyed by [`Job::name`].
#[derive(Default, Clone)]
pub struct MapJobRegistry {
	jobs: BTreeMap<String, Arc<dyn Job>>,
}

impl MapJobRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a job, replacing any job already registered under its name.
	pub fn register(&mut self, job: Arc<dyn Job>) {
		let name = job.name().to_string();
		if self.jobs.insert(name.clone(), job).is_some() {
			tracing::warn!(job_name = %name, "Replaced previously registered job");
		}
	}

	pub fn with(mut self, job: Arc<dyn Job>) -> Self {
		self.register(job);
		self
	}
}

impl JobRegistry for MapJobRegistry {
	fn names(&self) -> Vec<String> {
		self.jobs.keys().cloned().collect()
	}

	fn get(&self, name: &str) -> Result<Arc<dyn Job>> {
		self
			.jobs
			.get(name)
			.cloned()
			.ok_or_else(|| JobError::NoSuchJob(name.to_string()))
	}
}

#[async_trait]
impl ParameterDefinitionSource for MapJobRegistry {
	async fn definitions(&self, job_name: &str) -> Result<Vec<JobParameterDefinition>> {
		Ok(
			self
				.jobs
				.get(job_name)
				.map(|job| job.parameters())
				.unwrap_or_default(),
		)
	}
}
