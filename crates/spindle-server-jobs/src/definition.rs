// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Declared job parameters and where they come from.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use spindle_server_db::{ParameterDefinitionRecord, ParameterDefinitionStore, ParameterType};

use crate::error::{JobError, Result};
use crate::expression::{Expression, ExpressionError};
use crate::value::RawValue;

/// A default computed at resolution time, never ahead of it.
#[derive(Clone)]
pub enum DefaultExpression {
	Parsed(Expression),
	Thunk(Arc<dyn Fn() -> RawValue + Send + Sync>),
}

impl DefaultExpression {
	pub fn parse(source: &str) -> std::result::Result<Self, ExpressionError> {
		Expression::parse(source).map(DefaultExpression::Parsed)
	}

	pub fn from_fn<F>(f: F) -> Self
	where
		F: Fn() -> RawValue + Send + Sync + 'static,
	{
		DefaultExpression::Thunk(Arc::new(f))
	}

	pub fn evaluate(&self) -> std::result::Result<RawValue, ExpressionError> {
		match self {
			DefaultExpression::Parsed(expr) => expr.evaluate(),
			DefaultExpression::Thunk(f) => Ok(f()),
		}
	}
}

impl fmt::Debug for DefaultExpression {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DefaultExpression::Parsed(expr) => f.debug_tuple("Parsed").field(&expr.source()).finish(),
			DefaultExpression::Thunk(_) => f.write_str("Thunk(..)"),
		}
	}
}

#[derive(Debug, Clone)]
pub struct JobParameterDefinition {
	pub name: String,
	pub parameter_type: ParameterType,
	pub required: bool,
	pub identifying: bool,
	pub default_value: Option<RawValue>,
	pub default_expression: Option<DefaultExpression>,
}

impl JobParameterDefinition {
	pub fn new(name: impl Into<String>, parameter_type: ParameterType) -> Self {
		Self {
			name: name.into(),
			parameter_type,
			required: false,
			identifying: false,
			default_value: None,
			default_expression: None,
		}
	}

	pub fn required(mut self) -> Self {
		self.required = true;
		self
	}

	pub fn identifying(mut self) -> Self {
		self.identifying = true;
		self
	}

	pub fn with_default(mut self, value: impl Into<RawValue>) -> Self {
		self.default_value = Some(value.into());
		self
	}

	pub fn with_default_expression(mut self, expression: DefaultExpression) -> Self {
		self.default_expression = Some(expression);
		self
	}
}

impl TryFrom<ParameterDefinitionRecord> for JobParameterDefinition {
	type Error = JobError;

	fn try_from(record: ParameterDefinitionRecord) -> Result<Self> {
		let default_expression = record
			.default_expression
			.as_deref()
			.map(DefaultExpression::parse)
			.transpose()
			.map_err(|source| JobError::InvalidExpression {
				name: record.name.clone(),
				source,
			})?;

		Ok(Self {
			name: record.name,
			parameter_type: record.parameter_type,
			required: record.required,
			identifying: record.identifying,
			default_value: record.default_value.map(RawValue::Text),
			default_expression,
		})
	}
}

/// Supplies the ordered parameter declarations of a job.
#[async_trait]
pub trait ParameterDefinitionSource: Send + Sync {
	async fn definitions(&self, job_name: &str) -> Result<Vec<JobParameterDefinition>>;
}

/// Definitions kept in the database.
pub struct StoredParameterDefinitions {
	store: Arc<dyn ParameterDefinitionStore>,
}

impl StoredParameterDefinitions {
	pub fn new(store: Arc<dyn ParameterDefinitionStore>) -> Self {
		Self { store }
	}
}

#[async_trait]
impl ParameterDefinitionSource for StoredParameterDefinitions {
	async fn definitions(&self, job_name: &str) -> Result<Vec<JobParameterDefinition>> {
		self
			.store
			.list_for_job(job_name)
			.await?
			.into_iter()
			.map(JobParameterDefinition::try_from)
			.collect()
	}
}

/// Asks each source in turn; the first non-empty answer wins.
#[derive(Default)]
pub struct ChainedDefinitionSource {
	sources: Vec<Arc<dyn ParameterDefinitionSource>>,
}

impl ChainedDefinitionSource {
	pub fn new(sources: Vec<Arc<dyn ParameterDefinitionSource>>) -> Self {
		Self { sources }
	}

	pub fn push(&mut self, source: Arc<dyn ParameterDefinitionSource>) {
		self.sources.push(source);
	}
}

#[async_trait]
impl ParameterDefinitionSource for ChainedDefinitionSource {
	async fn definitions(&self, job_name: &str) -> Result<Vec<JobParameterDefinition>> {
		for source in &self.sources {
			let definitions = source.definitions(job_name).await?;
			if !definitions.is_empty() {
				return Ok(definitions);
			}
		}
		Ok(Vec::new())
	}
}
