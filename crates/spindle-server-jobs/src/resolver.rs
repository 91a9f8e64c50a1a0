// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Turns caller-supplied raw values into typed [`JobParameters`].
//!
//! Resolution order:
//!
//! 1. Undeclared parameters, sorted by name, as non-identifying entries with a
//!    type inferred from their shape. Dropped entirely when unknown
//!    parameters are ignored.
//! 2. Declared parameters in declaration order. A provided value wins, then
//!    the literal default, then the default expression, which is only
//!    evaluated at this point. A required parameter with none of these fails
//!    with [`JobError::MissingParameter`]; an optional one is left out.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use spindle_server_db::{JobParameters, ParameterType, ParameterValue};

use crate::definition::ParameterDefinitionSource;
use crate::error::{JobError, Result};
use crate::value::{RawParameters, RawValue};

#[derive(Clone)]
pub struct ParameterResolver {
	source: Arc<dyn ParameterDefinitionSource>,
	ignore_unknown: bool,
}

impl ParameterResolver {
	pub fn new(source: Arc<dyn ParameterDefinitionSource>, ignore_unknown: bool) -> Self {
		Self {
			source,
			ignore_unknown,
		}
	}

	#[tracing::instrument(skip(self, provided), fields(provided = provided.len()))]
	pub async fn resolve(&self, job_name: &str, provided: &RawParameters) -> Result<JobParameters> {
		let definitions = self.source.definitions(job_name).await?;
		let declared: HashSet<&str> = definitions.iter().map(|d| d.name.as_str()).collect();

		let mut params = JobParameters::new();

		for (name, raw) in provided {
			if declared.contains(name.as_str()) {
				continue;
			}
			if self.ignore_unknown {
				tracing::debug!(job_name, parameter = %name, "ignoring undeclared parameter");
				continue;
			}
			params.insert(name.clone(), infer_value(raw), false);
		}

		for definition in &definitions {
			let raw = match provided.get(&definition.name) {
				Some(raw) => Some(raw.clone()),
				None => match (&definition.default_value, &definition.default_expression) {
					(Some(literal), _) => Some(literal.clone()),
					(None, Some(expression)) => Some(expression.evaluate().map_err(|source| {
						JobError::InvalidExpression {
							name: definition.name.clone(),
							source,
						}
					})?),
					(None, None) => None,
				},
			};

			let Some(raw) = raw else {
				if definition.required {
					return Err(JobError::MissingParameter(definition.name.clone()));
				}
				continue;
			};

			let value = coerce(&definition.name, definition.parameter_type, &raw)?;
			params.insert(definition.name.clone(), value, definition.identifying);
		}

		Ok(params)
	}
}

/// Typed value for an undeclared parameter, by the shape of its raw value.
pub fn infer_value(raw: &RawValue) -> ParameterValue {
	match raw {
		RawValue::Integer(i) => ParameterValue::Long(*i),
		RawValue::Float(f) => ParameterValue::Double(*f),
		RawValue::Date(d) => ParameterValue::Date(*d),
		RawValue::Text(_) | RawValue::Bool(_) => ParameterValue::String(raw.to_string()),
	}
}

pub fn coerce(name: &str, parameter_type: ParameterType, raw: &RawValue) -> Result<ParameterValue> {
	let format_error = || JobError::ParameterFormat {
		name: name.to_string(),
		expected: parameter_type,
		value: raw.to_string(),
	};

	match parameter_type {
		ParameterType::Long => match raw {
			RawValue::Integer(i) => Ok(ParameterValue::Long(*i)),
			RawValue::Float(f) if f.is_finite() => Ok(ParameterValue::Long(f.trunc() as i64)),
			RawValue::Text(t) => t
				.trim()
				.parse()
				.map(ParameterValue::Long)
				.map_err(|_| format_error()),
			_ => Err(format_error()),
		},
		ParameterType::Double => match raw {
			RawValue::Integer(i) => Ok(ParameterValue::Double(*i as f64)),
			RawValue::Float(f) => Ok(ParameterValue::Double(*f)),
			RawValue::Text(t) => t
				.trim()
				.parse()
				.map(ParameterValue::Double)
				.map_err(|_| format_error()),
			_ => Err(format_error()),
		},
		ParameterType::Date => match raw {
			RawValue::Date(d) => Ok(ParameterValue::Date(*d)),
			RawValue::Integer(ms) => Utc
				.timestamp_millis_opt(*ms)
				.single()
				.map(ParameterValue::Date)
				.ok_or_else(format_error),
			RawValue::Text(t) => parse_date(t.trim())
				.map(ParameterValue::Date)
				.ok_or_else(format_error),
			_ => Err(format_error()),
		},
		ParameterType::String => Ok(ParameterValue::String(match raw {
			RawValue::Date(d) => d.to_rfc3339_opts(SecondsFormat::AutoSi, true),
			other => other.to_string(),
		})),
	}
}

/// RFC 3339 first, then ISO-8601 variants without a zone (read as UTC).
fn parse_date(text: &str) -> Option<DateTime<Utc>> {
	if let Ok(d) = DateTime::parse_from_rfc3339(text) {
		return Some(d.with_timezone(&Utc));
	}
	if let Ok(d) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
		return Some(d.with_timezone(&Utc));
	}
	NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
		.ok()
		.map(|d| d.and_utc())
}
