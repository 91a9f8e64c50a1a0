// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed, identity-tagged job parameters.
//!
//! A [`JobParameters`] set keeps its entries in insertion order. Only entries
//! flagged as identifying take part in instance identity: two sets with the
//! same identifying entries address the same job instance, whatever their
//! other values are. [`JobParameters::job_key`] is the stored form of that
//! identity.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterType {
	Long,
	Double,
	Date,
	String,
}

impl ParameterType {
	pub fn as_str(&self) -> &'static str {
		match self {
			ParameterType::Long => "LONG",
			ParameterType::Double => "DOUBLE",
			ParameterType::Date => "DATE",
			ParameterType::String => "STRING",
		}
	}
}

impl fmt::Display for ParameterType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for ParameterType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"LONG" => Ok(ParameterType::Long),
			"DOUBLE" => Ok(ParameterType::Double),
			"DATE" => Ok(ParameterType::Date),
			"STRING" => Ok(ParameterType::String),
			_ => Err(format!("unknown parameter type: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterValue {
	Long(i64),
	Double(f64),
	Date(DateTime<Utc>),
	String(String),
}

impl ParameterValue {
	pub fn parameter_type(&self) -> ParameterType {
		match self {
			ParameterValue::Long(_) => ParameterType::Long,
			ParameterValue::Double(_) => ParameterType::Double,
			ParameterValue::Date(_) => ParameterType::Date,
			ParameterValue::String(_) => ParameterType::String,
		}
	}

	/// Lossless text form used for storage and identity hashing.
	pub fn encode(&self) -> String {
		match self {
			ParameterValue::Long(v) => v.to_string(),
			ParameterValue::Double(v) => v.to_string(),
			ParameterValue::Date(v) => v.to_rfc3339_opts(SecondsFormat::Nanos, true),
			ParameterValue::String(v) => v.clone(),
		}
	}

	pub fn decode(parameter_type: ParameterType, text: &str) -> Result<Self, String> {
		match parameter_type {
			ParameterType::Long => text
				.parse()
				.map(ParameterValue::Long)
				.map_err(|e| format!("invalid LONG value '{text}': {e}")),
			ParameterType::Double => text
				.parse()
				.map(ParameterValue::Double)
				.map_err(|e| format!("invalid DOUBLE value '{text}': {e}")),
			ParameterType::Date => DateTime::parse_from_rfc3339(text)
				.map(|d| ParameterValue::Date(d.with_timezone(&Utc)))
				.map_err(|e| format!("invalid DATE value '{text}': {e}")),
			ParameterType::String => Ok(ParameterValue::String(text.to_string())),
		}
	}
}

impl fmt::Display for ParameterValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.encode())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
	pub value: ParameterValue,
	pub identifying: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
	entries: Vec<(String, JobParameter)>,
}

impl JobParameters {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a parameter. An existing entry with the same name is replaced in
	/// place, so it keeps its original position.
	pub fn insert(&mut self, name: impl Into<String>, value: ParameterValue, identifying: bool) {
		let name = name.into();
		let parameter = JobParameter { value, identifying };
		match self.entries.iter_mut().find(|(n, _)| *n == name) {
			Some((_, existing)) => *existing = parameter,
			None => self.entries.push((name, parameter)),
		}
	}

	pub fn with(mut self, name: impl Into<String>, value: ParameterValue, identifying: bool) -> Self {
		self.insert(name, value, identifying);
		self
	}

	pub fn get(&self, name: &str) -> Option<&JobParameter> {
		self
			.entries
			.iter()
			.find(|(n, _)| n == name)
			.map(|(_, p)| p)
	}

	pub fn value(&self, name: &str) -> Option<&ParameterValue> {
		self.get(name).map(|p| &p.value)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
		self.entries.iter().map(|(n, p)| (n.as_str(), p))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// The identifying subset, in insertion order.
	pub fn identifying(&self) -> JobParameters {
		JobParameters {
			entries: self
				.entries
				.iter()
				.filter(|(_, p)| p.identifying)
				.cloned()
				.collect(),
		}
	}

	pub fn identity_eq(&self, other: &JobParameters) -> bool {
		self.canonical_identity() == other.canonical_identity()
	}

	/// SHA-256 hex digest of the identifying subset, independent of entry order.
	pub fn job_key(&self) -> String {
		let mut hasher = Sha256::new();
		for (name, parameter_type, encoded) in self.canonical_identity() {
			hasher.update(format!("{}:{name}", name.len()));
			hasher.update(parameter_type.as_str());
			hasher.update(format!("{}:{encoded};", encoded.len()));
		}
		hex::encode(hasher.finalize())
	}

	fn canonical_identity(&self) -> Vec<(&str, ParameterType, String)> {
		let mut identity: Vec<_> = self
			.entries
			.iter()
			.filter(|(_, p)| p.identifying)
			.map(|(n, p)| (n.as_str(), p.value.parameter_type(), p.value.encode()))
			.collect();
		identity.sort_by(|a, b| a.0.cmp(b.0));
		identity
	}
}

impl fmt::Display for JobParameters {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("{")?;
		for (i, (name, p)) in self.entries.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{name}={}({})", p.value, p.value.parameter_type())?;
		}
		f.write_str("}")
	}
}
