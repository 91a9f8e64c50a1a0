// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Untyped parameter values as supplied by callers.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// A caller-supplied value, tagged by its runtime shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
	Integer(i64),
	Float(f64),
	Date(DateTime<Utc>),
	Text(String),
	Bool(bool),
}

/// Raw parameters keyed by name. Sorted keys keep resolution deterministic.
pub type RawParameters = BTreeMap<String, RawValue>;

impl RawValue {
	/// Convert a JSON value. `null` means "not provided"; arrays and objects
	/// are kept as their JSON text.
	pub fn from_json(value: serde_json::Value) -> Option<Self> {
		use serde_json::Value;

		match value {
			Value::Null => None,
			Value::Bool(b) => Some(RawValue::Bool(b)),
			Value::Number(n) => match n.as_i64() {
				Some(i) => Some(RawValue::Integer(i)),
				None => n.as_f64().map(RawValue::Float),
			},
			Value::String(s) => Some(RawValue::Text(s)),
			other @ (Value::Array(_) | Value::Object(_)) => Some(RawValue::Text(other.to_string())),
		}
	}

	pub fn kind(&self) -> &'static str {
		match self {
			RawValue::Integer(_) => "integer",
			RawValue::Float(_) => "float",
			RawValue::Date(_) => "date",
			RawValue::Text(_) => "text",
			RawValue::Bool(_) => "bool",
		}
	}
}

impl fmt::Display for RawValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RawValue::Integer(v) => write!(f, "{v}"),
			RawValue::Float(v) => write!(f, "{v}"),
			RawValue::Date(v) => f.write_str(&v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
			RawValue::Text(v) => f.write_str(v),
			RawValue::Bool(v) => write!(f, "{v}"),
		}
	}
}

impl From<i64> for RawValue {
	fn from(v: i64) -> Self {
		RawValue::Integer(v)
	}
}

impl From<i32> for RawValue {
	fn from(v: i32) -> Self {
		RawValue::Integer(v.into())
	}
}

impl From<u32> for RawValue {
	fn from(v: u32) -> Self {
		RawValue::Integer(v.into())
	}
}

impl From<f64> for RawValue {
	fn from(v: f64) -> Self {
		RawValue::Float(v)
	}
}

impl From<bool> for RawValue {
	fn from(v: bool) -> Self {
		RawValue::Bool(v)
	}
}

impl From<&str> for RawValue {
	fn from(v: &str) -> Self {
		RawValue::Text(v.to_string())
	}
}

impl From<String> for RawValue {
	fn from(v: String) -> Self {
		RawValue::Text(v)
	}
}

impl From<DateTime<Utc>> for RawValue {
	fn from(v: DateTime<Utc>) -> Self {
		RawValue::Date(v)
	}
}

/// Build raw parameters from a JSON object, dropping `null` entries.
pub fn raw_parameters_from_json(map: serde_json::Map<String, serde_json::Value>) -> RawParameters {
	map
		.into_iter()
		.filter_map(|(k, v)| RawValue::from_json(v).map(|v| (k, v)))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;
	use serde_json::json;

	#[test]
	fn test_from_json_shapes() {
		assert_eq!(RawValue::from_json(json!(7)), Some(RawValue::Integer(7)));
		assert_eq!(RawValue::from_json(json!(2.5)), Some(RawValue::Float(2.5)));
		assert_eq!(
			RawValue::from_json(json!("full")),
			Some(RawValue::Text("full".to_string()))
		);
		assert_eq!(RawValue::from_json(json!(true)), Some(RawValue::Bool(true)));
		assert_eq!(RawValue::from_json(json!(null)), None);
		assert_eq!(
			RawValue::from_json(json!([1, 2])),
			Some(RawValue::Text("[1,2]".to_string()))
		);
	}

	#[test]
	fn test_large_unsigned_becomes_float() {
		let value = RawValue::from_json(json!(u64::MAX)).unwrap();
		assert_eq!(value.kind(), "float");
	}

	#[test]
	fn test_raw_parameters_from_json_drops_nulls() {
		let body = json!({ "datasetId": 7, "mode": null, "label": "x" });
		let params = raw_parameters_from_json(body.as_object().unwrap().clone());

		assert_eq!(params.len(), 2);
		assert_eq!(params.get("datasetId"), Some(&RawValue::Integer(7)));
		assert!(!params.contains_key("mode"));
	}

	#[test]
	fn test_display() {
		let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
		assert_eq!(RawValue::from(date).to_string(), "2024-03-01T12:30:00Z");
		assert_eq!(RawValue::from(1.5).to_string(), "1.5");
		assert_eq!(RawValue::from(false).to_string(), "false");
	}
}
