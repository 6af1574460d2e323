// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Structural validation of sourcemap v3 documents.
//!
//! [`check_sourcemap`] is the only way to obtain a [`RawSourceMap`]; callers
//! never touch fields of an unchecked document.

use serde_json::{Map, Value};
use thiserror::Error;

/// A sourcemap that passed the v3 field checks. Mappings are still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSourceMap {
	pub file: Option<String>,
	pub source_root: Option<String>,
	/// `null` entries are kept so indices stay aligned
	pub sources: Vec<Option<String>>,
	pub sources_content: Vec<Option<String>>,
	pub names: Vec<String>,
	pub mappings: String,
}

/// Why a document is not a usable sourcemap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
	#[error("invalid JSON: {0}")]
	InvalidJson(String),

	#[error("top-level value is not an object")]
	NotAnObject,

	#[error("missing required field `{0}`")]
	MissingField(&'static str),

	#[error("field `{field}` must be {expected}")]
	WrongType {
		field: &'static str,
		expected: &'static str,
	},

	#[error("unsupported version {0}, expected 3")]
	UnsupportedVersion(String),
}

/// Check required and optional fields of a v3 sourcemap.
///
/// `version` must be the literal number 3, `mappings` a string, `sources` an
/// array of strings or nulls; `names` (array of strings), `file` and
/// `sourceRoot` (strings) and `sourcesContent` (array of strings or nulls)
/// are optional.
pub fn check_sourcemap(data: &[u8]) -> Result<RawSourceMap, SchemaViolation> {
	let value: Value =
		serde_json::from_slice(data).map_err(|e| SchemaViolation::InvalidJson(e.to_string()))?;
	let obj = value.as_object().ok_or(SchemaViolation::NotAnObject)?;

	match obj.get("version") {
		None => return Err(SchemaViolation::MissingField("version")),
		Some(v) if v.as_u64() == Some(3) => {}
		Some(v) => return Err(SchemaViolation::UnsupportedVersion(v.to_string())),
	}

	let mappings = match obj.get("mappings") {
		None => return Err(SchemaViolation::MissingField("mappings")),
		Some(Value::String(s)) => s.clone(),
		Some(_) => {
			return Err(SchemaViolation::WrongType {
				field: "mappings",
				expected: "a string",
			})
		}
	};

	let sources = match obj.get("sources") {
		None => return Err(SchemaViolation::MissingField("sources")),
		Some(v) => nullable_string_array(v, "sources")?,
	};

	let names = match obj.get("names") {
		None => Vec::new(),
		Some(v) => string_array(v, "names")?,
	};

	let file = optional_string(obj, "file")?;
	let source_root = optional_string(obj, "sourceRoot")?;

	let sources_content = match obj.get("sourcesContent") {
		None | Some(Value::Null) => Vec::new(),
		Some(v) => nullable_string_array(v, "sourcesContent")?,
	};

	Ok(RawSourceMap {
		file,
		source_root,
		sources,
		sources_content,
		names,
		mappings,
	})
}

fn string_array(value: &Value, field: &'static str) -> Result<Vec<String>, SchemaViolation> {
	let wrong = || SchemaViolation::WrongType {
		field,
		expected: "an array of strings",
	};
	value
		.as_array()
		.ok_or_else(wrong)?
		.iter()
		.map(|item| item.as_str().map(str::to_string).ok_or_else(wrong))
		.collect()
}

fn nullable_string_array(
	value: &Value,
	field: &'static str,
) -> Result<Vec<Option<String>>, SchemaViolation> {
	let wrong = || SchemaViolation::WrongType {
		field,
		expected: "an array of strings or nulls",
	};
	value
		.as_array()
		.ok_or_else(wrong)?
		.iter()
		.map(|item| match item {
			Value::String(s) => Ok(Some(s.clone())),
			Value::Null => Ok(None),
			_ => Err(wrong()),
		})
		.collect()
}

fn optional_string(
	obj: &Map<String, Value>,
	field: &'static str,
) -> Result<Option<String>, SchemaViolation> {
	match obj.get(field) {
		None | Some(Value::Null) => Ok(None),
		Some(Value::String(s)) => Ok(Some(s.clone())),
		Some(_) => Err(SchemaViolation::WrongType {
			field,
			expected: "a string",
		}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_minimal_valid() {
		let raw = check_sourcemap(br#"{"version":3,"sources":["a.ts"],"mappings":"AAAA"}"#).unwrap();
		assert_eq!(raw.sources, vec![Some("a.ts".to_string())]);
		assert!(raw.names.is_empty());
		assert_eq!(raw.file, None);
	}

	#[test]
	fn test_full_document() {
		let raw = check_sourcemap(
			br#"{"version":3,"file":"a.js","sourceRoot":"src/","sources":["a.ts"],
			"sourcesContent":["let x;",null],"names":["x"],"mappings":";;AAAA"}"#,
		)
		.unwrap();
		assert_eq!(raw.file.as_deref(), Some("a.js"));
		assert_eq!(raw.source_root.as_deref(), Some("src/"));
		assert_eq!(raw.sources_content, vec![Some("let x;".to_string()), None]);
		assert_eq!(raw.names, vec!["x"]);
	}

	#[test]
	fn test_version_must_be_literal_three() {
		assert_eq!(
			check_sourcemap(br#"{"version":2,"sources":[],"mappings":""}"#),
			Err(SchemaViolation::UnsupportedVersion("2".to_string()))
		);
		assert_eq!(
			check_sourcemap(br#"{"version":"3","sources":[],"mappings":""}"#),
			Err(SchemaViolation::UnsupportedVersion("\"3\"".to_string()))
		);
		assert_eq!(
			check_sourcemap(br#"{"sources":[],"mappings":""}"#),
			Err(SchemaViolation::MissingField("version"))
		);
	}

	#[test]
	fn test_field_types() {
		assert!(matches!(
			check_sourcemap(br#"{"version":3,"sources":"a.ts","mappings":""}"#),
			Err(SchemaViolation::WrongType { field: "sources", .. })
		));
		assert!(matches!(
			check_sourcemap(br#"{"version":3,"sources":[],"mappings":5}"#),
			Err(SchemaViolation::WrongType { field: "mappings", .. })
		));
		assert!(matches!(
			check_sourcemap(br#"{"version":3,"sources":[],"mappings":"","names":[1]}"#),
			Err(SchemaViolation::WrongType { field: "names", .. })
		));
		assert!(matches!(
			check_sourcemap(br#"{"version":3,"sources":[],"mappings":"","file":7}"#),
			Err(SchemaViolation::WrongType { field: "file", .. })
		));
		assert_eq!(
			check_sourcemap(br#"{"version":3,"sources":[]}"#),
			Err(SchemaViolation::MissingField("mappings"))
		);
	}

	#[test]
	fn test_null_sources_accepted() {
		let raw = check_sourcemap(br#"{"version":3,"sources":["a.ts",null],"mappings":"AAAA"}"#).unwrap();
		assert_eq!(raw.sources, vec![Some("a.ts".to_string()), None]);
		assert!(matches!(
			check_sourcemap(br#"{"version":3,"sources":["a.ts",4],"mappings":""}"#),
			Err(SchemaViolation::WrongType { field: "sources", .. })
		));
	}

	#[test]
	fn test_not_json() {
		assert!(matches!(
			check_sourcemap(b"not json"),
			Err(SchemaViolation::InvalidJson(_))
		));
		assert_eq!(check_sourcemap(b"[]"), Err(SchemaViolation::NotAnObject));
	}
}
