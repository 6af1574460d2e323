// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Uploaded archive types: project versions and the files inside them.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SourcemapError;
use crate::path;
use crate::ProjectId;

/// Which half of an upload pair an archive holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
	/// Original (pre-build) source code
	Source,
	/// `.map` files produced by the build
	Sourcemap,
}

impl fmt::Display for ArtifactKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Source => write!(f, "source"),
			Self::Sourcemap => write!(f, "sourcemap"),
		}
	}
}

impl FromStr for ArtifactKind {
	type Err = SourcemapError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"source" => Ok(Self::Source),
			"sourcemap" => Ok(Self::Sourcemap),
			_ => Err(SourcemapError::InvalidArtifactKind(s.to_string())),
		}
	}
}

/// One published archive upload for a project.
///
/// Immutable once published; only deletion changes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectVersion {
	pub project_id: ProjectId,
	/// Free-form label, e.g. a semantic version or build id
	pub version: String,
	pub kind: ArtifactKind,
	pub uploaded_at: DateTime<Utc>,
	pub file_count: usize,
	pub total_bytes: u64,
}

/// A file from a source-kind upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
	/// Normalized relative path, unique within its version
	pub path: String,
	pub size: u64,
	/// `//# sourceMappingURL=` target resolved against the file's directory
	pub source_mapping_url: Option<String>,
}

impl SourceFile {
	pub fn new(path: impl Into<String>, size: u64) -> Self {
		Self {
			path: path.into(),
			size,
			source_mapping_url: None,
		}
	}

	/// Build from file content, picking up a trailing `sourceMappingURL` comment
	/// when the file is a script.
	pub fn from_content(path: impl Into<String>, content: &[u8]) -> Self {
		let path = path.into();
		let source_mapping_url = if path::is_script_path(&path) {
			extract_source_mapping_url(content)
				.map(|url| path::join_relative(path::dirname(&path), &url))
		} else {
			None
		};
		Self {
			size: content.len() as u64,
			path,
			source_mapping_url,
		}
	}

	pub fn is_script(&self) -> bool {
		path::is_script_path(&self.path)
	}
}

/// A file from a sourcemap-kind upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcemapFile {
	pub path: String,
	/// Shared with the archive store, never copied
	pub content: Bytes,
}

impl SourcemapFile {
	pub fn new(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
		Self {
			path: path.into(),
			content: content.into(),
		}
	}

	/// Path of the bundle this map belongs to (`js/app.js.map` → `js/app.js`).
	pub fn target_file_hint(&self) -> &str {
		self.path.strip_suffix(".map").unwrap_or(&self.path)
	}
}

/// Last `//# sourceMappingURL=` (or legacy `//@`) in a script, ignoring inline `data:` maps.
pub fn extract_source_mapping_url(content: &[u8]) -> Option<String> {
	// The comment is conventionally the final line; only the tail is scanned.
	const TAIL_BYTES: usize = 4096;
	let start = content.len().saturating_sub(TAIL_BYTES);
	let tail = String::from_utf8_lossy(&content[start..]);

	tail.lines().rev().find_map(|line| {
		let line = line.trim();
		let rest = line
			.strip_prefix("//# sourceMappingURL=")
			.or_else(|| line.strip_prefix("//@ sourceMappingURL="))?;
		let url = rest.trim();
		if url.is_empty() || url.starts_with("data:") {
			None
		} else {
			Some(url.to_string())
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_target_file_hint() {
		assert_eq!(SourcemapFile::new("js/app.js.map", "").target_file_hint(), "js/app.js");
		assert_eq!(SourcemapFile::new("app.map", "").target_file_hint(), "app");
		assert_eq!(SourcemapFile::new("weird", "").target_file_hint(), "weird");
	}

	#[test]
	fn test_source_mapping_url_extraction() {
		let js = b"console.log(1);\n//# sourceMappingURL=app.js.map\n";
		assert_eq!(extract_source_mapping_url(js).as_deref(), Some("app.js.map"));

		let legacy = b"x();\n//@ sourceMappingURL=../maps/x.js.map";
		assert_eq!(extract_source_mapping_url(legacy).as_deref(), Some("../maps/x.js.map"));

		let inline = b"x();\n//# sourceMappingURL=data:application/json;base64,e30=";
		assert_eq!(extract_source_mapping_url(inline), None);

		assert_eq!(extract_source_mapping_url(b"no comment here"), None);
	}

	#[test]
	fn test_source_file_from_content_resolves_url() {
		let file = SourceFile::from_content(
			"dist/js/app.js",
			b"a();\n//# sourceMappingURL=../maps/app.js.map\n",
		);
		assert_eq!(file.source_mapping_url.as_deref(), Some("dist/maps/app.js.map"));
		assert!(file.is_script());

		let css = SourceFile::from_content("dist/app.css", b"/*# sourceMappingURL=app.css.map */");
		assert_eq!(css.source_mapping_url, None);
	}

	proptest! {
		#[test]
		fn artifact_kind_roundtrip(kind in prop_oneof![
			Just(ArtifactKind::Source),
			Just(ArtifactKind::Sourcemap),
		]) {
			let s = kind.to_string();
			let parsed: ArtifactKind = s.parse().unwrap();
			prop_assert_eq!(kind, parsed);
		}
	}
}
