// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for Loom sourcemap resolution.
//!
//! This crate holds everything that does not touch storage:
//! - Project/version/association data model shared by server and CLI
//! - Stack frame parsing across browser engine formats
//! - Sourcemap v3 schema checking
//! - Consistency validation between a source file set and a sourcemap set
//!
//! Everything here is pure so it can be unit tested with synthetic fixtures.

pub mod artifact;
pub mod association;
pub mod error;
pub mod frame;
pub mod location;
pub mod path;
pub mod schema;
pub mod validate;

pub use artifact::{ArtifactKind, ProjectVersion, SourceFile, SourcemapFile};
pub use association::Association;
pub use error::{Result, SourcemapError};
pub use frame::{parse_all, parse_stack, Frame};
pub use location::{
	AiContext, AiContextFile, ContextLines, DegradationReason, FileRole, ResolutionStatus,
	ResolvedLocation, SkipReason, SkippedFile,
};
pub use schema::{check_sourcemap, RawSourceMap, SchemaViolation};
pub use validate::{
	find_sourcemap, validate, Issue, IssueType, MatchRule, Severity, ValidationReport,
	ValidationSummary,
};

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Project identifier as supplied by the caller (e.g. `"p1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
	pub fn new(id: impl Into<String>) -> Result<Self> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(SourcemapError::InvalidProjectId(id));
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ProjectId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ProjectId {
	type Err = SourcemapError;

	fn from_str(s: &str) -> Result<Self> {
		Self::new(s)
	}
}

/// Unique identifier for an association between a source and a sourcemap upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct AssociationId(pub Uuid);

impl AssociationId {
	pub fn new() -> Self {
		Self(Uuid::now_v7())
	}
}

impl Default for AssociationId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for AssociationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for AssociationId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn project_id_rejects_blank() {
		assert!(ProjectId::new("").is_err());
		assert!(ProjectId::new("   ").is_err());
		assert_eq!(ProjectId::new("p1").unwrap().as_str(), "p1");
	}

	proptest! {
		#[test]
		fn association_id_roundtrip(uuid_bytes in any::<[u8; 16]>()) {
			let uuid = Uuid::from_bytes(uuid_bytes);
			let id = AssociationId(uuid);
			let s = id.to_string();
			let parsed: AssociationId = s.parse().unwrap();
			prop_assert_eq!(id, parsed);
		}

		#[test]
		fn project_id_roundtrip(s in "[a-z0-9][a-z0-9_-]{0,20}") {
			let id = ProjectId::new(s.clone()).unwrap();
			let parsed: ProjectId = id.to_string().parse().unwrap();
			prop_assert_eq!(id, parsed);
		}
	}
}
