// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resolution results returned to callers: resolved locations and AI context.

use serde::{Deserialize, Serialize};

use crate::AssociationId;

/// Code around the resolved line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextLines {
	pub pre: Vec<String>,
	pub target: String,
	pub post: Vec<String>,
}

impl ContextLines {
	pub fn is_empty(&self) -> bool {
		self.pre.is_empty() && self.target.is_empty() && self.post.is_empty()
	}
}

/// Why a resolution is less than exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum DegradationReason {
	/// No sourcemap matched the frame's file; the built location is returned.
	NoSourcemap,
	/// A sourcemap matched but could not produce a mapping.
	MappingFailed(String),
	/// Mapped, but the original file is in neither the source upload nor `sourcesContent`.
	SourceUnavailable,
}

/// Whether a location was resolved exactly or with degradation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reasons", rename_all = "snake_case")]
pub enum ResolutionStatus {
	Exact,
	Degraded(Vec<DegradationReason>),
}

impl ResolutionStatus {
	pub fn is_degraded(&self) -> bool {
		matches!(self, Self::Degraded(_))
	}
}

/// Original source location computed for one frame. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
	pub original_file: String,
	/// 1-indexed
	pub original_line: u32,
	pub original_column: Option<u32>,
	pub function_name: Option<String>,
	pub context_lines: ContextLines,
	pub status: ResolutionStatus,
	/// Association consulted, absent only when none was involved
	pub association_id: Option<AssociationId>,
	/// Sourcemap file consulted, if one matched
	pub sourcemap_path: Option<String>,
}

impl ResolvedLocation {
	pub fn is_degraded(&self) -> bool {
		self.status.is_degraded()
	}

	pub fn degradation_reasons(&self) -> &[DegradationReason] {
		match &self.status {
			ResolutionStatus::Exact => &[],
			ResolutionStatus::Degraded(reasons) => reasons,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
	Primary,
	Related,
}

/// One file handed to the downstream prompt builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiContextFile {
	pub path: String,
	pub role: FileRole,
	pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
	NotFound,
	Duplicate,
	Limit,
	NotUtf8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
	pub path: String,
	pub reason: SkipReason,
}

/// Context assembled for AI diagnosis of one error.
///
/// `files` order is part of the contract: primary first, then related files
/// in request order. Prompts built from the same input are reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiContext {
	pub location: ResolvedLocation,
	pub files: Vec<AiContextFile>,
	pub skipped: Vec<SkippedFile>,
	/// The related list exceeded the configured maximum
	pub truncated: bool,
}

impl AiContext {
	pub fn primary(&self) -> Option<&AiContextFile> {
		self.files.iter().find(|f| f.role == FileRole::Primary)
	}

	pub fn related(&self) -> impl Iterator<Item = &AiContextFile> {
		self.files.iter().filter(|f| f.role == FileRole::Related)
	}
}
