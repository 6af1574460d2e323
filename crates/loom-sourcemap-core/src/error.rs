// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for sourcemap core types.

use thiserror::Error;

/// Errors raised while parsing core wire values.
#[derive(Debug, Error)]
pub enum SourcemapError {
	#[error("invalid project id: {0:?}")]
	InvalidProjectId(String),

	#[error("invalid artifact kind: {0}")]
	InvalidArtifactKind(String),

	#[error("invalid issue type: {0}")]
	InvalidIssueType(String),

	#[error("invalid severity: {0}")]
	InvalidSeverity(String),
}

/// Result type for sourcemap core operations.
pub type Result<T> = std::result::Result<T, SourcemapError>;
