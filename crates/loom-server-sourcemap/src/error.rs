// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for sourcemap server operations.

use loom_sourcemap_core::SourcemapError;
use thiserror::Error;

use crate::config::ConfigError;

/// Hard failures of sourcemap server operations.
///
/// Degraded resolutions are not errors; they are reported through
/// [`loom_sourcemap_core::ResolutionStatus`].
#[derive(Debug, Error)]
pub enum SourcemapServerError {
	#[error("invalid archive: {0}")]
	InvalidArchive(String),

	#[error("{subject} is too large: {size} exceeds limit of {max}")]
	ArchiveTooLarge { subject: String, size: u64, max: u64 },

	#[error("not found: {0}")]
	NotFound(String),

	#[error("no active version for project {0}")]
	NoActiveVersion(String),

	#[error("no usable error location in request")]
	LocationUnavailable,

	#[error("operation timed out: {0}")]
	Timeout(String),

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("invalid UUID: {0}")]
	InvalidUuid(#[from] uuid::Error),

	#[error("invalid datetime: {0}")]
	InvalidDateTime(String),

	#[error(transparent)]
	Core(#[from] SourcemapError),

	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("internal error: {0}")]
	Internal(String),
}

impl SourcemapServerError {
	/// Stable machine-readable code for transports.
	pub fn error_code(&self) -> &'static str {
		match self {
			Self::InvalidArchive(_) => "invalid_archive",
			Self::ArchiveTooLarge { .. } => "archive_too_large",
			Self::NotFound(_) => "not_found",
			Self::NoActiveVersion(_) => "no_active_version",
			Self::LocationUnavailable => "location_unavailable",
			Self::Timeout(_) => "timeout",
			Self::Conflict(_) => "conflict",
			Self::Database(_) => "database_error",
			Self::Serialization(_) => "serialization_error",
			Self::InvalidUuid(_) | Self::InvalidDateTime(_) | Self::Core(_) => {
				"invalid_input"
			}
			Self::Config(_) => "config_error",
			Self::Internal(_) => "internal_error",
		}
	}

	/// Whether the caller can fix the failure by changing the request.
	pub fn is_client_error(&self) -> bool {
		!matches!(
			self,
			Self::Database(_) | Self::Serialization(_) | Self::Config(_) | Self::Internal(_)
		)
	}
}

/// Result type for sourcemap server operations.
pub type Result<T> = std::result::Result<T, SourcemapServerError>;
