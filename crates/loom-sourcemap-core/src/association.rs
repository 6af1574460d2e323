// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Associations between a source upload and a sourcemap upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validate::ValidationReport;
use crate::{AssociationId, ProjectId};

/// Binds one source version to one sourcemap version under a version label.
///
/// At most one association per project is active at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
	pub id: AssociationId,
	pub project_id: ProjectId,
	/// Externally visible version label
	pub version: String,
	/// Version of the `source` upload
	pub source_version_ref: String,
	/// Version of the `sourcemap` upload
	pub sourcemap_version_ref: String,
	pub is_active: bool,
	/// Consistency report computed at registration
	pub validation: ValidationReport,
	pub created_at: DateTime<Utc>,
}

impl Association {
	pub fn new(
		project_id: ProjectId,
		version: impl Into<String>,
		source_version_ref: impl Into<String>,
		sourcemap_version_ref: impl Into<String>,
		validation: ValidationReport,
	) -> Self {
		Self {
			id: AssociationId::new(),
			project_id,
			version: version.into(),
			source_version_ref: source_version_ref.into(),
			sourcemap_version_ref: sourcemap_version_ref.into(),
			is_active: false,
			validation,
			created_at: Utc::now(),
		}
	}
}
