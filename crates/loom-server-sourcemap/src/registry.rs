// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Version registry: associations between uploads and the active version.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use loom_sourcemap_core::{
	validate, ArtifactKind, Association, AssociationId, ProjectId, Severity,
};

use crate::archive::{ArchiveStore, VersionKey};
use crate::cache::SourceMapCache;
use crate::error::{Result, SourcemapServerError};
use crate::locks::KeyedLocks;
use crate::repository::AssociationRepository;

pub struct VersionRegistry {
	store: Arc<dyn ArchiveStore>,
	repo: Arc<dyn AssociationRepository>,
	cache: Arc<SourceMapCache>,
	locks: KeyedLocks<ProjectId>,
}

impl VersionRegistry {
	pub fn new(
		store: Arc<dyn ArchiveStore>,
		repo: Arc<dyn AssociationRepository>,
		cache: Arc<SourceMapCache>,
	) -> Self {
		Self {
			store,
			repo,
			cache,
			locks: KeyedLocks::new(),
		}
	}

	/// Associate a source upload with a sourcemap upload under `version`.
	///
	/// Both uploads must exist. The consistency report is stored with the
	/// association; registration succeeds even when it contains errors.
	pub async fn register(
		&self,
		project_id: &ProjectId,
		version: &str,
		source_version_ref: &str,
		sourcemap_version_ref: &str,
	) -> Result<Association> {
		self.register_inner(project_id, version, source_version_ref, sourcemap_version_ref, false)
			.await
	}

	/// [`register`](Self::register), then make the association active in the
	/// same critical section.
	pub async fn register_active(
		&self,
		project_id: &ProjectId,
		version: &str,
		source_version_ref: &str,
		sourcemap_version_ref: &str,
	) -> Result<Association> {
		self.register_inner(project_id, version, source_version_ref, sourcemap_version_ref, true)
			.await
	}

	#[instrument(skip(self), fields(project_id = %project_id))]
	async fn register_inner(
		&self,
		project_id: &ProjectId,
		version: &str,
		source_version_ref: &str,
		sourcemap_version_ref: &str,
		activate: bool,
	) -> Result<Association> {
		let _guard = self.locks.lock(project_id).await;

		let source_key = VersionKey::source(project_id, source_version_ref);
		let sourcemap_key = VersionKey::sourcemap(project_id, sourcemap_version_ref);
		for key in [&source_key, &sourcemap_key] {
			if self.store.get_version(key).await?.is_none() {
				return Err(SourcemapServerError::NotFound(format!("version {key}")));
			}
		}

		let source_files: Vec<_> = self
			.store
			.list_files(&source_key)
			.await?
			.iter()
			.map(|f| f.to_source_file())
			.collect();
		let sourcemap_files: Vec<_> = self
			.store
			.list_files(&sourcemap_key)
			.await?
			.iter()
			.map(|f| f.to_sourcemap_file())
			.collect();

		let report = validate(&source_files, &sourcemap_files);
		if !report.is_valid {
			warn!(
				errors = report.count(Severity::Error),
				coverage = report.summary.coverage_percent,
				"association registered with validation errors"
			);
		}

		let mut association = Association::new(
			project_id.clone(),
			version,
			source_version_ref,
			sourcemap_version_ref,
			report,
		);
		self.repo.create_association(&association).await?;

		if activate {
			self.repo.set_active(project_id, association.id).await?;
			association.is_active = true;
		}

		info!(
			association_id = %association.id,
			is_valid = association.validation.is_valid,
			is_active = association.is_active,
			"association registered"
		);
		Ok(association)
	}

	/// Make one association the project's active version.
	#[instrument(skip(self), fields(project_id = %project_id, association_id = %id))]
	pub async fn set_active(&self, project_id: &ProjectId, id: AssociationId) -> Result<Association> {
		let _guard = self.locks.lock(project_id).await;

		if !self.repo.set_active(project_id, id).await? {
			return Err(SourcemapServerError::NotFound(format!("association {id}")));
		}
		let association = self
			.repo
			.get_association(project_id, id)
			.await?
			.ok_or_else(|| SourcemapServerError::NotFound(format!("association {id}")))?;

		info!(version = %association.version, "active version switched");
		Ok(association)
	}

	pub async fn list_associations(
		&self,
		project_id: &ProjectId,
		version: Option<&str>,
	) -> Result<Vec<Association>> {
		self.repo.list_associations(project_id, version).await
	}

	pub async fn get_association(&self, project_id: &ProjectId, id: AssociationId) -> Result<Association> {
		self.repo
			.get_association(project_id, id)
			.await?
			.ok_or_else(|| SourcemapServerError::NotFound(format!("association {id}")))
	}

	pub async fn get_active(&self, project_id: &ProjectId) -> Result<Option<Association>> {
		self.repo.get_active(project_id).await
	}

	/// Newest association registered under a version label.
	pub async fn get_by_version(&self, project_id: &ProjectId, version: &str) -> Result<Option<Association>> {
		Ok(self
			.repo
			.list_associations(project_id, Some(version))
			.await?
			.pop())
	}

	/// Remove an association and any upload no other association still uses.
	#[instrument(skip(self), fields(project_id = %project_id, association_id = %id))]
	pub async fn delete(&self, project_id: &ProjectId, id: AssociationId) -> Result<Association> {
		let _guard = self.locks.lock(project_id).await;

		let association = self
			.repo
			.get_association(project_id, id)
			.await?
			.ok_or_else(|| SourcemapServerError::NotFound(format!("association {id}")))?;
		self.repo.delete_association(project_id, id).await?;

		let uploads = [
			(ArtifactKind::Source, association.source_version_ref.as_str()),
			(ArtifactKind::Sourcemap, association.sourcemap_version_ref.as_str()),
		];
		for (kind, version) in uploads {
			if self.repo.count_references(project_id, kind, version).await? > 0 {
				debug!(%kind, version, "upload still referenced, keeping");
				continue;
			}
			self.store
				.delete(&VersionKey::new(project_id, version, kind))
				.await?;
			if kind == ArtifactKind::Sourcemap {
				let dropped = self.cache.invalidate_version(project_id, version);
				debug!(version, dropped, "invalidated cached sourcemaps");
			}
		}

		info!(
			version = %association.version,
			was_active = association.is_active,
			"association deleted"
		);
		Ok(association)
	}
}
