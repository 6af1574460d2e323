// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sourcemap service: the operations exposed to transports.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use loom_sourcemap_core::{
	parse_stack, AiContext, ArtifactKind, Association, AssociationId, Frame, Issue, ProjectId,
	ProjectVersion, ResolvedLocation, ValidationSummary,
};

use crate::ai_context::AiContextBuilder;
use crate::archive::{ArchiveStore, InMemoryArchiveStore, VersionKey};
use crate::cache::{CacheStats, SourceMapCache};
use crate::config::SourcemapConfig;
use crate::error::{Result, SourcemapServerError};
use crate::locks::KeyedLocks;
use crate::registry::VersionRegistry;
use crate::repository::{AssociationRepository, SqliteAssociationRepository};
use crate::resolver::LocationResolver;

/// Source and sourcemap archives uploaded together under one version label.
#[derive(Debug, Clone)]
pub struct UploadPairRequest {
	pub version: String,
	pub source_archive: Bytes,
	pub sourcemap_archive: Bytes,
	pub set_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadOutcome {
	pub association_id: AssociationId,
	pub version: String,
	pub is_active: bool,
	pub is_valid: bool,
	pub summary: ValidationSummary,
	pub issues: Vec<Issue>,
}

/// Association as listed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociationView {
	pub id: AssociationId,
	pub version: String,
	pub source_version_ref: String,
	pub sourcemap_version_ref: String,
	pub is_active: bool,
	pub is_valid: bool,
	pub summary: ValidationSummary,
	pub created_at: DateTime<Utc>,
}

impl From<&Association> for AssociationView {
	fn from(a: &Association) -> Self {
		Self {
			id: a.id,
			version: a.version.clone(),
			source_version_ref: a.source_version_ref.clone(),
			sourcemap_version_ref: a.sourcemap_version_ref.clone(),
			is_active: a.is_active,
			is_valid: a.validation.is_valid,
			summary: a.validation.summary.clone(),
			created_at: a.created_at,
		}
	}
}

/// An error location reported by a client.
///
/// When `file_name` is empty the top frame of `error_message` is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocateRequest {
	#[serde(default)]
	pub version: Option<String>,
	#[serde(default)]
	pub file_name: String,
	#[serde(default)]
	pub line: u32,
	#[serde(default)]
	pub column: Option<u32>,
	#[serde(default)]
	pub error_message: Option<String>,
	#[serde(default)]
	pub context_lines: Option<usize>,
}

impl LocateRequest {
	pub fn at(file_name: impl Into<String>, line: u32, column: Option<u32>) -> Self {
		Self {
			file_name: file_name.into(),
			line,
			column,
			..Default::default()
		}
	}

	/// The frame to resolve, or `LocationUnavailable`.
	pub fn frame(&self) -> Result<Frame> {
		let top = self
			.error_message
			.as_deref()
			.and_then(|message| parse_stack(message).into_iter().next());

		let file_name = self.file_name.trim();
		if file_name.is_empty() || self.line == 0 {
			return top.ok_or(SourcemapServerError::LocationUnavailable);
		}

		let mut frame = Frame::new(file_name, self.line, self.column.unwrap_or(0));
		if let Some(top) = top {
			if top.line == self.line && top.file_path() == frame.file_path() {
				frame.function_name = top.function_name;
				if self.column.is_none() {
					frame.column = top.column;
				}
			}
		}
		Ok(frame)
	}
}

/// Request for AI context around an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiContextRequest {
	#[serde(flatten)]
	pub location: LocateRequest,
	#[serde(default)]
	pub related_files: Vec<String>,
}

pub struct SourcemapService {
	config: SourcemapConfig,
	store: Arc<dyn ArchiveStore>,
	registry: Arc<VersionRegistry>,
	resolver: Arc<LocationResolver>,
	ai_context: AiContextBuilder,
	cache: Arc<SourceMapCache>,
	upload_locks: KeyedLocks<VersionKey>,
}

impl SourcemapService {
	/// Build a service with an in-process archive store and the configured database.
	pub async fn connect(config: SourcemapConfig) -> Result<Self> {
		config.validate()?;
		let store = Arc::new(InMemoryArchiveStore::new(config.archive_limits()));
		let repo = Arc::new(SqliteAssociationRepository::connect(&config.database_url).await?);
		Ok(Self::new(config, store, repo))
	}

	pub fn new(
		config: SourcemapConfig,
		store: Arc<dyn ArchiveStore>,
		repo: Arc<dyn AssociationRepository>,
	) -> Self {
		let cache = Arc::new(SourceMapCache::new(config.cache_capacity));
		let registry = Arc::new(VersionRegistry::new(store.clone(), repo, cache.clone()));
		let resolver = Arc::new(LocationResolver::new(
			store.clone(),
			registry.clone(),
			cache.clone(),
			config.default_context_lines,
		));
		let ai_context = AiContextBuilder::new(store.clone(), resolver.clone(), config.max_related_files);

		Self {
			config,
			store,
			registry,
			resolver,
			ai_context,
			cache,
			upload_locks: KeyedLocks::new(),
		}
	}

	pub fn config(&self) -> &SourcemapConfig {
		&self.config
	}

	pub fn registry(&self) -> &VersionRegistry {
		&self.registry
	}

	pub fn resolver(&self) -> &LocationResolver {
		&self.resolver
	}

	pub fn cache_stats(&self) -> CacheStats {
		self.cache.stats()
	}

	/// Store one archive without creating an association.
	#[instrument(skip(self, archive), fields(project_id = %project_id, kind = %kind))]
	pub async fn upload_archive(
		&self,
		project_id: &ProjectId,
		version: &str,
		kind: ArtifactKind,
		archive: Bytes,
	) -> Result<ProjectVersion> {
		self.put(&VersionKey::new(project_id, version, kind), archive)
			.await
	}

	async fn put(&self, key: &VersionKey, archive: Bytes) -> Result<ProjectVersion> {
		let _guard = self.upload_locks.lock(key).await;
		self.store.put(key, archive).await
	}

	async fn discard(&self, key: &VersionKey) {
		if let Err(e) = self.store.delete(key).await {
			warn!(key = %key, error = %e, "failed to discard partial upload");
		}
	}

	/// Upload both halves and register them as one association.
	///
	/// All-or-nothing: when either archive or the registration fails, the
	/// uploads made by this call are removed again.
	#[instrument(skip(self, request), fields(project_id = %project_id, version = %request.version, set_active = request.set_active))]
	pub async fn upload_pair(
		&self,
		project_id: &ProjectId,
		request: UploadPairRequest,
	) -> Result<UploadOutcome> {
		let source_key = VersionKey::source(project_id, &request.version);
		let sourcemap_key = VersionKey::sourcemap(project_id, &request.version);

		let (source, sourcemap) = tokio::join!(
			self.put(&source_key, request.source_archive),
			self.put(&sourcemap_key, request.sourcemap_archive),
		);
		match (source, sourcemap) {
			(Ok(_), Ok(_)) => {}
			(Ok(_), Err(e)) => {
				self.discard(&source_key).await;
				return Err(e);
			}
			(Err(e), Ok(_)) => {
				self.discard(&sourcemap_key).await;
				return Err(e);
			}
			(Err(e), Err(_)) => return Err(e),
		}

		let registered = if request.set_active {
			self.registry
				.register_active(project_id, &request.version, &request.version, &request.version)
				.await
		} else {
			self.registry
				.register(project_id, &request.version, &request.version, &request.version)
				.await
		};
		let association = match registered {
			Ok(association) => association,
			Err(e) => {
				self.discard(&source_key).await;
				self.discard(&sourcemap_key).await;
				return Err(e);
			}
		};

		info!(
			association_id = %association.id,
			coverage = association.validation.summary.coverage_percent,
			"upload pair registered"
		);
		Ok(UploadOutcome {
			association_id: association.id,
			version: association.version,
			is_active: association.is_active,
			is_valid: association.validation.is_valid,
			summary: association.validation.summary,
			issues: association.validation.issues,
		})
	}

	/// Associations of a project, oldest first, optionally for one version label.
	pub async fn get_associations(
		&self,
		project_id: &ProjectId,
		version: Option<&str>,
	) -> Result<Vec<AssociationView>> {
		Ok(self
			.registry
			.list_associations(project_id, version)
			.await?
			.iter()
			.map(AssociationView::from)
			.collect())
	}

	/// Full association including its validation issues.
	pub async fn get_association(&self, project_id: &ProjectId, id: AssociationId) -> Result<Association> {
		self.registry.get_association(project_id, id).await
	}

	#[instrument(skip(self, request), fields(project_id = %project_id, file = %request.file_name, line = request.line))]
	pub async fn locate_by_error(
		&self,
		project_id: &ProjectId,
		request: &LocateRequest,
	) -> Result<ResolvedLocation> {
		let frame = request.frame()?;
		if request.column.is_none() {
			info!(column = frame.column, "error column not supplied");
		}
		let location = self
			.resolver
			.resolve(project_id, request.version.as_deref(), &frame, request.context_lines)
			.await?;
		if location.is_degraded() {
			debug!(reasons = ?location.degradation_reasons(), "error location resolved with degradation");
		}
		Ok(location)
	}

	#[instrument(skip(self, request), fields(project_id = %project_id, related = request.related_files.len()))]
	pub async fn prepare_ai_context(
		&self,
		project_id: &ProjectId,
		request: &AiContextRequest,
	) -> Result<AiContext> {
		let frame = request.location.frame()?;
		self.ai_context
			.prepare(
				project_id,
				request.location.version.as_deref(),
				&frame,
				&request.related_files,
				request.location.context_lines,
			)
			.await
	}

	pub async fn set_active(&self, project_id: &ProjectId, id: AssociationId) -> Result<()> {
		self.registry.set_active(project_id, id).await.map(|_| ())
	}

	pub async fn delete(&self, project_id: &ProjectId, id: AssociationId) -> Result<()> {
		self.registry.delete(project_id, id).await.map(|_| ())
	}
}
