// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Assembly of error context for AI-assisted analysis.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use loom_sourcemap_core::path::normalize_archive_path;
use loom_sourcemap_core::{
	AiContext, AiContextFile, FileRole, Frame, ProjectId, SkipReason, SkippedFile,
};

use crate::archive::{ArchiveStore, VersionKey};
use crate::error::{Result, SourcemapServerError};
use crate::resolver::LocationResolver;

pub struct AiContextBuilder {
	store: Arc<dyn ArchiveStore>,
	resolver: Arc<LocationResolver>,
	max_related_files: usize,
}

impl AiContextBuilder {
	pub fn new(
		store: Arc<dyn ArchiveStore>,
		resolver: Arc<LocationResolver>,
		max_related_files: usize,
	) -> Self {
		Self {
			store,
			resolver,
			max_related_files,
		}
	}

	/// Resolve `frame` and collect the primary file plus requested related files.
	///
	/// The primary file comes first when its content is available, followed
	/// by related files in request order. Paths that cannot be included are
	/// listed in `skipped` with the reason.
	#[instrument(skip(self, frame, related_paths), fields(project_id = %project_id, related = related_paths.len()))]
	pub async fn prepare(
		&self,
		project_id: &ProjectId,
		version: Option<&str>,
		frame: &Frame,
		related_paths: &[String],
		context_lines: Option<usize>,
	) -> Result<AiContext> {
		let resolution = self
			.resolver
			.resolve_detailed(project_id, version, frame, context_lines)
			.await?;
		let source_key = VersionKey::source(project_id, &resolution.association.source_version_ref);

		let mut files = Vec::new();
		let mut skipped = Vec::new();
		let mut seen = HashSet::new();
		let mut truncated = false;

		if let Some(content) = resolution.source_content {
			let path = resolution.location.original_file.clone();
			seen.insert(path.clone());
			files.push(AiContextFile {
				path,
				role: FileRole::Primary,
				content,
			});
		}

		let mut included = 0usize;
		for raw in related_paths {
			let skip = |reason| SkippedFile {
				path: raw.clone(),
				reason,
			};

			let Some(path) = normalize_archive_path(raw.trim()) else {
				skipped.push(skip(SkipReason::NotFound));
				continue;
			};
			if !seen.insert(path.clone()) {
				skipped.push(skip(SkipReason::Duplicate));
				continue;
			}
			if included >= self.max_related_files {
				truncated = true;
				skipped.push(skip(SkipReason::Limit));
				continue;
			}

			match self.store.read_file(&source_key, &path).await {
				Ok(bytes) => match String::from_utf8(bytes.to_vec()) {
					Ok(content) => {
						included += 1;
						files.push(AiContextFile {
							path,
							role: FileRole::Related,
							content,
						});
					}
					Err(_) => skipped.push(skip(SkipReason::NotUtf8)),
				},
				Err(SourcemapServerError::NotFound(_)) => skipped.push(skip(SkipReason::NotFound)),
				Err(e) => return Err(e),
			}
		}

		debug!(
			files = files.len(),
			skipped = skipped.len(),
			truncated,
			"AI context prepared"
		);
		Ok(AiContext {
			location: resolution.location,
			files,
			skipped,
			truncated,
		})
	}
}
