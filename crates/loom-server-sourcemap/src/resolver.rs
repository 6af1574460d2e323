// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resolution of built-code frames to original source locations.
//!
//! Hard failures (no association, storage errors) are returned as errors.
//! Anything that only limits the answer (no matching sourcemap, no mapping
//! for the position, original file unavailable) yields a location flagged
//! with [`ResolutionStatus::Degraded`].

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use loom_sourcemap_core::path::{basename, common_suffix_segments, normalize_archive_path, url_path};
use loom_sourcemap_core::{
	find_sourcemap, Association, ContextLines, DegradationReason, Frame, ProjectId,
	ResolutionStatus, ResolvedLocation, SourceFile, SourcemapFile,
};
use loom_sourcemap_symbolicate::{extract_context, find_enclosing_function, ParsedSourceMap};

use crate::archive::{ArchiveStore, StoredFile, VersionKey};
use crate::cache::{CacheKey, SourceMapCache};
use crate::error::{Result, SourcemapServerError};
use crate::registry::VersionRegistry;

/// A resolved location with the association and original file behind it.
#[derive(Debug, Clone)]
pub struct Resolution {
	pub location: ResolvedLocation,
	/// Snapshot of the association consulted
	pub association: Association,
	/// Path of the original file inside the source upload, when it was found there
	pub source_path: Option<String>,
	/// Full text of the original file from the upload or `sourcesContent`
	pub source_content: Option<String>,
}

pub struct LocationResolver {
	store: Arc<dyn ArchiveStore>,
	registry: Arc<VersionRegistry>,
	cache: Arc<SourceMapCache>,
	default_context_lines: usize,
}

impl LocationResolver {
	pub fn new(
		store: Arc<dyn ArchiveStore>,
		registry: Arc<VersionRegistry>,
		cache: Arc<SourceMapCache>,
		default_context_lines: usize,
	) -> Self {
		Self {
			store,
			registry,
			cache,
			default_context_lines,
		}
	}

	/// Association to resolve against: the named version, or the active one.
	pub async fn association_for(
		&self,
		project_id: &ProjectId,
		version: Option<&str>,
	) -> Result<Association> {
		match version {
			Some(version) => self
				.registry
				.get_by_version(project_id, version)
				.await?
				.ok_or_else(|| SourcemapServerError::NotFound(format!("version {version}"))),
			None => self
				.registry
				.get_active(project_id)
				.await?
				.ok_or_else(|| SourcemapServerError::NoActiveVersion(project_id.to_string())),
		}
	}

	pub async fn resolve(
		&self,
		project_id: &ProjectId,
		version: Option<&str>,
		frame: &Frame,
		context_lines: Option<usize>,
	) -> Result<ResolvedLocation> {
		Ok(self
			.resolve_detailed(project_id, version, frame, context_lines)
			.await?
			.location)
	}

	#[instrument(skip(self, frame), fields(project_id = %project_id, file = %frame.file, line = frame.line, column = frame.column))]
	pub async fn resolve_detailed(
		&self,
		project_id: &ProjectId,
		version: Option<&str>,
		frame: &Frame,
		context_lines: Option<usize>,
	) -> Result<Resolution> {
		let association = self.association_for(project_id, version).await?;
		let context_lines = context_lines.unwrap_or(self.default_context_lines);
		self.resolve_with(association, frame, context_lines).await
	}

	async fn resolve_with(
		&self,
		association: Association,
		frame: &Frame,
		context_lines: usize,
	) -> Result<Resolution> {
		let project_id = &association.project_id;
		let source_key = VersionKey::source(project_id, &association.source_version_ref);
		let map_key = VersionKey::sourcemap(project_id, &association.sourcemap_version_ref);
		let script_path = frame.file_path();

		let maps: Vec<SourcemapFile> = self
			.store
			.list_files(&map_key)
			.await?
			.iter()
			.map(StoredFile::to_sourcemap_file)
			.collect();
		let mapping_url = self.source_mapping_url(&source_key, &script_path).await;

		let Some((idx, rule)) = find_sourcemap(&script_path, mapping_url.as_deref(), &maps) else {
			debug!(script_path = %script_path, "no sourcemap matches frame file");
			return Ok(degraded(association, frame, None, DegradationReason::NoSourcemap));
		};
		let map_file = &maps[idx];
		debug!(sourcemap = %map_file.path, ?rule, "sourcemap selected");

		let cache_key = CacheKey::new(project_id, &association.sourcemap_version_ref, &map_file.path);
		let parsed = match self
			.cache
			.get_or_parse(&cache_key, || ParsedSourceMap::from_bytes(&map_file.content))
		{
			Ok(parsed) => parsed,
			Err(e) => {
				warn!(sourcemap = %map_file.path, error = %e, "sourcemap could not be parsed");
				let reason = DegradationReason::MappingFailed(e.to_string());
				return Ok(degraded(association, frame, Some(map_file.path.clone()), reason));
			}
		};

		let position = match parsed.lookup(frame.line, frame.column) {
			Ok(Some(position)) => position,
			Ok(None) => {
				let reason = DegradationReason::MappingFailed(format!(
					"no mapping at line {} column {}",
					frame.line, frame.column
				));
				return Ok(degraded(association, frame, Some(map_file.path.clone()), reason));
			}
			Err(e) => {
				warn!(sourcemap = %map_file.path, error = %e, "mapping lookup failed");
				let reason = DegradationReason::MappingFailed(e.to_string());
				return Ok(degraded(association, frame, Some(map_file.path.clone()), reason));
			}
		};

		let (source_path, uploaded) = match self.load_original(&source_key, &position.source).await? {
			Some((path, bytes)) => (Some(path), Some(String::from_utf8_lossy(&bytes).into_owned())),
			None => (None, None),
		};
		let source_content = uploaded.or_else(|| {
			parsed
				.source_content(position.source_index)
				.map(str::to_string)
		});
		let original_file = source_path
			.clone()
			.unwrap_or_else(|| clean_source_path(&position.source));

		let (context, function_name, status) = match &source_content {
			Some(text) => (
				extract_context(text, position.line, context_lines),
				position
					.name
					.clone()
					.or_else(|| find_enclosing_function(text, position.line)),
				ResolutionStatus::Exact,
			),
			None => {
				warn!(source = %position.source, "original source unavailable");
				(
					ContextLines::default(),
					position.name.clone(),
					ResolutionStatus::Degraded(vec![DegradationReason::SourceUnavailable]),
				)
			}
		};

		let location = ResolvedLocation {
			original_file,
			original_line: position.line,
			original_column: Some(position.column),
			function_name,
			context_lines: context,
			status,
			association_id: Some(association.id),
			sourcemap_path: Some(map_file.path.clone()),
		};
		Ok(Resolution {
			location,
			association,
			source_path,
			source_content,
		})
	}

	/// `sourceMappingURL` of the built script, when the source upload carries it.
	async fn source_mapping_url(&self, source_key: &VersionKey, script_path: &str) -> Option<String> {
		if script_path.is_empty() {
			return None;
		}
		match self.store.read_file(source_key, script_path).await {
			Ok(content) => SourceFile::from_content(script_path, &content).source_mapping_url,
			Err(_) => None,
		}
	}

	/// Find the original file in the source upload.
	async fn load_original(&self, source_key: &VersionKey, source: &str) -> Result<Option<(String, Bytes)>> {
		for candidate in original_path_candidates(source) {
			match self.store.read_file(source_key, &candidate).await {
				Ok(content) => return Ok(Some((candidate, content))),
				Err(SourcemapServerError::NotFound(_)) => continue,
				Err(e) => return Err(e),
			}
		}

		let files = match self.store.list_files(source_key).await {
			Ok(files) => files,
			Err(SourcemapServerError::NotFound(_)) => return Ok(None),
			Err(e) => return Err(e),
		};
		let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
		let Some(best) = best_suffix_match(&clean_source_path(source), &paths) else {
			return Ok(None);
		};
		debug!(source, matched = best, "original file matched by path suffix");
		Ok(files
			.iter()
			.find(|f| f.path == best)
			.map(|f| (f.path.clone(), f.content.clone())))
	}
}

fn degraded(
	association: Association,
	frame: &Frame,
	sourcemap_path: Option<String>,
	reason: DegradationReason,
) -> Resolution {
	let location = ResolvedLocation {
		original_file: frame.file.clone(),
		original_line: frame.line,
		original_column: Some(frame.column),
		function_name: frame.function_name.clone(),
		context_lines: ContextLines::default(),
		status: ResolutionStatus::Degraded(vec![reason]),
		association_id: Some(association.id),
		sourcemap_path,
	};
	Resolution {
		location,
		association,
		source_path: None,
		source_content: None,
	}
}

/// Source path with bundler scheme prefixes and relative segments removed.
pub fn clean_source_path(source: &str) -> String {
	url_path(source)
}

/// Paths looked up directly for a `sources` entry, before suffix matching.
///
/// `webpack://app/./src/a.ts` yields only `app/src/a.ts`; shorter suffixes
/// are left to [`best_suffix_match`] so a same-named file elsewhere in the
/// upload never wins over a deeper match.
pub fn original_path_candidates(source: &str) -> Vec<String> {
	let mut candidates: Vec<String> = Vec::new();
	if !source.contains("://") {
		if let Some(exact) = normalize_archive_path(source) {
			candidates.push(exact);
		}
	}
	let cleaned = clean_source_path(source);
	if !cleaned.is_empty() && !candidates.contains(&cleaned) {
		candidates.push(cleaned);
	}
	candidates
}

/// Uploaded path sharing the most trailing segments with `source`.
///
/// The basename must match. Ties go to the shorter, then lexicographically
/// first, path.
pub fn best_suffix_match<'a>(source: &str, paths: &[&'a str]) -> Option<&'a str> {
	let name = basename(source);
	paths
		.iter()
		.copied()
		.filter(|p| basename(p) == name)
		.max_by(|a, b| {
			common_suffix_segments(a, source)
				.cmp(&common_suffix_segments(b, source))
				.then_with(|| b.len().cmp(&a.len()))
				.then_with(|| b.cmp(a))
		})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::archive::InMemoryArchiveStore;
	use crate::repository::SqliteAssociationRepository;
	use crate::test_support::zip_archive;

	const ORIGINAL: &str = "import { start } from './start';\n\n\n\n\n\n\nfunction boot() {\n  start();\n  explode();\n}\n\nboot();\n";

	struct Fixture {
		store: Arc<InMemoryArchiveStore>,
		registry: Arc<VersionRegistry>,
		cache: Arc<SourceMapCache>,
		resolver: LocationResolver,
		project: ProjectId,
	}

	async fn fixture() -> Fixture {
		let store = Arc::new(InMemoryArchiveStore::default());
		let repo = Arc::new(SqliteAssociationRepository::connect("sqlite::memory:").await.unwrap());
		let cache = Arc::new(SourceMapCache::new(8));
		let registry = Arc::new(VersionRegistry::new(store.clone(), repo, cache.clone()));
		let resolver = LocationResolver::new(store.clone(), registry.clone(), cache.clone(), 2);
		Fixture {
			store,
			registry,
			cache,
			resolver,
			project: ProjectId::new("web").unwrap(),
		}
	}

	impl Fixture {
		async fn publish(&self, version: &str, sources: &[(&str, &str)], maps: &[(&str, &str)]) {
			self.store
				.put(&VersionKey::source(&self.project, version), zip_archive(sources).into())
				.await
				.unwrap();
			self.store
				.put(&VersionKey::sourcemap(&self.project, version), zip_archive(maps).into())
				.await
				.unwrap();
			self.registry
				.register_active(&self.project, version, version, version)
				.await
				.unwrap();
		}
	}

	fn map_json(sources: &str, names: &str, mappings: &str, sources_content: Option<&str>) -> String {
		let content = sources_content
			.map(|c| format!(r#","sourcesContent":[{}]"#, serde_json::to_string(c).unwrap()))
			.unwrap_or_default();
		format!(
			r#"{{"version":3,"sources":[{sources}],"names":[{names}],"mappings":"{mappings}"{content}}}"#
		)
	}

	fn frame() -> Frame {
		Frame::new("https://cdn.example.com/dist/bundle.js?v=2", 1, 5)
	}

	#[tokio::test]
	async fn test_round_trip_exact() {
		let f = fixture().await;
		let map = map_json(r#""src/a.ts""#, r#""boot""#, "KASEA", None);
		f.publish(
			"1",
			&[("src/a.ts", ORIGINAL), ("dist/bundle.js", "x")],
			&[("dist/bundle.js.map", map.as_str())],
		)
		.await;

		let loc = f.resolver.resolve(&f.project, None, &frame(), None).await.unwrap();
		assert_eq!(loc.original_file, "src/a.ts");
		assert_eq!(loc.original_line, 10);
		assert_eq!(loc.original_column, Some(2));
		assert_eq!(loc.function_name.as_deref(), Some("boot"));
		assert_eq!(loc.context_lines.target, "  explode();");
		assert_eq!(loc.context_lines.pre, vec!["function boot() {", "  start();"]);
		assert_eq!(loc.context_lines.post, vec!["}", ""]);
		assert_eq!(loc.status, ResolutionStatus::Exact);
		assert_eq!(loc.sourcemap_path.as_deref(), Some("dist/bundle.js.map"));
	}

	#[tokio::test]
	async fn test_function_name_from_backward_scan() {
		let f = fixture().await;
		let map = map_json(r#""src/a.ts""#, "", "KASE", None);
		f.publish("1", &[("src/a.ts", ORIGINAL)], &[("dist/bundle.js.map", map.as_str())])
			.await;

		let loc = f
			.resolver
			.resolve(&f.project, None, &frame(), Some(0))
			.await
			.unwrap();
		assert_eq!(loc.function_name.as_deref(), Some("boot"));
		assert!(loc.context_lines.pre.is_empty());
	}

	#[tokio::test]
	async fn test_bundler_prefixed_source_path() {
		let f = fixture().await;
		let map = map_json(r#""webpack://my-app/./src/a.ts""#, r#""boot""#, "KASEA", None);
		f.publish("1", &[("src/a.ts", ORIGINAL)], &[("dist/bundle.js.map", map.as_str())])
			.await;

		let loc = f.resolver.resolve(&f.project, None, &frame(), None).await.unwrap();
		assert_eq!(loc.original_file, "src/a.ts");
		assert_eq!(loc.status, ResolutionStatus::Exact);
	}

	#[tokio::test]
	async fn test_sources_content_fallback() {
		let f = fixture().await;
		let map = map_json(r#""src/a.ts""#, r#""boot""#, "KASEA", Some(ORIGINAL));
		f.publish("1", &[("README.md", "hi")], &[("dist/bundle.js.map", map.as_str())])
			.await;

		let resolution = f
			.resolver
			.resolve_detailed(&f.project, None, &frame(), None)
			.await
			.unwrap();
		assert_eq!(resolution.location.status, ResolutionStatus::Exact);
		assert_eq!(resolution.location.context_lines.target, "  explode();");
		assert_eq!(resolution.source_path, None);
		assert_eq!(resolution.source_content.as_deref(), Some(ORIGINAL));
	}

	#[tokio::test]
	async fn test_source_unavailable() {
		let f = fixture().await;
		let map = map_json(r#""src/a.ts""#, r#""boot""#, "KASEA", None);
		f.publish("1", &[("README.md", "hi")], &[("dist/bundle.js.map", map.as_str())])
			.await;

		let loc = f.resolver.resolve(&f.project, None, &frame(), None).await.unwrap();
		assert_eq!(loc.original_file, "src/a.ts");
		assert_eq!(loc.original_line, 10);
		assert!(loc.context_lines.is_empty());
		assert_eq!(loc.function_name.as_deref(), Some("boot"));
		assert_eq!(
			loc.status,
			ResolutionStatus::Degraded(vec![DegradationReason::SourceUnavailable])
		);
	}

	#[tokio::test]
	async fn test_no_sourcemap_passthrough() {
		let f = fixture().await;
		let map = map_json(r#""src/a.ts""#, "", "KASE", None);
		f.publish("1", &[("src/a.ts", ORIGINAL)], &[("dist/bundle.js.map", map.as_str())])
			.await;

		let frame = Frame::new("https://cdn.example.com/vendor.js", 3, 7);
		let loc = f.resolver.resolve(&f.project, None, &frame, None).await.unwrap();
		assert_eq!(loc.original_file, "https://cdn.example.com/vendor.js");
		assert_eq!((loc.original_line, loc.original_column), (3, Some(7)));
		assert_eq!(
			loc.status,
			ResolutionStatus::Degraded(vec![DegradationReason::NoSourcemap])
		);
		assert!(loc.association_id.is_some());
	}

	#[tokio::test]
	async fn test_mapping_failed_passthrough() {
		let f = fixture().await;
		f.publish(
			"1",
			&[("src/a.ts", ORIGINAL)],
			&[("dist/bundle.js.map", "{not json")],
		)
		.await;
		let loc = f.resolver.resolve(&f.project, None, &frame(), None).await.unwrap();
		assert!(matches!(
			loc.degradation_reasons(),
			[DegradationReason::MappingFailed(_)]
		));
		assert_eq!(loc.original_line, 1);

		let map = map_json(r#""src/a.ts""#, "", "KASE", None);
		f.publish("2", &[("src/a.ts", ORIGINAL)], &[("dist/bundle.js.map", map.as_str())])
			.await;
		let early = Frame::new("dist/bundle.js", 1, 2);
		let loc = f.resolver.resolve(&f.project, Some("2"), &early, None).await.unwrap();
		assert!(matches!(
			loc.degradation_reasons(),
			[DegradationReason::MappingFailed(reason)] if reason.contains("no mapping")
		));
	}

	#[tokio::test]
	async fn test_source_mapping_url_selects_map() {
		let f = fixture().await;
		let good = map_json(r#""src/a.ts""#, r#""boot""#, "KASEA", None);
		let other = map_json(r#""src/other.ts""#, "", "AAAA", None);
		f.publish(
			"1",
			&[
				("src/a.ts", ORIGINAL),
				("dist/bundle.js", "x();\n//# sourceMappingURL=maps/bundle.map\n"),
			],
			&[("dist/bundle.js.map", other.as_str()), ("dist/maps/bundle.map", good.as_str())],
		)
		.await;

		let loc = f.resolver.resolve(&f.project, None, &frame(), None).await.unwrap();
		assert_eq!(loc.sourcemap_path.as_deref(), Some("dist/maps/bundle.map"));
		assert_eq!(loc.original_file, "src/a.ts");
	}

	#[tokio::test]
	async fn test_missing_association() {
		let f = fixture().await;
		assert!(matches!(
			f.resolver.resolve(&f.project, None, &frame(), None).await,
			Err(SourcemapServerError::NoActiveVersion(_))
		));
		assert!(matches!(
			f.resolver.resolve(&f.project, Some("9"), &frame(), None).await,
			Err(SourcemapServerError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_parsed_maps_are_cached() {
		let f = fixture().await;
		let map = map_json(r#""src/a.ts""#, r#""boot""#, "KASEA", None);
		f.publish("1", &[("src/a.ts", ORIGINAL)], &[("dist/bundle.js.map", map.as_str())])
			.await;

		f.resolver.resolve(&f.project, None, &frame(), None).await.unwrap();
		f.resolver.resolve(&f.project, None, &frame(), None).await.unwrap();
		let stats = f.cache.stats();
		assert_eq!(stats.misses, 1);
		assert_eq!(stats.hits, 1);
	}

	#[tokio::test]
	async fn test_deepest_suffix_wins_over_same_basename() {
		let f = fixture().await;
		let map = map_json(r#""webpack://web/./src/utils/index.ts""#, "", "KASE", None);
		f.publish(
			"1",
			&[
				("index.ts", "root\n"),
				("packages/web/src/utils/index.ts", ORIGINAL),
			],
			&[("dist/bundle.js.map", map.as_str())],
		)
		.await;

		let resolution = f
			.resolver
			.resolve_detailed(&f.project, None, &frame(), None)
			.await
			.unwrap();
		assert_eq!(resolution.location.original_file, "packages/web/src/utils/index.ts");
		assert_eq!(resolution.location.context_lines.target, "  explode();");
		assert_eq!(resolution.location.status, ResolutionStatus::Exact);
	}

	#[tokio::test]
	async fn test_unmapped_segment_degrades() {
		let f = fixture().await;
		// column 5 maps to src/a.ts:10:2, column 15 has no original position
		let map = map_json(r#""src/a.ts""#, "", "KASE,U", None);
		f.publish("1", &[("src/a.ts", ORIGINAL)], &[("dist/bundle.js.map", map.as_str())])
			.await;

		let mapped = f.resolver.resolve(&f.project, None, &frame(), None).await.unwrap();
		assert_eq!(mapped.original_line, 10);

		let later = Frame::new("dist/bundle.js", 1, 20);
		let loc = f.resolver.resolve(&f.project, None, &later, None).await.unwrap();
		assert!(matches!(
			loc.degradation_reasons(),
			[DegradationReason::MappingFailed(_)]
		));
		assert_eq!(loc.original_file, "dist/bundle.js");
		assert_eq!((loc.original_line, loc.original_column), (1, Some(20)));
	}

	#[test]
	fn test_original_path_candidates() {
		assert_eq!(
			original_path_candidates("webpack://my-app/./src/a.ts"),
			vec!["my-app/src/a.ts"]
		);
		assert_eq!(original_path_candidates("../src/a.ts"), vec!["src/a.ts"]);
		assert_eq!(original_path_candidates("src/a.ts"), vec!["src/a.ts"]);
	}

	#[test]
	fn test_best_suffix_match() {
		let paths = ["app/src/a.ts", "lib/a.ts", "src/b.ts"];
		assert_eq!(best_suffix_match("src/a.ts", &paths), Some("app/src/a.ts"));
		assert_eq!(best_suffix_match("x/a.ts", &paths), Some("lib/a.ts"));
		assert_eq!(best_suffix_match("c.ts", &paths), None);
	}
}
