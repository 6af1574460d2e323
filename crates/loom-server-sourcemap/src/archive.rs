// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Archive storage for uploaded source and sourcemap bundles.
//!
//! A zip upload is extracted off the async runtime into a private staging
//! list, then published into the store in one step. Readers either see the
//! complete version or nothing. File bodies are content addressed by SHA-256
//! so identical files across versions are stored once.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use loom_sourcemap_core::path::{basename, normalize_archive_path};
use loom_sourcemap_core::{ArtifactKind, ProjectId, ProjectVersion, SourceFile, SourcemapFile};

use crate::config::{
	DEFAULT_EXTRACTION_TIMEOUT_SECS, DEFAULT_MAX_ARCHIVE_BYTES, DEFAULT_MAX_ENTRIES,
	DEFAULT_MAX_FILE_BYTES,
};
use crate::error::{Result, SourcemapServerError};

/// Resource budgets applied while extracting an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLimits {
	/// Maximum size of the compressed upload, and of its total extracted content
	pub max_archive_bytes: u64,
	pub max_file_bytes: u64,
	pub max_entries: usize,
	pub extraction_timeout: Duration,
}

impl Default for ArchiveLimits {
	fn default() -> Self {
		Self {
			max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
			max_file_bytes: DEFAULT_MAX_FILE_BYTES,
			max_entries: DEFAULT_MAX_ENTRIES,
			extraction_timeout: Duration::from_secs(DEFAULT_EXTRACTION_TIMEOUT_SECS),
		}
	}
}

/// Identifies one published upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionKey {
	pub project_id: ProjectId,
	pub version: String,
	pub kind: ArtifactKind,
}

impl VersionKey {
	pub fn new(project_id: &ProjectId, version: impl Into<String>, kind: ArtifactKind) -> Self {
		Self {
			project_id: project_id.clone(),
			version: version.into(),
			kind,
		}
	}

	pub fn source(project_id: &ProjectId, version: impl Into<String>) -> Self {
		Self::new(project_id, version, ArtifactKind::Source)
	}

	pub fn sourcemap(project_id: &ProjectId, version: impl Into<String>) -> Self {
		Self::new(project_id, version, ArtifactKind::Sourcemap)
	}
}

impl fmt::Display for VersionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}/{}", self.project_id, self.version, self.kind)
	}
}

/// A file stored under a published version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
	pub path: String,
	/// Hex SHA-256 of the content
	pub sha256: String,
	pub content: Bytes,
}

impl StoredFile {
	pub fn size(&self) -> u64 {
		self.content.len() as u64
	}

	pub fn to_source_file(&self) -> SourceFile {
		SourceFile::from_content(&self.path, &self.content)
	}

	pub fn to_sourcemap_file(&self) -> SourcemapFile {
		SourcemapFile::new(&self.path, self.content.clone())
	}
}

/// Key-value storage of extracted uploads keyed by `(project, version, kind)`.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
	/// Extract and publish a zip upload. Fails with `Conflict` if the key is taken.
	async fn put(&self, key: &VersionKey, archive: Bytes) -> Result<ProjectVersion>;

	async fn get_version(&self, key: &VersionKey) -> Result<Option<ProjectVersion>>;

	/// Files of a published version ordered by path.
	async fn list_files(&self, key: &VersionKey) -> Result<Vec<StoredFile>>;

	/// Content of one file; `NotFound` if the version or path is absent.
	async fn read_file(&self, key: &VersionKey, path: &str) -> Result<Bytes>;

	/// Remove a version. Returns whether it existed.
	async fn delete(&self, key: &VersionKey) -> Result<bool>;
}

/// One entry of an extracted archive, prior to publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntry {
	pub path: String,
	pub content: Bytes,
}

fn is_noise(path: &str) -> bool {
	path.starts_with("__MACOSX/") || basename(path) == ".DS_Store"
}

/// Extract a zip archive into memory, enforcing `limits`.
///
/// Runs synchronously; callers on the async runtime go through
/// [`InMemoryArchiveStore::put`], which moves this onto a blocking thread.
/// `cancelled` is polled between entries.
pub fn extract_zip(
	data: &[u8],
	limits: &ArchiveLimits,
	cancelled: &AtomicBool,
) -> Result<Vec<ExtractedEntry>> {
	let archive_size = data.len() as u64;
	if archive_size > limits.max_archive_bytes {
		return Err(SourcemapServerError::ArchiveTooLarge {
			subject: "archive".to_string(),
			size: archive_size,
			max: limits.max_archive_bytes,
		});
	}

	let started = Instant::now();
	let mut archive = zip::ZipArchive::new(Cursor::new(data))
		.map_err(|e| SourcemapServerError::InvalidArchive(format!("malformed zip: {e}")))?;

	if archive.len() > limits.max_entries {
		return Err(SourcemapServerError::ArchiveTooLarge {
			subject: "archive entry count".to_string(),
			size: archive.len() as u64,
			max: limits.max_entries as u64,
		});
	}

	let mut entries = Vec::new();
	let mut seen = HashSet::new();
	let mut total_bytes = 0u64;

	for index in 0..archive.len() {
		if cancelled.load(Ordering::Relaxed) {
			return Err(SourcemapServerError::Timeout("archive extraction cancelled".to_string()));
		}
		if started.elapsed() > limits.extraction_timeout {
			return Err(SourcemapServerError::Timeout(format!(
				"archive extraction exceeded {}s",
				limits.extraction_timeout.as_secs()
			)));
		}

		let mut entry = archive.by_index(index).map_err(|e| {
			SourcemapServerError::InvalidArchive(format!("unreadable entry {index}: {e}"))
		})?;
		if entry.is_dir() {
			continue;
		}

		let raw_name = entry.name().to_string();
		let path = normalize_archive_path(&raw_name).ok_or_else(|| {
			SourcemapServerError::InvalidArchive(format!("entry {raw_name:?} escapes the archive root"))
		})?;
		if is_noise(&path) {
			continue;
		}

		if entry.size() > limits.max_file_bytes {
			return Err(SourcemapServerError::ArchiveTooLarge {
				subject: format!("entry {path}"),
				size: entry.size(),
				max: limits.max_file_bytes,
			});
		}

		// Declared sizes can lie; read one byte past the cap to detect it.
		let mut buf = Vec::with_capacity(entry.size() as usize);
		entry
			.by_ref()
			.take(limits.max_file_bytes + 1)
			.read_to_end(&mut buf)
			.map_err(|e| SourcemapServerError::InvalidArchive(format!("failed to read {path}: {e}")))?;
		let size = buf.len() as u64;
		if size > limits.max_file_bytes {
			return Err(SourcemapServerError::ArchiveTooLarge {
				subject: format!("entry {path}"),
				size,
				max: limits.max_file_bytes,
			});
		}

		total_bytes += size;
		if total_bytes > limits.max_archive_bytes {
			return Err(SourcemapServerError::ArchiveTooLarge {
				subject: "extracted content".to_string(),
				size: total_bytes,
				max: limits.max_archive_bytes,
			});
		}

		if !seen.insert(path.clone()) {
			return Err(SourcemapServerError::InvalidArchive(format!(
				"duplicate entry {path}"
			)));
		}

		entries.push(ExtractedEntry {
			path,
			content: Bytes::from(buf),
		});
	}

	if entries.is_empty() {
		return Err(SourcemapServerError::InvalidArchive(
			"archive contains no files".to_string(),
		));
	}

	entries.sort_by(|a, b| a.path.cmp(&b.path));
	Ok(entries)
}

fn sha256_hex(data: &[u8]) -> String {
	hex::encode(Sha256::digest(data))
}

/// Sets the flag when dropped so an abandoned extraction stops early.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
	fn drop(&mut self) {
		self.0.store(true, Ordering::Relaxed);
	}
}

#[derive(Debug)]
struct Blob {
	data: Bytes,
	refs: usize,
}

#[derive(Debug)]
struct PublishedVersion {
	meta: ProjectVersion,
	/// path -> content digest
	files: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct StoreState {
	versions: HashMap<VersionKey, PublishedVersion>,
	blobs: HashMap<String, Blob>,
}

impl StoreState {
	fn release(&mut self, files: &HashMap<String, String>) {
		for digest in files.values() {
			if let Some(blob) = self.blobs.get_mut(digest) {
				blob.refs -= 1;
				if blob.refs == 0 {
					self.blobs.remove(digest);
				}
			}
		}
	}
}

/// Process-local [`ArchiveStore`].
pub struct InMemoryArchiveStore {
	limits: ArchiveLimits,
	state: RwLock<StoreState>,
}

impl InMemoryArchiveStore {
	pub fn new(limits: ArchiveLimits) -> Self {
		Self {
			limits,
			state: RwLock::new(StoreState::default()),
		}
	}

	pub fn limits(&self) -> &ArchiveLimits {
		&self.limits
	}

	/// Number of distinct file bodies held.
	pub async fn blob_count(&self) -> usize {
		self.state.read().await.blobs.len()
	}

	async fn extract(&self, archive: Bytes) -> Result<Vec<ExtractedEntry>> {
		let limits = self.limits.clone();
		let cancelled = Arc::new(AtomicBool::new(false));
		let guard = CancelOnDrop(cancelled.clone());

		let task =
			tokio::task::spawn_blocking(move || extract_zip(&archive, &limits, &cancelled));

		// The blocking task checks the deadline between entries; this bounds a
		// single slow entry as well.
		let deadline = self.limits.extraction_timeout + Duration::from_secs(1);
		let result = match tokio::time::timeout(deadline, task).await {
			Ok(Ok(result)) => result,
			Ok(Err(join)) => Err(SourcemapServerError::Internal(format!(
				"extraction task failed: {join}"
			))),
			Err(_) => Err(SourcemapServerError::Timeout(format!(
				"archive extraction exceeded {}s",
				self.limits.extraction_timeout.as_secs()
			))),
		};
		drop(guard);
		result
	}
}

impl Default for InMemoryArchiveStore {
	fn default() -> Self {
		Self::new(ArchiveLimits::default())
	}
}

#[async_trait]
impl ArchiveStore for InMemoryArchiveStore {
	#[instrument(skip(self, archive), fields(key = %key, archive_bytes = archive.len()))]
	async fn put(&self, key: &VersionKey, archive: Bytes) -> Result<ProjectVersion> {
		if self.state.read().await.versions.contains_key(key) {
			return Err(SourcemapServerError::Conflict(format!(
				"version {key} already exists"
			)));
		}

		let entries = match self.extract(archive).await {
			Ok(entries) => entries,
			Err(e) => {
				warn!(error = %e, "archive rejected");
				return Err(e);
			}
		};

		// Hash outside the lock; publication below is a single critical section.
		let hashed: Vec<(ExtractedEntry, String)> = entries
			.into_iter()
			.map(|entry| {
				let digest = sha256_hex(&entry.content);
				(entry, digest)
			})
			.collect();

		let mut state = self.state.write().await;
		if state.versions.contains_key(key) {
			return Err(SourcemapServerError::Conflict(format!(
				"version {key} already exists"
			)));
		}

		let mut files = HashMap::with_capacity(hashed.len());
		let mut total_bytes = 0u64;
		for (entry, digest) in hashed {
			let size = entry.content.len() as u64;
			total_bytes += size;
			state
				.blobs
				.entry(digest.clone())
				.and_modify(|blob| blob.refs += 1)
				.or_insert(Blob {
					data: entry.content,
					refs: 1,
				});
			files.insert(entry.path, digest);
		}

		let meta = ProjectVersion {
			project_id: key.project_id.clone(),
			version: key.version.clone(),
			kind: key.kind,
			uploaded_at: Utc::now(),
			file_count: files.len(),
			total_bytes,
		};
		state.versions.insert(
			key.clone(),
			PublishedVersion {
				meta: meta.clone(),
				files,
			},
		);

		info!(
			file_count = meta.file_count,
			total_bytes = meta.total_bytes,
			"archive published"
		);
		Ok(meta)
	}

	async fn get_version(&self, key: &VersionKey) -> Result<Option<ProjectVersion>> {
		Ok(self
			.state
			.read()
			.await
			.versions
			.get(key)
			.map(|v| v.meta.clone()))
	}

	async fn list_files(&self, key: &VersionKey) -> Result<Vec<StoredFile>> {
		let state = self.state.read().await;
		let version = state
			.versions
			.get(key)
			.ok_or_else(|| SourcemapServerError::NotFound(format!("version {key}")))?;

		let mut files: Vec<StoredFile> = version
			.files
			.iter()
			.filter_map(|(path, digest)| {
				state.blobs.get(digest).map(|blob| StoredFile {
					path: path.clone(),
					sha256: digest.clone(),
					content: blob.data.clone(),
				})
			})
			.collect();
		files.sort_by(|a, b| a.path.cmp(&b.path));
		Ok(files)
	}

	async fn read_file(&self, key: &VersionKey, path: &str) -> Result<Bytes> {
		let state = self.state.read().await;
		let version = state
			.versions
			.get(key)
			.ok_or_else(|| SourcemapServerError::NotFound(format!("version {key}")))?;
		version
			.files
			.get(path)
			.and_then(|digest| state.blobs.get(digest))
			.map(|blob| blob.data.clone())
			.ok_or_else(|| SourcemapServerError::NotFound(format!("file {path} in {key}")))
	}

	#[instrument(skip(self), fields(key = %key))]
	async fn delete(&self, key: &VersionKey) -> Result<bool> {
		let mut state = self.state.write().await;
		let Some(version) = state.versions.remove(key) else {
			return Ok(false);
		};
		state.release(&version.files);
		debug!(file_count = version.files.len(), "archive version deleted");
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::zip_archive;

	fn project() -> ProjectId {
		ProjectId::new("web").unwrap()
	}

	fn never() -> AtomicBool {
		AtomicBool::new(false)
	}

	#[test]
	fn test_extract_normalizes_and_skips_noise() {
		let data = zip_archive(&[
			("./dist/app.js", "console.log(1)"),
			("__MACOSX/dist/._app.js", "junk"),
			("dist/.DS_Store", "junk"),
			("src/../src/index.ts", "export {}"),
		]);
		let entries = extract_zip(&data, &ArchiveLimits::default(), &never()).unwrap();
		let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
		assert_eq!(paths, vec!["dist/app.js", "src/index.ts"]);
	}

	#[test]
	fn test_extract_rejects_traversal() {
		for name in ["../evil.js", "/etc/passwd", "C:/evil.js", "a/../../evil.js", "..\\evil.js"] {
			let data = zip_archive(&[("ok.js", "1"), (name, "x")]);
			let err = extract_zip(&data, &ArchiveLimits::default(), &never()).unwrap_err();
			assert!(
				matches!(err, SourcemapServerError::InvalidArchive(_)),
				"{name}: {err}"
			);
		}
	}

	#[test]
	fn test_extract_rejects_malformed_and_empty() {
		assert!(matches!(
			extract_zip(b"not a zip", &ArchiveLimits::default(), &never()),
			Err(SourcemapServerError::InvalidArchive(_))
		));

		let only_noise = zip_archive(&[(".DS_Store", "x")]);
		assert!(matches!(
			extract_zip(&only_noise, &ArchiveLimits::default(), &never()),
			Err(SourcemapServerError::InvalidArchive(_))
		));
	}

	#[test]
	fn test_extract_size_limits() {
		let data = zip_archive(&[("big.js", "a".repeat(64).as_str())]);

		let small_archive = ArchiveLimits {
			max_archive_bytes: 10,
			max_file_bytes: 10,
			..ArchiveLimits::default()
		};
		assert!(matches!(
			extract_zip(&data, &small_archive, &never()),
			Err(SourcemapServerError::ArchiveTooLarge { ref subject, .. }) if subject == "archive"
		));

		let small_file = ArchiveLimits {
			max_file_bytes: 32,
			..ArchiveLimits::default()
		};
		assert!(matches!(
			extract_zip(&data, &small_file, &never()),
			Err(SourcemapServerError::ArchiveTooLarge { size: 64, max: 32, .. })
		));
	}

	#[test]
	fn test_extract_entry_count_limit() {
		let data = zip_archive(&[("a.js", "1"), ("b.js", "2"), ("c.js", "3")]);
		let limits = ArchiveLimits {
			max_entries: 2,
			..ArchiveLimits::default()
		};
		assert!(matches!(
			extract_zip(&data, &limits, &never()),
			Err(SourcemapServerError::ArchiveTooLarge { size: 3, max: 2, .. })
		));
	}

	#[test]
	fn test_extract_cancelled() {
		let data = zip_archive(&[("a.js", "1")]);
		let cancelled = AtomicBool::new(true);
		assert!(matches!(
			extract_zip(&data, &ArchiveLimits::default(), &cancelled),
			Err(SourcemapServerError::Timeout(_))
		));
	}

	#[tokio::test]
	async fn test_put_list_read() {
		let store = InMemoryArchiveStore::default();
		let key = VersionKey::source(&project(), "1.0.0");
		let data = zip_archive(&[("src/b.ts", "let b;"), ("src/a.ts", "let a;")]);

		let version = store.put(&key, Bytes::from(data)).await.unwrap();
		assert_eq!(version.file_count, 2);
		assert_eq!(version.total_bytes, 12);
		assert_eq!(version.kind, ArtifactKind::Source);

		let files = store.list_files(&key).await.unwrap();
		assert_eq!(files[0].path, "src/a.ts");
		assert_eq!(files[1].path, "src/b.ts");
		assert_eq!(files[0].size(), 6);

		let content = store.read_file(&key, "src/a.ts").await.unwrap();
		assert_eq!(&content[..], b"let a;");
		assert!(matches!(
			store.read_file(&key, "src/c.ts").await,
			Err(SourcemapServerError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_put_conflict() {
		let store = InMemoryArchiveStore::default();
		let key = VersionKey::source(&project(), "1.0.0");
		let data = Bytes::from(zip_archive(&[("a.ts", "1")]));
		store.put(&key, data.clone()).await.unwrap();
		assert!(matches!(
			store.put(&key, data).await,
			Err(SourcemapServerError::Conflict(_))
		));
	}

	#[tokio::test]
	async fn test_failed_put_publishes_nothing() {
		let store = InMemoryArchiveStore::default();
		let key = VersionKey::source(&project(), "1.0.0");
		let data = zip_archive(&[("a.ts", "1"), ("../b.ts", "2")]);
		assert!(store.put(&key, Bytes::from(data)).await.is_err());
		assert!(store.get_version(&key).await.unwrap().is_none());
		assert_eq!(store.blob_count().await, 0);
	}

	#[tokio::test]
	async fn test_content_addressed_sharing_and_delete() {
		let store = InMemoryArchiveStore::default();
		let v1 = VersionKey::source(&project(), "1");
		let v2 = VersionKey::source(&project(), "2");
		let shared = "export const x = 1;";

		store
			.put(&v1, Bytes::from(zip_archive(&[("x.ts", shared), ("y.ts", "1")])))
			.await
			.unwrap();
		store
			.put(&v2, Bytes::from(zip_archive(&[("x.ts", shared), ("y.ts", "2")])))
			.await
			.unwrap();
		assert_eq!(store.blob_count().await, 3);

		assert!(store.delete(&v1).await.unwrap());
		assert!(!store.delete(&v1).await.unwrap());
		assert_eq!(store.blob_count().await, 2);
		assert_eq!(&store.read_file(&v2, "x.ts").await.unwrap()[..], shared.as_bytes());

		assert!(store.delete(&v2).await.unwrap());
		assert_eq!(store.blob_count().await, 0);
	}

	#[tokio::test]
	async fn test_kinds_are_separate_keys() {
		let store = InMemoryArchiveStore::default();
		let data = Bytes::from(zip_archive(&[("a.js", "1")]));
		store
			.put(&VersionKey::source(&project(), "1"), data.clone())
			.await
			.unwrap();
		store
			.put(&VersionKey::sourcemap(&project(), "1"), data)
			.await
			.unwrap();
		assert!(store
			.get_version(&VersionKey::sourcemap(&project(), "1"))
			.await
			.unwrap()
			.is_some());
	}

	#[test]
	fn test_version_key_display() {
		let key = VersionKey::sourcemap(&project(), "2.1.0");
		assert_eq!(key.to_string(), "web/2.1.0/sourcemap");
	}
}
