// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded LRU cache of parsed sourcemaps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::trace;

use loom_sourcemap_core::ProjectId;
use loom_sourcemap_symbolicate::{ParsedSourceMap, SymbolicateError};

use crate::config::DEFAULT_CACHE_CAPACITY;

/// `(project, sourcemap version, map path)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
	pub project_id: ProjectId,
	pub version: String,
	pub path: String,
}

impl CacheKey {
	pub fn new(project_id: &ProjectId, version: &str, path: &str) -> Self {
		Self {
			project_id: project_id.clone(),
			version: version.to_string(),
			path: path.to_string(),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
	pub hits: u64,
	pub misses: u64,
	pub entries: usize,
}

#[derive(Debug)]
struct CacheEntry {
	map: Arc<ParsedSourceMap>,
	last_used: u64,
}

#[derive(Debug, Default)]
struct CacheState {
	entries: HashMap<CacheKey, CacheEntry>,
	clock: u64,
}

impl CacheState {
	fn tick(&mut self) -> u64 {
		self.clock += 1;
		self.clock
	}

	fn evict_lru(&mut self) {
		if let Some(oldest) = self
			.entries
			.iter()
			.min_by_key(|(_, entry)| entry.last_used)
			.map(|(k, _)| k.clone())
		{
			trace!(path = %oldest.path, "evicting parsed sourcemap");
			self.entries.remove(&oldest);
		}
	}
}

#[derive(Debug)]
pub struct SourceMapCache {
	state: Mutex<CacheState>,
	capacity: usize,
	hits: AtomicU64,
	misses: AtomicU64,
}

impl Default for SourceMapCache {
	fn default() -> Self {
		Self::new(DEFAULT_CACHE_CAPACITY)
	}
}

impl SourceMapCache {
	pub fn new(capacity: usize) -> Self {
		Self {
			state: Mutex::new(CacheState::default()),
			capacity: capacity.max(1),
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
		}
	}

	fn state(&self) -> std::sync::MutexGuard<'_, CacheState> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn get(&self, key: &CacheKey) -> Option<Arc<ParsedSourceMap>> {
		let mut state = self.state();
		let now = state.tick();
		match state.entries.get_mut(key) {
			Some(entry) => {
				entry.last_used = now;
				self.hits.fetch_add(1, Ordering::Relaxed);
				Some(entry.map.clone())
			}
			None => {
				self.misses.fetch_add(1, Ordering::Relaxed);
				None
			}
		}
	}

	pub fn insert(&self, key: CacheKey, map: Arc<ParsedSourceMap>) {
		let mut state = self.state();
		let now = state.tick();
		if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
			state.evict_lru();
		}
		state.entries.insert(
			key,
			CacheEntry {
				map,
				last_used: now,
			},
		);
	}

	/// Cached map for `key`, parsing with `parse` on a miss.
	///
	/// Parse failures are returned and not cached.
	pub fn get_or_parse<F>(
		&self,
		key: &CacheKey,
		parse: F,
	) -> Result<Arc<ParsedSourceMap>, SymbolicateError>
	where
		F: FnOnce() -> Result<ParsedSourceMap, SymbolicateError>,
	{
		if let Some(map) = self.get(key) {
			return Ok(map);
		}
		// Parsed without the lock held; a racing miss may parse twice.
		let map = Arc::new(parse()?);
		self.insert(key.clone(), map.clone());
		Ok(map)
	}

	/// Drop every cached map of one sourcemap upload.
	pub fn invalidate_version(&self, project_id: &ProjectId, version: &str) -> usize {
		let mut state = self.state();
		let before = state.entries.len();
		state
			.entries
			.retain(|k, _| !(k.project_id == *project_id && k.version == version));
		before - state.entries.len()
	}

	pub fn len(&self) -> usize {
		self.state().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn stats(&self) -> CacheStats {
		CacheStats {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			entries: self.len(),
		}
	}
}
