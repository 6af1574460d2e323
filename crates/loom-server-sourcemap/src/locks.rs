// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-key async locks serializing mutations of one project.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Table of async mutexes, one per key, created on demand.
///
/// Holders of different keys never contend. Idle entries are pruned when the
/// table is next touched.
pub struct KeyedLocks<K> {
	locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
	pub fn new() -> Self {
		Self {
			locks: Mutex::new(HashMap::new()),
		}
	}

	/// Wait for exclusive access to `key`. Released when the guard drops.
	pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
		let mutex = {
			let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
			// Only the table holds an idle lock.
			locks.retain(|k, m| k == key || Arc::strong_count(m) > 1);
			locks
				.entry(key.clone())
				.or_insert_with(|| Arc::new(AsyncMutex::new(())))
				.clone()
		};
		mutex.lock_owned().await
	}

	/// Number of keys currently tracked.
	pub fn len(&self) -> usize {
		self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
	fn default() -> Self {
		Self::new()
	}
}
