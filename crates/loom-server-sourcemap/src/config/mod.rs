// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the sourcemap service.
//!
//! Sources are applied defaults, then the `[sourcemap]` table of a TOML file,
//! then `LOOM_SERVER_SOURCEMAP_*` environment variables.

pub mod sources;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use crate::archive::ArchiveLimits;

pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RELATED_FILES: usize = 10;
pub const DEFAULT_CACHE_CAPACITY: usize = 64;
pub const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("TOML parse error in {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },

	#[error("validation error: {0}")]
	Validation(String),
}

impl ConfigError {
	pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
		Self::InvalidValue {
			key: key.into(),
			message: message.into(),
		}
	}
}

/// Partial configuration as read from a single source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourcemapConfigLayer {
	pub max_archive_bytes: Option<u64>,
	pub max_file_bytes: Option<u64>,
	pub max_entries: Option<usize>,
	pub extraction_timeout_secs: Option<u64>,
	pub default_context_lines: Option<usize>,
	pub max_related_files: Option<usize>,
	pub cache_capacity: Option<usize>,
	pub database_url: Option<String>,
}

impl SourcemapConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.max_archive_bytes.is_some() {
			self.max_archive_bytes = other.max_archive_bytes;
		}
		if other.max_file_bytes.is_some() {
			self.max_file_bytes = other.max_file_bytes;
		}
		if other.max_entries.is_some() {
			self.max_entries = other.max_entries;
		}
		if other.extraction_timeout_secs.is_some() {
			self.extraction_timeout_secs = other.extraction_timeout_secs;
		}
		if other.default_context_lines.is_some() {
			self.default_context_lines = other.default_context_lines;
		}
		if other.max_related_files.is_some() {
			self.max_related_files = other.max_related_files;
		}
		if other.cache_capacity.is_some() {
			self.cache_capacity = other.cache_capacity;
		}
		if other.database_url.is_some() {
			self.database_url = other.database_url;
		}
	}

	pub fn finalize(self) -> Result<SourcemapConfig, ConfigError> {
		let defaults = SourcemapConfig::default();
		let config = SourcemapConfig {
			max_archive_bytes: self.max_archive_bytes.unwrap_or(defaults.max_archive_bytes),
			max_file_bytes: self.max_file_bytes.unwrap_or(defaults.max_file_bytes),
			max_entries: self.max_entries.unwrap_or(defaults.max_entries),
			extraction_timeout_secs: self
				.extraction_timeout_secs
				.unwrap_or(defaults.extraction_timeout_secs),
			default_context_lines: self
				.default_context_lines
				.unwrap_or(defaults.default_context_lines),
			max_related_files: self.max_related_files.unwrap_or(defaults.max_related_files),
			cache_capacity: self.cache_capacity.unwrap_or(defaults.cache_capacity),
			database_url: self.database_url.unwrap_or(defaults.database_url),
		};
		config.validate()?;
		Ok(config)
	}
}

/// Fully resolved sourcemap service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourcemapConfig {
	pub max_archive_bytes: u64,
	pub max_file_bytes: u64,
	pub max_entries: usize,
	pub extraction_timeout_secs: u64,
	pub default_context_lines: usize,
	pub max_related_files: usize,
	pub cache_capacity: usize,
	pub database_url: String,
}

impl Default for SourcemapConfig {
	fn default() -> Self {
		Self {
			max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
			max_file_bytes: DEFAULT_MAX_FILE_BYTES,
			max_entries: DEFAULT_MAX_ENTRIES,
			extraction_timeout_secs: DEFAULT_EXTRACTION_TIMEOUT_SECS,
			default_context_lines: loom_sourcemap_symbolicate::DEFAULT_CONTEXT_LINES,
			max_related_files: DEFAULT_MAX_RELATED_FILES,
			cache_capacity: DEFAULT_CACHE_CAPACITY,
			database_url: DEFAULT_DATABASE_URL.to_string(),
		}
	}
}

impl SourcemapConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		let non_zero = [
			("max_archive_bytes", self.max_archive_bytes),
			("max_file_bytes", self.max_file_bytes),
			("max_entries", self.max_entries as u64),
			("extraction_timeout_secs", self.extraction_timeout_secs),
			("cache_capacity", self.cache_capacity as u64),
		];
		for (key, value) in non_zero {
			if value == 0 {
				return Err(ConfigError::invalid(key, "must be greater than zero"));
			}
		}
		if self.max_file_bytes > self.max_archive_bytes {
			return Err(ConfigError::Validation(format!(
				"max_file_bytes ({}) exceeds max_archive_bytes ({})",
				self.max_file_bytes, self.max_archive_bytes
			)));
		}
		if self.database_url.trim().is_empty() {
			return Err(ConfigError::invalid("database_url", "must not be empty"));
		}
		Ok(())
	}

	pub fn extraction_timeout(&self) -> Duration {
		Duration::from_secs(self.extraction_timeout_secs)
	}

	pub fn archive_limits(&self) -> ArchiveLimits {
		ArchiveLimits {
			max_archive_bytes: self.max_archive_bytes,
			max_file_bytes: self.max_file_bytes,
			max_entries: self.max_entries,
			extraction_timeout: self.extraction_timeout(),
		}
	}
}

fn load_from(sources: Vec<Box<dyn ConfigSource>>) -> Result<SourcemapConfig, ConfigError> {
	let mut sources = sources;
	sources.sort_by_key(|s| s.precedence());

	let mut merged = SourcemapConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	let config = merged.finalize()?;
	info!(
		max_archive_bytes = config.max_archive_bytes,
		max_file_bytes = config.max_file_bytes,
		max_entries = config.max_entries,
		cache_capacity = config.cache_capacity,
		"sourcemap configuration loaded"
	);
	Ok(config)
}

/// Load configuration from defaults, the system config file and the environment.
pub fn load_config() -> Result<SourcemapConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource::new()),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(config_path: impl Into<PathBuf>) -> Result<SourcemapConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource::new()),
	])
}
