// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, TOML files and environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use tracing::{debug, trace};

use super::{ConfigError, SourcemapConfigLayer};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<SourcemapConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<SourcemapConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(SourcemapConfigLayer::default())
	}
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
	#[serde(default)]
	sourcemap: Option<SourcemapConfigLayer>,
}

/// TOML file source; only the `[sourcemap]` table is read.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/loom/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<SourcemapConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(SourcemapConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let file: ConfigFile = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!("parsed sourcemap layer from TOML");
		Ok(file.sourcemap.unwrap_or_default())
	}
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment variable source.
///
/// Convention: LOOM_SERVER_SOURCEMAP_<FIELD>
pub struct EnvSource {
	lookup: Lookup,
}

impl EnvSource {
	pub fn new() -> Self {
		Self::with_lookup(|name| std::env::var(name).ok())
	}

	/// Read variables through `lookup` instead of the process environment.
	pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
		Self {
			lookup: Box::new(lookup),
		}
	}

	fn var(&self, field: &str) -> Option<String> {
		(self.lookup)(&format!("LOOM_SERVER_SOURCEMAP_{field}")).filter(|s| !s.trim().is_empty())
	}

	fn parsed<T: FromStr>(&self, field: &str) -> Result<Option<T>, ConfigError> {
		match self.var(field) {
			Some(v) => v.trim().parse().map(Some).map_err(|_| {
				ConfigError::invalid(
					format!("LOOM_SERVER_SOURCEMAP_{field}"),
					format!("invalid {} value '{v}'", std::any::type_name::<T>()),
				)
			}),
			None => Ok(None),
		}
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<SourcemapConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(SourcemapConfigLayer {
			max_archive_bytes: self.parsed("MAX_ARCHIVE_BYTES")?,
			max_file_bytes: self.parsed("MAX_FILE_BYTES")?,
			max_entries: self.parsed("MAX_ENTRIES")?,
			extraction_timeout_secs: self.parsed("EXTRACTION_TIMEOUT_SECS")?,
			default_context_lines: self.parsed("DEFAULT_CONTEXT_LINES")?,
			max_related_files: self.parsed("MAX_RELATED_FILES")?,
			cache_capacity: self.parsed("CACHE_CAPACITY")?,
			database_url: self.var("DATABASE_URL"),
		})
	}
}
