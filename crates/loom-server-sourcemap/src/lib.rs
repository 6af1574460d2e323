// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sourcemap management server implementation for Loom.
//!
//! This crate provides the server-side half of sourcemap management:
//!
//! - Versioned archive storage with safe zip extraction
//! - Association registry with a single active version per project
//! - Error-location resolution with graceful degradation
//! - AI context assembly around a resolved location

pub mod ai_context;
pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod locks;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod service;

pub use ai_context::AiContextBuilder;
pub use archive::{
	extract_zip, ArchiveLimits, ArchiveStore, ExtractedEntry, InMemoryArchiveStore, StoredFile,
	VersionKey,
};
pub use cache::{CacheKey, CacheStats, SourceMapCache};
pub use config::{load_config, load_config_with_file, ConfigError, SourcemapConfig};
pub use error::{Result, SourcemapServerError};
pub use registry::VersionRegistry;
pub use repository::{AssociationRepository, SqliteAssociationRepository};
pub use resolver::{LocationResolver, Resolution};
pub use service::{
	AiContextRequest, AssociationView, LocateRequest, SourcemapService, UploadOutcome,
	UploadPairRequest,
};

#[cfg(test)]
pub(crate) mod test_support {
	use std::io::{Cursor, Write};

	use zip::write::SimpleFileOptions;
	use zip::ZipWriter;

	pub fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
		let owned: Vec<(&str, Vec<u8>)> = entries
			.iter()
			.map(|(path, content)| (*path, content.as_bytes().to_vec()))
			.collect();
		zip_archive_bytes(&owned)
	}

	pub fn zip_archive_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
		let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
		for (path, content) in entries {
			writer
				.start_file(*path, SimpleFileOptions::default())
				.unwrap();
			writer.write_all(content).unwrap();
		}
		writer.finish().unwrap().into_inner()
	}
}
