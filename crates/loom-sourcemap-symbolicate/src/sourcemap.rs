// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sourcemap parsing and position lookup.
//!
//! Documents are schema-checked by [`loom_sourcemap_core::check_sourcemap`]
//! before any field is used, then their mappings are decoded once so lookups
//! are binary searches.

use loom_sourcemap_core::check_sourcemap;

use crate::error::{Result, SymbolicateError};
use crate::vlq::{decode_vlq_mappings, DecodedMappings, OriginalRef};

/// Parsed sourcemap ready for lookups.
#[derive(Debug, Clone)]
pub struct ParsedSourceMap {
	pub file: Option<String>,
	pub source_root: Option<String>,
	/// `None` where the document lists `null`
	pub sources: Vec<Option<String>>,
	pub sources_content: Vec<Option<String>>,
	pub names: Vec<String>,
	mappings: DecodedMappings,
}

/// Original position for a generated position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition {
	/// Source path with `sourceRoot` applied
	pub source: String,
	pub source_index: u32,
	/// 1-indexed
	pub line: u32,
	/// 0-indexed
	pub column: u32,
	/// Entry from `names`, when the mapping carries one
	pub name: Option<String>,
}

impl ParsedSourceMap {
	pub fn from_bytes(data: &[u8]) -> Result<Self> {
		let raw = check_sourcemap(data)?;
		let mappings = decode_vlq_mappings(&raw.mappings)?;

		Ok(Self {
			file: raw.file,
			source_root: raw.source_root,
			sources: raw.sources,
			sources_content: raw.sources_content,
			names: raw.names,
			mappings,
		})
	}

	pub fn from_str(data: &str) -> Result<Self> {
		Self::from_bytes(data.as_bytes())
	}

	/// Look up the original position of a generated position.
	///
	/// `line` is 1-indexed as in stack traces, `column` is used as-is against
	/// the 0-indexed generated columns; the nearest segment at or before it on
	/// that line wins. `Ok(None)` means the line has no segment there, the
	/// nearest segment is unmapped, or its source is `null`.
	pub fn lookup(&self, line: u32, column: u32) -> Result<Option<OriginalPosition>> {
		let Some(original) = self
			.mappings
			.find(line.saturating_sub(1), column)
			.and_then(|mapping| mapping.original)
		else {
			return Ok(None);
		};
		self.position_for(&original)
	}

	fn position_for(&self, original: &OriginalRef) -> Result<Option<OriginalPosition>> {
		let Some(source) = self
			.sources
			.get(original.source_index as usize)
			.ok_or(SymbolicateError::InvalidSourceIndex(original.source_index))?
		else {
			return Ok(None);
		};

		// Out-of-range name indices are ignored rather than failing the lookup.
		let name = original
			.name_index
			.and_then(|idx| self.names.get(idx as usize).cloned());

		Ok(Some(OriginalPosition {
			source: self.resolve_source_path(source),
			source_index: original.source_index,
			line: original.line + 1,
			column: original.column,
			name,
		}))
	}

	fn resolve_source_path(&self, source: &str) -> String {
		match &self.source_root {
			Some(root) if !root.is_empty() => {
				let root = root.trim_end_matches('/');
				format!("{}/{}", root, source)
			}
			_ => source.to_string(),
		}
	}

	/// Embedded `sourcesContent` entry for a source index.
	pub fn source_content(&self, source_index: u32) -> Option<&str> {
		self.sources_content
			.get(source_index as usize)
			.and_then(|c| c.as_deref())
	}

	pub fn has_sources_content(&self) -> bool {
		self.sources_content.iter().any(|c| c.is_some())
	}

	pub fn mapping_count(&self) -> usize {
		self.mappings.len()
	}
}
