// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Consistency validation between a source file set and a sourcemap set.
//!
//! [`validate`] is pure: it only looks at the two lists it is given. Issues
//! are emitted in a stable order (scripts by path, then orphaned maps by path)
//! so repeated runs over the same input produce identical reports.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::artifact::{SourceFile, SourcemapFile};
use crate::error::SourcemapError;
use crate::path;
use crate::schema::check_sourcemap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
	MissingSourcemap,
	InvalidSourcemap,
	PathMismatch,
}

impl fmt::Display for IssueType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::MissingSourcemap => write!(f, "missing_sourcemap"),
			Self::InvalidSourcemap => write!(f, "invalid_sourcemap"),
			Self::PathMismatch => write!(f, "path_mismatch"),
		}
	}
}

impl FromStr for IssueType {
	type Err = SourcemapError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"missing_sourcemap" => Ok(Self::MissingSourcemap),
			"invalid_sourcemap" => Ok(Self::InvalidSourcemap),
			"path_mismatch" => Ok(Self::PathMismatch),
			_ => Err(SourcemapError::InvalidIssueType(s.to_string())),
		}
	}
}

/// Only `Error` makes a report invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	Error,
	Warning,
	Info,
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Error => write!(f, "error"),
			Self::Warning => write!(f, "warning"),
			Self::Info => write!(f, "info"),
		}
	}
}

impl FromStr for Severity {
	type Err = SourcemapError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"error" => Ok(Self::Error),
			"warning" => Ok(Self::Warning),
			"info" => Ok(Self::Info),
			_ => Err(SourcemapError::InvalidSeverity(s.to_string())),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
	#[serde(rename = "type")]
	pub issue_type: IssueType,
	pub file: String,
	pub severity: Severity,
	pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
	/// All files in the source upload
	pub total_files: usize,
	/// Source files that require a sourcemap
	pub script_files: usize,
	pub sourcemap_files: usize,
	pub missing_sourcemaps: usize,
	pub invalid_sourcemaps: usize,
	/// Rounded to 2 decimals; 0 when there are no scripts
	pub coverage_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
	pub issues: Vec<Issue>,
	pub summary: ValidationSummary,
	pub is_valid: bool,
}

impl ValidationReport {
	pub fn count(&self, severity: Severity) -> usize {
		self.issues.iter().filter(|i| i.severity == severity).count()
	}

	pub fn issues_of(&self, issue_type: IssueType) -> impl Iterator<Item = &Issue> {
		self.issues.iter().filter(move |i| i.issue_type == issue_type)
	}
}

/// Rule that paired a script with its sourcemap, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
	/// The script's `//# sourceMappingURL=` names the map
	SourceMappingUrl,
	/// `X.js` → `X.js.map`
	ExactName,
	/// Same directory, same basename ignoring extensions
	SameDirectoryBasename,
}

/// Find the sourcemap for a script path. First rule that matches wins.
///
/// Within [`MatchRule::ExactName`] candidates, a map whose target is exactly
/// `script_path` is preferred, then the one sharing the most trailing
/// directory segments with the script, then the lexicographically first path.
pub fn find_sourcemap(
	script_path: &str,
	source_mapping_url: Option<&str>,
	maps: &[SourcemapFile],
) -> Option<(usize, MatchRule)> {
	if let Some(url) = source_mapping_url {
		if let Some(idx) = maps.iter().position(|m| m.path == url) {
			return Some((idx, MatchRule::SourceMappingUrl));
		}
	}

	let expected_name = format!("{}.map", path::basename(script_path));
	let script_dir = path::dirname(script_path);

	let exact = maps
		.iter()
		.enumerate()
		.filter(|(_, m)| path::basename(&m.path) == expected_name)
		.min_by_key(|(_, m)| {
			(
				Reverse(m.target_file_hint() == script_path),
				Reverse(path::common_suffix_segments(path::dirname(&m.path), script_dir)),
				m.path.as_str(),
			)
		});
	if let Some((idx, _)) = exact {
		return Some((idx, MatchRule::ExactName));
	}

	let script_stem = path::stem(script_path);
	maps.iter()
		.enumerate()
		.filter(|(_, m)| path::dirname(&m.path) == script_dir)
		.filter(|(_, m)| {
			let hint = m.target_file_hint();
			path::extension(hint).is_none() || path::is_script_path(hint)
		})
		.filter(|(_, m)| path::stem(m.target_file_hint()) == script_stem)
		.min_by_key(|(_, m)| m.path.as_str())
		.map(|(idx, _)| (idx, MatchRule::SameDirectoryBasename))
}

/// Validate a source upload against a sourcemap upload.
pub fn validate(source_files: &[SourceFile], sourcemap_files: &[SourcemapFile]) -> ValidationReport {
	let mut scripts: Vec<&SourceFile> = source_files.iter().filter(|f| f.is_script()).collect();
	scripts.sort_by(|a, b| a.path.cmp(&b.path));

	let mut maps: Vec<SourcemapFile> = sourcemap_files.to_vec();
	maps.sort_by(|a, b| a.path.cmp(&b.path));

	let mut issues = Vec::new();
	let mut claimed = BTreeSet::new();
	let mut checked: BTreeMap<usize, bool> = BTreeMap::new();
	let mut missing = 0usize;
	let mut invalid = 0usize;

	for script in &scripts {
		let Some((idx, _rule)) =
			find_sourcemap(&script.path, script.source_mapping_url.as_deref(), &maps)
		else {
			missing += 1;
			issues.push(Issue {
				issue_type: IssueType::MissingSourcemap,
				file: script.path.clone(),
				severity: Severity::Warning,
				message: format!("no sourcemap found for {}", script.path),
			});
			continue;
		};

		let map = &maps[idx];
		claimed.insert(idx);

		if !checked.contains_key(&idx) {
			let result = check_sourcemap(&map.content);
			if let Err(violation) = &result {
				invalid += 1;
				issues.push(Issue {
					issue_type: IssueType::InvalidSourcemap,
					file: map.path.clone(),
					severity: Severity::Error,
					message: format!("sourcemap {} for {} is invalid: {}", map.path, script.path, violation),
				});
			}
			checked.insert(idx, result.is_ok());
		}

		if path::dirname(&map.path) != path::dirname(&script.path) {
			issues.push(Issue {
				issue_type: IssueType::PathMismatch,
				file: map.path.clone(),
				severity: Severity::Warning,
				message: format!(
					"sourcemap {} is not in the same directory as {}",
					map.path, script.path
				),
			});
		}
	}

	for (idx, map) in maps.iter().enumerate() {
		if !claimed.contains(&idx) {
			issues.push(Issue {
				issue_type: IssueType::PathMismatch,
				file: map.path.clone(),
				severity: Severity::Info,
				message: format!("sourcemap {} does not correspond to any script file", map.path),
			});
		}
	}

	let coverage_percent = coverage(scripts.len(), missing);
	let is_valid = !issues.iter().any(|i| i.severity == Severity::Error);

	ValidationReport {
		issues,
		summary: ValidationSummary {
			total_files: source_files.len(),
			script_files: scripts.len(),
			sourcemap_files: maps.len(),
			missing_sourcemaps: missing,
			invalid_sourcemaps: invalid,
			coverage_percent,
		},
		is_valid,
	}
}

fn coverage(script_count: usize, missing: usize) -> f64 {
	if script_count == 0 {
		return 0.0;
	}
	let percent = (script_count - missing) as f64 / script_count as f64 * 100.0;
	(percent * 100.0).round() / 100.0
}
