// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stack trace parsing for browser and Node.js engine formats.
//!
//! Location patterns are tried per line in a fixed order; the first pattern
//! that matches with numeric line/column wins:
//!
//! 1. `at fn (file:line:col)` (V8, attributed call)
//! 2. `at file:line:col` (V8, anonymous call)
//! 3. `fn@file:line:col` (SpiderMonkey / JavaScriptCore)
//! 4. `file:line:col` (bare fallback)

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::path;

static ATTRIBUTED_CALL: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^\s*at\s+(.+?)\s+\((.+):(\d+):(\d+)\)\s*$").unwrap());
static ANONYMOUS_CALL: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^\s*at\s+(.+):(\d+):(\d+)\s*$").unwrap());
static AT_SIGN_CALL: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^\s*([^@\s]*)@(.+):(\d+):(\d+)\s*$").unwrap());
static BARE_LOCATION: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^\s*(\S+):(\d+):(\d+)\s*$").unwrap());

/// One location extracted from a raw stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
	/// File or URL exactly as reported by the engine
	pub file: String,
	/// 1-indexed line in the built file
	pub line: u32,
	/// Column in the built file as reported
	pub column: u32,
	pub function_name: Option<String>,
}

impl Frame {
	pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
		Self {
			file: file.into(),
			line,
			column,
			function_name: None,
		}
	}

	/// `file` reduced to a relative path (scheme, host, query and fragment removed).
	pub fn file_path(&self) -> String {
		path::url_path(&self.file)
	}
}

/// Parse the top frame of a stack trace.
///
/// Returns at most one frame: parsing stops at the first line that yields a
/// location. Unparseable input returns an empty list.
pub fn parse_stack(raw: &str) -> Vec<Frame> {
	raw.lines().find_map(parse_line).into_iter().collect()
}

/// Parse every recognizable frame of a stack trace, in order.
pub fn parse_all(raw: &str) -> Vec<Frame> {
	raw.lines().filter_map(parse_line).collect()
}

/// Parse a single line against the location patterns in priority order.
pub fn parse_line(line: &str) -> Option<Frame> {
	if let Some(caps) = ATTRIBUTED_CALL.captures(line) {
		if let Some(frame) = frame_from(&caps, Some(1), 2) {
			return Some(frame);
		}
	}
	if let Some(caps) = ANONYMOUS_CALL.captures(line) {
		if let Some(frame) = frame_from(&caps, None, 1) {
			return Some(frame);
		}
	}
	if let Some(caps) = AT_SIGN_CALL.captures(line) {
		if let Some(frame) = frame_from(&caps, Some(1), 2) {
			return Some(frame);
		}
	}
	if let Some(caps) = BARE_LOCATION.captures(line) {
		if let Some(frame) = frame_from(&caps, None, 1) {
			return Some(frame);
		}
	}
	None
}

fn frame_from(caps: &Captures<'_>, function_group: Option<usize>, file_group: usize) -> Option<Frame> {
	let file = caps.get(file_group)?.as_str().trim();
	if file.is_empty() {
		return None;
	}
	// Overflowing numbers count as a non-match.
	let line = caps.get(file_group + 1)?.as_str().parse::<u32>().ok()?;
	let column = caps.get(file_group + 2)?.as_str().parse::<u32>().ok()?;

	let function_name = function_group
		.and_then(|group| caps.get(group))
		.map(|m| m.as_str().trim())
		.filter(|name| !name.is_empty() && *name != "<anonymous>")
		.map(str::to_string);

	Some(Frame {
		file: file.to_string(),
		line,
		column,
		function_name,
	})
}
