// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Code context extraction and enclosing-function detection.

use loom_sourcemap_core::ContextLines;
use regex::Regex;
use std::sync::LazyLock;

/// Default number of lines shown before and after the target line.
pub const DEFAULT_CONTEXT_LINES: usize = 3;

const IDENT: &str = r"[A-Za-z_$][\w$]*";

static FUNCTION_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(&format!(r"\bfunction\s*\*?\s*({IDENT})\s*[(<]")).unwrap()
});
static ARROW_OR_FUNCTION_BINDING: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(&format!(
		r"\b(?:const|let|var)\s+({IDENT})\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*(?::[^=]+)?=>|{IDENT}\s*=>)"
	))
	.unwrap()
});
static PROPERTY_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(&format!(
		r"({IDENT})\s*[:=]\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*=>)"
	))
	.unwrap()
});
static METHOD_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(&format!(
		r"^\s*(?:(?:public|private|protected|static|async|override|readonly|get|set)\s+)*\*?({IDENT})\s*(?:<[^>]*>)?\s*\([^)]*\)\s*(?::\s*[^{{]+)?\{{\s*$"
	))
	.unwrap()
});

const NOT_FUNCTION_NAMES: &[&str] = &[
	"if", "for", "while", "switch", "catch", "with", "return", "function", "else", "do",
];

/// Extract lines around a 1-indexed line.
///
/// Windows are clamped to the file; a target past the end yields an empty
/// target line and whatever neighbours exist.
pub fn extract_context(source_content: &str, line: u32, context_lines: usize) -> ContextLines {
	let lines: Vec<&str> = source_content.lines().collect();
	let target_idx = (line as usize).saturating_sub(1);

	let pre_start = target_idx.saturating_sub(context_lines).min(lines.len());
	let pre_end = target_idx.min(lines.len());
	let post_start = (target_idx + 1).min(lines.len());
	let post_end = (target_idx + 1 + context_lines).min(lines.len());

	ContextLines {
		pre: lines[pre_start..pre_end].iter().map(|s| s.to_string()).collect(),
		target: lines.get(target_idx).map(|s| s.to_string()).unwrap_or_default(),
		post: lines[post_start..post_end].iter().map(|s| s.to_string()).collect(),
	}
}

/// Name of the nearest function or method declared at or above a 1-indexed line.
pub fn find_enclosing_function(source_content: &str, line: u32) -> Option<String> {
	let lines: Vec<&str> = source_content.lines().collect();
	if lines.is_empty() {
		return None;
	}
	let start = ((line as usize).saturating_sub(1)).min(lines.len() - 1);

	lines[..=start].iter().rev().find_map(|l| function_name_in(l))
}

fn function_name_in(line: &str) -> Option<String> {
	let patterns: [&Regex; 4] = [
		&FUNCTION_DECLARATION,
		&ARROW_OR_FUNCTION_BINDING,
		&PROPERTY_FUNCTION,
		&METHOD_SIGNATURE,
	];
	patterns.iter().find_map(|re| {
		re.captures(line)
			.and_then(|caps| caps.get(1))
			.map(|m| m.as_str())
			.filter(|name| !NOT_FUNCTION_NAMES.contains(name))
			.map(str::to_string)
	})
}
