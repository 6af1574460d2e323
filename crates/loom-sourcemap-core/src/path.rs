// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Path helpers for archive entries and stack frame file references.
//!
//! All stored paths are relative, forward-slash separated and free of `.`/`..`
//! segments. Frame file references may be URLs; [`url_path`] reduces them to
//! something comparable with stored paths.

/// Extensions of executable scripts that are expected to ship a sourcemap.
pub const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "jsx"];

/// Normalize an archive entry name into a relative forward-slash path.
///
/// Returns `None` when the entry escapes the archive root (leading `/`, drive
/// prefix, or more `..` segments than parents) or normalizes to nothing.
pub fn normalize_archive_path(raw: &str) -> Option<String> {
	let unified = raw.replace('\\', "/");

	if unified.starts_with('/') || has_drive_prefix(&unified) || unified.contains('\0') {
		return None;
	}

	let mut parts: Vec<&str> = Vec::new();
	for segment in unified.split('/') {
		match segment {
			"" | "." => continue,
			".." => {
				parts.pop()?;
			}
			other => parts.push(other),
		}
	}

	if parts.is_empty() {
		None
	} else {
		Some(parts.join("/"))
	}
}

fn has_drive_prefix(path: &str) -> bool {
	let bytes = path.as_bytes();
	bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Final path segment.
pub fn basename(path: &str) -> &str {
	path.rsplit('/').next().unwrap_or(path)
}

/// Everything before the final `/`, or `""` for top-level files.
pub fn dirname(path: &str) -> &str {
	match path.rfind('/') {
		Some(idx) => &path[..idx],
		None => "",
	}
}

/// Basename with its last extension removed (`app.min.js` → `app.min`).
pub fn stem(path: &str) -> &str {
	let name = basename(path);
	match name.rfind('.') {
		Some(0) | None => name,
		Some(idx) => &name[..idx],
	}
}

/// Lowercased extension of the final segment, if any.
pub fn extension(path: &str) -> Option<String> {
	let name = basename(path);
	match name.rfind('.') {
		Some(0) | None => None,
		Some(idx) => Some(name[idx + 1..].to_ascii_lowercase()),
	}
}

pub fn is_script_path(path: &str) -> bool {
	extension(path)
		.map(|ext| SCRIPT_EXTENSIONS.contains(&ext.as_str()))
		.unwrap_or(false)
}

/// Reduce a frame file reference to a relative path.
///
/// `https://cdn.example.com/static/js/main.js?v=3#x` → `static/js/main.js`,
/// `webpack:///./src/app.ts` → `src/app.ts`, `/abs/dist/a.js` → `abs/dist/a.js`.
pub fn url_path(file: &str) -> String {
	let mut rest = file.trim();

	if let Some(idx) = rest.find(['?', '#']) {
		rest = &rest[..idx];
	}

	if let Some(idx) = rest.find("://") {
		let after_scheme = &rest[idx + 3..];
		let scheme = &rest[..idx];
		rest = if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") {
			match after_scheme.find('/') {
				Some(slash) => &after_scheme[slash..],
				None => "",
			}
		} else {
			after_scheme
		};
	}

	let unified = rest.replace('\\', "/");
	let mut parts: Vec<&str> = Vec::new();
	for segment in unified.split('/') {
		match segment {
			"" | "." => continue,
			".." => {
				parts.pop();
			}
			other => parts.push(other),
		}
	}
	parts
		.into_iter()
		.map(str::to_string)
		.collect::<Vec<_>>()
		.join("/")
}

/// Resolve `relative` against the directory `base_dir`, clamping at the root.
pub fn join_relative(base_dir: &str, relative: &str) -> String {
	if base_dir.is_empty() || relative.starts_with('/') {
		return url_path(relative);
	}
	url_path(&format!("{base_dir}/{relative}"))
}

/// Number of trailing path segments two directories share.
pub fn common_suffix_segments(a: &str, b: &str) -> usize {
	a.rsplit('/')
		.zip(b.rsplit('/'))
		.take_while(|(x, y)| !x.is_empty() && x == y)
		.count()
}
