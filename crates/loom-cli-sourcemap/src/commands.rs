// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Args;
use serde::Serialize;
use tracing::{info, instrument};

use loom_server_sourcemap::{
	extract_zip, AiContextRequest, LocateRequest, SourcemapConfig, SourcemapService,
	UploadPairRequest,
};
use loom_sourcemap_core::{
	parse_all, parse_stack, validate, ProjectId, ResolvedLocation, SourceFile, SourcemapFile,
	ValidationReport,
};

const LOCAL_PROJECT: &str = "local";

#[derive(Debug, Clone, Args)]
pub struct ValidateArgs {
	/// Zip archive of built source files
	pub source: PathBuf,

	/// Zip archive of sourcemaps
	pub sourcemaps: PathBuf,

	/// Print the report as JSON
	#[arg(long)]
	pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ParseStackArgs {
	/// File containing the stack trace (stdin when omitted)
	pub input: Option<PathBuf>,

	/// Print every recognizable frame instead of the top one
	#[arg(long)]
	pub all: bool,

	#[arg(long)]
	pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct LocateArgs {
	/// Zip archive of built source files
	#[arg(long)]
	pub source: PathBuf,

	/// Zip archive of sourcemaps
	#[arg(long)]
	pub sourcemaps: PathBuf,

	/// Built location as FILE:LINE[:COLUMN]
	#[arg(long, conflicts_with = "stack_file", required_unless_present = "stack_file")]
	pub frame: Option<String>,

	/// File containing a stack trace; its top frame is resolved
	#[arg(long)]
	pub stack_file: Option<PathBuf>,

	/// Lines of context before and after the original line
	#[arg(long)]
	pub context: Option<usize>,

	#[arg(long)]
	pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct AiContextArgs {
	#[command(flatten)]
	pub locate: LocateArgs,

	/// Additional original files to include (repeatable)
	#[arg(long = "related")]
	pub related: Vec<String>,
}

fn read_archive(path: &Path) -> anyhow::Result<Bytes> {
	let data = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
	Ok(Bytes::from(data))
}

/// Split `FILE:LINE[:COLUMN]`, keeping colons inside the file part.
pub fn parse_frame_arg(raw: &str) -> anyhow::Result<(String, u32, Option<u32>)> {
	let mut parts = raw.rsplitn(3, ':');
	let last = parts.next().unwrap_or_default();
	let middle = parts.next();
	let rest = parts.next();

	match (rest, middle) {
		(Some(file), Some(line)) if line.parse::<u32>().is_ok() && last.parse::<u32>().is_ok() => {
			Ok((file.to_string(), line.parse()?, Some(last.parse()?)))
		}
		_ => {
			let (file, line) = raw
				.rsplit_once(':')
				.context("expected FILE:LINE[:COLUMN]")?;
			let line: u32 = line
				.parse()
				.with_context(|| format!("invalid line number in {raw}"))?;
			if file.is_empty() || line == 0 {
				bail!("expected FILE:LINE[:COLUMN], got {raw}");
			}
			Ok((file.to_string(), line, None))
		}
	}
}

pub fn validate_archives(
	source: &[u8],
	sourcemaps: &[u8],
	config: &SourcemapConfig,
) -> anyhow::Result<ValidationReport> {
	let limits = config.archive_limits();
	let cancelled = AtomicBool::new(false);

	let source_files: Vec<SourceFile> = extract_zip(source, &limits, &cancelled)
		.context("source archive rejected")?
		.into_iter()
		.map(|e| SourceFile::from_content(e.path, &e.content))
		.collect();
	let sourcemap_files: Vec<SourcemapFile> = extract_zip(sourcemaps, &limits, &cancelled)
		.context("sourcemap archive rejected")?
		.into_iter()
		.map(|e| SourcemapFile::new(e.path, e.content))
		.collect();

	Ok(validate(&source_files, &sourcemap_files))
}

pub fn handle_validate(args: ValidateArgs, config: &SourcemapConfig) -> anyhow::Result<()> {
	let report = validate_archives(
		&read_archive(&args.source)?,
		&read_archive(&args.sourcemaps)?,
		config,
	)?;

	if args.json {
		println!("{}", serde_json::to_string_pretty(&report)?);
	} else {
		for issue in &report.issues {
			println!("{:?}\t{:?}\t{}", issue.severity, issue.issue_type, issue.message);
		}
		let s = &report.summary;
		println!(
			"{} files, {} scripts, {} sourcemaps, {} missing, {} invalid, {:.2}% coverage",
			s.total_files,
			s.script_files,
			s.sourcemap_files,
			s.missing_sourcemaps,
			s.invalid_sourcemaps,
			s.coverage_percent
		);
	}

	if !report.is_valid {
		bail!("sourcemap validation failed");
	}
	Ok(())
}

pub fn handle_parse_stack(args: ParseStackArgs) -> anyhow::Result<()> {
	let raw = match &args.input {
		Some(path) => std::fs::read_to_string(path)
			.with_context(|| format!("failed to read {}", path.display()))?,
		None => {
			let mut buf = String::new();
			std::io::stdin().read_to_string(&mut buf)?;
			buf
		}
	};
	let frames = if args.all { parse_all(&raw) } else { parse_stack(&raw) };

	if args.json {
		println!("{}", serde_json::to_string_pretty(&frames)?);
	} else {
		for frame in &frames {
			match &frame.function_name {
				Some(name) => println!("{name} {}:{}:{}", frame.file, frame.line, frame.column),
				None => println!("{}:{}:{}", frame.file, frame.line, frame.column),
			}
		}
	}
	Ok(())
}

impl LocateArgs {
	fn request(&self) -> anyhow::Result<LocateRequest> {
		let mut request = match (&self.frame, &self.stack_file) {
			(Some(frame), _) => {
				let (file, line, column) = parse_frame_arg(frame)?;
				LocateRequest::at(file, line, column)
			}
			(None, Some(path)) => LocateRequest {
				error_message: Some(
					std::fs::read_to_string(path)
						.with_context(|| format!("failed to read {}", path.display()))?,
				),
				..Default::default()
			},
			(None, None) => bail!("either --frame or --stack-file is required"),
		};
		request.context_lines = self.context;
		Ok(request)
	}

	/// Load both archives into a fresh service as the active version.
	#[instrument(skip(self, config), fields(source = %self.source.display()))]
	async fn load(&self, config: SourcemapConfig) -> anyhow::Result<(SourcemapService, ProjectId)> {
		let service = SourcemapService::connect(config).await?;
		let project = ProjectId::new(LOCAL_PROJECT)?;
		let outcome = service
			.upload_pair(
				&project,
				UploadPairRequest {
					version: LOCAL_PROJECT.to_string(),
					source_archive: read_archive(&self.source)?,
					sourcemap_archive: read_archive(&self.sourcemaps)?,
					set_active: true,
				},
			)
			.await?;
		info!(
			is_valid = outcome.is_valid,
			coverage = outcome.summary.coverage_percent,
			"archives loaded"
		);
		Ok((service, project))
	}
}

fn print_location(location: &ResolvedLocation) {
	let column = location
		.original_column
		.map(|c| format!(":{c}"))
		.unwrap_or_default();
	match &location.function_name {
		Some(name) => println!("{}:{}{column} in {name}", location.original_file, location.original_line),
		None => println!("{}:{}{column}", location.original_file, location.original_line),
	}
	if location.is_degraded() {
		println!("degraded: {:?}", location.degradation_reasons());
	}

	let ctx = &location.context_lines;
	if ctx.is_empty() {
		return;
	}
	let first = location.original_line as usize - ctx.pre.len();
	for (i, line) in ctx.pre.iter().enumerate() {
		println!("  {:>5} | {line}", first + i);
	}
	println!("> {:>5} | {}", location.original_line, ctx.target);
	for (i, line) in ctx.post.iter().enumerate() {
		println!("  {:>5} | {line}", location.original_line as usize + 1 + i);
	}
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

pub async fn handle_locate(args: LocateArgs, config: SourcemapConfig) -> anyhow::Result<()> {
	let request = args.request()?;
	let (service, project) = args.load(config).await?;
	let location = service.locate_by_error(&project, &request).await?;

	if args.json {
		print_json(&location)
	} else {
		print_location(&location);
		Ok(())
	}
}

pub async fn handle_ai_context(args: AiContextArgs, config: SourcemapConfig) -> anyhow::Result<()> {
	let request = AiContextRequest {
		location: args.locate.request()?,
		related_files: args.related.clone(),
	};
	let (service, project) = args.locate.load(config).await?;
	let context = service.prepare_ai_context(&project, &request).await?;

	if args.locate.json {
		return print_json(&context);
	}
	print_location(&context.location);
	for file in &context.files {
		println!("\n=== {} ({:?}) ===\n{}", file.path, file.role, file.content);
	}
	for skipped in &context.skipped {
		println!("skipped {} ({:?})", skipped.path, skipped.reason);
	}
	if context.truncated {
		println!("related files truncated");
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::{Cursor, Write};
	use zip::write::SimpleFileOptions;
	use zip::ZipWriter;

	fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
		let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
		for (path, content) in entries {
			writer
				.start_file(*path, SimpleFileOptions::default())
				.unwrap();
			writer.write_all(content.as_bytes()).unwrap();
		}
		writer.finish().unwrap().into_inner()
	}

	const MAP: &str = r#"{"version":3,"sources":["a.ts"],"names":[],"mappings":"KASE"}"#;

	#[test]
	fn test_parse_frame_arg_with_column() {
		assert_eq!(
			parse_frame_arg("bundle.js:12:34").unwrap(),
			("bundle.js".to_string(), 12, Some(34))
		);
	}

	#[test]
	fn test_parse_frame_arg_keeps_url_colons() {
		assert_eq!(
			parse_frame_arg("https://cdn.example.com:8443/a.js:3:7").unwrap(),
			("https://cdn.example.com:8443/a.js".to_string(), 3, Some(7))
		);
		assert_eq!(
			parse_frame_arg("https://cdn.example.com/a.js:3").unwrap(),
			("https://cdn.example.com/a.js".to_string(), 3, None)
		);
	}

	#[test]
	fn test_parse_frame_arg_rejects_garbage() {
		assert!(parse_frame_arg("bundle.js").is_err());
		assert!(parse_frame_arg("bundle.js:abc").is_err());
		assert!(parse_frame_arg(":0").is_err());
	}

	#[test]
	fn test_validate_archives_reports_missing() {
		let source = zip_archive(&[("a.js", "a()"), ("b.js", "b()")]);
		let maps = zip_archive(&[("a.js.map", MAP)]);
		let report = validate_archives(&source, &maps, &SourcemapConfig::default()).unwrap();
		assert_eq!(report.summary.script_files, 2);
		assert_eq!(report.summary.missing_sourcemaps, 1);
		assert_eq!(report.summary.coverage_percent, 50.0);
		assert!(report.is_valid);
	}

	#[test]
	fn test_validate_archives_rejects_bad_zip() {
		let maps = zip_archive(&[("a.js.map", MAP)]);
		assert!(validate_archives(b"nope", &maps, &SourcemapConfig::default()).is_err());
	}

	#[tokio::test]
	async fn test_locate_args_load_and_resolve() {
		let dir = tempfile::tempdir().unwrap();
		let source = dir.path().join("source.zip");
		let maps = dir.path().join("maps.zip");
		std::fs::write(&source, zip_archive(&[("a.js", "x"), ("a.ts", "1\n2\n3\n4\n5\n6\n7\n8\n9\n  boom();\n")])).unwrap();
		std::fs::write(&maps, zip_archive(&[("a.js.map", MAP)])).unwrap();

		let args = LocateArgs {
			source,
			sourcemaps: maps,
			frame: Some("a.js:1:5".to_string()),
			stack_file: None,
			context: Some(1),
			json: false,
		};
		let request = args.request().unwrap();
		let (service, project) = args.load(SourcemapConfig::default()).await.unwrap();
		let location = service.locate_by_error(&project, &request).await.unwrap();
		assert_eq!(location.original_file, "a.ts");
		assert_eq!(location.original_line, 10);
		assert_eq!(location.context_lines.pre, vec!["9"]);
		assert_eq!(location.context_lines.target, "  boom();");
	}
}
