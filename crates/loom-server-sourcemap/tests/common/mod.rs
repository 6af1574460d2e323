// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::io::{Cursor, Write};

use bytes::Bytes;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use loom_server_sourcemap::{SourcemapConfig, SourcemapService, UploadPairRequest};
use loom_sourcemap_core::ProjectId;

/// Maps generated (1, 5) to `a.ts` line 10 column 2, named `explode`.
pub const MAP: &str =
	r#"{"version":3,"file":"a.js","sources":["a.ts"],"names":["explode"],"mappings":"KASEA"}"#;

pub const BUNDLE: &str = "var x=explode();\n//# sourceMappingURL=a.js.map\n";

pub const ORIGINAL: &str = concat!(
	"import { explode } from './boom';\n",
	"\n",
	"const ready = true;\n",
	"\n",
	"// entry point\n",
	"\n",
	"\n",
	"function boot() {\n",
	"\tif (!ready) return;\n",
	"  explode();\n",
	"}\n",
	"\n",
	"boot();\n",
);

pub fn zip_archive(entries: &[(&str, &str)]) -> Bytes {
	let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
	for (path, content) in entries {
		writer
			.start_file(*path, SimpleFileOptions::default())
			.unwrap();
		writer.write_all(content.as_bytes()).unwrap();
	}
	Bytes::from(writer.finish().unwrap().into_inner())
}

pub fn project(id: &str) -> ProjectId {
	ProjectId::new(id).unwrap()
}

pub async fn service() -> SourcemapService {
	SourcemapService::connect(SourcemapConfig::default())
		.await
		.unwrap()
}

pub fn source_archive() -> Bytes {
	zip_archive(&[("a.js", BUNDLE), ("a.ts", ORIGINAL)])
}

pub fn sourcemap_archive() -> Bytes {
	zip_archive(&[("a.js.map", MAP)])
}

pub fn pair(version: &str, set_active: bool) -> UploadPairRequest {
	UploadPairRequest {
		version: version.to_string(),
		source_archive: source_archive(),
		sourcemap_archive: sourcemap_archive(),
		set_active,
	}
}
