// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sourcemap symbolication engine for Loom error resolution.
//!
//! This crate provides functionality for:
//! - Parsing JavaScript/TypeScript source maps (v3) after schema checking
//! - Decoding minified positions to original source positions
//! - Extracting source context for display
//! - Finding the function enclosing an original line
//!
//! # Example
//!
//! ```
//! use loom_sourcemap_symbolicate::{extract_context, ParsedSourceMap};
//!
//! let map = ParsedSourceMap::from_str(
//!     r#"{"version":3,"sources":["a.ts"],"names":[],"mappings":"KASE"}"#,
//! )
//! .unwrap();
//!
//! let pos = map.lookup(1, 5).unwrap().unwrap();
//! assert_eq!((pos.source.as_str(), pos.line, pos.column), ("a.ts", 10, 2));
//!
//! let ctx = extract_context("a\nb\nc", 2, 1);
//! assert_eq!(ctx.target, "b");
//! ```

pub mod context;
pub mod error;
pub mod sourcemap;
pub mod vlq;

pub use context::{extract_context, find_enclosing_function, DEFAULT_CONTEXT_LINES};
pub use error::{Result, SymbolicateError};
pub use sourcemap::{OriginalPosition, ParsedSourceMap};
pub use vlq::{decode_vlq_mappings, decode_vlq_segment, DecodedMappings, Mapping, OriginalRef};
