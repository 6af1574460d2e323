// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for symbolication operations.

use loom_sourcemap_core::SchemaViolation;
use thiserror::Error;

/// Errors that can occur while decoding a sourcemap or looking up a position.
#[derive(Debug, Error)]
pub enum SymbolicateError {
	#[error("invalid source map: {0}")]
	Schema(#[from] SchemaViolation),

	#[error("invalid VLQ character: {0}")]
	InvalidVlqChar(char),

	#[error("VLQ value overflows in segment {0:?}")]
	VlqOverflow(String),

	#[error("VLQ segment has {0} fields, expected 1, 4 or 5")]
	InvalidSegmentLength(usize),

	#[error("mapping decodes to a negative {0}")]
	NegativeValue(&'static str),

	#[error("invalid source index: {0}")]
	InvalidSourceIndex(u32),
}

pub type Result<T> = std::result::Result<T, SymbolicateError>;
