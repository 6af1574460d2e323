// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Base64 VLQ decoding of sourcemap `mappings` strings.
//!
//! Lines are separated by `;`, segments by `,`. Each segment holds 1, 4 or 5
//! delta-encoded values: generated column, source index, original line,
//! original column and name index.

use crate::error::{Result, SymbolicateError};

/// Reverse lookup table for the Base64 alphabet; `-1` marks invalid bytes.
const BASE64_DECODE: [i8; 128] = {
	let alphabet = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
	let mut table = [-1i8; 128];
	let mut i = 0;
	while i < alphabet.len() {
		table[alphabet[i] as usize] = i as i8;
		i += 1;
	}
	table
};

const CONTINUATION_BIT: i64 = 0b10_0000;
const VALUE_MASK: i64 = 0b01_1111;
// Sourcemap values are 32-bit; anything needing more shift is corrupt.
const MAX_SHIFT: u32 = 32;

fn decode_char(ch: u8) -> Result<i64> {
	BASE64_DECODE
		.get(ch as usize)
		.copied()
		.filter(|v| *v >= 0)
		.map(i64::from)
		.ok_or(SymbolicateError::InvalidVlqChar(ch as char))
}

/// Decode one VLQ-encoded segment into its signed values.
pub fn decode_vlq_segment(segment: &str) -> Result<Vec<i64>> {
	let mut values = Vec::with_capacity(5);
	let mut value = 0i64;
	let mut shift = 0u32;

	for ch in segment.bytes() {
		let digit = decode_char(ch)?;
		if shift > MAX_SHIFT {
			return Err(SymbolicateError::VlqOverflow(segment.to_string()));
		}
		value += (digit & VALUE_MASK) << shift;
		shift += 5;

		if digit & CONTINUATION_BIT == 0 {
			// Lowest bit carries the sign.
			let magnitude = value >> 1;
			values.push(if value & 1 != 0 { -magnitude } else { magnitude });
			value = 0;
			shift = 0;
		}
	}

	if shift != 0 {
		// Trailing continuation digit without terminator.
		return Err(SymbolicateError::VlqOverflow(segment.to_string()));
	}

	Ok(values)
}

/// A single decoded segment. All positions are 0-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
	pub generated_line: u32,
	pub generated_column: u32,
	/// `None` for generated-column-only segments
	pub original: Option<OriginalRef>,
}

/// Original side of a mapped segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginalRef {
	pub source_index: u32,
	pub line: u32,
	pub column: u32,
	pub name_index: Option<u32>,
}

/// Mappings sorted by generated position for binary search lookups.
#[derive(Debug, Clone, Default)]
pub struct DecodedMappings {
	mappings: Vec<Mapping>,
}

impl DecodedMappings {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&mut self, mapping: Mapping) {
		self.mappings.push(mapping);
	}

	fn sort(&mut self) {
		// Stable, so segments sharing a column keep their encoded order.
		self.mappings
			.sort_by_key(|m| (m.generated_line, m.generated_column));
	}

	/// Nearest segment at or before `column` on `line` (both 0-indexed),
	/// mapped or not.
	pub fn find(&self, line: u32, column: u32) -> Option<&Mapping> {
		let line_mappings = self.line(line);
		let idx = line_mappings.partition_point(|m| m.generated_column <= column);
		idx.checked_sub(1).map(|i| &line_mappings[i])
	}

	/// All mappings on a generated line, ordered by column.
	pub fn line(&self, line: u32) -> &[Mapping] {
		let start = self.mappings.partition_point(|m| m.generated_line < line);
		let end = self.mappings.partition_point(|m| m.generated_line <= line);
		&self.mappings[start..end]
	}

	pub fn len(&self) -> usize {
		self.mappings.len()
	}

	pub fn is_empty(&self) -> bool {
		self.mappings.is_empty()
	}
}

fn to_u32(value: i64, what: &'static str) -> Result<u32> {
	if value < 0 {
		return Err(SymbolicateError::NegativeValue(what));
	}
	u32::try_from(value).map_err(|_| SymbolicateError::VlqOverflow(value.to_string()))
}

/// Decode a full `mappings` string.
///
/// Segments with a single value (generated column only) are kept with no
/// original position; they end the range of the segment before them.
pub fn decode_vlq_mappings(mappings: &str) -> Result<DecodedMappings> {
	let mut result = DecodedMappings::new();

	let mut source = 0i64;
	let mut original_line = 0i64;
	let mut original_column = 0i64;
	let mut name = 0i64;

	for (generated_line, line) in mappings.split(';').enumerate() {
		let generated_line = to_u32(generated_line as i64, "generated line")?;
		let mut generated_column = 0i64;

		for segment in line.split(',').filter(|s| !s.is_empty()) {
			let values = decode_vlq_segment(segment)?;

			match values.len() {
				1 | 4 | 5 => {}
				n => return Err(SymbolicateError::InvalidSegmentLength(n)),
			}

			generated_column += values[0];
			let original = if values.len() == 1 {
				None
			} else {
				source += values[1];
				original_line += values[2];
				original_column += values[3];
				let name_index = match values.get(4) {
					Some(delta) => {
						name += delta;
						Some(to_u32(name, "name index")?)
					}
					None => None,
				};
				Some(OriginalRef {
					source_index: to_u32(source, "source index")?,
					line: to_u32(original_line, "original line")?,
					column: to_u32(original_column, "original column")?,
					name_index,
				})
			};

			result.add(Mapping {
				generated_line,
				generated_column: to_u32(generated_column, "generated column")?,
				original,
			});
		}
	}

	result.sort();
	Ok(result)
}
