//! Device export decoders
//!
//! This module provides decoders that read device-specific CPET exports and
//! map them to the canonical [`NormalizedSession`] structure.

mod datamap_json;
mod omnia_csv;

pub use datamap_json::DataMapJsonDecoder;
pub use omnia_csv::OmniaCsvDecoder;

use crate::error::IngestError;
use crate::types::{NormalizedSession, SourceFormat};
use std::path::Path;

/// Trait for format decoders
///
/// Detection is two-stage: a cheap extension check first, then a content
/// probe for format-specific markers. `can_decode` never fails; any I/O or
/// parse problem during probing means "not this format".
pub trait FormatDecoder: Send + Sync {
    /// Human-readable format name, listed in `NoMatchingFormat` errors
    fn name(&self) -> &'static str;

    /// Tag attached to every session this decoder produces
    fn source_format(&self) -> SourceFormat;

    /// Check whether this decoder handles the given file
    fn can_decode(&self, path: &Path) -> bool;

    /// Decode the file into a normalized session
    fn decode(&self, path: &Path) -> Result<NormalizedSession, IngestError>;
}

/// Parse a numeral that may use a comma as decimal separator.
///
/// Surrounding whitespace and quotes are stripped first, so `"22,53"` (with
/// the quotes) parses to `22.53`. `NaN` and infinities are rejected.
pub fn parse_decimal_comma(raw: &str) -> Option<f64> {
    let cleaned = raw
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .replace(',', ".");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Case-insensitive extension check
pub(crate) fn has_extension(path: &Path, expected: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(expected))
}

/// File name without directories, as recorded on the session
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
