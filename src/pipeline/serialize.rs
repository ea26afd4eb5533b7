//! Stable JSON serialization of pipelines.
//!
//! Output is two-space pretty JSON with one exception: arrays of numbers
//! (embedding positions) are written on a single line so diffs stay readable.
//! Serializing the same pipeline twice yields identical bytes.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use super::types::{Pipeline, BOOK_VERSION};
use crate::error::{ForgeError, VersionMismatchError};

fn numeric_array() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let number = r"-?\d[\d.eE+-]*";
        Regex::new(&format!(r"\[\n\s*{number}(?:,\n\s*{number})*\n\s*\]"))
            .expect("Invalid regex for numeric arrays")
    })
}

/// Serialize `pipeline` to its stable JSON form, newline-terminated.
pub fn pipeline_to_json(pipeline: &Pipeline) -> Result<String, serde_json::Error> {
    let pretty = serde_json::to_string_pretty(pipeline)?;
    let collapsed = numeric_array().replace_all(&pretty, |captures: &Captures<'_>| {
        let items: Vec<&str> = captures[0]
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(str::trim)
            .collect();
        format!("[{}]", items.join(", "))
    });
    Ok(format!("{collapsed}\n"))
}

/// Check that a pipeline written for `found` can be read by this engine.
///
/// Same major version, and a minor version no newer than the engine's.
pub fn check_book_version(found: &str) -> Result<(), VersionMismatchError> {
    let mismatch = || VersionMismatchError {
        expected: BOOK_VERSION.to_string(),
        found: found.to_string(),
    };
    let engine = semver::Version::parse(BOOK_VERSION).map_err(|_| mismatch())?;
    let found_version = semver::Version::parse(found).map_err(|_| mismatch())?;
    if found_version.major == engine.major && found_version.minor <= engine.minor {
        Ok(())
    } else {
        Err(mismatch())
    }
}

/// Parse a pipeline from JSON, rejecting incompatible book versions before
/// looking at the rest of the document.
pub fn pipeline_from_json(json: &str) -> Result<Pipeline, ForgeError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let found = value
        .get("bookVersion")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    check_book_version(found)?;
    Ok(serde_json::from_value(value)?)
}
