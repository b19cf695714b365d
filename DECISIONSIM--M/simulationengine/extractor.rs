use serde_json::Value;
use thiserror::Error;

use crate::assessment::{normalize, Assessment};

const PREVIEW_CHARS: usize = 160;

/// Failures turning raw model text into an [`Assessment`].
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The text was empty or whitespace only.
    #[error("model returned an empty response")]
    EmptyResponse,
    /// No `{ ... }` region could be located.
    #[error("model output contains no JSON object: {}", preview(.raw))]
    MalformedOutput {
        /// Trimmed model output, kept for diagnostics.
        raw: String,
    },
    /// A region was found but does not parse as JSON.
    #[error("model output JSON could not be parsed: {source}")]
    InvalidJson {
        /// The candidate region that failed to parse.
        region: String,
        /// Parser error.
        source: serde_json::Error,
    },
}

/// Returns the slice from the first `{` to the last `}` inclusive.
///
/// This is a heuristic: unrelated brace fragments before or after the real
/// object end up inside the region and make it fail to parse.
#[must_use]
pub fn locate_candidate(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Extracts and normalizes an assessment from untrusted model output.
pub fn extract_assessment(raw: &str) -> Result<Assessment, ExtractionError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }
    let region = locate_candidate(text).ok_or_else(|| ExtractionError::MalformedOutput {
        raw: text.to_owned(),
    })?;
    let value: Value =
        serde_json::from_str(region).map_err(|source| ExtractionError::InvalidJson {
            region: region.to_owned(),
            source,
        })?;
    Ok(normalize(&value))
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_owned();
    }
    let mut cut: String = text.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}
