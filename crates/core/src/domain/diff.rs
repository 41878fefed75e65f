use crate::error::{CoreError, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;

/// Payload of the `git_diff` channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffView {
    pub file_path: String,
    #[serde(default)]
    pub original_content: String,
    #[serde(default)]
    pub new_content: String,
    #[serde(default)]
    pub diff_text: String,
    /// Set when `diff_text` is gzip + base64; the backend sends null otherwise
    #[serde(default)]
    pub diff_compressed: Option<bool>,
}

/// Zero-based line numbers to highlight in each pane of a side-by-side view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffHighlights {
    pub original: BTreeSet<usize>,
    pub new: BTreeSet<usize>,
}

impl DiffView {
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::decode(format!("invalid diff payload: {}", e)))
    }

    /// The unified diff text, decompressed if needed
    pub fn unified_diff(&self) -> Result<String> {
        if self.diff_compressed.unwrap_or(false) {
            decompress_diff(&self.diff_text)
        } else {
            Ok(self.diff_text.clone())
        }
    }

    pub fn highlights(&self) -> Result<DiffHighlights> {
        Ok(highlight_lines(&self.unified_diff()?))
    }
}

/// Decode a gzip + base64 diff body
pub fn decompress_diff(encoded: &str) -> Result<String> {
    let compressed = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| CoreError::decode(format!("diff is not valid base64: {}", e)))?;

    let mut text = String::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_string(&mut text)
        .map_err(|e| CoreError::decode(format!("diff is not valid gzip text: {}", e)))?;
    Ok(text)
}

/// Parse `@@ -a[,b] +c[,d] @@`, returning the 1-based start lines
fn parse_hunk_header(line: &str) -> Option<(usize, usize)> {
    let mut parts = line.strip_prefix("@@ ")?.split_whitespace();
    let original = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;

    let start = |range: &str| range.split(',').next()?.parse::<usize>().ok();
    Some((start(original)?, start(new)?))
}

/// Compute which lines were removed from the original and added to the new file
pub fn highlight_lines(diff_text: &str) -> DiffHighlights {
    let mut highlights = DiffHighlights::default();
    let mut cursor: Option<(usize, usize)> = None;

    for line in diff_text.lines() {
        if line.starts_with("@@") {
            // Start lines are 1-based; a start of 0 means an empty side
            cursor = parse_hunk_header(line)
                .map(|(orig, new)| (orig.saturating_sub(1), new.saturating_sub(1)));
            continue;
        }
        if line.starts_with("diff ") {
            cursor = None;
            continue;
        }

        // File headers and anything before the first hunk
        let Some((orig_line, new_line)) = cursor.as_mut() else {
            continue;
        };

        match line.chars().next() {
            Some('-') => {
                highlights.original.insert(*orig_line);
                *orig_line += 1;
            }
            Some('+') => {
                highlights.new.insert(*new_line);
                *new_line += 1;
            }
            Some('\\') => {}
            _ => {
                *orig_line += 1;
                *new_line += 1;
            }
        }
    }

    highlights
}
