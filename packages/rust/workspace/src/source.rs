//! Chunk-source file encoding: one JSON object per line.

use std::path::Path;

use serde::{Deserialize, Serialize};

use postscout_shared::{Post, PostScoutError, Result};

/// One submitted post and the chunk keys its results will arrive under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Index used in the post's chunk keys.
    pub index: usize,
    pub post: Post,
    pub keys: Vec<String>,
}

pub(crate) fn encode(entries: &[SourceEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut out, entry)
            .map_err(|e| PostScoutError::State(format!("failed to encode source entry: {e}")))?;
        out.push(b'\n');
    }
    Ok(out)
}

pub(crate) fn decode(path: &Path, text: &str) -> Result<Vec<SourceEntry>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line).map_err(|e| {
                PostScoutError::State(format!(
                    "{} line {}: {e}",
                    path.display(),
                    number + 1
                ))
            })
        })
        .collect()
}
