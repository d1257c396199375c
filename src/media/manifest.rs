//! Ordering of transcoded chunks and the ffconcat manifest built from them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ChunkcodeError, Result};
use crate::protocol::TRANSCODED_SUFFIX;

/// Chunk index embedded in a `<stem>_<N>_TC.<ext>` file name.
pub fn chunk_index(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let without_suffix = stem.strip_suffix(TRANSCODED_SUFFIX)?;
    let (_, index) = without_suffix.rsplit_once('_')?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    index.parse().ok()
}

/// Keep only transcoded chunks with the expected extension and order them by
/// their embedded index, ignoring the order they were listed or finished in.
/// When two entries carry the same index the one listed last is kept.
pub fn sort_transcoded_chunks(paths: &[PathBuf], output_extension: &str) -> Vec<PathBuf> {
    let suffix = format!("{}{}", TRANSCODED_SUFFIX, output_extension);
    let mut indexed = BTreeMap::new();
    for path in paths.iter().filter(|p| p.to_string_lossy().ends_with(&suffix)) {
        if let Some(index) = chunk_index(path) {
            indexed.insert(index, path.clone());
        }
    }
    indexed.into_values().collect()
}

/// All chunks must share one directory; the manifest lives next to them.
pub fn common_directory(chunks: &[PathBuf]) -> Result<PathBuf> {
    let first = chunks
        .first()
        .ok_or_else(|| ChunkcodeError::Structural("No chunks to merge".to_string()))?;
    let directory = first.parent().map(Path::to_path_buf).unwrap_or_default();

    if let Some(stray) = chunks.iter().find(|c| c.parent() != Some(directory.as_path())) {
        return Err(ChunkcodeError::Structural(format!(
            "Chunk {} should be in the same directory as the others: {}",
            stray.display(),
            directory.display()
        )));
    }

    Ok(directory)
}

/// One `file '<path>'` line per chunk, single quotes escaped.
pub fn render_concat_manifest(chunks: &[PathBuf]) -> String {
    chunks
        .iter()
        .map(|path| format!("file '{}'", path.to_string_lossy().replace('\'', "\\'")))
        .collect::<Vec<_>>()
        .join("\n")
}
