//! Persistence layer: the namespaced embedding stores, the OpenIE result
//! cache, and the shared atomic-write helper.

pub mod embedding_store;
pub mod openie_cache;

pub use embedding_store::EmbeddingStore;
pub use openie_cache::{OpenIeCache, OpenIeDoc, OpenIeResults};

use std::path::Path;

use serde::Serialize;

use crate::core::Result;

/// Serialize `value` as JSON and replace `path` atomically: write to a
/// temporary file in the same directory, then rename over the target.
/// Falls back to copy-and-remove when the rename fails (some filesystems
/// refuse cross-device or over-existing renames).
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "store".to_string());
    let tmp_path = parent.join(format!(".{file_name}.tmp"));

    let payload = serde_json::to_string(value)?;
    std::fs::write(&tmp_path, &payload)?;

    if let Err(rename_err) = std::fs::rename(&tmp_path, path) {
        tracing::warn!(error = %rename_err, "atomic rename failed, falling back to replace");
        std::fs::copy(&tmp_path, path)?;
        std::fs::remove_file(&tmp_path)?;
    }
    Ok(())
}
