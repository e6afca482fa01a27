//! On-disk layout of one governance category.
//!
//! ```text
//! <category>/
//!   _all.rules.md        consolidated index
//!   _all.rules.lock      advisory lock guarding the index
//!   <doc_id>/page.md     source document
//!   <doc_id>/*.ir.json   diagrams attached to the document (any depth)
//!   <doc_id>/rules.md    rule table of the document
//! ```

use crate::error::Result;
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "_all.rules.md";
pub const LOCK_FILE: &str = "_all.rules.lock";
pub const PAGE_FILE: &str = "page.md";
pub const RULES_FILE: &str = "rules.md";
pub const IR_SUFFIX: &str = ".ir.json";

pub fn index_path(category_dir: &Path) -> PathBuf {
    category_dir.join(INDEX_FILE)
}

pub fn lock_path(category_dir: &Path) -> PathBuf {
    category_dir.join(LOCK_FILE)
}

/// Category name defaults to the directory name.
pub fn category_name(category_dir: &Path) -> String {
    category_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string())
}

/// Document directories, sorted by name. Hidden and `_`-prefixed entries are skipped.
pub async fn source_dirs(category_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    let mut entries = tokio::fs::read_dir(category_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }
        dirs.push((name, entry.path()));
    }
    dirs.sort();
    Ok(dirs)
}
