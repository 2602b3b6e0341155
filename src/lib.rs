//! Vault synchronization and indexing engine: a plain-text document format
//! with embedded action tables, an identity-reconciling full-rebuild index,
//! wiki-link graph queries, and move/rename propagation.

pub mod actions;
pub mod document;
pub mod fs;
pub mod index;
pub mod links;
pub mod session;
pub mod vault_lock;



#[cfg(test)]
mod scan_index_test;

pub use document::{ActionItem, Metadata, ParsedDocument};
pub use fs::{DiskFs, FsNode, MemoryFs, VaultFs};
pub use index::{Document, ScanReport, ScanState, VaultIndex};
pub use session::DocumentSession;

use std::path::Path;

/// Write `content` to a temp file next to `path`, fsync, then rename over
/// the target. Readers never observe a partially written file.
pub(crate) fn atomic_write_file(path: &Path, content: &[u8]) -> Result<(), String> {
    use std::io::Write;

    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let temp_path = path.with_file_name(format!("{}.notevault-tmp", file_name));

    let mut file = std::fs::File::create(&temp_path)
        .map_err(|e| format!("Failed to create temp file {:?}: {}", temp_path, e))?;
    file.write_all(content)
        .map_err(|e| format!("Failed to write temp file {:?}: {}", temp_path, e))?;
    file.sync_all()
        .map_err(|e| format!("Failed to sync temp file {:?}: {}", temp_path, e))?;
    drop(file);

    std::fs::rename(&temp_path, path)
        .map_err(|e| format!("Failed to rename {:?} -> {:?}: {}", temp_path, path, e))?;

    Ok(())
}
