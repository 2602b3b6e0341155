//! Vault filesystem access.
//!
//! Everything above this layer speaks vault-relative slash paths. `DiskFs`
//! maps those onto a root directory on disk; `MemoryFs` keeps a flat in-memory
//! arena so the index and link machinery can be tested without touching disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::atomic_write_file;

/// One entry of a vault tree listing. `content` is populated only for
/// markdown files; everything else carries `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsNode {
    pub path: String,
    pub is_dir: bool,
    pub extension: Option<String>,
    pub content: Option<String>,
}

impl FsNode {
    pub fn is_markdown(&self) -> bool {
        !self.is_dir && self.extension.as_deref() == Some("md")
    }
}

/// Vault storage operations. Paths are vault-relative with `/` separators.
pub trait VaultFs: Send + Sync {
    /// List every entry in the vault, hidden entries excluded.
    fn list_tree(&self) -> Result<Vec<FsNode>, String>;

    fn read_file(&self, path: &str) -> Result<String, String>;

    /// Write file contents atomically; intermediate directories are created.
    fn write_file(&self, path: &str, content: &str) -> Result<(), String>;

    /// Move a file or directory into `dest_dir`, returning its new path.
    fn move_entry(&self, src: &str, dest_dir: &str) -> Result<String, String>;

    /// Rename a file or directory in place, returning its new path.
    fn rename_entry(&self, old_path: &str, new_name: &str) -> Result<String, String>;

    fn delete_file(&self, path: &str) -> Result<(), String>;

    fn delete_dir(&self, path: &str) -> Result<(), String>;

    fn create_dir(&self, path: &str) -> Result<(), String>;
}

/// Join a vault-relative path onto `dir`, using the final path segment as
/// the entry name.
fn joined_path(dir: &str, src: &str) -> String {
    let name = src.rsplit('/').next().unwrap_or(src);
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Replace the final path segment of `path` with `new_name`.
fn renamed_path(path: &str, new_name: &str) -> String {
    match path.rsplit_once('/') {
        Some((parent, _)) => format!("{}/{}", parent, new_name),
        None => new_name.to_string(),
    }
}

/// Vault rooted at a directory on disk.
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abs(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn rel(&self, abs: &Path) -> String {
        abs.strip_prefix(&self.root)
            .unwrap_or(abs)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

impl VaultFs for DiskFs {
    fn list_tree(&self) -> Result<Vec<FsNode>, String> {
        let mut nodes = Vec::new();

        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|e| {
            e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy())
        });

        for entry in walker {
            let entry = entry.map_err(|e| format!("Failed to walk vault: {}", e))?;
            if entry.depth() == 0 {
                continue;
            }

            let path = self.rel(entry.path());
            let is_dir = entry.file_type().is_dir();
            let extension = entry
                .path()
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase());

            // Only markdown content is interesting to callers. A file that
            // cannot be read mid-walk is listed with no content; consumers
            // that need it retry through read_file and see the real error.
            let content = if !is_dir && extension.as_deref() == Some("md") {
                match fs::read_to_string(entry.path()) {
                    Ok(text) => Some(text),
                    Err(e) => {
                        log::warn!("[list_tree] Failed to read {}: {}", path, e);
                        None
                    }
                }
            } else {
                None
            };

            nodes.push(FsNode {
                path,
                is_dir,
                extension,
                content,
            });
        }

        Ok(nodes)
    }

    fn read_file(&self, path: &str) -> Result<String, String> {
        fs::read_to_string(self.abs(path))
            .map_err(|e| format!("Failed to read {}: {}", path, e))
    }

    fn write_file(&self, path: &str, content: &str) -> Result<(), String> {
        let abs = self.abs(path);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create directory for {}: {}", path, e))?;
        }
        atomic_write_file(&abs, content.as_bytes())
    }

    fn move_entry(&self, src: &str, dest_dir: &str) -> Result<String, String> {
        let new_rel = joined_path(dest_dir, src);
        let dest = self.abs(&new_rel);
        if dest.exists() {
            return Err(format!("Destination already exists: {}", new_rel));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create directory {}: {}", dest_dir, e))?;
        }
        fs::rename(self.abs(src), &dest)
            .map_err(|e| format!("Failed to move {}: {}", src, e))?;
        Ok(new_rel)
    }

    fn rename_entry(&self, old_path: &str, new_name: &str) -> Result<String, String> {
        let new_rel = renamed_path(old_path, new_name);
        let dest = self.abs(&new_rel);
        if dest.exists() {
            return Err(format!("Destination already exists: {}", new_rel));
        }
        fs::rename(self.abs(old_path), &dest)
            .map_err(|e| format!("Failed to rename {}: {}", old_path, e))?;
        Ok(new_rel)
    }

    fn delete_file(&self, path: &str) -> Result<(), String> {
        fs::remove_file(self.abs(path)).map_err(|e| format!("Failed to delete {}: {}", path, e))
    }

    fn delete_dir(&self, path: &str) -> Result<(), String> {
        fs::remove_dir_all(self.abs(path))
            .map_err(|e| format!("Failed to delete directory {}: {}", path, e))
    }

    fn create_dir(&self, path: &str) -> Result<(), String> {
        fs::create_dir_all(self.abs(path))
            .map_err(|e| format!("Failed to create directory {}: {}", path, e))
    }
}

/// In-memory vault. Keys are vault-relative paths; a `None` value marks a
/// directory. Directories spring into existence implicitly when files are
/// written under them.
pub struct MemoryFs {
    entries: Mutex<BTreeMap<String, Option<String>>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seed a file without going through `write_file`.
    pub fn insert(&self, path: &str, content: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_string(), Some(content.to_string()));
    }
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultFs for MemoryFs {
    fn list_tree(&self) -> Result<Vec<FsNode>, String> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|(path, _)| {
                !path
                    .split('/')
                    .any(|segment| segment.starts_with('.'))
            })
            .map(|(path, content)| {
                let is_dir = content.is_none();
                let extension = if is_dir {
                    None
                } else {
                    path.rsplit('/')
                        .next()
                        .and_then(|name| name.rsplit_once('.'))
                        .map(|(_, ext)| ext.to_lowercase())
                };
                let file_content = if extension.as_deref() == Some("md") {
                    content.clone()
                } else {
                    None
                };
                FsNode {
                    path: path.clone(),
                    is_dir,
                    extension,
                    content: file_content,
                }
            })
            .collect())
    }

    fn read_file(&self, path: &str) -> Result<String, String> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .and_then(|c| c.clone())
            .ok_or_else(|| format!("Failed to read {}: not found", path))
    }

    fn write_file(&self, path: &str, content: &str) -> Result<(), String> {
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_string(), Some(content.to_string()));
        Ok(())
    }

    fn move_entry(&self, src: &str, dest_dir: &str) -> Result<String, String> {
        let new_path = joined_path(dest_dir, src);
        self.relocate(src, &new_path)?;
        Ok(new_path)
    }

    fn rename_entry(&self, old_path: &str, new_name: &str) -> Result<String, String> {
        let new_path = renamed_path(old_path, new_name);
        self.relocate(old_path, &new_path)?;
        Ok(new_path)
    }

    fn delete_file(&self, path: &str) -> Result<(), String> {
        match self.entries.lock().unwrap().remove(path) {
            Some(Some(_)) => Ok(()),
            Some(None) => Err(format!("Not a file: {}", path)),
            None => Err(format!("Failed to delete {}: not found", path)),
        }
    }

    fn delete_dir(&self, path: &str) -> Result<(), String> {
        let mut entries = self.entries.lock().unwrap();
        let prefix = format!("{}/", path);
        let doomed: Vec<String> = entries
            .keys()
            .filter(|k| k.as_str() == path || k.starts_with(&prefix))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Err(format!("Failed to delete directory {}: not found", path));
        }
        for key in doomed {
            entries.remove(&key);
        }
        Ok(())
    }

    fn create_dir(&self, path: &str) -> Result<(), String> {
        self.entries
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_insert(None);
        Ok(())
    }
}

impl MemoryFs {
    /// Move `old` to `new`, rewriting descendant keys when `old` is a
    /// directory.
    fn relocate(&self, old: &str, new: &str) -> Result<(), String> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(new) {
            return Err(format!("Destination already exists: {}", new));
        }

        match entries.remove(old) {
            Some(Some(content)) => {
                entries.insert(new.to_string(), Some(content));
                Ok(())
            }
            Some(None) => {
                entries.insert(new.to_string(), None);
                let prefix = format!("{}/", old);
                let children: Vec<String> = entries
                    .keys()
                    .filter(|k| k.starts_with(&prefix))
                    .cloned()
                    .collect();
                for child in children {
                    let moved = format!("{}/{}", new, &child[prefix.len()..]);
                    let value = entries.remove(&child).unwrap();
                    entries.insert(moved, value);
                }
                Ok(())
            }
            None => Err(format!("Failed to move {}: not found", old)),
        }
    }
}
