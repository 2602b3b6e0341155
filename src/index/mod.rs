//! In-memory vault index, rebuilt from scratch on every scan.
//!
//! A scan runs in three phases: reconcile document identities on disk
//! (rewriting files whose metadata is missing or duplicated), parse every
//! markdown file in parallel, then swap the freshly built tables in under a
//! single write lock so readers never observe a half-built index.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{self, ActionItem, Metadata};
use crate::fs::VaultFs;

/// One indexed markdown document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub path: String,
    pub body: String,
    pub doc_type: String,
    pub status: String,
    pub tags: Vec<String>,
    pub content_hash: u64,
    /// Raw file content as read from disk, used for substring queries.
    pub content: String,
    pub forward_links: Vec<String>,
    pub action_items: Vec<ActionItem>,
}

/// Lifecycle of the index relative to the vault on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status")]
pub enum ScanState {
    Scanning,
    Ready,
    Error { message: String },
}

/// Outcome summary of one scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    /// Markdown files considered.
    pub scanned: usize,
    /// Documents that made it into the index.
    pub indexed: usize,
    /// Files rewritten on disk to repair their identity.
    pub repaired: usize,
    /// Paths left out of the index, with the reason.
    pub skipped: Vec<String>,
}

#[derive(Default)]
struct Tables {
    documents: BTreeMap<String, Document>,
    actions: Vec<ActionItem>,
}

/// The index. Cloning is cheap and shares the underlying tables, which is
/// how `rebuild_in_background` hands a handle to its worker thread.
pub struct VaultIndex<F: VaultFs> {
    fs: Arc<F>,
    tables: Arc<RwLock<Tables>>,
    state: Arc<RwLock<ScanState>>,
    // Serializes scans against document saves within this process.
    write_gate: Arc<Mutex<()>>,
}

impl<F: VaultFs> Clone for VaultIndex<F> {
    fn clone(&self) -> Self {
        Self {
            fs: Arc::clone(&self.fs),
            tables: Arc::clone(&self.tables),
            state: Arc::clone(&self.state),
            write_gate: Arc::clone(&self.write_gate),
        }
    }
}

fn hash_content(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

impl<F: VaultFs> VaultIndex<F> {
    pub fn new(fs: Arc<F>) -> Self {
        Self {
            fs,
            tables: Arc::new(RwLock::new(Tables::default())),
            state: Arc::new(RwLock::new(ScanState::Ready)),
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn fs(&self) -> &Arc<F> {
        &self.fs
    }

    pub fn scan_state(&self) -> ScanState {
        self.state.read().unwrap().clone()
    }

    /// Guard that document saves take so they never race a running scan.
    pub fn write_gate(&self) -> Result<MutexGuard<'_, ()>, String> {
        self.write_gate
            .lock()
            .map_err(|_| "Write gate poisoned".to_string())
    }

    /// Full drop-and-rebuild scan. Queries keep serving the previous tables
    /// until the new ones are swapped in.
    pub fn rebuild(&self) -> Result<ScanReport, String> {
        *self.state.write().unwrap() = ScanState::Scanning;

        let result = self.rebuild_inner();
        match &result {
            Ok(report) => {
                *self.state.write().unwrap() = ScanState::Ready;
                log::info!(
                    "[rebuild] Scan complete: {} scanned, {} indexed, {} repaired, {} skipped",
                    report.scanned,
                    report.indexed,
                    report.repaired,
                    report.skipped.len()
                );
            }
            Err(e) => {
                log::error!("[rebuild] Scan failed: {}", e);
                *self.state.write().unwrap() = ScanState::Error { message: e.clone() };
            }
        }
        result
    }

    fn rebuild_inner(&self) -> Result<ScanReport, String> {
        let _gate = self.write_gate()?;

        let tree = self.fs.list_tree()?;
        let mut entries: Vec<(String, Option<String>)> = tree
            .into_iter()
            .filter(|n| n.is_markdown())
            .map(|n| (n.path, n.content))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = ScanReport {
            scanned: entries.len(),
            ..Default::default()
        };

        // Phase 1: reconcile identities. Sequential, because collision
        // handling depends on every id seen so far this scan. When two paths
        // declare the same id, neither claim is trusted: both files get a
        // fresh id and both are rewritten.
        let mut claims: HashMap<String, Option<usize>> = HashMap::new();
        let mut sources: Vec<Option<(String, String)>> = Vec::new();

        for (path, listed) in entries {
            // The tree listing already carries markdown content; fall back
            // to an explicit read only when the walk could not load it.
            let raw = match listed {
                Some(raw) => raw,
                None => match self.fs.read_file(&path) {
                    Ok(raw) => raw,
                    Err(e) => {
                        log::warn!("[rebuild] Skipping {}: {}", path, e);
                        report.skipped.push(format!("{}: {}", path, e));
                        continue;
                    }
                },
            };

            let parsed = document::parse(&raw);
            let declared = parsed.metadata.id.clone();
            let slot = sources.len();
            sources.push(Some((path, raw)));

            let collision = !declared.is_empty() && claims.contains_key(&declared);
            if collision {
                // Retroactively reassign the earlier claimant, then poison
                // the id so any further claimant is reassigned too.
                if let Some(Some(prev_slot)) = claims.insert(declared.clone(), None) {
                    self.reassign_identity(prev_slot, &mut sources, &mut claims, &mut report);
                }
                self.reassign_identity(slot, &mut sources, &mut claims, &mut report);
            } else if declared.is_empty() {
                self.reassign_identity(slot, &mut sources, &mut claims, &mut report);
            } else {
                claims.insert(declared, Some(slot));
            }
        }

        let sources: Vec<(String, String)> = sources.into_iter().flatten().collect();

        // Phase 2: parse in parallel.
        let documents: Vec<Document> = sources
            .par_iter()
            .map(|(path, raw)| {
                let parsed = document::parse(raw);
                let mut items = parsed.action_items;
                for item in &mut items {
                    item.note_path = path.clone();
                }
                Document {
                    id: parsed.metadata.id,
                    path: path.clone(),
                    body: parsed.body,
                    doc_type: parsed.metadata.doc_type,
                    status: parsed.metadata.status,
                    tags: parsed.metadata.tags,
                    content_hash: hash_content(raw),
                    content: raw.clone(),
                    forward_links: parsed.forward_links,
                    action_items: items,
                }
            })
            .collect();

        report.indexed = documents.len();

        // Phase 3: commit. Build the new tables fully, then swap.
        let mut actions: Vec<ActionItem> = documents
            .iter()
            .flat_map(|d| d.action_items.iter().cloned())
            .collect();
        document::sort_canonical(&mut actions);

        let fresh = Tables {
            documents: documents.into_iter().map(|d| (d.path.clone(), d)).collect(),
            actions,
        };
        *self.tables.write().unwrap() = fresh;

        Ok(report)
    }

    /// Give the document in `slot` a fresh uuid and rewrite it on disk. A
    /// failed rewrite drops the document from this scan instead of indexing
    /// a file whose on-disk identity could not be fixed.
    fn reassign_identity(
        &self,
        slot: usize,
        sources: &mut [Option<(String, String)>],
        claims: &mut HashMap<String, Option<usize>>,
        report: &mut ScanReport,
    ) {
        let (path, raw) = match &sources[slot] {
            Some(entry) => entry.clone(),
            None => return,
        };

        let parsed = document::parse(&raw);
        let mut meta = parsed.metadata;
        meta.id = Uuid::new_v4().to_string();

        let rewritten = document::serialize(&parsed.body, &parsed.action_items, &meta);
        match self.fs.write_file(&path, &rewritten) {
            Ok(()) => {
                log::info!("[rebuild] Repaired identity of {}", path);
                claims.insert(meta.id, Some(slot));
                sources[slot] = Some((path, rewritten));
                report.repaired += 1;
            }
            Err(e) => {
                log::warn!("[rebuild] Failed to repair {}: {}", path, e);
                report.skipped.push(format!("{}: {}", path, e));
                sources[slot] = None;
            }
        }
    }

    /// Run `rebuild` on a separate thread. Queries against this index keep
    /// answering from the previous tables while the scan runs.
    pub fn rebuild_in_background(&self) -> std::thread::JoinHandle<Result<ScanReport, String>>
    where
        F: 'static,
    {
        let index = self.clone();
        std::thread::spawn(move || index.rebuild())
    }

    pub fn documents(&self) -> Vec<Document> {
        self.tables.read().unwrap().documents.values().cloned().collect()
    }

    pub fn document(&self, path: &str) -> Option<Document> {
        self.tables.read().unwrap().documents.get(path).cloned()
    }

    /// All action items across the vault in canonical order.
    pub fn action_items(&self) -> Vec<ActionItem> {
        self.tables.read().unwrap().actions.clone()
    }

    /// Find the document carrying `id`, ignoring the one at `exclude_path`.
    pub fn find_by_id_excluding(&self, id: &str, exclude_path: &str) -> Option<Document> {
        self.tables
            .read()
            .unwrap()
            .documents
            .values()
            .find(|d| d.id == id && d.path != exclude_path)
            .cloned()
    }

    /// Case-insensitive substring search over path, raw content and tags.
    pub fn search(&self, query: &str) -> Vec<Document> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.tables
            .read()
            .unwrap()
            .documents
            .values()
            .filter(|d| {
                d.path.to_lowercase().contains(&needle)
                    || d.content.to_lowercase().contains(&needle)
                    || d.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }

    /// Documents sharing at least one tag with the document at `path`,
    /// excluding it, path-ordered and capped at `limit`.
    pub fn related_by_tag(&self, path: &str, limit: usize) -> Vec<Document> {
        let tables = self.tables.read().unwrap();
        let subject = match tables.documents.get(path) {
            Some(doc) if !doc.tags.is_empty() => doc,
            _ => return Vec::new(),
        };
        let subject_tags: HashSet<&String> = subject.tags.iter().collect();

        tables
            .documents
            .values()
            .filter(|d| {
                d.path != path && d.tags.iter().any(|t| subject_tags.contains(t))
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Documents whose raw content references `path` as a wiki-link, either
    /// by full path or with the extension stripped. Purely textual, so links
    /// to documents that do not exist resolve to no backlinks rather than an
    /// error.
    pub fn backlinks(&self, path: &str) -> Vec<Document> {
        let full = format!("[[{}]]", path);
        let stripped = format!("[[{}]]", crate::links::strip_extension(path));

        self.tables
            .read()
            .unwrap()
            .documents
            .values()
            .filter(|d| {
                d.path != path && (d.content.contains(&full) || d.content.contains(&stripped))
            })
            .cloned()
            .collect()
    }

    /// Create a fresh document with a new identity, returning its id. Fails
    /// if anything already exists at `path`. The index itself is not
    /// updated; callers rescan.
    pub fn create_document(&self, path: &str) -> Result<String, String> {
        if self.fs.read_file(path).is_ok() {
            return Err(format!("File already exists: {}", path));
        }

        let meta = Metadata {
            id: Uuid::new_v4().to_string(),
            ..Metadata::default()
        };
        let raw = document::serialize("", &[], &meta);
        self.fs.write_file(path, &raw)?;
        log::info!("[create_document] Created {} with id {}", path, meta.id);
        Ok(meta.id)
    }
}
