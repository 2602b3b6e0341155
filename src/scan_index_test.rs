//! Index rebuild and query scenarios against the in-memory vault.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crate::document;
use crate::fs::{FsNode, MemoryFs, VaultFs};
use crate::index::{ScanState, VaultIndex};

fn doc(id: &str, body: &str, tags: &str) -> String {
    format!(
        "{}\n\n{}\nID: {}\nTYPE: NOTE\nSTATUS: ACTIVE\nTAGS: {}\n",
        body,
        document::META_SENTINEL,
        id,
        tags
    )
}

fn seeded_index() -> VaultIndex<MemoryFs> {
    let fs = Arc::new(MemoryFs::new());
    fs.insert("alpha.md", &doc("id-a", "Alpha body with [[beta]]", "ops;infra"));
    fs.insert("beta.md", &doc("id-b", "Beta body", "ops"));
    fs.insert("gamma.md", &doc("id-c", "Gamma body with [[missing/Y]]", ""));
    fs.insert("notes/delta.md", &doc("id-d", "Delta body", "infra"));
    fs.insert("image.png", "");
    VaultIndex::new(fs)
}

#[test]
fn test_rebuild_indexes_markdown_only() {
    let index = seeded_index();
    let report = index.rebuild().unwrap();

    assert_eq!(report.scanned, 4);
    assert_eq!(report.indexed, 4);
    assert_eq!(report.repaired, 0);
    assert!(report.skipped.is_empty());

    let doc = index.document("alpha.md").unwrap();
    assert_eq!(doc.id, "id-a");
    assert_eq!(doc.tags, vec!["ops", "infra"]);
    assert_eq!(doc.forward_links, vec!["beta"]);
    assert_ne!(doc.content_hash, 0);
    assert!(index.document("image.png").is_none());
}

#[test]
fn test_rescan_drops_deleted_files() {
    let index = seeded_index();
    index.rebuild().unwrap();
    assert_eq!(index.documents().len(), 4);

    index.fs().delete_file("beta.md").unwrap();
    index.rebuild().unwrap();

    assert_eq!(index.documents().len(), 3);
    assert!(index.document("beta.md").is_none());
}

#[test]
fn test_search_is_case_insensitive_over_path_content_tags() {
    let index = seeded_index();
    index.rebuild().unwrap();

    let by_content: Vec<String> = index.search("ALPHA BODY").into_iter().map(|d| d.path).collect();
    assert_eq!(by_content, vec!["alpha.md"]);

    let by_path: Vec<String> = index.search("delta").into_iter().map(|d| d.path).collect();
    assert_eq!(by_path, vec!["notes/delta.md"]);

    let by_tag: Vec<String> = index.search("infra").into_iter().map(|d| d.path).collect();
    assert_eq!(by_tag, vec!["alpha.md", "notes/delta.md"]);

    assert!(index.search("").is_empty());
    assert!(index.search("zzz-nothing").is_empty());
}

#[test]
fn test_related_by_tag() {
    let index = seeded_index();
    index.rebuild().unwrap();

    let related: Vec<String> = index
        .related_by_tag("alpha.md", 5)
        .into_iter()
        .map(|d| d.path)
        .collect();
    assert_eq!(related, vec!["beta.md", "notes/delta.md"]);

    // A document with no tags relates to nothing.
    assert!(index.related_by_tag("gamma.md", 5).is_empty());

    // The cap applies.
    assert_eq!(index.related_by_tag("alpha.md", 1).len(), 1);

    // Unknown path yields nothing.
    assert!(index.related_by_tag("nope.md", 5).is_empty());
}

#[test]
fn test_find_by_id_excluding() {
    let index = seeded_index();
    index.rebuild().unwrap();

    assert!(index.find_by_id_excluding("id-a", "alpha.md").is_none());
    let hit = index.find_by_id_excluding("id-a", "other.md").unwrap();
    assert_eq!(hit.path, "alpha.md");
}

#[test]
fn test_backlinks_are_textual_and_allow_dangling_targets() {
    let index = seeded_index();
    index.rebuild().unwrap();

    // alpha references [[beta]], the extension-stripped form of beta.md.
    let back: Vec<String> = index.backlinks("beta.md").into_iter().map(|d| d.path).collect();
    assert_eq!(back, vec!["alpha.md"]);

    // gamma links to a path that does not exist; that dangling link simply
    // produces a backlink for the missing target.
    let back: Vec<String> = index
        .backlinks("missing/Y.md")
        .into_iter()
        .map(|d| d.path)
        .collect();
    assert_eq!(back, vec!["gamma.md"]);

    assert!(index.backlinks("alpha.md").is_empty());
}

#[test]
fn test_action_items_aggregate_in_canonical_order() {
    let fs = Arc::new(MemoryFs::new());
    let table = format!(
        "body\n\n{}\n| 1.10 | [ ] | - | - | - | ten | - |\n| 1.2 | [ ] | - | - | - | two | - |\n\n{}\nID: z1\n",
        document::TABLE_SENTINEL,
        document::META_SENTINEL
    );
    fs.insert("zz.md", &table);
    let other = format!(
        "body\n\n{}\n| 3 | [ ] | - | - | - | other | - |\n\n{}\nID: a1\n",
        document::TABLE_SENTINEL,
        document::META_SENTINEL
    );
    fs.insert("aa.md", &other);

    let index = VaultIndex::new(fs);
    index.rebuild().unwrap();

    let items = index.action_items();
    let keys: Vec<(&str, &str)> = items
        .iter()
        .map(|i| (i.note_path.as_str(), i.code.as_str()))
        .collect();
    assert_eq!(
        keys,
        vec![("aa.md", "3"), ("zz.md", "1.2"), ("zz.md", "1.10")]
    );
}

#[test]
fn test_create_document_refuses_existing_path() {
    let index = seeded_index();
    index.rebuild().unwrap();

    let err = index.create_document("alpha.md").unwrap_err();
    assert!(err.contains("already exists"));

    let id = index.create_document("fresh.md").unwrap();
    assert!(!id.is_empty());
    let parsed = document::parse(&index.fs().read_file("fresh.md").unwrap());
    assert_eq!(parsed.metadata.id, id);
    assert_eq!(parsed.metadata.doc_type, "NOTE");
}

/// Wrapper that fails reads for selected paths. The listing still names
/// them but carries no content, like a file that stops being readable
/// mid-walk.
struct FailingReads {
    inner: MemoryFs,
    deny: Vec<String>,
}

impl VaultFs for FailingReads {
    fn list_tree(&self) -> Result<Vec<FsNode>, String> {
        let mut tree = self.inner.list_tree()?;
        for node in &mut tree {
            if self.deny.iter().any(|d| d == &node.path) {
                node.content = None;
            }
        }
        Ok(tree)
    }
    fn read_file(&self, path: &str) -> Result<String, String> {
        if self.deny.iter().any(|d| d == path) {
            return Err("injected read failure".to_string());
        }
        self.inner.read_file(path)
    }
    fn write_file(&self, path: &str, content: &str) -> Result<(), String> {
        self.inner.write_file(path, content)
    }
    fn move_entry(&self, src: &str, dest_dir: &str) -> Result<String, String> {
        self.inner.move_entry(src, dest_dir)
    }
    fn rename_entry(&self, old_path: &str, new_name: &str) -> Result<String, String> {
        self.inner.rename_entry(old_path, new_name)
    }
    fn delete_file(&self, path: &str) -> Result<(), String> {
        self.inner.delete_file(path)
    }
    fn delete_dir(&self, path: &str) -> Result<(), String> {
        self.inner.delete_dir(path)
    }
    fn create_dir(&self, path: &str) -> Result<(), String> {
        self.inner.create_dir(path)
    }
}

#[test]
fn test_unreadable_file_is_skipped_not_fatal() {
    let mem = MemoryFs::new();
    mem.insert("ok.md", &doc("id-1", "fine", ""));
    mem.insert("broken.md", &doc("id-2", "never read", ""));

    let fs = Arc::new(FailingReads {
        inner: mem,
        deny: vec!["broken.md".to_string()],
    });
    let index = VaultIndex::new(fs);
    let report = index.rebuild().unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.indexed, 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].contains("broken.md"));
    assert_eq!(index.scan_state(), ScanState::Ready);
}

/// Wrapper that counts per-file reads.
struct CountingReads {
    inner: MemoryFs,
    reads: AtomicUsize,
}

impl VaultFs for CountingReads {
    fn list_tree(&self) -> Result<Vec<FsNode>, String> {
        self.inner.list_tree()
    }
    fn read_file(&self, path: &str) -> Result<String, String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_file(path)
    }
    fn write_file(&self, path: &str, content: &str) -> Result<(), String> {
        self.inner.write_file(path, content)
    }
    fn move_entry(&self, src: &str, dest_dir: &str) -> Result<String, String> {
        self.inner.move_entry(src, dest_dir)
    }
    fn rename_entry(&self, old_path: &str, new_name: &str) -> Result<String, String> {
        self.inner.rename_entry(old_path, new_name)
    }
    fn delete_file(&self, path: &str) -> Result<(), String> {
        self.inner.delete_file(path)
    }
    fn delete_dir(&self, path: &str) -> Result<(), String> {
        self.inner.delete_dir(path)
    }
    fn create_dir(&self, path: &str) -> Result<(), String> {
        self.inner.create_dir(path)
    }
}

#[test]
fn test_scan_consumes_listed_content_without_rereads() {
    let mem = MemoryFs::new();
    mem.insert("one.md", &doc("id-1", "first", ""));
    mem.insert("two.md", &doc("id-2", "second", ""));

    let fs = Arc::new(CountingReads {
        inner: mem,
        reads: AtomicUsize::new(0),
    });
    let index = VaultIndex::new(Arc::clone(&fs));
    let report = index.rebuild().unwrap();

    assert_eq!(report.indexed, 2);
    // The tree listing already carried every file's content.
    assert_eq!(fs.reads.load(Ordering::SeqCst), 0);
}

/// Wrapper whose tree listing always fails.
struct FailingTree;

impl VaultFs for FailingTree {
    fn list_tree(&self) -> Result<Vec<FsNode>, String> {
        Err("vault unavailable".to_string())
    }
    fn read_file(&self, _path: &str) -> Result<String, String> {
        Err("vault unavailable".to_string())
    }
    fn write_file(&self, _path: &str, _content: &str) -> Result<(), String> {
        Err("vault unavailable".to_string())
    }
    fn move_entry(&self, _src: &str, _dest_dir: &str) -> Result<String, String> {
        Err("vault unavailable".to_string())
    }
    fn rename_entry(&self, _old: &str, _new: &str) -> Result<String, String> {
        Err("vault unavailable".to_string())
    }
    fn delete_file(&self, _path: &str) -> Result<(), String> {
        Err("vault unavailable".to_string())
    }
    fn delete_dir(&self, _path: &str) -> Result<(), String> {
        Err("vault unavailable".to_string())
    }
    fn create_dir(&self, _path: &str) -> Result<(), String> {
        Err("vault unavailable".to_string())
    }
}

#[test]
fn test_tree_failure_sets_error_state() {
    let index = VaultIndex::new(Arc::new(FailingTree));
    let err = index.rebuild().unwrap_err();
    assert!(err.contains("vault unavailable"));

    match index.scan_state() {
        ScanState::Error { message } => assert!(message.contains("vault unavailable")),
        other => panic!("expected error state, got {:?}", other),
    }
}

/// Wrapper whose next tree listing parks until released, holding a scan
/// open so its effect on readers can be observed mid-flight.
struct StallingTree {
    inner: MemoryFs,
    armed: AtomicBool,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl VaultFs for StallingTree {
    fn list_tree(&self) -> Result<Vec<FsNode>, String> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.inner.list_tree()
    }
    fn read_file(&self, path: &str) -> Result<String, String> {
        self.inner.read_file(path)
    }
    fn write_file(&self, path: &str, content: &str) -> Result<(), String> {
        self.inner.write_file(path, content)
    }
    fn move_entry(&self, src: &str, dest_dir: &str) -> Result<String, String> {
        self.inner.move_entry(src, dest_dir)
    }
    fn rename_entry(&self, old_path: &str, new_name: &str) -> Result<String, String> {
        self.inner.rename_entry(old_path, new_name)
    }
    fn delete_file(&self, path: &str) -> Result<(), String> {
        self.inner.delete_file(path)
    }
    fn delete_dir(&self, path: &str) -> Result<(), String> {
        self.inner.delete_dir(path)
    }
    fn create_dir(&self, path: &str) -> Result<(), String> {
        self.inner.create_dir(path)
    }
}

#[test]
fn test_queries_serve_previous_tables_while_scan_runs() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();

    let mem = MemoryFs::new();
    mem.insert("alpha.md", &doc("id-a", "first", ""));
    let fs = Arc::new(StallingTree {
        inner: mem,
        armed: AtomicBool::new(false),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });

    let index = VaultIndex::new(Arc::clone(&fs));
    index.rebuild().unwrap();
    assert_eq!(index.documents().len(), 1);

    // A second file appears, and the next scan parks inside the walk.
    fs.inner.insert("beta.md", &doc("id-b", "second", ""));
    fs.armed.store(true, Ordering::SeqCst);
    let handle = index.rebuild_in_background();

    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // Mid-scan, readers still see the previous tables, untouched.
    assert_eq!(index.scan_state(), ScanState::Scanning);
    let paths: Vec<String> = index.documents().into_iter().map(|d| d.path).collect();
    assert_eq!(paths, vec!["alpha.md"]);
    assert!(index.document("beta.md").is_none());

    // Released, the scan finishes and the new tables swap in.
    release_tx.send(()).unwrap();
    let report = handle.join().unwrap().unwrap();
    assert_eq!(report.indexed, 2);
    assert_eq!(index.documents().len(), 2);
    assert_eq!(index.scan_state(), ScanState::Ready);
}

#[test]
fn test_background_rebuild_reports_when_joined() {
    let index = seeded_index();
    let handle = index.rebuild_in_background();
    let report = handle.join().unwrap().unwrap();
    assert_eq!(report.indexed, 4);
    assert_eq!(index.scan_state(), ScanState::Ready);
    assert_eq!(index.documents().len(), 4);
}
