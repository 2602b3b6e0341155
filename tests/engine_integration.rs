//! End-to-end flow over a real vault directory: scan, edit, save, rescan,
//! rename with link propagation.

use std::sync::Arc;

use tempfile::TempDir;

use notevault::actions::CollapseSet;
use notevault::document;
use notevault::fs::{DiskFs, VaultFs};
use notevault::index::{ScanState, VaultIndex};
use notevault::links;
use notevault::session::DocumentSession;

fn seed_vault(fs: &DiskFs) {
    fs.write_file(
        "projects/Roadmap.md",
        &format!(
            "Planning doc, see [[notes/Research]].\n\n{}\nID: roadmap-id\nTYPE: PROJECT\nSTATUS: ACTIVE\nTAGS: planning\n",
            document::META_SENTINEL
        ),
    )
    .unwrap();
    fs.write_file("notes/Research.md", "Raw research notes, [[projects/Roadmap]] drives this.")
        .unwrap();
    fs.write_file("scratch.md", "unrelated scratch").unwrap();
}

#[test]
fn test_full_engine_flow() {
    let tmp = TempDir::new().unwrap();
    let fs = Arc::new(DiskFs::new(tmp.path()));
    seed_vault(&fs);

    let index = VaultIndex::new(Arc::clone(&fs));

    // First scan: Research.md and scratch.md gain metadata blocks.
    let report = index.rebuild().unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.indexed, 3);
    assert_eq!(report.repaired, 2);
    assert_eq!(index.scan_state(), ScanState::Ready);

    // Link graph before any edits.
    let back: Vec<String> = index
        .backlinks("notes/Research.md")
        .into_iter()
        .map(|d| d.path)
        .collect();
    assert_eq!(back, vec!["projects/Roadmap.md"]);

    // Edit session: add a task tree, save under the write gate.
    let mut session = DocumentSession::open(fs.as_ref(), "projects/Roadmap.md").unwrap();
    let root = session.add_root_item("Define milestones");
    let child = session.add_child_item(&root, "Draft Q1 targets").unwrap();
    session.set_done(&child, true).unwrap();
    session.set_tags(vec!["planning".to_string(), "q1".to_string()]);
    {
        let _gate = index.write_gate().unwrap();
        session.save(fs.as_ref()).unwrap();
    }
    assert!(!session.is_dirty());

    // Rescan picks the new items up.
    index.rebuild().unwrap();
    let doc = index.document("projects/Roadmap.md").unwrap();
    assert_eq!(doc.id, "roadmap-id");
    assert_eq!(doc.tags, vec!["planning", "q1"]);

    let items = index.action_items();
    let roadmap_items: Vec<&str> = items
        .iter()
        .filter(|i| i.note_path == "projects/Roadmap.md")
        .map(|i| i.code.as_str())
        .collect();
    assert_eq!(roadmap_items, vec!["1", "1.1"]);

    // Collapse the root: the child disappears from the visible set.
    let codes: Vec<String> = items
        .iter()
        .filter(|i| i.note_path == "projects/Roadmap.md")
        .map(|i| i.code.clone())
        .collect();
    let mut collapse = CollapseSet::default();
    collapse.set_collapsed("1", true);
    assert_eq!(collapse.visible(&codes), vec!["1"]);

    // Rename the research note; the roadmap's link follows.
    let new_path = links::rename_document(fs.as_ref(), "notes/Research.md", "Background.md").unwrap();
    assert_eq!(new_path, "notes/Background.md");
    let roadmap_raw = fs.read_file("projects/Roadmap.md").unwrap();
    assert!(roadmap_raw.contains("[[notes/Background]]"));
    assert!(!roadmap_raw.contains("[[notes/Research]]"));

    // Rescan reflects the move; backlinks follow the new path.
    index.rebuild().unwrap();
    assert!(index.document("notes/Research.md").is_none());
    let back: Vec<String> = index
        .backlinks("notes/Background.md")
        .into_iter()
        .map(|d| d.path)
        .collect();
    assert_eq!(back, vec!["projects/Roadmap.md"]);

    // Related-by-tag connects nothing to the scratch note.
    assert!(index.related_by_tag("scratch.md", 5).is_empty());
}

#[test]
fn test_save_failure_keeps_session_dirty() {
    let tmp = TempDir::new().unwrap();
    let fs = DiskFs::new(tmp.path());
    fs.write_file("doc.md", "original").unwrap();

    let mut session = DocumentSession::open(&fs, "doc.md").unwrap();
    session.set_body("edited");
    assert!(session.is_dirty());

    // A filesystem rooted somewhere unwritable makes the save fail.
    let broken = DiskFs::new(tmp.path().join("missing").join("\0bad"));
    assert!(session.save(&broken).is_err());
    assert!(session.is_dirty());

    // Retrying against the real vault succeeds.
    session.save(&fs).unwrap();
    assert!(!session.is_dirty());
    assert_eq!(document::parse(&fs.read_file("doc.md").unwrap()).body, "edited");
}

#[test]
fn test_move_between_directories_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let fs = Arc::new(DiskFs::new(tmp.path()));
    fs.write_file("inbox/Idea.md", "an idea").unwrap();
    fs.write_file("journal.md", "today: [[inbox/Idea]]").unwrap();
    fs.create_dir("archive").unwrap();

    let index = VaultIndex::new(Arc::clone(&fs));
    index.rebuild().unwrap();

    let new_path = links::move_document(fs.as_ref(), "inbox/Idea.md", "archive").unwrap();
    assert_eq!(new_path, "archive/Idea.md");

    // The scan gave journal.md a metadata block, so compare its parsed body.
    let journal = document::parse(&fs.read_file("journal.md").unwrap());
    assert_eq!(journal.body, "today: [[archive/Idea]]");
    assert!(!journal.body.contains("[[inbox/Idea]]"));

    index.rebuild().unwrap();
    assert!(index.document("inbox/Idea.md").is_none());
    assert!(index.document("archive/Idea.md").is_some());
}
