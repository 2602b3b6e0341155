//! An open document being edited.
//!
//! A session holds the parsed form of one document plus a dirty flag. Saves
//! go through the vault filesystem; callers hold the index write gate across
//! `save` so a running scan never observes a half-written file.

use crate::actions::{allocate_child_code, allocate_root_code};
use crate::document::{self, ActionItem, Metadata};
use crate::fs::VaultFs;

pub struct DocumentSession {
    pub path: String,
    body: String,
    metadata: Metadata,
    items: Vec<ActionItem>,
    dirty: bool,
}

impl DocumentSession {
    /// Open the document at `path`, parsing its current on-disk form.
    pub fn open<F: VaultFs>(fs: &F, path: &str) -> Result<Self, String> {
        let raw = fs.read_file(path)?;
        let parsed = document::parse(&raw);
        let mut items = parsed.action_items;
        for item in &mut items {
            item.note_path = path.to_string();
        }
        Ok(Self {
            path: path.to_string(),
            body: parsed.body,
            metadata: parsed.metadata,
            items,
            dirty: false,
        })
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn items(&self) -> &[ActionItem] {
        &self.items
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_body(&mut self, body: &str) {
        if self.body != body {
            self.body = body.to_string();
            self.dirty = true;
        }
    }

    pub fn set_status(&mut self, status: &str) {
        if self.metadata.status != status {
            self.metadata.status = status.to_string();
            self.dirty = true;
        }
    }

    pub fn set_doc_type(&mut self, doc_type: &str) {
        if self.metadata.doc_type != doc_type {
            self.metadata.doc_type = doc_type.to_string();
            self.dirty = true;
        }
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        if self.metadata.tags != tags {
            self.metadata.tags = tags;
            self.dirty = true;
        }
    }

    fn today() -> String {
        chrono::Local::now().format("%Y-%m-%d").to_string()
    }

    fn push_item(&mut self, code: String, task: &str) -> String {
        self.items.push(ActionItem {
            code: code.clone(),
            done: false,
            created: Self::today(),
            task: task.to_string(),
            note_path: self.path.clone(),
            ..Default::default()
        });
        self.dirty = true;
        code
    }

    /// Add a top-level item, allocating the next root code.
    pub fn add_root_item(&mut self, task: &str) -> String {
        let code = allocate_root_code(self.items.iter().map(|i| i.code.as_str()));
        self.push_item(code, task)
    }

    /// Add a child under `parent`, allocating the next child code.
    pub fn add_child_item(&mut self, parent: &str, task: &str) -> Result<String, String> {
        if !self.items.iter().any(|i| i.code == parent) {
            return Err(format!("No such action item: {}", parent));
        }
        let code = allocate_child_code(parent, self.items.iter().map(|i| i.code.as_str()));
        Ok(self.push_item(code, task))
    }

    pub fn set_done(&mut self, code: &str, done: bool) -> Result<(), String> {
        let item = self
            .items
            .iter_mut()
            .find(|i| i.code == code)
            .ok_or_else(|| format!("No such action item: {}", code))?;
        if item.done != done {
            item.done = done;
            self.dirty = true;
        }
        Ok(())
    }

    /// Remove an item together with all of its descendants.
    pub fn remove_item(&mut self, code: &str) -> Result<(), String> {
        if !self.items.iter().any(|i| i.code == code) {
            return Err(format!("No such action item: {}", code));
        }
        let prefix = format!("{}.", code);
        self.items
            .retain(|i| i.code != code && !i.code.starts_with(&prefix));
        self.dirty = true;
        Ok(())
    }

    /// Serialize and write the document back. On failure the session stays
    /// dirty so the caller can retry. A successful save re-parses what was
    /// written, picking up normalization such as a freshly assigned id.
    pub fn save<F: VaultFs>(&mut self, fs: &F) -> Result<(), String> {
        let raw = document::serialize(&self.body, &self.items, &self.metadata);
        fs.write_file(&self.path, &raw)?;

        let parsed = document::parse(&raw);
        self.body = parsed.body;
        self.metadata = parsed.metadata;
        self.items = parsed.action_items;
        for item in &mut self.items {
            item.note_path = self.path.clone();
        }
        self.dirty = false;
        log::debug!("[save] Wrote {}", self.path);
        Ok(())
    }
}
