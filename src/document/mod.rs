//! Document format: free-form body, an optional embedded action table, and a
//! trailing metadata block.
//!
//! ```text
//! <body text, may contain [[wiki-links]]>
//!
//! === ACTIONS ===
//! | Code | Status | Created | Deadline | Owner | Task | Comment |
//! |------|--------|---------|----------|-------|------|---------|
//! | 1    | [ ]    | 2026-01-02 | -    | ana   | Ship | -       |
//!
//! === METADATA ===
//! ID: <uuid>
//! TYPE: NOTE
//! STATUS: ACTIVE
//! TAGS: ops;planning
//! ```
//!
//! `parse` and `serialize` round-trip: parsing a serialized document yields
//! the trimmed body, the same metadata (id filled when it was empty) and the
//! same action items, and a second serialization is byte-identical.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::actions::compare_codes;

/// Sentinel line preceding the metadata block.
pub const META_SENTINEL: &str = "=== METADATA ===";
/// Sentinel line preceding the action table.
pub const TABLE_SENTINEL: &str = "=== ACTIONS ===";

/// First cell of the table header row; rows carrying it are decoration.
const TABLE_HEADER_TOKEN: &str = "Code";
/// Placeholder written for an empty cell. The row grammar drops empty slots,
/// so an empty value needs a stand-in to keep cells positional.
const EMPTY_CELL: &str = "-";

static WIKI_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[(.+?)\]\]").expect("wiki-link pattern"));

/// Structured metadata block. Missing keys default; unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub doc_type: String,
    pub status: String,
    pub tags: Vec<String>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            id: String::new(),
            doc_type: "NOTE".to_string(),
            status: "ACTIVE".to_string(),
            tags: Vec::new(),
        }
    }
}

/// The four recognized metadata keys. Anything else on a metadata line is
/// ignored, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetaKey {
    Id,
    Type,
    Status,
    Tags,
}

impl MetaKey {
    const ALL: [MetaKey; 4] = [MetaKey::Id, MetaKey::Type, MetaKey::Status, MetaKey::Tags];

    fn prefix(self) -> &'static str {
        match self {
            MetaKey::Id => "ID:",
            MetaKey::Type => "TYPE:",
            MetaKey::Status => "STATUS:",
            MetaKey::Tags => "TAGS:",
        }
    }

    /// Match a `KEY: value` line against the fixed key set.
    fn scan(line: &str) -> Option<(MetaKey, &str)> {
        let line = line.trim_start();
        for key in MetaKey::ALL {
            if let Some(rest) = line.strip_prefix(key.prefix()) {
                return Some((key, rest.trim()));
            }
        }
        None
    }
}

/// One row of the embedded hierarchical task table.
///
/// `note_path` is the owning document's vault path; the parser leaves it
/// empty (it does not know the path) and the index/session fill it in. It is
/// never written to the table and is ignored by round-trip comparisons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    pub code: String,
    pub done: bool,
    pub created: String,
    pub deadline: String,
    pub owner: String,
    pub task: String,
    pub comment: String,
    #[serde(default)]
    pub note_path: String,
}

/// Result of parsing one raw document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub body: String,
    pub metadata: Metadata,
    pub action_items: Vec<ActionItem>,
    pub forward_links: Vec<String>,
}

/// Parse raw document text into body, metadata, action items and forward
/// links. Never fails: missing sentinels fall back to defaults.
pub fn parse(raw: &str) -> ParsedDocument {
    // Everything after the metadata sentinel is the metadata section.
    let (front, meta_section) = match raw.split_once(META_SENTINEL) {
        Some((front, meta)) => (front, Some(meta)),
        None => (raw, None),
    };
    let metadata = meta_section.map(parse_metadata).unwrap_or_default();

    // Everything after the table sentinel (within the pre-metadata text) is
    // the action table; the rest is body.
    let (body_section, table_section) = match front.split_once(TABLE_SENTINEL) {
        Some((body, table)) => (body, Some(table)),
        None => (front, None),
    };

    let body = body_section.trim().to_string();
    let action_items = table_section.map(parse_table).unwrap_or_default();
    let forward_links = extract_wiki_links(&body);

    ParsedDocument {
        body,
        metadata,
        action_items,
        forward_links,
    }
}

/// Scan metadata lines for the four recognized keys.
fn parse_metadata(section: &str) -> Metadata {
    let mut meta = Metadata::default();
    for line in section.lines() {
        match MetaKey::scan(line) {
            Some((MetaKey::Id, value)) => meta.id = value.to_string(),
            Some((MetaKey::Type, value)) if !value.is_empty() => {
                meta.doc_type = value.to_string()
            }
            Some((MetaKey::Status, value)) if !value.is_empty() => {
                meta.status = value.to_string()
            }
            Some((MetaKey::Tags, value)) => meta.tags = split_tags(value),
            _ => {}
        }
    }
    meta
}

/// Split a tag list on `;` or `,`, trimming and dropping empties.
pub fn split_tags(value: &str) -> Vec<String> {
    value
        .split(|c| c == ';' || c == ',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `|`-delimited table rows. A row is accepted when splitting on `|`
/// yields at least seven non-empty cells and the row is not header/separator
/// decoration. Duplicate codes: the first accepted row wins, later ones are
/// dropped silently.
fn parse_table(section: &str) -> Vec<ActionItem> {
    let mut items: Vec<ActionItem> = Vec::new();

    for line in section.lines() {
        if !line.contains('|') || line.contains("---") {
            continue;
        }

        let cells: Vec<&str> = line
            .split('|')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();

        if cells.len() < 7 || cells[0] == TABLE_HEADER_TOKEN {
            continue;
        }

        let code = cells[0].to_string();
        if items.iter().any(|item| item.code == code) {
            continue;
        }

        items.push(ActionItem {
            code,
            done: cells[1].eq_ignore_ascii_case("[x]"),
            created: read_cell(cells[2]),
            deadline: read_cell(cells[3]),
            owner: read_cell(cells[4]),
            task: read_cell(cells[5]),
            comment: read_cell(cells[6]),
            note_path: String::new(),
        });
    }

    items
}

fn read_cell(cell: &str) -> String {
    if cell == EMPTY_CELL {
        String::new()
    } else {
        cell.to_string()
    }
}

fn write_cell(value: &str) -> &str {
    let value = value.trim();
    if value.is_empty() {
        EMPTY_CELL
    } else {
        value
    }
}

/// Extract every `[[token]]` occurrence in order of appearance, with no
/// de-duplication; the token is kept verbatim.
pub fn extract_wiki_links(body: &str) -> Vec<String> {
    WIKI_LINK_RE
        .captures_iter(body)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Serialize a document to its canonical text form.
///
/// Action items are written in canonical code order regardless of input
/// order, the table is omitted entirely when there are no items, and the
/// metadata block is always emitted with defaults filled. An empty id is
/// replaced by a freshly generated UUID.
pub fn serialize(body: &str, action_items: &[ActionItem], metadata: &Metadata) -> String {
    let mut out = String::new();
    out.push_str(body.trim());

    if !action_items.is_empty() {
        let mut ordered: Vec<&ActionItem> = action_items.iter().collect();
        ordered.sort_by(|a, b| compare_codes(&a.code, &b.code));

        out.push_str("\n\n");
        out.push_str(TABLE_SENTINEL);
        out.push('\n');
        out.push_str("| Code | Status | Created | Deadline | Owner | Task | Comment |\n");
        out.push_str("|------|--------|---------|----------|-------|------|---------|\n");
        for item in ordered {
            let status = if item.done { "[x]" } else { "[ ]" };
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} |\n",
                write_cell(&item.code),
                status,
                write_cell(&item.created),
                write_cell(&item.deadline),
                write_cell(&item.owner),
                write_cell(&item.task),
                write_cell(&item.comment),
            ));
        }
    }

    // Empty fields are filled at write time, so what lands on disk always
    // parses back to the same metadata.
    let id = if metadata.id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        metadata.id.clone()
    };
    let defaults = Metadata::default();
    let doc_type = if metadata.doc_type.is_empty() {
        &defaults.doc_type
    } else {
        &metadata.doc_type
    };
    let status = if metadata.status.is_empty() {
        &defaults.status
    } else {
        &metadata.status
    };

    out.push_str("\n\n");
    out.push_str(META_SENTINEL);
    out.push('\n');
    out.push_str(&format!("ID: {}\n", id));
    out.push_str(&format!("TYPE: {}\n", doc_type));
    out.push_str(&format!("STATUS: {}\n", status));
    out.push_str(&format!("TAGS: {}\n", metadata.tags.join(";")));

    out
}

/// Canonical cross-document ordering: owning path (lexicographic), then
/// dotted code.
pub fn sort_canonical(items: &mut [ActionItem]) {
    items.sort_by(|a, b| {
        a.note_path
            .cmp(&b.note_path)
            .then_with(|| compare_codes(&a.code, &b.code))
    });
}
