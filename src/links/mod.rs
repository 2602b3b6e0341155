//! Wiki-link resolution and move/rename propagation.
//!
//! Links are plain text tokens of the form `[[path]]` or `[[path-no-ext]]`.
//! When a document moves or is renamed, every other markdown file that
//! references its old token is rewritten to the new one. The closing `]]`
//! bounds each replacement, so `[[A/B]]` never bleeds into `[[A/B2]]` or
//! `[[A/B/C]]`.

use crate::document;
use crate::fs::VaultFs;

/// Drop the extension from the final segment of a vault path.
pub fn strip_extension(path: &str) -> &str {
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(dot) => &path[..name_start + dot],
        None => path,
    }
}

fn wiki_token(path: &str) -> String {
    format!("[[{}]]", path)
}

/// Forward links of a raw document, in order of appearance.
pub fn forward_links(raw: &str) -> Vec<String> {
    document::parse(raw).forward_links
}

/// Rewrite every reference to `old_path` across the vault to point at
/// `new_path`. Both the full-path and extension-stripped token forms are
/// rewritten. Returns the number of files changed; a failure on one file
/// does not stop the rest, and all failures come back joined in the error.
pub fn propagate_rename<F: VaultFs>(
    fs: &F,
    old_path: &str,
    new_path: &str,
) -> Result<usize, String> {
    let replacements = [
        (wiki_token(old_path), wiki_token(new_path)),
        (
            wiki_token(strip_extension(old_path)),
            wiki_token(strip_extension(new_path)),
        ),
    ];

    let tree = fs.list_tree()?;
    let mut updated = 0usize;
    let mut failures: Vec<String> = Vec::new();

    for node in tree {
        if !node.is_markdown() || node.path == old_path || node.path == new_path {
            continue;
        }

        // Use the content the listing already loaded; re-read only when the
        // walk could not.
        let content = match node.content {
            Some(content) => content,
            None => match fs.read_file(&node.path) {
                Ok(content) => content,
                Err(e) => {
                    failures.push(format!("{}: {}", node.path, e));
                    continue;
                }
            },
        };

        let mut rewritten = content.clone();
        for (old_token, new_token) in &replacements {
            if old_token != new_token {
                rewritten = rewritten.replace(old_token.as_str(), new_token);
            }
        }
        if rewritten == content {
            continue;
        }

        match fs.write_file(&node.path, &rewritten) {
            Ok(()) => {
                log::debug!("[propagate_rename] Updated links in {}", node.path);
                updated += 1;
            }
            Err(e) => failures.push(format!("{}: {}", node.path, e)),
        }
    }

    if failures.is_empty() {
        Ok(updated)
    } else {
        Err(format!(
            "Link update failed for {} file(s): {}",
            failures.len(),
            failures.join("; ")
        ))
    }
}

/// Rename a document on disk, then rewrite inbound links. The rename is not
/// rolled back if propagation fails; callers surface the error and rescan.
pub fn rename_document<F: VaultFs>(
    fs: &F,
    old_path: &str,
    new_name: &str,
) -> Result<String, String> {
    let new_path = fs.rename_entry(old_path, new_name)?;
    log::info!("[rename_document] {} -> {}", old_path, new_path);
    propagate_rename(fs, old_path, &new_path)?;
    Ok(new_path)
}

/// Move a document into another directory, then rewrite inbound links.
pub fn move_document<F: VaultFs>(
    fs: &F,
    src: &str,
    dest_dir: &str,
) -> Result<String, String> {
    let new_path = fs.move_entry(src, dest_dir)?;
    log::info!("[move_document] {} -> {}", src, new_path);
    propagate_rename(fs, src, &new_path)?;
    Ok(new_path)
}
