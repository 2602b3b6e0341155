//! Hierarchical action-item model.
//!
//! Action items are identified by dotted codes ("3.1.2"). The code encodes the
//! hierarchy: dropping the last dot-segment yields the parent code, and the
//! canonical ordering puts a parent immediately before all of its descendants.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Compare two dotted codes component-by-component as integers.
///
/// "3.10" sorts after "3.2" (numeric, not lexicographic), and a shorter code
/// sorts before any of its extensions, so "1" < "1.1" < "1.2" < "1.10" < "2".
pub fn compare_codes(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(xi), Ok(yi)) => xi.cmp(&yi),
                    // Malformed segments fall back to string order so the
                    // sort stays total.
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Parent code of a dotted code: the string obtained by dropping the last
/// dot-segment. Root codes have no parent.
pub fn parent_code(code: &str) -> Option<&str> {
    code.rsplit_once('.').map(|(parent, _)| parent)
}

/// Allocate the next child code under `parent`: among existing codes matching
/// exactly `parent.<int>` (one level deeper only), take the max trailing
/// integer and add one; `parent.1` if no such sibling exists.
pub fn allocate_child_code<'a, I>(parent: &str, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let max = existing
        .into_iter()
        .filter_map(|code| {
            let (p, last) = code.rsplit_once('.')?;
            if p != parent {
                return None;
            }
            last.parse::<u64>().ok()
        })
        .max();

    match max {
        Some(n) => format!("{}.{}", parent, n + 1),
        None => format!("{}.1", parent),
    }
}

/// Allocate the next root code: among existing codes with no dot, take the
/// max integer value and add one; "1" if none exist.
pub fn allocate_root_code<'a, I>(existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let max = existing
        .into_iter()
        .filter(|code| !code.contains('.'))
        .filter_map(|code| code.parse::<u64>().ok())
        .max();

    match max {
        Some(n) => format!("{}", n + 1),
        None => "1".to_string(),
    }
}

/// Runtime-only collapse state, keyed by code. Never serialized: collapse is
/// a view concern and must not leak into the document format.
#[derive(Debug, Default, Clone)]
pub struct CollapseSet {
    collapsed: HashMap<String, bool>,
}

impl CollapseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_collapsed(&mut self, code: &str, collapsed: bool) {
        self.collapsed.insert(code.to_string(), collapsed);
    }

    pub fn toggle(&mut self, code: &str) {
        let entry = self.collapsed.entry(code.to_string()).or_insert(false);
        *entry = !*entry;
    }

    pub fn is_collapsed(&self, code: &str) -> bool {
        self.collapsed.get(code).copied().unwrap_or(false)
    }

    /// A code is visible iff every strict ancestor that exists in the same
    /// item set is expanded. Ancestors are built by iteratively truncating
    /// the last dot-segment; ancestors absent from `present` are ignored.
    pub fn is_visible(&self, code: &str, present: &HashSet<String>) -> bool {
        let mut current = code;
        while let Some(parent) = parent_code(current) {
            if present.contains(parent) && self.is_collapsed(parent) {
                return false;
            }
            current = parent;
        }
        true
    }

    /// Filter `codes` down to the visible ones, preserving input order.
    pub fn visible<'a>(&self, codes: &'a [String]) -> Vec<&'a str> {
        let present: HashSet<String> = codes.iter().cloned().collect();
        codes
            .iter()
            .filter(|code| self.is_visible(code, &present))
            .map(|code| code.as_str())
            .collect()
    }
}
