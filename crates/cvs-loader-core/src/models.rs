//! Core data models for per-file histories.
//!
//! A [`FileHistory`] is the parsed form of one RCS file (or one `rlog`
//! transcript). Revisions live in an arena keyed by [`RevisionNumber`];
//! parent links are computed once when the history is built and never
//! stored as references.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::revnum::RevisionNumber;

/// Liveness of a revision. CVS marks removals with the state `dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionState {
    Alive,
    Dead,
}

impl RevisionState {
    pub fn from_rcs(state: &str) -> Self {
        if state.eq_ignore_ascii_case("dead") {
            RevisionState::Dead
        } else {
            RevisionState::Alive
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, RevisionState::Dead)
    }
}

/// How a revision's stored text relates to its neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaFormat {
    /// The head revision stores its complete text.
    FullText,
    /// Line-based `a`/`d` edit script against the neighbour revision.
    RcsDiff,
}

/// Opaque delta payload plus its format tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaText {
    pub format: DeltaFormat,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl DeltaText {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One node of a file's revision tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevisionRecord {
    pub number: RevisionNumber,
    pub author: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub state: RevisionState,
    /// Raw RCS state word (`Exp`, `Stab`, `dead`, ...), used by `$State$`.
    pub state_label: String,
    /// `None` for histories read from an `rlog` transcript.
    pub delta: Option<DeltaText>,
    /// `next` as recorded in the RCS file: the older trunk revision, or the
    /// newer revision on a branch.
    pub next: Option<RevisionNumber>,
    /// First revisions of the branches sprouting here.
    pub branches: Vec<RevisionNumber>,
    pub commitid: Option<String>,
    /// Symbolic names pointing at this revision.
    pub symbols: Vec<String>,
}

/// RCS keyword substitution mode (`expand` admin field, `-k` option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpandMode {
    #[default]
    Kv,
    Kkv,
    K,
    O,
    B,
    V,
}

impl ExpandMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "kv" => Some(ExpandMode::Kv),
            "kvl" | "kkv" => Some(ExpandMode::Kkv),
            "k" => Some(ExpandMode::K),
            "o" => Some(ExpandMode::O),
            "b" => Some(ExpandMode::B),
            "v" => Some(ExpandMode::V),
            _ => None,
        }
    }

    /// Modes that leave file contents untouched.
    pub fn is_verbatim(&self) -> bool {
        matches!(self, ExpandMode::O | ExpandMode::B)
    }
}

/// The complete history of one tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHistory {
    /// Logical path relative to the module root, without `,v` and without
    /// any `Attic/` component.
    pub path: String,
    /// True when the RCS file lives in the Attic.
    pub deleted: bool,
    pub executable: bool,
    pub head: Option<RevisionNumber>,
    pub default_branch: Option<RevisionNumber>,
    pub expand: ExpandMode,
    pub access: Vec<String>,
    pub locks: BTreeMap<String, RevisionNumber>,
    pub comment: Option<String>,
    pub description: String,
    /// Symbol table exactly as recorded (magic branch numbers included).
    pub symbols: BTreeMap<String, RevisionNumber>,
    revisions: BTreeMap<RevisionNumber, RevisionRecord>,
    parents: BTreeMap<RevisionNumber, RevisionNumber>,
}

impl FileHistory {
    /// Assemble a history from parsed parts.
    ///
    /// Symbols are attached to the revisions they name (forward references
    /// are resolved here, against the final set). Parent links come from the
    /// recorded `next`/`branches` links when present, otherwise they are
    /// derived from the revision numbers.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        path: String,
        deleted: bool,
        head: Option<RevisionNumber>,
        default_branch: Option<RevisionNumber>,
        expand: ExpandMode,
        access: Vec<String>,
        locks: BTreeMap<String, RevisionNumber>,
        comment: Option<String>,
        description: String,
        symbols: BTreeMap<String, RevisionNumber>,
        records: Vec<RevisionRecord>,
    ) -> Self {
        let mut revisions: BTreeMap<RevisionNumber, RevisionRecord> = records
            .into_iter()
            .map(|r| (r.number.clone(), r))
            .collect();

        for record in revisions.values_mut() {
            record.symbols.clear();
        }
        for (name, number) in &symbols {
            if let Some(record) = revisions.get_mut(number) {
                record.symbols.push(name.clone());
            }
        }

        let linked = revisions
            .values()
            .any(|r| r.next.is_some() || !r.branches.is_empty());
        let parents = if linked {
            parents_from_links(&revisions)
        } else {
            parents_from_numbers(&revisions)
        };

        Self {
            path,
            deleted,
            executable: false,
            head,
            default_branch,
            expand,
            access,
            locks,
            comment,
            description,
            symbols,
            revisions,
            parents,
        }
    }

    pub fn revision(&self, number: &RevisionNumber) -> Option<&RevisionRecord> {
        self.revisions.get(number)
    }

    pub fn contains(&self, number: &RevisionNumber) -> bool {
        self.revisions.contains_key(number)
    }

    /// All revisions in revision-number order.
    pub fn revisions(&self) -> impl Iterator<Item = &RevisionRecord> {
        self.revisions.values()
    }

    pub fn revision_count(&self) -> usize {
        self.revisions.len()
    }

    /// The revision this one was derived from in history terms (older).
    pub fn parent(&self, number: &RevisionNumber) -> Option<&RevisionNumber> {
        self.parents.get(number)
    }

    /// The neighbour whose text this revision's delta applies to: the newer
    /// trunk revision for trunk deltas, the parent for branch deltas.
    pub fn delta_base(&self, number: &RevisionNumber) -> Option<RevisionNumber> {
        if number.is_trunk() {
            self.revisions
                .values()
                .find(|r| r.number.is_trunk() && r.next.as_ref() == Some(number))
                .map(|r| r.number.clone())
        } else {
            self.parents.get(number).cloned()
        }
    }

    /// Branch symbols keyed by normalized branch number (`1.2.4`).
    pub fn branch_names(&self) -> BTreeMap<RevisionNumber, String> {
        let mut names = BTreeMap::new();
        for (name, number) in &self.symbols {
            if number.is_branch_symbol() {
                names
                    .entry(number.normalize_branch())
                    .or_insert_with(|| name.clone());
            }
        }
        names
    }

    /// Non-branch symbols: tags on a specific revision.
    pub fn tags(&self) -> impl Iterator<Item = (&String, &RevisionNumber)> {
        self.symbols.iter().filter(|(_, n)| !n.is_branch_symbol())
    }

    /// Symbolic name of the tag pointing at `number`, if any (`$Name$`).
    pub fn tag_for(&self, number: &RevisionNumber) -> Option<&str> {
        self.tags()
            .find(|(_, n)| *n == number)
            .map(|(name, _)| name.as_str())
    }

    pub fn locker_of(&self, number: &RevisionNumber) -> Option<&str> {
        self.locks
            .iter()
            .find(|(_, n)| *n == number)
            .map(|(who, _)| who.as_str())
    }

    /// Name of the RCS file as it appears in `$RCSfile$`.
    pub fn rcs_filename(&self) -> String {
        let base = self.path.rsplit('/').next().unwrap_or(&self.path);
        format!("{},v", base)
    }
}

/// Map an RCS file path relative to the module root (`dir/Attic/f.c,v`)
/// to its logical path (`dir/f.c`) and Attic flag. Returns `None` for
/// names that are not revision files.
pub fn logical_path(relative: &str) -> Option<(String, bool)> {
    let stripped = relative.trim_start_matches('/').strip_suffix(",v")?;
    let mut deleted = false;
    let mut parts: Vec<&str> = stripped.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() >= 2 && parts[parts.len() - 2] == "Attic" {
        parts.remove(parts.len() - 2);
        deleted = true;
    }
    if parts.is_empty() {
        return None;
    }
    Some((parts.join("/"), deleted))
}

fn parents_from_links(
    revisions: &BTreeMap<RevisionNumber, RevisionRecord>,
) -> BTreeMap<RevisionNumber, RevisionNumber> {
    let mut parents = BTreeMap::new();
    for record in revisions.values() {
        if let Some(next) = &record.next {
            if !revisions.contains_key(next) {
                continue;
            }
            if record.number.is_trunk() {
                // Trunk `next` points at the older revision.
                parents.insert(record.number.clone(), next.clone());
            } else {
                parents.insert(next.clone(), record.number.clone());
            }
        }
        for first in &record.branches {
            if revisions.contains_key(first) {
                parents.insert(first.clone(), record.number.clone());
            }
        }
    }
    parents
}

fn parents_from_numbers(
    revisions: &BTreeMap<RevisionNumber, RevisionRecord>,
) -> BTreeMap<RevisionNumber, RevisionNumber> {
    let mut parents = BTreeMap::new();
    let mut previous_on_branch: BTreeMap<RevisionNumber, RevisionNumber> = BTreeMap::new();

    // BTreeMap order visits each branch's revisions in ascending order.
    for number in revisions.keys() {
        let Some(branch) = number.branch() else {
            continue;
        };
        match previous_on_branch.get(&branch) {
            Some(prev) => {
                parents.insert(number.clone(), prev.clone());
            }
            None => {
                if let Some(point) = number.branch_point() {
                    if revisions.contains_key(&point) {
                        parents.insert(number.clone(), point);
                    }
                }
            }
        }
        previous_on_branch.insert(branch, number.clone());
    }
    parents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revnum::rev;
    use chrono::TimeZone;

    fn record(number: &str, next: Option<&str>, branches: &[&str]) -> RevisionRecord {
        RevisionRecord {
            number: rev(number),
            author: "joe".to_string(),
            message: String::new(),
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            state: RevisionState::Alive,
            state_label: "Exp".to_string(),
            delta: None,
            next: next.map(rev),
            branches: branches.iter().map(|b| rev(b)).collect(),
            commitid: None,
            symbols: Vec::new(),
        }
    }

    fn history(records: Vec<RevisionRecord>, symbols: &[(&str, &str)]) -> FileHistory {
        FileHistory::assemble(
            "src/a.c".to_string(),
            false,
            Some(rev("1.3")),
            None,
            ExpandMode::Kv,
            vec![],
            BTreeMap::new(),
            None,
            String::new(),
            symbols
                .iter()
                .map(|(n, r)| (n.to_string(), rev(r)))
                .collect(),
            records,
        )
    }

    #[test]
    fn parents_follow_rcs_links() {
        let h = history(
            vec![
                record("1.3", Some("1.2"), &[]),
                record("1.2", Some("1.1"), &["1.2.2.1"]),
                record("1.1", None, &[]),
                record("1.2.2.1", Some("1.2.2.2"), &[]),
                record("1.2.2.2", None, &[]),
            ],
            &[],
        );
        assert_eq!(h.parent(&rev("1.3")), Some(&rev("1.2")));
        assert_eq!(h.parent(&rev("1.2")), Some(&rev("1.1")));
        assert_eq!(h.parent(&rev("1.1")), None);
        assert_eq!(h.parent(&rev("1.2.2.1")), Some(&rev("1.2")));
        assert_eq!(h.parent(&rev("1.2.2.2")), Some(&rev("1.2.2.1")));
        assert_eq!(h.delta_base(&rev("1.2")), Some(rev("1.3")));
        assert_eq!(h.delta_base(&rev("1.3")), None);
        assert_eq!(h.delta_base(&rev("1.2.2.2")), Some(rev("1.2.2.1")));
    }

    #[test]
    fn parents_derived_from_numbers_without_links() {
        let h = history(
            vec![
                record("1.1", None, &[]),
                record("1.2", None, &[]),
                record("1.1.1.1", None, &[]),
                record("1.1.1.2", None, &[]),
            ],
            &[],
        );
        assert_eq!(h.parent(&rev("1.2")), Some(&rev("1.1")));
        assert_eq!(h.parent(&rev("1.1.1.1")), Some(&rev("1.1")));
        assert_eq!(h.parent(&rev("1.1.1.2")), Some(&rev("1.1.1.1")));
    }

    #[test]
    fn symbols_attach_and_split_into_branches_and_tags() {
        let h = history(
            vec![record("1.1", None, &[]), record("1.2", Some("1.1"), &[])],
            &[("REL1", "1.2"), ("STABLE", "1.2.0.2"), ("VENDOR", "1.1.1"), ("GHOST", "1.9")],
        );
        assert_eq!(h.revision(&rev("1.2")).unwrap().symbols, vec!["REL1"]);
        let branches = h.branch_names();
        assert_eq!(branches.get(&rev("1.2.2")).map(String::as_str), Some("STABLE"));
        assert_eq!(branches.get(&rev("1.1.1")).map(String::as_str), Some("VENDOR"));
        let tags: Vec<&String> = h.tags().map(|(n, _)| n).collect();
        assert_eq!(tags, vec!["GHOST", "REL1"]);
        assert_eq!(h.tag_for(&rev("1.2")), Some("REL1"));
    }

    #[test]
    fn logical_path_strips_attic_and_suffix() {
        assert_eq!(logical_path("src/a.c,v"), Some(("src/a.c".to_string(), false)));
        assert_eq!(logical_path("src/Attic/a.c,v"), Some(("src/a.c".to_string(), true)));
        assert_eq!(logical_path("Attic/top,v"), Some(("top".to_string(), true)));
        assert_eq!(logical_path("src/a.c"), None);
        assert_eq!(logical_path(",v"), None);
    }

    #[test]
    fn rcs_filename_uses_basename() {
        let h = history(vec![record("1.1", None, &[])], &[]);
        assert_eq!(h.rcs_filename(), "a.c,v");
    }
}
