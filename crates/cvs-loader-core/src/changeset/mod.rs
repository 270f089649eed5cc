//! Changeset reconstruction.
//!
//! Per-file histories carry no notion of a multi-file commit. This module
//! groups `(path, revision)` pairs into [`SynthesizedCommit`]s, orders them
//! so every per-file parent precedes its child, threads them into branches
//! and resolves tags.
//!
//! # Pipeline
//!
//! 1. flatten every history into candidates, sorted by
//!    `(timestamp, author, path, revision)`;
//! 2. greedy clustering with one open cluster per branch label
//!    ([`cluster`]);
//! 3. topological emission with cycle splitting ([`order`]);
//! 4. parent, branch and tag assignment ([`branches`]).

mod branches;
mod cluster;
mod order;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::errors::HistoryWarning;
use crate::models::FileHistory;
use crate::revnum::RevisionNumber;

pub use branches::BranchState;
pub use cluster::TRUNK;

/// Default clustering window in seconds.
pub const DEFAULT_FUZZ_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct ReconstructOptions {
    /// Maximum gap between a candidate and the latest member of the
    /// cluster it joins.
    pub fuzz_window_secs: i64,
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self {
            fuzz_window_secs: DEFAULT_FUZZ_WINDOW_SECS,
        }
    }
}

/// One file revision bundled into a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitMember {
    /// Index into the history slice passed to [`reconstruct`].
    #[serde(skip)]
    pub file: usize,
    pub path: String,
    pub revision: RevisionNumber,
    /// The path is removed from the tree by this commit.
    pub dead: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesizedCommit {
    /// Position in emission order.
    pub id: usize,
    /// Hex SHA-256 identifying this changeset across runs.
    pub key: String,
    pub branch: String,
    pub author: String,
    pub message: String,
    /// Latest member timestamp.
    pub timestamp: DateTime<Utc>,
    pub commitid: Option<String>,
    /// Sorted by path.
    pub members: Vec<CommitMember>,
    pub parents: Vec<usize>,
}

/// Reconstructed project history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitGraph {
    pub commits: Vec<SynthesizedCommit>,
    pub branches: BTreeMap<String, usize>,
    pub tags: BTreeMap<String, usize>,
    pub warnings: Vec<HistoryWarning>,
}

impl CommitGraph {
    /// True when every parent precedes its child.
    pub fn is_topologically_ordered(&self) -> bool {
        self.commits
            .iter()
            .enumerate()
            .all(|(i, c)| c.parents.iter().all(|p| *p < i))
    }

    /// Tags whose target commit is at or before `position`.
    pub fn tags_up_to(&self, position: usize) -> impl Iterator<Item = (&String, &usize)> {
        self.tags.iter().filter(move |(_, c)| **c <= position)
    }

    /// Commit holding `(path, revision)`, if any.
    pub fn find_member(&self, path: &str, revision: &RevisionNumber) -> Option<&SynthesizedCommit> {
        self.commits
            .iter()
            .find(|c| c.members.iter().any(|m| m.path == path && &m.revision == revision))
    }
}

/// Deterministic digest of a changeset's identity.
pub fn changeset_key(branch: &str, author: &str, message: &str, members: &[CommitMember]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(branch.as_bytes());
    hasher.update(b"\n");
    hasher.update(author.as_bytes());
    hasher.update(b"\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(message.as_bytes());
    for m in members {
        hasher.update(format!("\n{} {}", m.path, m.revision).as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Build the commit graph for a set of parsed histories.
pub fn reconstruct(histories: &[FileHistory], options: &ReconstructOptions) -> CommitGraph {
    let mut warnings = Vec::new();
    let mut aliases = cluster::Aliases::new();

    let candidates = cluster::extract(histories, &mut aliases, &mut warnings);
    let clusters = cluster::cluster(&candidates, options.fuzz_window_secs);

    // Per-candidate dependency: the nearest ancestor revision that ended up
    // as a candidate (directly or through an alias).
    let mut cand_of: HashMap<(usize, RevisionNumber), usize> = HashMap::new();
    for (i, c) in candidates.iter().enumerate() {
        cand_of.insert((c.file, c.revision.clone()), i);
    }
    let resolve = |file: usize, rev: &RevisionNumber| -> Option<usize> {
        let mut current = rev.clone();
        for _ in 0..=aliases.len() {
            if let Some(i) = cand_of.get(&(file, current.clone())) {
                return Some(*i);
            }
            current = aliases.get(&(file, current))?.clone();
        }
        None
    };
    let deps: Vec<Option<usize>> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let history = &histories[c.file];
            let mut cursor = history.parent(&c.revision).cloned();
            while let Some(rev) = cursor {
                if let Some(d) = resolve(c.file, &rev) {
                    if d != i {
                        return Some(d);
                    }
                }
                cursor = history.parent(&rev).cloned();
            }
            None
        })
        .collect();

    let ordered = order::emission_order(clusters, &candidates, &deps, &mut warnings);

    let mut commits: Vec<SynthesizedCommit> = Vec::with_capacity(ordered.len());
    let mut rev_commit: HashMap<(usize, RevisionNumber), usize> = HashMap::new();
    for (pos, cl) in ordered.into_iter().enumerate() {
        let mut members: Vec<CommitMember> = cl
            .members
            .iter()
            .map(|&m| {
                let c = &candidates[m];
                CommitMember {
                    file: c.file,
                    path: c.path.clone(),
                    revision: c.revision.clone(),
                    dead: c.dead,
                }
            })
            .collect();
        members.sort_by(|a, b| a.path.cmp(&b.path));
        for m in &members {
            rev_commit.insert((m.file, m.revision.clone()), pos);
        }
        let timestamp = cl
            .members
            .iter()
            .map(|&m| candidates[m].timestamp)
            .max()
            .unwrap_or_default();
        commits.push(SynthesizedCommit {
            id: pos,
            key: changeset_key(&cl.label, &cl.author, &cl.message, &members),
            branch: cl.label,
            author: cl.author,
            message: cl.message,
            timestamp,
            commitid: cl.commitid,
            members,
            parents: Vec::new(),
        });
    }

    let mut branches = branches::assign_parents(&mut commits, histories, &aliases, &rev_commit);
    branches::add_orphan_branches(&mut branches, histories, &aliases, &rev_commit, &mut warnings);
    let tags = branches::resolve_tags(histories, &aliases, &rev_commit, &mut warnings);

    info!(
        files = histories.len(),
        revisions = candidates.len(),
        commits = commits.len(),
        branches = branches.len(),
        tags = tags.len(),
        "reconstructed changesets"
    );

    CommitGraph {
        commits,
        branches,
        tags,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WarningKind;
    use crate::models::{ExpandMode, RevisionRecord, RevisionState};
    use crate::revnum::rev;
    use chrono::TimeZone;

    fn rec(number: &str, ts: i64, author: &str, message: &str) -> RevisionRecord {
        RevisionRecord {
            number: rev(number),
            author: author.to_string(),
            message: message.to_string(),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            state: RevisionState::Alive,
            state_label: "Exp".to_string(),
            delta: None,
            next: None,
            branches: Vec::new(),
            commitid: None,
            symbols: Vec::new(),
        }
    }

    fn dead(number: &str, ts: i64, author: &str, message: &str) -> RevisionRecord {
        let mut r = rec(number, ts, author, message);
        r.state = RevisionState::Dead;
        r.state_label = "dead".to_string();
        r
    }

    fn file(path: &str, records: Vec<RevisionRecord>, symbols: &[(&str, &str)]) -> FileHistory {
        FileHistory::assemble(
            path.to_string(),
            false,
            None,
            None,
            ExpandMode::Kv,
            vec![],
            BTreeMap::new(),
            None,
            String::new(),
            symbols.iter().map(|(n, r)| (n.to_string(), rev(r))).collect(),
            records,
        )
    }

    fn build(files: &[FileHistory]) -> CommitGraph {
        reconstruct(files, &ReconstructOptions::default())
    }

    #[test]
    fn test_fix_typo_pair_is_one_commit() {
        let files = vec![
            file("a.c", vec![rec("1.1", 1000, "joe", "fix typo")], &[]),
            file("b.c", vec![rec("1.1", 1003, "joe", "fix typo")], &[]),
        ];
        let g = build(&files);
        assert_eq!(g.commits.len(), 1);
        let c = &g.commits[0];
        assert_eq!(c.members.len(), 2);
        assert_eq!(c.timestamp.timestamp(), 1003);
        assert!(c.parents.is_empty());
        assert_eq!(g.branches.get(TRUNK), Some(&0));
    }

    #[test]
    fn test_branch_tip_and_tag_on_vendor_style_branch() {
        let files = vec![file(
            "a.c",
            vec![rec("1.1", 1000, "joe", "initial"), rec("1.1.1.1", 2000, "joe", "branch work")],
            &[("BR", "1.1.0.1"), ("REL1", "1.1.1.1")],
        )];
        let g = build(&files);
        assert_eq!(g.commits.len(), 2);
        let tip = *g.branches.get("BR").unwrap();
        assert_eq!(g.commits[tip].members[0].revision, rev("1.1.1.1"));
        assert_eq!(g.commits[tip].parents, vec![0]);
        assert_eq!(g.tags.get("REL1"), Some(&tip));
        assert_eq!(g.branches.get(TRUNK), Some(&0));
    }

    #[test]
    fn test_trunk_is_linear_and_ordered() {
        let files = vec![
            file(
                "a",
                vec![
                    rec("1.1", 100, "joe", "one"),
                    rec("1.2", 200, "ann", "two"),
                    rec("1.3", 300, "joe", "three"),
                ],
                &[],
            ),
            file("b", vec![rec("1.1", 201, "ann", "two")], &[]),
        ];
        let g = build(&files);
        assert_eq!(g.commits.len(), 3);
        assert!(g.is_topologically_ordered());
        assert_eq!(g.commits[1].members.len(), 2);
        assert_eq!(g.commits[1].parents, vec![0]);
        assert_eq!(g.commits[2].parents, vec![1]);
    }

    #[test]
    fn test_clock_skew_child_before_parent_is_repaired() {
        // 1.2 of "a" claims an earlier time than 1.1; the other files make
        // each cluster depend on the other.
        let files = vec![
            file(
                "a",
                vec![rec("1.1", 500, "joe", "first"), rec("1.2", 100, "ann", "second")],
                &[],
            ),
            file(
                "b",
                vec![rec("1.1", 100, "ann", "second"), rec("1.2", 500, "joe", "first")],
                &[],
            ),
        ];
        let g = build(&files);
        assert!(g.is_topologically_ordered());
        // Every revision still lands in exactly one commit.
        let total: usize = g.commits.iter().map(|c| c.members.len()).sum();
        assert_eq!(total, 4);
        for c in &g.commits {
            for m in &c.members {
                if m.revision == rev("1.2") {
                    let parent = g.find_member(&m.path, &rev("1.1")).unwrap();
                    assert!(parent.id < c.id);
                }
            }
        }
        assert!(g.warnings.iter().any(|w| w.kind == WarningKind::OrderingRepair));
    }

    #[test]
    fn test_delete_and_readd_marks_middle_commit_dead() {
        let files = vec![file(
            "a",
            vec![
                rec("1.1", 100, "joe", "add"),
                dead("1.2", 200, "joe", "remove"),
                rec("1.3", 300, "joe", "re-add"),
            ],
            &[],
        )];
        let g = build(&files);
        assert_eq!(g.commits.len(), 3);
        assert!(!g.commits[0].members[0].dead);
        assert!(g.commits[1].members[0].dead);
        assert!(!g.commits[2].members[0].dead);
    }

    #[test]
    fn test_tag_on_undefined_revision_is_dropped() {
        let files = vec![
            file("a", vec![rec("1.1", 100, "joe", "x")], &[("GOOD", "1.1"), ("BAD", "1.1")]),
            file("b", vec![rec("1.1", 100, "joe", "x")], &[("BAD", "1.7")]),
        ];
        let g = build(&files);
        assert_eq!(g.tags.get("GOOD"), Some(&0));
        assert!(!g.tags.contains_key("BAD"));
        assert!(g
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::InconsistentHistory && w.message.contains("BAD")));
    }

    #[test]
    fn test_empty_branch_symbol_points_at_branch_point() {
        let files = vec![file(
            "a",
            vec![rec("1.1", 100, "joe", "x"), rec("1.2", 200, "joe", "y")],
            &[("EMPTY", "1.1.0.2")],
        )];
        let g = build(&files);
        assert_eq!(g.branches.get("EMPTY"), Some(&0));
        assert_eq!(g.branches.get(TRUNK), Some(&1));
    }

    #[test]
    fn test_vendor_symbol_follows_latest_import() {
        let mut history = file(
            "lib.c",
            vec![
                rec("1.1", 100, "vendor", "import"),
                rec("1.1.1.1", 100, "vendor", "import"),
                rec("1.1.1.2", 500, "vendor", "import v2"),
            ],
            &[("VENDOR", "1.1.1"), ("V1", "1.1.1.1"), ("V2", "1.1.1.2")],
        );
        history.default_branch = Some(rev("1.1.1"));
        let g = build(&[history]);
        let latest = *g.tags.get("V2").unwrap();
        assert_eq!(g.commits[latest].members[0].revision, rev("1.1.1.2"));
        assert_eq!(g.branches.get("VENDOR"), Some(&latest));
        assert_eq!(g.branches.get(TRUNK), Some(&latest));
    }

    #[test]
    fn test_changeset_keys_are_stable() {
        let files = vec![file("a", vec![rec("1.1", 100, "joe", "x")], &[])];
        let a = build(&files);
        let b = build(&files);
        assert_eq!(a.commits[0].key, b.commits[0].key);
        assert_eq!(a.commits[0].key.len(), 64);
    }
}
