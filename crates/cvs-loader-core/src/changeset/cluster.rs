//! Candidate extraction and greedy clustering.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::{HistoryWarning, WarningKind};
use crate::models::FileHistory;
use crate::revnum::RevisionNumber;

pub const TRUNK: &str = "HEAD";

/// One (path, revision) pair waiting to be grouped.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub file: usize,
    pub path: String,
    pub revision: RevisionNumber,
    pub label: String,
    pub author: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub dead: bool,
    pub commitid: Option<String>,
}

impl Candidate {
    pub fn ts(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

/// Revisions that were folded into another revision's commit:
/// `(file, folded) -> (file, target)`.
pub(crate) type Aliases = HashMap<(usize, RevisionNumber), RevisionNumber>;

fn is_added_on_branch_marker(message: &str) -> bool {
    message.starts_with("file ") && message.contains(" was initially added on branch ")
}

/// Label of the line of development a revision belongs to.
fn branch_label(
    history: &FileHistory,
    names: &BTreeMap<RevisionNumber, String>,
    number: &RevisionNumber,
    timestamp: i64,
    first_local_change: Option<i64>,
) -> String {
    if number.is_trunk() {
        return TRUNK.to_string();
    }
    let Some(branch) = number.branch() else {
        return TRUNK.to_string();
    };
    // Revisions on the default (vendor) branch are what a trunk checkout
    // sees until the file is first changed locally.
    if history.default_branch.as_ref() == Some(&branch)
        && first_local_change.map_or(true, |t| timestamp < t)
    {
        return TRUNK.to_string();
    }
    match names.get(&branch) {
        Some(name) => name.clone(),
        None => format!("unlabeled-{}", branch),
    }
}

/// Flatten histories into candidates, applying the per-file folding rules.
pub(crate) fn extract(
    histories: &[FileHistory],
    aliases: &mut Aliases,
    warnings: &mut Vec<HistoryWarning>,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    let r11 = RevisionNumber::new(vec![1, 1]);
    let r1111 = RevisionNumber::new(vec![1, 1, 1, 1]);

    for (file, history) in histories.iter().enumerate() {
        let names = history.branch_names();
        let first_local_change = history
            .revisions()
            .filter(|r| r.number.is_trunk() && r.number > r11)
            .map(|r| r.timestamp.timestamp())
            .min();

        // `cvs import` creates 1.1 and 1.1.1.1 with the same time; the
        // vendor revision carries no change of its own.
        let fold_vendor = match (history.revision(&r11), history.revision(&r1111)) {
            (Some(trunk), Some(vendor)) => {
                trunk.timestamp == vendor.timestamp
                    && vendor.delta.as_ref().map_or(true, |d| d.is_empty())
                    && !trunk.state.is_dead()
            }
            _ => false,
        };

        for record in history.revisions() {
            if fold_vendor && record.number == r1111 {
                aliases.insert((file, r1111.clone()), r11.clone());
                continue;
            }
            if record.number == r11 && record.state.is_dead() && is_added_on_branch_marker(&record.message) {
                debug!(path = %history.path, "skipping placeholder for file added on a branch");
                continue;
            }
            let ts = record.timestamp.timestamp();
            out.push(Candidate {
                file,
                path: history.path.clone(),
                revision: record.number.clone(),
                label: branch_label(history, &names, &record.number, ts, first_local_change),
                author: record.author.clone(),
                message: record.message.clone(),
                timestamp: record.timestamp,
                dead: record.state.is_dead(),
                commitid: record.commitid.clone(),
            });
        }
    }

    out.sort_by(|a, b| {
        a.ts()
            .cmp(&b.ts())
            .then_with(|| a.author.cmp(&b.author))
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.revision.cmp(&b.revision))
    });

    drop_duplicates(out, aliases, warnings)
}

/// Identical time, author and message on the same path and branch: the
/// later revision wins.
fn drop_duplicates(
    sorted: Vec<Candidate>,
    aliases: &mut Aliases,
    warnings: &mut Vec<HistoryWarning>,
) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::with_capacity(sorted.len());
    for cand in sorted {
        if let Some(prev) = out.last() {
            if prev.file == cand.file
                && prev.ts() == cand.ts()
                && prev.author == cand.author
                && prev.message == cand.message
                && prev.label == cand.label
            {
                warnings.push(HistoryWarning::for_path(
                    WarningKind::DuplicateRevision,
                    &cand.path,
                    format!(
                        "revision {} duplicates {} (same time, author and message); keeping {}",
                        prev.revision, cand.revision, cand.revision
                    ),
                ));
                aliases.insert((prev.file, prev.revision.clone()), cand.revision.clone());
                out.pop();
            }
        }
        out.push(cand);
    }
    out
}

/// A group of candidates forming one synthesized commit.
#[derive(Debug, Clone)]
pub(crate) struct Cluster {
    pub label: String,
    pub author: String,
    pub message: String,
    pub commitid: Option<String>,
    pub max_ts: i64,
    pub members: Vec<usize>,
    paths: HashSet<String>,
}

impl Cluster {
    fn open(idx: usize, cand: &Candidate) -> Self {
        let mut paths = HashSet::new();
        paths.insert(cand.path.clone());
        Self {
            label: cand.label.clone(),
            author: cand.author.clone(),
            message: cand.message.clone(),
            commitid: cand.commitid.clone(),
            max_ts: cand.ts(),
            members: vec![idx],
            paths,
        }
    }

    fn accepts(&self, cand: &Candidate, window: i64) -> bool {
        if self.author != cand.author || self.message != cand.message {
            return false;
        }
        if cand.ts() - self.max_ts > window {
            return false;
        }
        if self.paths.contains(&cand.path) {
            return false;
        }
        !matches!((&self.commitid, &cand.commitid), (Some(a), Some(b)) if a != b)
    }

    fn push(&mut self, idx: usize, cand: &Candidate) {
        self.members.push(idx);
        self.paths.insert(cand.path.clone());
        self.max_ts = self.max_ts.max(cand.ts());
        if self.commitid.is_none() {
            self.commitid = cand.commitid.clone();
        }
    }

    /// A cluster made of a subset of `self`'s members.
    pub fn subset(&self, members: Vec<usize>, candidates: &[Candidate]) -> Self {
        let paths = members.iter().map(|m| candidates[*m].path.clone()).collect();
        let max_ts = members
            .iter()
            .map(|m| candidates[*m].ts())
            .max()
            .unwrap_or(self.max_ts);
        Self {
            label: self.label.clone(),
            author: self.author.clone(),
            message: self.message.clone(),
            commitid: self.commitid.clone(),
            max_ts,
            members,
            paths,
        }
    }
}

/// Greedy clustering over sorted candidates with one open cluster per
/// branch label.
pub(crate) fn cluster(candidates: &[Candidate], window: i64) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut open: HashMap<String, usize> = HashMap::new();

    for (idx, cand) in candidates.iter().enumerate() {
        match open.get(&cand.label) {
            Some(&ci) if clusters[ci].accepts(cand, window) => clusters[ci].push(idx, cand),
            _ => {
                open.insert(cand.label.clone(), clusters.len());
                clusters.push(Cluster::open(idx, cand));
            }
        }
    }
    clusters
}
