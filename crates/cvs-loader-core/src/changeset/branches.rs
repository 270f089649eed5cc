//! Parent, branch and tag assignment over emitted commits.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use super::cluster::{Aliases, TRUNK};
use super::SynthesizedCommit;
use crate::errors::{HistoryWarning, WarningKind};
use crate::models::FileHistory;
use crate::revnum::RevisionNumber;

/// Per-branch cursor while walking commits in emission order.
#[derive(Debug, Default)]
pub struct BranchState {
    pub tip: Option<usize>,
    /// Last revision merged on this branch, per path.
    pub last_revision: HashMap<String, RevisionNumber>,
}

/// Look up the commit holding `(file, revision)`, following aliases of
/// folded or dropped revisions.
pub(crate) fn commit_of(
    rev_commit: &HashMap<(usize, RevisionNumber), usize>,
    aliases: &Aliases,
    file: usize,
    revision: &RevisionNumber,
) -> Option<usize> {
    let mut current = revision.clone();
    for _ in 0..=aliases.len() {
        if let Some(c) = rev_commit.get(&(file, current.clone())) {
            return Some(*c);
        }
        current = aliases.get(&(file, current))?.clone();
    }
    None
}

/// Fill in `parents` for every commit and return the branch tips.
pub(crate) fn assign_parents(
    commits: &mut [SynthesizedCommit],
    histories: &[FileHistory],
    aliases: &Aliases,
    rev_commit: &HashMap<(usize, RevisionNumber), usize>,
) -> BTreeMap<String, usize> {
    let mut states: HashMap<String, BranchState> = HashMap::new();

    for pos in 0..commits.len() {
        let label = commits[pos].branch.clone();
        let parent = match states.get(&label) {
            Some(state) => state.tip,
            None => branch_origin(&commits[pos], pos, histories, aliases, rev_commit)
                .or_else(|| states.get(TRUNK).and_then(|s| s.tip).filter(|_| label != TRUNK)),
        };
        commits[pos].parents = parent.into_iter().collect();

        let state = states.entry(label).or_default();
        state.tip = Some(pos);
        for member in &commits[pos].members {
            state
                .last_revision
                .insert(member.path.clone(), member.revision.clone());
        }
    }

    states
        .into_iter()
        .filter_map(|(label, state)| state.tip.map(|tip| (label, tip)))
        .collect()
}

/// The commit holding the latest branch-point revision among the first
/// commit's members.
fn branch_origin(
    commit: &SynthesizedCommit,
    pos: usize,
    histories: &[FileHistory],
    aliases: &Aliases,
    rev_commit: &HashMap<(usize, RevisionNumber), usize>,
) -> Option<usize> {
    commit
        .members
        .iter()
        .filter_map(|m| {
            let history = &histories[m.file];
            let mut point = m.revision.branch_point()?;
            // Walk back past branch points that never became a commit.
            for _ in 0..history.revision_count() {
                if let Some(c) = commit_of(rev_commit, aliases, m.file, &point) {
                    return Some(c);
                }
                point = history.parent(&point)?.clone();
            }
            None
        })
        .filter(|c| *c < pos)
        .max()
}

/// Branch symbols with no commits of their own label point at the latest
/// commit holding one of their revisions, or else at the commit that holds
/// their branch point. The first case covers a default vendor branch, whose
/// imports are threaded onto the trunk.
pub(crate) fn add_orphan_branches(
    branches: &mut BTreeMap<String, usize>,
    histories: &[FileHistory],
    aliases: &Aliases,
    rev_commit: &HashMap<(usize, RevisionNumber), usize>,
    warnings: &mut Vec<HistoryWarning>,
) {
    let mut orphans: BTreeMap<String, Option<usize>> = BTreeMap::new();
    for (file, history) in histories.iter().enumerate() {
        for (branch, name) in history.branch_names() {
            if branches.contains_key(&name) {
                continue;
            }
            let on_branch = history
                .revisions()
                .filter(|r| r.number.is_on_branch(&branch))
                .filter_map(|r| commit_of(rev_commit, aliases, file, &r.number))
                .max();
            let target = on_branch.or_else(|| {
                branch
                    .branch_point()
                    .and_then(|point| commit_of(rev_commit, aliases, file, &point))
            });
            let slot = orphans.entry(name).or_insert(None);
            *slot = match (*slot, target) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
    }
    for (name, target) in orphans {
        match target {
            Some(c) => {
                branches.insert(name, c);
            }
            None => {
                warn!(branch = %name, "branch has no reachable branch point");
                warnings.push(HistoryWarning::new(
                    WarningKind::InconsistentHistory,
                    format!("branch {} has no revisions and no recorded branch point", name),
                ));
            }
        }
    }
}

/// Resolve every tag to the latest commit among the revisions it names.
/// Tags naming a revision a file does not have are dropped.
pub(crate) fn resolve_tags(
    histories: &[FileHistory],
    aliases: &Aliases,
    rev_commit: &HashMap<(usize, RevisionNumber), usize>,
    warnings: &mut Vec<HistoryWarning>,
) -> BTreeMap<String, usize> {
    let mut targets: BTreeMap<String, Option<usize>> = BTreeMap::new();
    let mut broken: BTreeMap<String, String> = BTreeMap::new();

    for (file, history) in histories.iter().enumerate() {
        for (name, number) in history.tags() {
            let slot = targets.entry(name.clone()).or_insert(None);
            let Some(record) = history.revision(number) else {
                broken
                    .entry(name.clone())
                    .or_insert_with(|| format!("{} names undefined revision {}", history.path, number));
                continue;
            };
            if record.state.is_dead() {
                continue;
            }
            if let Some(c) = commit_of(rev_commit, aliases, file, number) {
                *slot = Some(slot.map_or(c, |prev| prev.max(c)));
            }
        }
    }

    let mut tags = BTreeMap::new();
    for (name, target) in targets {
        if let Some(reason) = broken.get(&name) {
            warn!(tag = %name, %reason, "dropping tag");
            warnings.push(HistoryWarning::new(
                WarningKind::InconsistentHistory,
                format!("tag {} dropped: {}", name, reason),
            ));
            continue;
        }
        match target {
            Some(c) => {
                tags.insert(name, c);
            }
            None => warnings.push(HistoryWarning::new(
                WarningKind::InconsistentHistory,
                format!("tag {} names no live revision", name),
            )),
        }
    }
    tags
}
