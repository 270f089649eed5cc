//! Emission order for clusters.
//!
//! A cluster may only be emitted after every cluster holding a per-file
//! ancestor of one of its members. Among ready clusters the one created
//! first goes first. Clock skew can make the dependency graph cyclic; the
//! cycle is broken by splitting the earliest cluster that has at least one
//! ready member.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::warn;

use super::cluster::{Candidate, Cluster};
use crate::errors::{HistoryWarning, WarningKind};

/// Order `clusters` for emission. `deps[c]` is the candidate candidate `c`
/// must follow, if any.
pub(crate) fn emission_order(
    mut clusters: Vec<Cluster>,
    candidates: &[Candidate],
    deps: &[Option<usize>],
    warnings: &mut Vec<HistoryWarning>,
) -> Vec<Cluster> {
    let mut cluster_of = vec![usize::MAX; candidates.len()];
    for (ci, cluster) in clusters.iter().enumerate() {
        for &m in &cluster.members {
            cluster_of[m] = ci;
        }
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); candidates.len()];
    for (m, dep) in deps.iter().enumerate() {
        if let Some(d) = dep {
            dependents[*d].push(m);
        }
    }

    let mut emitted = vec![false; clusters.len()];
    let mut pending: Vec<usize> = clusters
        .iter()
        .enumerate()
        .map(|(ci, c)| count_blocked(ci, &c.members, deps, &cluster_of, &emitted))
        .collect();

    let mut heap: BinaryHeap<Reverse<usize>> = pending
        .iter()
        .enumerate()
        .filter(|(_, p)| **p == 0)
        .map(|(ci, _)| Reverse(ci))
        .collect();

    let mut order: Vec<usize> = Vec::with_capacity(clusters.len());
    let mut remaining = clusters.len();

    while remaining > 0 {
        if let Some(Reverse(ci)) = heap.pop() {
            if emitted[ci] {
                continue;
            }
            emit(
                ci,
                &clusters,
                &dependents,
                &cluster_of,
                &mut emitted,
                &mut pending,
                &mut heap,
            );
            order.push(ci);
            remaining -= 1;
            continue;
        }

        // Stuck: split the earliest cluster with some ready members.
        let is_ready = |m: usize, ci: usize, emitted: &[bool]| match deps[m] {
            None => true,
            Some(d) => cluster_of[d] == ci || emitted[cluster_of[d]],
        };
        let victim = (0..clusters.len()).find(|&ci| {
            !emitted[ci] && clusters[ci].members.iter().any(|&m| is_ready(m, ci, &emitted))
        });
        let Some(ci) = victim else {
            // Unreachable for per-file forests; emit the rest by creation
            // order rather than lose them.
            for ci in 0..clusters.len() {
                if !emitted[ci] {
                    emitted[ci] = true;
                    order.push(ci);
                }
            }
            break;
        };

        let (ready, blocked): (Vec<usize>, Vec<usize>) = clusters[ci]
            .members
            .iter()
            .partition(|&&m| is_ready(m, ci, &emitted));

        let first = &candidates[clusters[ci].members[0]];
        warn!(
            author = %first.author,
            ready = ready.len(),
            blocked = blocked.len(),
            "splitting changeset to break an ordering cycle"
        );
        warnings.push(HistoryWarning::new(
            WarningKind::OrderingRepair,
            format!(
                "changeset by {} on {} split into {} ready and {} blocked revisions",
                first.author,
                clusters[ci].label,
                ready.len(),
                blocked.len()
            ),
        ));

        let split = clusters[ci].subset(ready, candidates);
        let rest = clusters[ci].subset(blocked, candidates);
        let new_ci = clusters.len();
        for &m in &split.members {
            cluster_of[m] = new_ci;
        }
        clusters[ci] = rest;
        clusters.push(split);
        emitted.push(false);
        pending.push(0);
        pending[ci] = count_blocked(ci, &clusters[ci].members, deps, &cluster_of, &emitted);

        emit(
            new_ci,
            &clusters,
            &dependents,
            &cluster_of,
            &mut emitted,
            &mut pending,
            &mut heap,
        );
        order.push(new_ci);
        if pending[ci] == 0 {
            heap.push(Reverse(ci));
        }
    }

    let mut slots: Vec<Option<Cluster>> = clusters.into_iter().map(Some).collect();
    order.into_iter().filter_map(|ci| slots[ci].take()).collect()
}

fn count_blocked(
    ci: usize,
    members: &[usize],
    deps: &[Option<usize>],
    cluster_of: &[usize],
    emitted: &[bool],
) -> usize {
    members
        .iter()
        .filter(|&&m| match deps[m] {
            Some(d) => cluster_of[d] != ci && !emitted[cluster_of[d]],
            None => false,
        })
        .count()
}

fn emit(
    ci: usize,
    clusters: &[Cluster],
    dependents: &[Vec<usize>],
    cluster_of: &[usize],
    emitted: &mut [bool],
    pending: &mut [usize],
    heap: &mut BinaryHeap<Reverse<usize>>,
) {
    emitted[ci] = true;
    for &m in &clusters[ci].members {
        for &d in &dependents[m] {
            let target = cluster_of[d];
            if target == ci || emitted[target] {
                continue;
            }
            pending[target] = pending[target].saturating_sub(1);
            if pending[target] == 0 {
                heap.push(Reverse(target));
            }
        }
    }
}
