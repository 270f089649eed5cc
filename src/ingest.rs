//! Ingestion adapter.
//!
//! Turns a [`CommitGraph`] into archive objects: blobs for file contents,
//! trees for directories, one revision per synthesized commit and a
//! snapshot of branch and tag names. Commits are written parents first in
//! graph order.
//!
//! Trees are copy-on-write: a commit starts from its first parent's tree
//! and only the directories on the paths it touches are rehashed and
//! written. Directories that end up empty are pruned.
//!
//! Incremental loads walk the stored ancestry from the origin's marker to
//! map changeset keys to revision ids, and skip every commit already
//! represented.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use cvs_loader_core::changeset::CommitGraph;
use cvs_loader_core::content::{ContentCache, ContentSource};
use cvs_loader_core::errors::{DeltaError, HistoryWarning, StoreError, WarningKind};
use cvs_loader_core::models::FileHistory;
use cvs_loader_core::object::{Blob, EntryMode, ObjectId, Revision, Snapshot, Tree, TreeEntry};
use cvs_loader_core::revnum::RevisionNumber;
use cvs_loader_core::store::ObjectStore;

use crate::cancel::CancelToken;
use crate::error::{LoadError, LoadResult};
use crate::progress::{LoadProgressEvent, LoadProgressReporter};

/// Everything the adapter needs besides the store and the graph.
pub struct IngestContext {
    pub origin: String,
    pub histories: Arc<Vec<FileHistory>>,
    pub content: Arc<dyn ContentSource>,
    pub cache: Arc<ContentCache>,
    pub max_content_size: Option<usize>,
    /// Overrides the stored marker.
    pub resume_from: Option<ObjectId>,
    /// Ignore the stored marker and revisit every commit.
    pub full: bool,
    pub workers: usize,
}

#[derive(Debug, Default)]
pub struct IngestOutcome {
    /// Revisions newly written to the store.
    pub commits_ingested: usize,
    /// Commits recognized as already archived.
    pub commits_skipped: usize,
    pub bytes_ingested: u64,
    pub blobs_skipped: usize,
    pub snapshot: Option<ObjectId>,
    pub warnings: Vec<HistoryWarning>,
}

#[derive(Clone)]
enum Node {
    File { id: ObjectId, mode: EntryMode },
    Dir(Arc<DirNode>),
    /// Subtree known only by id; loaded on first modification.
    StoredDir(ObjectId),
}

#[derive(Clone, Default)]
struct DirNode {
    entries: BTreeMap<String, Node>,
    /// Tree id, as long as nothing below changed since it was hashed.
    id: Option<ObjectId>,
}

impl DirNode {
    fn from_tree(tree: &Tree) -> Self {
        let entries = tree
            .entries
            .iter()
            .map(|e| {
                let node = match e.mode {
                    EntryMode::Directory => Node::StoredDir(e.target),
                    mode => Node::File { id: e.target, mode },
                };
                (e.name.clone(), node)
            })
            .collect();
        Self {
            entries,
            id: Some(tree.id),
        }
    }
}

async fn load_tree(store: &dyn ObjectStore, id: &ObjectId) -> LoadResult<DirNode> {
    let tree = store.tree(id).await?.ok_or_else(|| StoreError::Corrupt {
        id: id.to_hex(),
        reason: "tree missing from store".into(),
    })?;
    Ok(DirNode::from_tree(&tree))
}

/// Set (`Some`) or remove (`None`) the file at `path`, unsharing every
/// directory on the way down.
async fn set_path(store: &dyn ObjectStore, root: &mut Arc<DirNode>, path: &str, value: Option<Node>) -> LoadResult<()> {
    let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let Some(leaf) = parts.pop() else {
        return Ok(());
    };

    let mut node = Arc::make_mut(root);
    node.id = None;
    for part in parts {
        let stored = match node.entries.get(part) {
            Some(Node::Dir(_)) => None,
            Some(Node::StoredDir(id)) => Some(*id),
            Some(Node::File { .. }) | None => {
                if value.is_none() {
                    return Ok(());
                }
                node.entries
                    .insert(part.to_string(), Node::Dir(Arc::new(DirNode::default())));
                None
            }
        };
        if let Some(id) = stored {
            let loaded = load_tree(store, &id).await?;
            node.entries.insert(part.to_string(), Node::Dir(Arc::new(loaded)));
        }
        node = match node.entries.get_mut(part) {
            Some(Node::Dir(child)) => Arc::make_mut(child),
            _ => return Ok(()),
        };
        node.id = None;
    }

    match value {
        Some(v) => {
            node.entries.insert(leaf.to_string(), v);
        }
        None => {
            node.entries.remove(leaf);
        }
    }
    Ok(())
}

/// Hash every changed directory below `node`, pushing new trees children
/// first. `None` for an empty directory.
fn hash_dir(node: &mut Arc<DirNode>, out: &mut Vec<Tree>) -> Option<ObjectId> {
    if node.entries.is_empty() {
        return None;
    }
    if let Some(id) = node.id {
        return Some(id);
    }
    let dir = Arc::make_mut(node);
    let mut entries = Vec::with_capacity(dir.entries.len());
    for (name, child) in dir.entries.iter_mut() {
        let (mode, target) = match child {
            Node::File { id, mode } => (*mode, *id),
            Node::StoredDir(id) => (EntryMode::Directory, *id),
            Node::Dir(sub) => match hash_dir(sub, out) {
                Some(id) => (EntryMode::Directory, id),
                None => continue,
            },
        };
        entries.push(TreeEntry {
            name: name.clone(),
            mode,
            target,
        });
    }
    if entries.is_empty() {
        return None;
    }
    let tree = Tree::new(entries);
    let id = tree.id;
    dir.id = Some(id);
    out.push(tree);
    Some(id)
}

type Fetched = (Result<Arc<[u8]>, DeltaError>, bool);

/// Materialize the alive members of one commit off the async runtime.
async fn fetch_contents(
    ctx: &IngestContext,
    pool: Option<Arc<rayon::ThreadPool>>,
    jobs: Vec<(usize, RevisionNumber)>,
) -> LoadResult<Vec<Fetched>> {
    if jobs.is_empty() {
        return Ok(Vec::new());
    }
    let histories = ctx.histories.clone();
    let content = ctx.content.clone();
    tokio::task::spawn_blocking(move || {
        let fetch = |(file, rev): &(usize, RevisionNumber)| -> Fetched {
            match histories.get(*file) {
                Some(h) => (content.content(h, rev), content.is_executable(h)),
                None => (
                    Err(DeltaError::UnknownRevision {
                        path: format!("#{}", file),
                        revision: rev.to_string(),
                    }),
                    false,
                ),
            }
        };
        match pool {
            Some(pool) => pool.install(|| jobs.par_iter().map(fetch).collect()),
            None => jobs.iter().map(fetch).collect(),
        }
    })
    .await
    .map_err(|e| LoadError::Task(e.to_string()))
}

/// Changeset key → (revision id, root tree id) of every revision reachable
/// from the resume point. Empty when nothing can be resumed.
async fn resume_map(
    store: &dyn ObjectStore,
    graph: &CommitGraph,
    ctx: &IngestContext,
    warnings: &mut Vec<HistoryWarning>,
) -> LoadResult<HashMap<String, (ObjectId, ObjectId)>> {
    let mut known = HashMap::new();
    if ctx.full {
        return Ok(known);
    }
    let marker = match ctx.resume_from {
        Some(id) => Some(id),
        None => store.latest_ingested(&ctx.origin).await?,
    };
    let Some(marker) = marker else {
        return Ok(known);
    };

    let mut stack = vec![marker];
    if ctx.resume_from.is_none() {
        if let Some(snapshot) = store.latest_snapshot(&ctx.origin).await? {
            stack.extend(snapshot.branches.values().copied());
        }
    }
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(rev) = store.revision(&id).await? {
            stack.extend(rev.parents.iter().copied());
            known.entry(rev.changeset_key.clone()).or_insert((id, rev.tree));
        }
    }

    let marker_found = graph
        .commits
        .iter()
        .any(|c| known.get(&c.key).map(|(id, _)| *id) == Some(marker));
    if !marker_found {
        warn!(marker = %marker, "resume marker not in reconstructed history, re-ingesting everything");
        warnings.push(HistoryWarning::new(
            WarningKind::ResumeMarkerMissing,
            format!("revision {} is not part of the reconstructed history; re-ingesting", marker),
        ));
        known.clear();
    }
    Ok(known)
}

fn snapshot_at(graph: &CommitGraph, pos: usize, rev_ids: &[ObjectId], tips: &BTreeMap<String, ObjectId>) -> Snapshot {
    let mut branches = tips.clone();
    for (name, &c) in &graph.branches {
        if c <= pos && !branches.contains_key(name) {
            if let Some(id) = rev_ids.get(c) {
                branches.insert(name.clone(), *id);
            }
        }
    }
    for (name, &c) in graph.tags_up_to(pos) {
        if let Some(id) = rev_ids.get(c) {
            branches.insert(format!("tags/{}", name), *id);
        }
    }
    Snapshot::new(branches)
}

pub async fn ingest(
    store: &dyn ObjectStore,
    graph: &CommitGraph,
    ctx: &IngestContext,
    cancel: &CancelToken,
    progress: &dyn LoadProgressReporter,
    outcome: &mut IngestOutcome,
) -> LoadResult<()> {
    let total = graph.commits.len();
    let known = resume_map(store, graph, ctx, &mut outcome.warnings).await?;

    let mut pending_children = vec![0usize; total];
    for c in &graph.commits {
        for p in &c.parents {
            if let Some(n) = pending_children.get_mut(*p) {
                *n += 1;
            }
        }
    }
    let mut last_use: HashMap<usize, usize> = HashMap::new();
    for c in &graph.commits {
        for m in &c.members {
            last_use.insert(m.file, c.id);
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.workers.max(1))
        .build()
        .ok()
        .map(Arc::new);

    let mut rev_ids: Vec<ObjectId> = Vec::with_capacity(total);
    let mut tree_ids: Vec<ObjectId> = Vec::with_capacity(total);
    let mut roots: HashMap<usize, Arc<DirNode>> = HashMap::new();
    let mut tips: BTreeMap<String, ObjectId> = BTreeMap::new();
    let mut skipped_blobs: HashSet<ObjectId> = HashSet::new();

    for (pos, commit) in graph.commits.iter().enumerate() {
        cancel.check()?;

        if let Some((id, tree)) = known.get(&commit.key) {
            debug!(commit = pos, revision = %id, "already archived");
            rev_ids.push(*id);
            tree_ids.push(*tree);
            outcome.commits_skipped += 1;
        } else {
            let parents: Vec<ObjectId> = commit.parents.iter().filter_map(|p| rev_ids.get(*p).copied()).collect();
            let mut root = match commit.parents.first() {
                Some(p) => match roots.get(p) {
                    Some(r) => r.clone(),
                    None => match tree_ids.get(*p) {
                        Some(tree) => Arc::new(load_tree(store, tree).await?),
                        None => Arc::new(DirNode::default()),
                    },
                },
                None => Arc::new(DirNode::default()),
            };

            let jobs: Vec<(usize, RevisionNumber)> = commit
                .members
                .iter()
                .filter(|m| !m.dead)
                .map(|m| (m.file, m.revision.clone()))
                .collect();
            let mut fetched = fetch_contents(ctx, pool.clone(), jobs).await?.into_iter();

            for m in &commit.members {
                if m.dead {
                    set_path(store, &mut root, &m.path, None).await?;
                    continue;
                }
                let Some((result, executable)) = fetched.next() else {
                    break;
                };
                let data = match result {
                    Ok(d) => d,
                    Err(e @ DeltaError::Fetch { .. }) => {
                        return Err(LoadError::Content {
                            path: m.path.clone(),
                            revision: m.revision.to_string(),
                            reason: e.to_string(),
                        })
                    }
                    Err(e) => {
                        warn!(path = %m.path, revision = %m.revision, error = %e, "content unavailable, keeping previous tree entry");
                        outcome.warnings.push(HistoryWarning::for_path(
                            WarningKind::ContentUnavailable,
                            &m.path,
                            format!("revision {}: {}", m.revision, e),
                        ));
                        continue;
                    }
                };

                let blob = match ctx.max_content_size {
                    Some(max) if data.len() > max => Blob::skipped(&data),
                    _ => Blob::new(data),
                };
                if blob.is_skipped() && skipped_blobs.insert(blob.id) {
                    outcome.blobs_skipped += 1;
                    outcome.warnings.push(HistoryWarning::for_path(
                        WarningKind::ContentSkipped,
                        &m.path,
                        format!("revision {} is {} bytes, stored by reference only", m.revision, blob.length),
                    ));
                }
                if !store.has(&blob.id).await? && store.put_blob(&blob).await? && !blob.is_skipped() {
                    outcome.bytes_ingested += blob.length as u64;
                }
                let mode = if executable { EntryMode::Executable } else { EntryMode::File };
                set_path(store, &mut root, &m.path, Some(Node::File { id: blob.id, mode })).await?;
            }

            let mut new_trees = Vec::new();
            let root_id = match hash_dir(&mut root, &mut new_trees) {
                Some(id) => id,
                None => {
                    let empty = Tree::empty();
                    let id = empty.id;
                    new_trees.push(empty);
                    id
                }
            };
            for tree in &new_trees {
                if !store.has(&tree.id).await? {
                    store.put_tree(tree).await?;
                }
            }

            let revision = Revision::new(
                root_id,
                parents,
                commit.author.clone(),
                commit.timestamp,
                commit.message.clone(),
                commit.branch.clone(),
                commit.key.clone(),
            );
            if !store.has(&revision.id).await? && store.put_revision(&revision).await? {
                outcome.commits_ingested += 1;
            }
            debug!(commit = pos, revision = %revision.id, branch = %commit.branch, members = commit.members.len(), "ingested");

            rev_ids.push(revision.id);
            tree_ids.push(root_id);
            tips.insert(commit.branch.clone(), revision.id);
            if pending_children.get(pos).copied().unwrap_or(0) > 0 {
                roots.insert(pos, root);
            }

            let snapshot = snapshot_at(graph, pos, &rev_ids, &tips);
            store.put_snapshot(&ctx.origin, &snapshot).await?;
            store.mark_ingested(&ctx.origin, &revision.id).await?;
            outcome.snapshot = Some(snapshot.id);
        }

        if known.contains_key(&commit.key) {
            tips.insert(commit.branch.clone(), rev_ids[pos]);
        }
        for p in &commit.parents {
            if let Some(n) = pending_children.get_mut(*p) {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    roots.remove(p);
                }
            }
        }
        for m in &commit.members {
            if last_use.get(&m.file) == Some(&pos) {
                ctx.cache.evict_path(&m.path);
            }
        }

        let n = pos + 1;
        if n % 100 == 0 || n == total {
            progress.report(LoadProgressEvent::Ingesting {
                origin: ctx.origin.clone(),
                n: n as u64,
                total: total as u64,
            });
        }
    }

    let final_snapshot = match total.checked_sub(1) {
        Some(last) => snapshot_at(graph, last, &rev_ids, &tips),
        None => Snapshot::new(BTreeMap::new()),
    };
    store.put_snapshot(&ctx.origin, &final_snapshot).await?;
    if let Some(last) = rev_ids.last() {
        store.mark_ingested(&ctx.origin, last).await?;
    }
    outcome.snapshot = Some(final_snapshot.id);

    info!(
        origin = %ctx.origin,
        commits = total,
        ingested = outcome.commits_ingested,
        skipped = outcome.commits_skipped,
        bytes = outcome.bytes_ingested,
        "ingestion complete"
    );
    Ok(())
}
