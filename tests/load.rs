//! End-to-end loads of scratch repositories on disk into an in-memory
//! store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use cvs_loader::cancel::CancelToken;
use cvs_loader::config::Config;
use cvs_loader::loader::{load, LoadOptions};
use cvs_loader::progress::NoProgress;
use cvs_loader::report::{LoadReport, LoadStatus};
use cvs_loader_core::errors::{StoreError, StoreResult, WarningKind};
use cvs_loader_core::object::{Blob, EntryMode, ObjectId, Revision, Snapshot, Tree};
use cvs_loader_core::store::memory::InMemoryStore;
use cvs_loader_core::store::{ObjectStore, OriginVisit};

struct Rev<'a> {
    num: &'a str,
    date: &'a str,
    author: &'a str,
    state: &'a str,
    branches: &'a str,
    next: &'a str,
    log: &'a str,
    text: &'a str,
}

impl<'a> Rev<'a> {
    fn trunk(num: &'a str, date: &'a str, author: &'a str, next: &'a str, log: &'a str, text: &'a str) -> Self {
        Rev {
            num,
            date,
            author,
            state: "Exp",
            branches: "",
            next,
            log,
            text,
        }
    }
}

fn at(s: &str) -> String {
    s.replace('@', "@@")
}

fn rcs(head: &str, symbols: &str, revs: &[Rev]) -> String {
    let mut out = format!("head\t{};\naccess;\nsymbols{};\nlocks; strict;\ncomment\t@# @;\n\n", head, symbols);
    for r in revs {
        out.push_str(&format!(
            "{}\ndate\t{};\tauthor {};\tstate {};\nbranches{};\nnext\t{};\n\n",
            r.num, r.date, r.author, r.state, r.branches, r.next
        ));
    }
    out.push_str("\ndesc\n@@\n\n");
    for r in revs {
        out.push_str(&format!("\n{}\nlog\n@{}@\ntext\n@{}@\n", r.num, at(r.log), at(r.text)));
    }
    out
}

/// A single-revision file.
fn one(date: &str, author: &str, log: &str, text: &str) -> String {
    rcs("1.1", "", &[Rev::trunk("1.1", date, author, "", log, text)])
}

struct Repo {
    tmp: TempDir,
    module: PathBuf,
}

impl Repo {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("CVSROOT")).unwrap();
        let module = tmp.path().join("proj");
        fs::create_dir_all(&module).unwrap();
        Repo { tmp, module }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn add(&self, relative: &str, body: &str) {
        let path = self.module.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn config(&self) -> Config {
        let mut cfg = Config::for_local(self.module.to_str().unwrap(), Path::new("unused.sqlite"));
        cfg.workers.parse = 2;
        cfg
    }
}

async fn run(cfg: &Config, store: &InMemoryStore) -> LoadReport {
    load(cfg, store, LoadOptions::default(), &CancelToken::new(), Arc::new(NoProgress)).await
}

/// In-memory store whose `fail_at`-th revision write fails.
struct FailingStore {
    inner: InMemoryStore,
    fail_at: usize,
    revision_writes: AtomicUsize,
}

impl FailingStore {
    fn new(fail_at: usize) -> Self {
        FailingStore {
            inner: InMemoryStore::new(),
            fail_at,
            revision_writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn has(&self, id: &ObjectId) -> StoreResult<bool> {
        self.inner.has(id).await
    }

    async fn put_blob(&self, blob: &Blob) -> StoreResult<bool> {
        self.inner.put_blob(blob).await
    }

    async fn put_tree(&self, tree: &Tree) -> StoreResult<bool> {
        self.inner.put_tree(tree).await
    }

    async fn put_revision(&self, revision: &Revision) -> StoreResult<bool> {
        if self.revision_writes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
            return Err(StoreError::Write("disk full".to_string()));
        }
        self.inner.put_revision(revision).await
    }

    async fn put_snapshot(&self, origin: &str, snapshot: &Snapshot) -> StoreResult<()> {
        self.inner.put_snapshot(origin, snapshot).await
    }

    async fn mark_ingested(&self, origin: &str, revision: &ObjectId) -> StoreResult<()> {
        self.inner.mark_ingested(origin, revision).await
    }

    async fn latest_ingested(&self, origin: &str) -> StoreResult<Option<ObjectId>> {
        self.inner.latest_ingested(origin).await
    }

    async fn latest_snapshot(&self, origin: &str) -> StoreResult<Option<Snapshot>> {
        self.inner.latest_snapshot(origin).await
    }

    async fn revision(&self, id: &ObjectId) -> StoreResult<Option<Revision>> {
        self.inner.revision(id).await
    }

    async fn tree(&self, id: &ObjectId) -> StoreResult<Option<Tree>> {
        self.inner.tree(id).await
    }

    async fn record_visit(&self, visit: &OriginVisit) -> StoreResult<()> {
        self.inner.record_visit(visit).await
    }
}

async fn head_tree(store: &InMemoryStore, origin: &str, branch: &str) -> Tree {
    let snapshot = store.latest_snapshot(origin).await.unwrap().expect("snapshot");
    let rev = store.revision(&snapshot.branches[branch]).await.unwrap().unwrap();
    store.tree(&rev.tree).await.unwrap().unwrap()
}

fn file_text(store: &InMemoryStore, tree: &Tree, name: &str) -> String {
    let entry = tree.get(name).unwrap_or_else(|| panic!("{} missing from tree", name));
    String::from_utf8(store.blob_data(&entry.target).unwrap().to_vec()).unwrap()
}

#[tokio::test]
async fn test_fix_typo_pair_becomes_one_commit() {
    let repo = Repo::new();
    repo.add("a.c,v", &one("2001.01.01.10.00.00", "joe", "fix typo", "int a;\n"));
    repo.add("b.c,v", &one("2001.01.01.10.00.03", "joe", "fix typo", "int b;\n"));

    let cfg = repo.config();
    let store = InMemoryStore::new();
    let report = run(&cfg, &store).await;

    assert_eq!(report.status, LoadStatus::Full);
    assert!(report.eventful);
    assert_eq!(report.counts.files_processed, 2);
    assert_eq!(report.counts.commits_synthesized, 1);
    assert_eq!(report.counts.commits_ingested, 1);
    assert_eq!(report.counts.bytes_ingested, 14);
    assert_eq!(store.revision_count(), 1);
    assert_eq!(store.blob_count(), 2);

    let tree = head_tree(&store, cfg.origin.origin_id(), "HEAD").await;
    assert_eq!(file_text(&store, &tree, "a.c"), "int a;\n");
    assert_eq!(file_text(&store, &tree, "b.c"), "int b;\n");

    let visits = store.visits();
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].status, "full");
    assert!(visits[0].eventful);
}

#[tokio::test]
async fn test_branch_tip_and_tag() {
    let repo = Repo::new();
    repo.add(
        "f.c,v",
        &rcs(
            "1.1",
            " BR:1.1.0.1 REL1:1.1.1.1",
            &[
                Rev {
                    branches: " 1.1.1.1",
                    ..Rev::trunk("1.1", "2002.02.01.00.00.00", "joe", "", "initial", "base\n")
                },
                Rev::trunk("1.1.1.1", "2002.03.01.00.00.00", "joe", "", "branch work", "a1 1\nbranch\n"),
            ],
        ),
    );

    let cfg = repo.config();
    let store = InMemoryStore::new();
    let report = run(&cfg, &store).await;
    assert_eq!(report.status, LoadStatus::Full);
    assert_eq!(report.counts.commits_ingested, 2);

    let snapshot = store.latest_snapshot(cfg.origin.origin_id()).await.unwrap().unwrap();
    let trunk = snapshot.branches["HEAD"];
    let tip = snapshot.branches["BR"];
    assert_eq!(snapshot.branches["tags/REL1"], tip);

    let tip_rev = store.revision(&tip).await.unwrap().unwrap();
    assert_eq!(tip_rev.parents, vec![trunk]);
    assert_eq!(tip_rev.branch, "BR");

    let tree = head_tree(&store, cfg.origin.origin_id(), "BR").await;
    assert_eq!(file_text(&store, &tree, "f.c"), "base\nbranch\n");
    let tree = head_tree(&store, cfg.origin.origin_id(), "HEAD").await;
    assert_eq!(file_text(&store, &tree, "f.c"), "base\n");
}

#[tokio::test]
async fn test_one_corrupt_file_among_hundred() {
    let repo = Repo::new();
    for i in 0..100 {
        let name = format!("src/file{:03}.c,v", i);
        if i == 42 {
            repo.add(&name, "head\t1.1;\naccess;\nsymbols;\nlocks; strict;\n\n1.1\ndate\t2001.01.01");
            continue;
        }
        let date = format!("2001.01.01.{:02}.{:02}.00", i / 60, i % 60);
        repo.add(&name, &one(&date, "ann", &format!("add file {}", i), &format!("{}\n", i)));
    }

    let cfg = repo.config();
    let store = InMemoryStore::new();
    let report = run(&cfg, &store).await;

    assert_eq!(report.status, LoadStatus::Partial { skipped: 1 });
    assert_eq!(report.counts.files_processed, 99);
    assert_eq!(report.counts.files_skipped, 1);
    assert_eq!(report.counts.commits_ingested, 99);
    let malformed: Vec<_> = report
        .warnings
        .iter()
        .filter(|w| w.kind == WarningKind::MalformedRevisionFile)
        .collect();
    assert_eq!(malformed.len(), 1);
    assert_eq!(malformed[0].path.as_deref(), Some("src/file042.c"));
    assert_eq!(store.visits()[0].status, "partial");
}

#[tokio::test]
async fn test_reload_adds_nothing() {
    let repo = Repo::new();
    repo.add(
        "notes.txt,v",
        &rcs(
            "1.2",
            "",
            &[
                Rev::trunk("1.2", "2004.06.02.00.00.00", "ann", "1.1", "second", "one\ntwo\n"),
                Rev::trunk("1.1", "2004.06.01.00.00.00", "ann", "", "first", "d2 1\n"),
            ],
        ),
    );
    repo.add("dir/x.c,v", &one("2004.06.01.00.00.00", "ann", "first", "x\n"));

    let cfg = repo.config();
    let store = InMemoryStore::new();
    let first = run(&cfg, &store).await;
    assert_eq!(first.counts.commits_ingested, 2);
    let revisions = store.revision_count();
    let blobs = store.blob_count();

    let second = run(&cfg, &store).await;
    assert_eq!(second.status, LoadStatus::Full);
    assert_eq!(second.counts.commits_synthesized, 2);
    assert_eq!(second.counts.commits_ingested, 0);
    assert!(!second.eventful);
    assert_eq!(store.revision_count(), revisions);
    assert_eq!(store.blob_count(), blobs);

    let visits = store.visits();
    assert_eq!(visits.len(), 2);
    assert!(!visits[1].eventful);
    assert_eq!(visits[0].snapshot, visits[1].snapshot);

    // Forcing a full revisit rewrites nothing either.
    let full = load(
        &cfg,
        &store,
        LoadOptions {
            full: true,
            dry_run: false,
        },
        &CancelToken::new(),
        Arc::new(NoProgress),
    )
    .await;
    assert_eq!(full.counts.commits_ingested, 0);
}

#[tokio::test]
async fn test_reload_picks_up_new_revisions() {
    let repo = Repo::new();
    repo.add("a.c,v", &one("2004.06.01.00.00.00", "ann", "first", "one\n"));
    repo.add("b.c,v", &one("2004.06.01.00.00.00", "ann", "first", "b\n"));

    let cfg = repo.config();
    let origin = cfg.origin.origin_id().to_string();
    let store = InMemoryStore::new();
    let first = run(&cfg, &store).await;
    assert_eq!(first.counts.commits_ingested, 1);
    let before = store.latest_snapshot(&origin).await.unwrap().unwrap().branches["HEAD"];

    // A later `cvs commit` adds 1.2 to a.c; 1.1 becomes a reverse delta.
    repo.add(
        "a.c,v",
        &rcs(
            "1.2",
            "",
            &[
                Rev::trunk("1.2", "2004.07.01.00.00.00", "joe", "1.1", "second", "one\ntwo\n"),
                Rev::trunk("1.1", "2004.06.01.00.00.00", "ann", "", "first", "d2 1\n"),
            ],
        ),
    );

    let second = run(&cfg, &store).await;
    assert_eq!(second.status, LoadStatus::Full);
    assert!(second.eventful);
    assert_eq!(second.counts.commits_synthesized, 2);
    assert_eq!(second.counts.commits_ingested, 1);
    assert_eq!(store.revision_count(), 2);

    let snapshot = store.latest_snapshot(&origin).await.unwrap().unwrap();
    let tip = store.revision(&snapshot.branches["HEAD"]).await.unwrap().unwrap();
    assert_eq!(tip.parents, vec![before]);
    assert_eq!(tip.author, "joe");
    let tree = head_tree(&store, &origin, "HEAD").await;
    assert_eq!(file_text(&store, &tree, "a.c"), "one\ntwo\n");
    assert_eq!(file_text(&store, &tree, "b.c"), "b\n");

    let visits = store.visits();
    assert_eq!(visits.len(), 2);
    assert!(visits[1].eventful);
}

#[tokio::test]
async fn test_store_failure_keeps_progress_and_resumes() {
    let repo = Repo::new();
    for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
        let date = format!("2001.01.0{}.10.00.00", i + 1);
        repo.add(
            &format!("{}.c,v", name),
            &one(&date, "joe", &format!("add {}", name), &format!("{}\n", name)),
        );
    }

    let cfg = repo.config();
    let origin = cfg.origin.origin_id().to_string();
    let store = FailingStore::new(3);
    let report = load(&cfg, &store, LoadOptions::default(), &CancelToken::new(), Arc::new(NoProgress)).await;

    assert_eq!(report.status, LoadStatus::Failed);
    assert!(report.error.as_deref().unwrap().starts_with("store operation failed"));
    assert_eq!(report.counts.commits_synthesized, 4);
    assert_eq!(report.counts.commits_ingested, 2);
    let marker = store.inner.latest_ingested(&origin).await.unwrap().unwrap();
    let marked = store.inner.revision(&marker).await.unwrap().unwrap();
    assert_eq!(marked.message, "add b");
    let visits = store.inner.visits();
    assert_eq!(visits[0].status, "failed");
    assert!(visits[0].snapshot.is_some());

    let retry = run(&cfg, &store.inner).await;
    assert_eq!(retry.status, LoadStatus::Full);
    assert_eq!(retry.counts.commits_ingested, 2);
    assert_eq!(store.inner.revision_count(), 4);
    let tree = head_tree(&store.inner, &origin, "HEAD").await;
    assert_eq!(tree.entries.len(), 4);
    assert_eq!(file_text(&store.inner, &tree, "d.c"), "d\n");
}

#[tokio::test]
async fn test_unknown_resume_marker_reingests_with_warning() {
    let repo = Repo::new();
    repo.add("a.c,v", &one("2001.01.01.10.00.00", "joe", "init", "a\n"));

    let mut cfg = repo.config();
    cfg.origin.resume_from = Some(ObjectId::from_bytes([7; 32]).to_hex());
    let store = InMemoryStore::new();
    let report = run(&cfg, &store).await;

    assert_eq!(report.counts.commits_ingested, 1);
    assert!(report.warnings.iter().any(|w| w.kind == WarningKind::ResumeMarkerMissing));
}

#[tokio::test]
async fn test_delete_then_readd() {
    let repo = Repo::new();
    repo.add("keep.c,v", &one("2005.01.01.00.00.00", "joe", "start", "keep\n"));
    repo.add(
        "g.c,v",
        &rcs(
            "1.3",
            "",
            &[
                Rev::trunk("1.3", "2005.01.03.00.00.00", "joe", "1.2", "back again", "three\n"),
                Rev {
                    state: "dead",
                    ..Rev::trunk("1.2", "2005.01.02.00.00.00", "joe", "1.1", "remove g", "d1 1\na1 1\none\n")
                },
                Rev::trunk("1.1", "2005.01.01.00.00.00", "joe", "", "start", ""),
            ],
        ),
    );

    let cfg = repo.config();
    let store = InMemoryStore::new();
    let report = run(&cfg, &store).await;
    assert_eq!(report.counts.commits_ingested, 3);

    let tip_id = store.latest_snapshot(cfg.origin.origin_id()).await.unwrap().unwrap().branches["HEAD"];
    let tip = store.revision(&tip_id).await.unwrap().unwrap();
    let middle = store.revision(&tip.parents[0]).await.unwrap().unwrap();
    let first = store.revision(&middle.parents[0]).await.unwrap().unwrap();
    assert_eq!(middle.message, "remove g");

    let first_tree = store.tree(&first.tree).await.unwrap().unwrap();
    let middle_tree = store.tree(&middle.tree).await.unwrap().unwrap();
    let tip_tree = store.tree(&tip.tree).await.unwrap().unwrap();
    assert_eq!(file_text(&store, &first_tree, "g.c"), "one\n");
    assert!(middle_tree.get("g.c").is_none());
    assert!(middle_tree.get("keep.c").is_some());
    assert_eq!(file_text(&store, &tip_tree, "g.c"), "three\n");
}

#[tokio::test]
async fn test_attic_file_and_subdirectories() {
    let repo = Repo::new();
    repo.add("lib/util/strings.c,v", &one("2006.01.01.00.00.00", "bob", "import", "s\n"));
    repo.add(
        "lib/Attic/old.c,v",
        &rcs(
            "1.2",
            "",
            &[
                Rev {
                    state: "dead",
                    ..Rev::trunk("1.2", "2006.02.01.00.00.00", "bob", "1.1", "retire old.c", "")
                },
                Rev::trunk("1.1", "2006.01.01.00.00.00", "bob", "", "import", "old\n"),
            ],
        ),
    );

    let cfg = repo.config();
    let store = InMemoryStore::new();
    let report = run(&cfg, &store).await;
    assert_eq!(report.status, LoadStatus::Full);
    assert_eq!(report.counts.commits_ingested, 2);

    let root = head_tree(&store, cfg.origin.origin_id(), "HEAD").await;
    let lib = root.get("lib").unwrap();
    assert_eq!(lib.mode, EntryMode::Directory);
    let lib = store.tree(&lib.target).await.unwrap().unwrap();
    assert!(lib.get("old.c").is_none());
    assert!(lib.get("Attic").is_none());
    assert_eq!(lib.get("util").unwrap().mode, EntryMode::Directory);
}

#[tokio::test]
async fn test_oversized_content_is_referenced_only() {
    let repo = Repo::new();
    repo.add("small.txt,v", &one("2001.01.01.00.00.00", "joe", "add", "ok\n"));
    repo.add("big.bin,v", &one("2001.01.01.00.00.01", "joe", "add", "0123456789abcdef\n"));

    let mut cfg = repo.config();
    cfg.content.max_content_size = Some(8);
    let store = InMemoryStore::new();
    let report = run(&cfg, &store).await;

    assert_eq!(report.counts.blobs_skipped, 1);
    assert_eq!(report.counts.bytes_ingested, 3);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::ContentSkipped && w.path.as_deref() == Some("big.bin")));

    let tree = head_tree(&store, cfg.origin.origin_id(), "HEAD").await;
    let big = tree.get("big.bin").unwrap();
    assert!(store.has(&big.target).await.unwrap());
    assert!(store.blob_data(&big.target).is_none());
}

#[tokio::test]
async fn test_nothing_parseable_fails_the_run() {
    let repo = Repo::new();
    repo.add("a.c,v", "this is not an rcs file");

    let store = InMemoryStore::new();
    let report = run(&repo.config(), &store).await;
    assert_eq!(report.status, LoadStatus::Failed);
    assert!(report.error.unwrap().contains("no revision file could be parsed"));
    assert_eq!(store.visits()[0].status, "failed");
    assert_eq!(store.revision_count(), 0);
}

#[tokio::test]
async fn test_module_without_revision_files_fails() {
    let repo = Repo::new();
    repo.add("README", "not under version control\n");

    let store = InMemoryStore::new();
    let report = run(&repo.config(), &store).await;
    assert_eq!(report.status, LoadStatus::Failed);
    assert!(report.error.unwrap().contains("no revision files"));
    assert_eq!(report.counts.files_processed, 0);
    let visits = store.visits();
    assert_eq!(visits[0].status, "failed");
    assert!(visits[0].snapshot.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_rsync_origin_is_mirrored_then_loaded() {
    use std::os::unix::fs::PermissionsExt;

    let repo = Repo::new();
    repo.add("a.c,v", &one("2001.01.01.10.00.00", "joe", "init", "a\n"));
    repo.add("lib/b.c,v", &one("2001.01.01.10.00.01", "joe", "init", "b\n"));

    // Stands in for rsync: serves `rsync://<host>/...` from the scratch
    // repository, listing with one argument and copying with more.
    let script = "#!/bin/sh
if [ $# -eq 1 ]; then
  dir=$(printf '%s' \"$1\" | sed 's#^rsync://[^/]*#BASE#')
  for f in \"$dir\"*; do
    echo \"drwxr-xr-x          4,096 2004/03/01 12:00:00 $(basename \"$f\")\"
  done
  exit 0
fi
while [ $# -gt 2 ]; do shift; done
src=$(printf '%s' \"$1\" | sed 's#^rsync://[^/]*#BASE#')
mkdir -p \"$2\" && cp -R \"$src.\" \"$2\"
"
    .replace("BASE", &repo.root().display().to_string());
    let bin = TempDir::new().unwrap();
    let fake = bin.path().join("fake-rsync");
    fs::write(&fake, script).unwrap();
    fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();

    let mut cfg = Config::for_local("rsync://cvs.example.org/proj", Path::new("unused.sqlite"));
    cfg.remote.rsync_program = fake.display().to_string();
    let store = InMemoryStore::new();
    let report = run(&cfg, &store).await;

    assert_eq!(report.status, LoadStatus::Full, "{:?}", report.error);
    assert_eq!(report.counts.files_processed, 2);
    assert_eq!(report.counts.commits_ingested, 1);
    assert!(!report.warnings.iter().any(|w| w.kind == WarningKind::MissingCvsroot));
    let tree = head_tree(&store, "rsync://cvs.example.org/proj", "HEAD").await;
    assert_eq!(file_text(&store, &tree, "a.c"), "a\n");
    assert!(tree.get("lib").is_some());

    let mut cfg = cfg.clone();
    cfg.origin.url = "rsync://cvs.example.org/nosuchmodule".to_string();
    let report = run(&cfg, &store).await;
    assert_eq!(report.status, LoadStatus::Failed);
    assert!(report.error.unwrap().contains("nosuchmodule"));
}

#[tokio::test]
async fn test_missing_module_fails() {
    let tmp = TempDir::new().unwrap();
    let cfg = Config::for_local(tmp.path().join("nope").to_str().unwrap(), Path::new("unused.sqlite"));
    let store = InMemoryStore::new();
    let report = run(&cfg, &store).await;
    assert_eq!(report.status, LoadStatus::Failed);
    assert!(report.error.unwrap().starts_with("not found"));
}

#[tokio::test]
async fn test_cancelled_load_writes_nothing() {
    let repo = Repo::new();
    repo.add("a.c,v", &one("2001.01.01.10.00.00", "joe", "init", "a\n"));

    let store = InMemoryStore::new();
    let cancel = CancelToken::new();
    cancel.cancel();
    let report = load(&repo.config(), &store, LoadOptions::default(), &cancel, Arc::new(NoProgress)).await;
    assert_eq!(report.status, LoadStatus::Failed);
    assert_eq!(report.error.as_deref(), Some("load cancelled"));
    assert_eq!(store.revision_count(), 0);
}

#[tokio::test]
async fn test_dry_run_leaves_store_untouched() {
    let repo = Repo::new();
    repo.add("a.c,v", &one("2001.01.01.10.00.00", "joe", "init", "a\n"));

    let store = InMemoryStore::new();
    let report = load(
        &repo.config(),
        &store,
        LoadOptions {
            full: false,
            dry_run: true,
        },
        &CancelToken::new(),
        Arc::new(NoProgress),
    )
    .await;
    assert_eq!(report.status, LoadStatus::Full);
    assert_eq!(report.counts.commits_synthesized, 1);
    assert_eq!(report.counts.commits_ingested, 0);
    assert_eq!(store.revision_count(), 0);
    assert!(store.visits().is_empty());
}
