//! Load orchestration.
//!
//! Wires the stages of one load together:
//!
//! ```text
//! origin URL ─▶ walker ─▶ parse (rayon) ─▶ reconstruct ─▶ ingest ─▶ store
//! ```
//!
//! [`load`] never returns an error: every outcome, including a fatal one,
//! ends up in the [`LoadReport`] and in the origin's visit record. Commits
//! written before a fatal error stay written, together with the snapshot
//! and marker that cover them.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use cvs_loader_core::changeset::{reconstruct, CommitGraph, ReconstructOptions};
use cvs_loader_core::content::{ContentCache, ContentSource, RcsContentSource};
use cvs_loader_core::errors::HistoryWarning;
use cvs_loader_core::models::FileHistory;
use cvs_loader_core::object::ObjectId;
use cvs_loader_core::store::{ObjectStore, OriginVisit};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::cvsroot::{Method, OriginLocation};
use crate::error::{LoadError, LoadResult};
use crate::ingest::{ingest, IngestContext, IngestOutcome};
use crate::parse::parse_all;
use crate::progress::{LoadProgressEvent, LoadProgressReporter};
use crate::pserver::{ClientSettings, RemoteClient};
use crate::remote_content::RemoteContentSource;
use crate::report::{LoadReport, LoadStatus};
use crate::rsync::RsyncMirror;
use crate::walker::RepositorySource;

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Ignore the stored marker and revisit every commit.
    pub full: bool,
    /// Walk, parse and reconstruct without touching the store.
    pub dry_run: bool,
}

/// An opened origin: where revision files come from and how their
/// contents are produced.
pub struct Origin {
    pub id: String,
    pub location: OriginLocation,
    pub source: Arc<RepositorySource>,
    pub content: Arc<dyn ContentSource>,
    pub cache: Arc<ContentCache>,
    /// Scratch copy of an `rsync://` origin, filled before the walk.
    pub mirror: Option<Arc<RsyncMirror>>,
}

pub fn open_origin(config: &Config) -> LoadResult<Origin> {
    let location = OriginLocation::parse(&config.origin.url, config.origin.module.as_deref())?;
    let cache = Arc::new(ContentCache::new());
    let expand = config.content.expand_keywords;

    let mut mirror = None;
    let (source, content): (RepositorySource, Arc<dyn ContentSource>) = match location.method {
        Method::Local => {
            let module_root = std::path::PathBuf::from(location.module_path());
            let content = RcsContentSource::new(cache.clone(), expand, location.module_path());
            (RepositorySource::Local { module_root }, Arc::new(content))
        }
        Method::Rsync => {
            let copy = RsyncMirror::new(location.clone(), &config.remote.rsync_program)?;
            let module_root = copy.module_root();
            mirror = Some(Arc::new(copy));
            let content = RcsContentSource::new(cache.clone(), expand, location.module_path());
            (RepositorySource::Local { module_root }, Arc::new(content))
        }
        Method::Pserver | Method::Ssh | Method::Fork => {
            let password = config
                .remote
                .password_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok());
            let settings = ClientSettings::from_config(&config.remote, password);
            let client = Arc::new(RemoteClient::new(location.clone(), settings));
            let content = RemoteContentSource::new(client.clone(), cache.clone(), expand);
            (RepositorySource::Remote(client), Arc::new(content))
        }
    };

    Ok(Origin {
        id: config.origin.origin_id().to_string(),
        location,
        source: Arc::new(source),
        content,
        cache,
        mirror,
    })
}

/// Output of the walk, parse and reconstruction stages.
pub struct Reconstructed {
    pub histories: Arc<Vec<FileHistory>>,
    pub graph: CommitGraph,
    pub files_processed: usize,
    pub files_skipped: usize,
    /// Walker and parse warnings. Reconstruction warnings stay in `graph`.
    pub warnings: Vec<HistoryWarning>,
}

/// Walk, parse and reconstruct an origin. Runs on the blocking pool.
pub async fn reconstruct_origin(
    origin: &Origin,
    config: &Config,
    cancel: &CancelToken,
    progress: Arc<dyn LoadProgressReporter>,
) -> LoadResult<Reconstructed> {
    let source = origin.source.clone();
    let mirror = origin.mirror.clone();
    let origin_id = origin.id.clone();
    let excludes = config.walker.exclude_globs.clone();
    let workers = config.workers.parse;
    let options = ReconstructOptions {
        fuzz_window_secs: config.reconstruction.fuzz_window_secs,
    };
    let cancel = cancel.clone();

    tokio::task::spawn_blocking(move || {
        progress.report(LoadProgressEvent::Discovering {
            origin: origin_id.clone(),
        });
        if let Some(mirror) = &mirror {
            mirror.fetch()?;
            cancel.check()?;
        }
        let walk = source.discover(&excludes)?;
        info!(origin = %origin_id, files = walk.entries.len(), "discovered revision files");
        cancel.check()?;

        let parsed = parse_all(&origin_id, &source, &walk.entries, workers, &cancel, progress.as_ref())?;
        if parsed.histories.is_empty() {
            return Err(LoadError::ExhaustedRun {
                skipped: parsed.files_skipped,
            });
        }
        cancel.check()?;

        progress.report(LoadProgressEvent::Reconstructing {
            origin: origin_id.clone(),
            files: parsed.histories.len() as u64,
        });
        let graph = reconstruct(&parsed.histories, &options);
        info!(
            origin = %origin_id,
            commits = graph.commits.len(),
            branches = graph.branches.len(),
            tags = graph.tags.len(),
            "reconstructed commit graph"
        );

        let mut warnings = walk.warnings;
        warnings.extend(parsed.warnings);
        Ok(Reconstructed {
            files_processed: parsed.histories.len(),
            files_skipped: parsed.files_skipped,
            histories: Arc::new(parsed.histories),
            graph,
            warnings,
        })
    })
    .await
    .map_err(|e| LoadError::Task(e.to_string()))?
}

/// Run one load of the configured origin into `store`.
pub async fn load(
    config: &Config,
    store: &dyn ObjectStore,
    options: LoadOptions,
    cancel: &CancelToken,
    progress: Arc<dyn LoadProgressReporter>,
) -> LoadReport {
    let mut report = LoadReport::new(config.origin.origin_id());
    let mut snapshot = None;

    if let Err(e) = run(config, store, options, cancel, progress, &mut report, &mut snapshot).await {
        error!(origin = %report.origin, error = %e, "load failed");
        report.fail(&e);
    }
    report.finish();

    if !options.dry_run {
        let visit = OriginVisit {
            origin: report.origin.clone(),
            run_id: report.run_id.clone(),
            date: Utc::now(),
            status: report.status.as_str().to_string(),
            eventful: report.eventful,
            snapshot,
        };
        if let Err(e) = store.record_visit(&visit).await {
            warn!(origin = %report.origin, error = %e, "failed to record visit");
            if report.status != LoadStatus::Failed {
                report.fail(LoadError::from(e));
            }
        }
    }
    report
}

async fn run(
    config: &Config,
    store: &dyn ObjectStore,
    options: LoadOptions,
    cancel: &CancelToken,
    progress: Arc<dyn LoadProgressReporter>,
    report: &mut LoadReport,
    snapshot: &mut Option<ObjectId>,
) -> LoadResult<()> {
    let origin = open_origin(config)?;
    if let RepositorySource::Remote(client) = origin.source.as_ref() {
        let client = client.clone();
        tokio::task::spawn_blocking(move || client.connect())
            .await
            .map_err(|e| LoadError::Task(e.to_string()))??;
    }

    let reconstructed = reconstruct_origin(&origin, config, cancel, progress.clone()).await?;
    report.counts.files_processed = reconstructed.files_processed;
    report.counts.files_skipped = reconstructed.files_skipped;
    report.counts.commits_synthesized = reconstructed.graph.commits.len();
    report.warnings.extend(reconstructed.warnings);
    report.warnings.extend(reconstructed.graph.warnings.iter().cloned());

    if options.dry_run {
        info!(origin = %origin.id, commits = report.counts.commits_synthesized, "dry run, nothing written");
        return Ok(());
    }

    let resume_from = match &config.origin.resume_from {
        Some(hex) => Some(
            ObjectId::from_hex(hex).ok_or_else(|| LoadError::Config(format!("invalid resume_from revision id '{}'", hex)))?,
        ),
        None => None,
    };
    let ctx = IngestContext {
        origin: origin.id.clone(),
        histories: reconstructed.histories.clone(),
        content: origin.content.clone(),
        cache: origin.cache.clone(),
        max_content_size: config.content.max_content_size,
        resume_from,
        full: options.full,
        workers: config.workers.parse,
    };

    let mut outcome = IngestOutcome::default();
    let result = ingest(store, &reconstructed.graph, &ctx, cancel, progress.as_ref(), &mut outcome).await;

    report.counts.commits_ingested = outcome.commits_ingested;
    report.counts.bytes_ingested = outcome.bytes_ingested;
    report.counts.blobs_skipped = outcome.blobs_skipped;
    report.eventful = outcome.commits_ingested > 0;
    report.warnings.extend(outcome.warnings);
    *snapshot = outcome.snapshot;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_origin_picks_local_source() {
        let tmp = tempfile::TempDir::new().unwrap();
        let module = tmp.path().join("mod");
        let cfg = Config::for_local(module.to_str().unwrap(), &tmp.path().join("db.sqlite"));
        let origin = open_origin(&cfg).unwrap();
        assert!(matches!(origin.source.as_ref(), RepositorySource::Local { .. }));
        assert_eq!(origin.id, module.to_str().unwrap());
    }

    #[test]
    fn test_open_origin_rejects_unknown_scheme() {
        let cfg = Config::for_local("gopher://host/x", std::path::Path::new("db"));
        assert!(matches!(open_origin(&cfg), Err(LoadError::NotFound(_))));
    }
}
