//! Parallel parse stage.
//!
//! Reads and parses every walked entry on a bounded rayon pool. A file
//! that fails to read or parse is excluded with a warning, and so is a
//! file whose transcript the server refuses or garbles. Cancellation and
//! lost connections abort the stage.

use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use tracing::{info, warn};

use cvs_loader_core::errors::{HistoryWarning, MalformedRevisionFile, WarningKind};
use cvs_loader_core::models::FileHistory;

use crate::cancel::CancelToken;
use crate::error::{LoadError, LoadResult};
use crate::progress::{LoadProgressEvent, LoadProgressReporter};
use crate::pserver::ProtocolError;
use crate::walker::{RepositorySource, WalkEntry};

#[derive(Debug, Default)]
pub struct ParsedRepository {
    pub histories: Vec<FileHistory>,
    pub warnings: Vec<HistoryWarning>,
    pub files_skipped: usize,
}

type Outcome = LoadResult<Result<FileHistory, MalformedRevisionFile>>;

fn parse_entry(source: &RepositorySource, entry: &WalkEntry, cancel: &CancelToken) -> Outcome {
    cancel.check()?;
    let bytes = match source.read(entry) {
        Ok(b) => b,
        Err(LoadError::MalformedRevisionFile(e)) => return Ok(Err(e)),
        Err(LoadError::Protocol(e @ (ProtocolError::Server(_) | ProtocolError::Malformed(_)))) => {
            return Ok(Err(MalformedRevisionFile {
                path: entry.path.clone(),
                offset: 0,
                expected: format!("rlog transcript ({})", e),
            }))
        }
        Err(e) => return Err(e),
    };
    Ok(source.parse(entry, &bytes))
}

pub fn parse_all(
    origin: &str,
    source: &RepositorySource,
    entries: &[WalkEntry],
    workers: usize,
    cancel: &CancelToken,
    progress: &dyn LoadProgressReporter,
) -> LoadResult<ParsedRepository> {
    let total = entries.len() as u64;
    let done = AtomicU64::new(0);
    let work = |entry: &WalkEntry| {
        let outcome = parse_entry(source, entry, cancel);
        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
        progress.report(LoadProgressEvent::Parsing {
            origin: origin.to_string(),
            n,
            total,
        });
        outcome
    };

    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers.max(1)).build();
    let outcomes: Vec<Outcome> = match pool {
        Ok(pool) => pool.install(|| entries.par_iter().map(work).collect()),
        Err(_) => {
            // Fallback to sequential
            entries.iter().map(work).collect()
        }
    };

    let mut parsed = ParsedRepository::default();
    for (entry, outcome) in entries.iter().zip(outcomes) {
        match outcome? {
            Ok(history) => parsed.histories.push(history),
            Err(e) => {
                warn!(path = %entry.path, error = %e, "skipping unparseable revision file");
                parsed.files_skipped += 1;
                parsed
                    .warnings
                    .push(HistoryWarning::for_path(WarningKind::MalformedRevisionFile, &entry.path, e.to_string()));
            }
        }
    }
    info!(
        parsed = parsed.histories.len(),
        skipped = parsed.files_skipped,
        "parse stage complete"
    );
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::fs;

    const GOOD: &str = "head\t1.1;\naccess;\nsymbols;\nlocks; strict;\n\n1.1\ndate\t2001.01.01.00.00.00;\tauthor joe;\tstate Exp;\nbranches;\nnext\t;\n\ndesc\n@@\n\n1.1\nlog\n@init\n@\ntext\n@hello\n@\n";

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, RepositorySource, Vec<WalkEntry>) {
        let tmp = tempfile::TempDir::new().unwrap();
        let m = tmp.path().join("mod");
        fs::create_dir_all(&m).unwrap();
        for (name, body) in files {
            fs::write(m.join(name), body).unwrap();
        }
        let source = RepositorySource::Local { module_root: m };
        let entries = source.discover(&[]).unwrap().entries;
        (tmp, source, entries)
    }

    #[test]
    fn test_bad_file_is_skipped_with_warning() {
        let (_tmp, source, entries) = setup(&[("a,v", GOOD), ("b,v", "head 1.1; garbage @"), ("c,v", GOOD)]);
        let parsed = parse_all("o", &source, &entries, 2, &CancelToken::new(), &NoProgress).unwrap();
        assert_eq!(parsed.histories.len(), 2);
        assert_eq!(parsed.files_skipped, 1);
        assert_eq!(parsed.warnings[0].path.as_deref(), Some("b"));
        let paths: Vec<_> = parsed.histories.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "c"]);
    }

    #[test]
    fn test_cancelled_before_start() {
        let (_tmp, source, entries) = setup(&[("a,v", GOOD)]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = parse_all("o", &source, &entries, 1, &cancel, &NoProgress);
        assert!(matches!(result, Err(LoadError::Cancelled)));
    }
}
