//! Repository walker.
//!
//! Enumerates the revision files of a module, from local disk or through
//! the remote client, into a sorted list of [`WalkEntry`] values. Bytes
//! are only read when the parse stage asks for them
//! ([`RepositorySource::read`]).
//!
//! - Files inside `Attic/` are exposed under their logical path with
//!   `deleted = true`; a live copy of the same path wins.
//! - Anything that is not a `,v` file is skipped silently.
//! - The `CVSROOT` administrative directory is never walked.
//! - A module without any revision file is not found.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use cvs_loader_core::errors::{HistoryWarning, MalformedRevisionFile, WarningKind};
use cvs_loader_core::models::{logical_path, FileHistory};
use cvs_loader_core::rcs::parse_rcs;
use cvs_loader_core::rlog::{parse_rlog_file, split_rlog};

use crate::error::{LoadError, LoadResult};
use crate::pserver::{ProtocolError, RemoteClient};

/// One revision file found by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Logical path inside the module (`dir/file.c`).
    pub path: String,
    /// RCS file path relative to the module (`dir/Attic/file.c,v`).
    pub rcs_path: String,
    pub deleted: bool,
    pub executable: bool,
}

#[derive(Debug, Default)]
pub struct Walk {
    pub entries: Vec<WalkEntry>,
    pub warnings: Vec<HistoryWarning>,
}

/// Where revision files come from. Chosen once per run.
pub enum RepositorySource {
    Local { module_root: PathBuf },
    Remote(Arc<RemoteClient>),
}

impl RepositorySource {
    /// Directory of the module as recorded in `RCS file:` lines and
    /// `$Source$` keywords.
    pub fn module_root(&self) -> String {
        match self {
            RepositorySource::Local { module_root } => module_root.to_string_lossy().trim_end_matches('/').to_string(),
            RepositorySource::Remote(client) => client.location().module_path(),
        }
    }

    pub fn discover(&self, exclude_globs: &[String]) -> LoadResult<Walk> {
        let excludes = build_globset(exclude_globs)?;
        match self {
            RepositorySource::Local { module_root } => walk_local(module_root, &excludes),
            RepositorySource::Remote(client) => walk_remote(client, &excludes),
        }
    }

    /// Raw bytes of an entry: the `,v` file, or the file's `rlog`
    /// transcript for remote origins.
    pub fn read(&self, entry: &WalkEntry) -> LoadResult<Vec<u8>> {
        match self {
            RepositorySource::Local { module_root } => {
                let full = module_root.join(&entry.rcs_path);
                std::fs::read(&full).map_err(|e| {
                    LoadError::MalformedRevisionFile(MalformedRevisionFile {
                        path: entry.path.clone(),
                        offset: 0,
                        expected: format!("readable revision file ({})", e),
                    })
                })
            }
            RepositorySource::Remote(client) => Ok(client.fetch_rlog(Some(&entry.path))?),
        }
    }

    /// Decode the bytes returned by [`read`](Self::read).
    pub fn parse(&self, entry: &WalkEntry, bytes: &[u8]) -> Result<FileHistory, MalformedRevisionFile> {
        let mut history = match self {
            RepositorySource::Local { .. } => parse_rcs(&entry.path, bytes, entry.deleted)?,
            RepositorySource::Remote(_) => {
                let block = split_rlog(bytes).into_iter().next().ok_or_else(|| MalformedRevisionFile {
                    path: entry.path.clone(),
                    offset: 0,
                    expected: "rlog transcript".to_string(),
                })?;
                parse_rlog_file(block, &self.module_root())?
            }
        };
        history.path = entry.path.clone();
        history.deleted = entry.deleted;
        history.executable = history.executable || entry.executable;
        Ok(history)
    }
}

fn build_globset(patterns: &[String]) -> LoadResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| LoadError::Config(e.to_string()))?);
    }
    builder.build().map_err(|e| LoadError::Config(e.to_string()))
}

/// Collects entries by logical path, resolving live/Attic duplicates.
#[derive(Default)]
struct EntrySet {
    entries: BTreeMap<String, WalkEntry>,
    warnings: Vec<HistoryWarning>,
}

impl EntrySet {
    fn add(&mut self, rcs_path: &str, executable: bool, excludes: &GlobSet) {
        let Some((path, deleted)) = logical_path(rcs_path) else {
            return;
        };
        if excludes.is_match(&path) {
            debug!(%path, "excluded");
            return;
        }
        let entry = WalkEntry {
            path: path.clone(),
            rcs_path: rcs_path.to_string(),
            deleted,
            executable,
        };
        match self.entries.get(&path) {
            Some(existing) => {
                let (live, attic) = if existing.deleted { (&entry, existing) } else { (existing, &entry) };
                warn!(%path, "file exists both live and in the Attic, using the live copy");
                self.warnings.push(HistoryWarning::for_path(
                    WarningKind::AtticConflict,
                    &path,
                    format!("ignoring {} in favour of {}", attic.rcs_path, live.rcs_path),
                ));
                if existing.deleted && !entry.deleted {
                    self.entries.insert(path, entry);
                }
            }
            None => {
                self.entries.insert(path, entry);
            }
        }
    }

    fn finish(self) -> Walk {
        Walk {
            entries: self.entries.into_values().collect(),
            warnings: self.warnings,
        }
    }
}

fn walk_local(module_root: &Path, excludes: &GlobSet) -> LoadResult<Walk> {
    if !module_root.is_dir() {
        return Err(LoadError::NotFound(format!(
            "module directory does not exist: {}",
            module_root.display()
        )));
    }

    let mut set = EntrySet::default();
    let has_cvsroot = module_root
        .parent()
        .map(|p| p.join("CVSROOT").is_dir())
        .unwrap_or(false);
    if !has_cvsroot {
        warn!(root = %module_root.display(), "no CVSROOT directory next to module");
        set.warnings.push(HistoryWarning::new(
            WarningKind::MissingCvsroot,
            format!("no CVSROOT directory found above {}", module_root.display()),
        ));
    }

    let walker = WalkDir::new(module_root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == "CVSROOT"));
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let where_ = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                warn!(path = %where_, error = %e, "unreadable directory entry");
                set.warnings.push(HistoryWarning::for_path(
                    WarningKind::MalformedRevisionFile,
                    where_,
                    format!("skipped unreadable entry: {}", e),
                ));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(module_root).unwrap_or(entry.path());
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !rel_str.ends_with(",v") {
            continue;
        }
        let executable = entry.metadata().map(|m| is_executable(&m)).unwrap_or(false);
        set.add(&rel_str, executable, excludes);
    }

    let walk = set.finish();
    if walk.entries.is_empty() {
        return Err(LoadError::NotFound(format!(
            "module directory {} contains no revision files",
            module_root.display()
        )));
    }
    debug!(files = walk.entries.len(), "local walk complete");
    Ok(walk)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

fn walk_remote(client: &RemoteClient, excludes: &GlobSet) -> LoadResult<Walk> {
    let files = client.list_files().map_err(|e| match e {
        ProtocolError::Server(msg) => LoadError::NotFound(format!("module {}: {}", client.location().module, msg)),
        other => LoadError::Protocol(other),
    })?;
    if files.is_empty() {
        return Err(LoadError::NotFound(format!(
            "module {} has no revision files",
            client.location().module
        )));
    }
    let mut set = EntrySet::default();
    for rcs_path in files {
        if rcs_path.split('/').next() == Some("CVSROOT") {
            continue;
        }
        set.add(&rcs_path, false, excludes);
    }
    Ok(set.finish())
}
