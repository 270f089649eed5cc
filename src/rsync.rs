//! Local mirrors of `rsync://` origins.
//!
//! The module directory and the repository's `CVSROOT` are copied into a
//! scratch directory with the `rsync` program, after which the origin is
//! walked and parsed like any local repository. The scratch directory is
//! removed when the mirror is dropped.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::cvsroot::OriginLocation;
use crate::error::{LoadError, LoadResult};

pub struct RsyncMirror {
    location: OriginLocation,
    program: String,
    dir: TempDir,
}

impl RsyncMirror {
    pub fn new(location: OriginLocation, program: &str) -> LoadResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("cvsload-rsync-")
            .tempdir()
            .map_err(|e| LoadError::Mirror(format!("cannot create scratch directory: {}", e)))?;
        Ok(Self {
            location,
            program: program.to_string(),
            dir,
        })
    }

    /// Repository root of the mirror; `$Source$` keywords still name the
    /// remote path.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn module_root(&self) -> PathBuf {
        self.dir.path().join(&self.location.module)
    }

    /// List the remote root, then copy the module and `CVSROOT`. A root
    /// without the module is not found; a missing `CVSROOT` is left to the
    /// walker to report.
    pub fn fetch(&self) -> LoadResult<()> {
        let root_url = self.location.rsync_url("");
        let listing = self.run(&[root_url.clone()])?;
        let names: Vec<&str> = listing
            .lines()
            .filter_map(|l| l.split_whitespace().last())
            .collect();
        debug!(url = %root_url, entries = names.len(), "listed rsync root");

        if !names.contains(&self.location.module.as_str()) {
            return Err(LoadError::NotFound(format!(
                "module {} not found at {}",
                self.location.module, root_url
            )));
        }
        if names.contains(&"CVSROOT") {
            self.copy("CVSROOT")?;
        } else {
            warn!(url = %root_url, "no CVSROOT directory on rsync server");
        }
        let module = self.location.module.clone();
        self.copy(&module)?;
        info!(url = %root_url, module = %module, dest = %self.root().display(), "rsync mirror complete");
        Ok(())
    }

    fn copy(&self, name: &str) -> LoadResult<()> {
        let dest = self.dir.path().join(name);
        let source = self.location.rsync_url(&format!("{}/", name));
        self.run(&[
            "-a".to_string(),
            "--delete".to_string(),
            source,
            format!("{}/", dest.display()),
        ])?;
        Ok(())
    }

    fn run(&self, args: &[String]) -> LoadResult<String> {
        debug!(program = %self.program, ?args, "running rsync");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| LoadError::Mirror(format!("failed to start {}: {}", self.program, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LoadError::Mirror(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
