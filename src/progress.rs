//! Load progress reporting.
//!
//! Reports observable progress during `cvsload load` so users see which
//! phase is running and how much is left. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a load.
#[derive(Clone, Debug)]
pub enum LoadProgressEvent {
    /// Enumerating revision files (total unknown).
    Discovering { origin: String },
    /// n of total revision files read and parsed.
    Parsing { origin: String, n: u64, total: u64 },
    /// Building the commit graph from this many file histories.
    Reconstructing { origin: String, files: u64 },
    /// n of total commits written (or found already archived).
    Ingesting { origin: String, n: u64, total: u64 },
}

/// Reports load progress. Implementations write to stderr (human or JSON).
/// Called from worker threads during parsing.
pub trait LoadProgressReporter: Send + Sync {
    fn report(&self, event: LoadProgressEvent);
}

/// Human-friendly progress on stderr: "load proj  parsing  1,234 / 5,000 files".
pub struct StderrProgress;

impl LoadProgressReporter for StderrProgress {
    fn report(&self, event: LoadProgressEvent) {
        let line = match &event {
            LoadProgressEvent::Discovering { origin } => {
                format!("load {}  discovering...\n", origin)
            }
            LoadProgressEvent::Parsing { origin, n, total } => format!(
                "load {}  parsing  {} / {} files\n",
                origin,
                format_number(*n),
                format_number(*total)
            ),
            LoadProgressEvent::Reconstructing { origin, files } => format!(
                "load {}  reconstructing changesets from {} files\n",
                origin,
                format_number(*files)
            ),
            LoadProgressEvent::Ingesting { origin, n, total } => format!(
                "load {}  ingesting  {} / {} commits\n",
                origin,
                format_number(*n),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl LoadProgressReporter for JsonProgress {
    fn report(&self, event: LoadProgressEvent) {
        let obj = match &event {
            LoadProgressEvent::Discovering { origin } => serde_json::json!({
                "event": "progress",
                "origin": origin,
                "phase": "discovering"
            }),
            LoadProgressEvent::Parsing { origin, n, total } => serde_json::json!({
                "event": "progress",
                "origin": origin,
                "phase": "parsing",
                "n": n,
                "total": total
            }),
            LoadProgressEvent::Reconstructing { origin, files } => serde_json::json!({
                "event": "progress",
                "origin": origin,
                "phase": "reconstructing",
                "files": files
            }),
            LoadProgressEvent::Ingesting { origin, n, total } => serde_json::json!({
                "event": "progress",
                "origin": origin,
                "phase": "ingesting",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl LoadProgressReporter for NoProgress {
    fn report(&self, _event: LoadProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn LoadProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!("unknown progress mode '{}' (expected off, human or json)", other)),
        }
    }
}
