//! Outcome of a load: status, counters and every recovered warning.

use serde::Serialize;

use cvs_loader_core::errors::HistoryWarning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadStatus {
    Full,
    Partial { skipped: usize },
    Failed,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Full => "full",
            LoadStatus::Partial { .. } => "partial",
            LoadStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadCounts {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub commits_synthesized: usize,
    pub commits_ingested: usize,
    pub bytes_ingested: u64,
    pub blobs_skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub origin: String,
    pub run_id: String,
    #[serde(flatten)]
    pub status: LoadStatus,
    pub eventful: bool,
    pub counts: LoadCounts,
    pub warnings: Vec<HistoryWarning>,
    /// Set when the run stopped on a fatal error after partial progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoadReport {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            run_id: uuid::Uuid::new_v4().to_string(),
            status: LoadStatus::Full,
            eventful: false,
            counts: LoadCounts::default(),
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Derive the status from the counters (unless already failed).
    pub fn finish(&mut self) {
        if self.status == LoadStatus::Failed {
            return;
        }
        self.status = if self.counts.files_skipped > 0 {
            LoadStatus::Partial {
                skipped: self.counts.files_skipped,
            }
        } else {
            LoadStatus::Full
        };
    }

    pub fn fail(&mut self, error: impl ToString) {
        self.status = LoadStatus::Failed;
        self.error = Some(error.to_string());
    }

    pub fn print_human(&self) {
        println!("Load {} ({})", self.origin, self.run_id);
        match self.status {
            LoadStatus::Partial { skipped } => println!("  status:               partial ({} files skipped)", skipped),
            s => println!("  status:               {}", s.as_str()),
        }
        println!("  visit:                {}", if self.eventful { "eventful" } else { "uneventful" });
        println!("  files processed:      {}", self.counts.files_processed);
        println!("  files skipped:        {}", self.counts.files_skipped);
        println!("  commits synthesized:  {}", self.counts.commits_synthesized);
        println!("  commits ingested:     {}", self.counts.commits_ingested);
        println!("  bytes ingested:       {}", crate::stats::format_bytes(self.counts.bytes_ingested));
        if self.counts.blobs_skipped > 0 {
            println!("  oversized contents:   {}", self.counts.blobs_skipped);
        }
        if let Some(err) = &self.error {
            println!("  error:                {}", err);
        }
        if !self.warnings.is_empty() {
            println!();
            println!("  Warnings ({}):", self.warnings.len());
            for w in &self.warnings {
                println!("    {}", w);
            }
        }
    }
}
