//! Configuration parsing and validation.
//!
//! `cvsload` reads a single TOML file (see `config/cvsload.example.toml`).
//! Every section except `[origin]` and `[store]` is optional and falls back
//! to the defaults below. Validation happens once in [`load_config`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cvs_loader_core::changeset::DEFAULT_FUZZ_WINDOW_SECS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub origin: OriginConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub reconstruction: ReconstructionConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub walker: WalkerConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OriginConfig {
    /// Repository location: a path, `file://`, `pserver://`, `ssh://`,
    /// `local://`, `rsync://` URL or a classic `:method:` CVSROOT string.
    pub url: String,
    /// Identifier recorded in the store. Defaults to `url`.
    #[serde(default)]
    pub id: Option<String>,
    /// Module name, required with classic CVSROOT strings.
    #[serde(default)]
    pub module: Option<String>,
    /// Revision id (hex) to resume after, overriding the stored marker.
    #[serde(default)]
    pub resume_from: Option<String>,
}

impl OriginConfig {
    pub fn origin_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    /// Environment variable holding the pserver password, if not in the URL.
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Program used for `ssh://` origins.
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
    /// Program used for `local://` origins.
    #[serde(default = "default_cvs_program")]
    pub cvs_program: String,
    /// Program used to mirror `rsync://` origins.
    #[serde(default = "default_rsync_program")]
    pub rsync_program: String,
    /// Largest byte count accepted for one transfer (`Mbinary` output or
    /// a checked-out file).
    #[serde(default = "default_max_transfer_bytes")]
    pub max_transfer_bytes: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            password_env: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            io_timeout_secs: default_io_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            ssh_program: default_ssh_program(),
            cvs_program: default_cvs_program(),
            rsync_program: default_rsync_program(),
            max_transfer_bytes: default_max_transfer_bytes(),
        }
    }
}

impl RemoteConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_io_timeout_secs() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_initial_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_ssh_program() -> String {
    "ssh".to_string()
}
fn default_cvs_program() -> String {
    "cvs".to_string()
}
fn default_rsync_program() -> String {
    "rsync".to_string()
}
fn default_max_transfer_bytes() -> u64 {
    1 << 30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconstructionConfig {
    #[serde(default = "default_fuzz_window_secs")]
    pub fuzz_window_secs: i64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            fuzz_window_secs: default_fuzz_window_secs(),
        }
    }
}

fn default_fuzz_window_secs() -> i64 {
    DEFAULT_FUZZ_WINDOW_SECS
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_expand_keywords")]
    pub expand_keywords: bool,
    /// Contents larger than this are referenced by hash only.
    #[serde(default)]
    pub max_content_size: Option<usize>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            expand_keywords: default_expand_keywords(),
            max_content_size: None,
        }
    }
}

fn default_expand_keywords() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WalkerConfig {
    /// Globs over logical paths (`src/**/*.o`) to leave out.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkersConfig {
    #[serde(default = "default_parse_workers")]
    pub parse: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            parse: default_parse_workers(),
        }
    }
}

fn default_parse_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive. `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Configuration for a one-off local run (used by tests and `inspect`).
    pub fn for_local(url: &str, store_path: &Path) -> Self {
        Self {
            origin: OriginConfig {
                url: url.to_string(),
                id: None,
                module: None,
                resume_from: None,
            },
            store: StoreConfig {
                path: store_path.to_path_buf(),
            },
            remote: RemoteConfig::default(),
            reconstruction: ReconstructionConfig::default(),
            content: ContentConfig::default(),
            walker: WalkerConfig::default(),
            workers: WorkersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.origin.url.trim().is_empty() {
        anyhow::bail!("origin.url must not be empty");
    }

    if config.reconstruction.fuzz_window_secs < 0 {
        anyhow::bail!("reconstruction.fuzz_window_secs must be >= 0");
    }

    if config.workers.parse == 0 {
        anyhow::bail!("workers.parse must be >= 1");
    }

    if config.remote.backoff_initial_ms > config.remote.backoff_max_ms {
        anyhow::bail!("remote.backoff_initial_ms must not exceed remote.backoff_max_ms");
    }

    if config.remote.connect_timeout_secs == 0 || config.remote.io_timeout_secs == 0 {
        anyhow::bail!("remote timeouts must be > 0");
    }

    if config.remote.max_transfer_bytes == 0 {
        anyhow::bail!("remote.max_transfer_bytes must be > 0");
    }

    if config.content.max_content_size == Some(0) {
        anyhow::bail!("content.max_content_size must be > 0 when set");
    }

    for glob in &config.walker.exclude_globs {
        globset::Glob::new(glob).with_context(|| format!("Invalid exclude glob: '{}'", glob))?;
    }

    if let Some(id) = &config.origin.resume_from {
        if cvs_loader_core::object::ObjectId::from_hex(id).is_none() {
            anyhow::bail!("origin.resume_from must be a 64-character hex revision id");
        }
    }

    Ok(())
}
