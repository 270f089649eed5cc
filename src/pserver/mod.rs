//! Minimal client for the CVS client/server protocol.
//!
//! Enough of the protocol to list a module, fetch `rlog` transcripts and
//! check out single revisions, over pserver, ssh or a local `cvs server`
//! subprocess. The session is synchronous and strictly
//! request-then-response.

pub mod client;
pub mod scramble;
pub mod transport;

pub use client::{CheckedOut, ClientSettings, RemoteClient};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("authentication rejected by {host}: {reason}")]
    AuthRejected { host: String, reason: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl ProtocolError {
    /// Faults worth reconnecting for.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProtocolError::Io(_) | ProtocolError::ConnectionClosed)
    }
}

/// Response names this client understands, sent in `Valid-responses`.
pub const VALID_RESPONSES: &[&str] = &[
    "ok",
    "error",
    "Valid-requests",
    "Checked-in",
    "New-entry",
    "Checksum",
    "Copy-file",
    "Updated",
    "Created",
    "Update-existing",
    "Merged",
    "Patched",
    "Rcs-diff",
    "Mode",
    "Removed",
    "Remove-entry",
    "Template",
    "Notified",
    "Module-expansion",
    "Wrapper-rcsOption",
    "M",
    "Mbinary",
    "E",
    "F",
    "MT",
];
