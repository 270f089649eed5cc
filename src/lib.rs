//! # cvs-loader
//!
//! Archives CVS repositories, read from local `,v` files or through the
//! CVS client/server protocol, as a content-addressed commit graph.
//!
//! CVS records history per file. The loader parses every revision file,
//! regroups per-file revisions into project-wide commits and writes them
//! as blobs, trees, revisions and snapshots through an
//! [`ObjectStore`](cvs_loader_core::store::ObjectStore).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌───────────────┐   ┌──────────┐   ┌────────┐
//! │ Walker       │──▶│  Parse   │──▶│ Reconstruct   │──▶│  Ingest  │──▶│ Store  │
//! │ local/remote │   │ (rayon)  │   │ changesets    │   │ objects  │   │ SQLite │
//! └──────────────┘   └──────────┘   └───────────────┘   └──────────┘   └────────┘
//! ```
//!
//! Parsing, delta application and changeset reconstruction live in the
//! `cvs-loader-core` crate; this crate adds I/O, the remote protocol,
//! persistence and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! cvsload init                  # create the store
//! cvsload load                  # archive the configured origin
//! cvsload load                  # again: recognizes archived commits
//! cvsload graph                 # show the reconstructed history
//! cvsload stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`cvsroot`] | Origin URL and CVSROOT parsing |
//! | [`pserver`] | CVS client/server protocol (pserver, ssh, local) |
//! | [`walker`] | Revision file discovery |
//! | [`parse`] | Parallel parse stage |
//! | [`remote_content`] | Revision contents checked out from a server |
//! | [`rsync`] | Local mirrors of `rsync://` origins |
//! | [`ingest`] | Commit graph to archive objects |
//! | [`loader`] | Load orchestration |
//! | [`report`] | Load status, counters and warnings |
//! | [`sqlite_store`] | SQLite object store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`stats`] | Store statistics |
//! | [`inspect`] | Graph and single-file views |
//! | [`progress`] | Progress reporting |
//! | [`logging`] | Tracing subscriber setup |
//! | [`cancel`] | Cancellation token |
//! | [`error`] | Load error taxonomy |

pub mod cancel;
pub mod config;
pub mod cvsroot;
pub mod db;
pub mod error;
pub mod ingest;
pub mod inspect;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod parse;
pub mod progress;
pub mod pserver;
pub mod remote_content;
pub mod report;
pub mod rsync;
pub mod sqlite_store;
pub mod stats;
pub mod walker;
