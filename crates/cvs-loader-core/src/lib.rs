//! # cvs-loader core
//!
//! Native-I/O-free logic for archiving CVS repositories: revision numbers,
//! the per-file history model, the RCS and `rlog` parsers, edit-script
//! application, keyword expansion, changeset reconstruction, the
//! content-addressed object model and the store abstraction.
//!
//! This crate contains no tokio, sqlx, sockets or filesystem walking.

pub mod changeset;
pub mod content;
pub mod delta;
pub mod errors;
pub mod keywords;
pub mod models;
pub mod object;
pub mod rcs;
pub mod revnum;
pub mod rlog;
pub mod store;
