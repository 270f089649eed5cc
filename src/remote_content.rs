//! Revision contents fetched from a CVS server.
//!
//! Histories read from `rlog` transcripts carry no delta text, so each
//! revision is checked out with `-kb` and memoized in the shared
//! [`ContentCache`]. Keywords are expanded locally, the same way as for
//! local `,v` files.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use cvs_loader_core::content::{ContentCache, ContentSource};
use cvs_loader_core::errors::DeltaError;
use cvs_loader_core::keywords::{expand_keywords, KeywordContext};
use cvs_loader_core::models::FileHistory;
use cvs_loader_core::revnum::RevisionNumber;

use crate::pserver::RemoteClient;

pub struct RemoteContentSource {
    client: Arc<RemoteClient>,
    cache: Arc<ContentCache>,
    expand: bool,
    repository_root: String,
    executables: Mutex<HashSet<String>>,
}

impl RemoteContentSource {
    pub fn new(client: Arc<RemoteClient>, cache: Arc<ContentCache>, expand: bool) -> Self {
        let repository_root = client.location().module_path();
        Self {
            client,
            cache,
            expand,
            repository_root,
            executables: Mutex::new(HashSet::new()),
        }
    }
}

impl ContentSource for RemoteContentSource {
    fn content(&self, history: &FileHistory, revision: &RevisionNumber) -> Result<Arc<[u8]>, DeltaError> {
        let raw = match self.cache.get(&history.path, revision) {
            Some(text) => text,
            None => {
                let checked_out = self
                    .client
                    .checkout(&history.path, revision)
                    .map_err(|e| DeltaError::Fetch {
                        path: history.path.clone(),
                        revision: revision.to_string(),
                        reason: e.to_string(),
                    })?;
                if checked_out.executable {
                    self.executables
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(history.path.clone());
                }
                self.cache.insert(&history.path, revision, checked_out.data)
            }
        };

        if !self.expand || history.expand.is_verbatim() {
            return Ok(raw);
        }
        let record = history.revision(revision).ok_or_else(|| DeltaError::UnknownRevision {
            path: history.path.clone(),
            revision: revision.to_string(),
        })?;
        let ctx = KeywordContext::for_revision(history, record, &self.repository_root);
        Ok(Arc::from(expand_keywords(&raw, history.expand, &ctx)))
    }

    fn is_executable(&self, history: &FileHistory) -> bool {
        history.executable
            || self
                .executables
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&history.path)
    }
}
