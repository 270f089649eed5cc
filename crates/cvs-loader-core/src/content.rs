//! Lazy reconstruction of revision contents.
//!
//! RCS stores the trunk head in full and every other revision as an edit
//! script against a neighbour: trunk deltas run backwards from the head,
//! branch deltas run forwards from the branch point. [`materialize`] walks
//! from the requested revision towards the nearest revision whose text is
//! already known, then applies scripts back down the chain. Every text
//! produced on the way is memoized in a [`ContentCache`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::delta::apply_rcs_diff;
use crate::errors::DeltaError;
use crate::keywords::{expand_keywords, KeywordContext};
use crate::models::{DeltaFormat, FileHistory};
use crate::revnum::RevisionNumber;

type CacheKey = (String, RevisionNumber);

/// Append-only, write-once store of materialized texts keyed by
/// `(path, revision)`. Readers never block each other.
#[derive(Default)]
pub struct ContentCache {
    entries: RwLock<HashMap<CacheKey, Arc<[u8]>>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str, revision: &RevisionNumber) -> Option<Arc<[u8]>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&(path.to_string(), revision.clone())).cloned()
    }

    /// Insert a text. A second insert for the same key keeps the first value
    /// and returns it.
    pub fn insert(&self, path: &str, revision: &RevisionNumber, text: Vec<u8>) -> Arc<[u8]> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .entry((path.to_string(), revision.clone()))
            .or_insert_with(|| Arc::from(text))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached revision of `path`. Used once a file's history has
    /// been fully ingested.
    pub fn evict_path(&self, path: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|(p, _), _| p != path);
    }
}

/// Reconstruct the raw (unexpanded) text of `number`.
pub fn materialize(
    history: &FileHistory,
    number: &RevisionNumber,
    cache: &ContentCache,
) -> Result<Arc<[u8]>, DeltaError> {
    if let Some(text) = cache.get(&history.path, number) {
        return Ok(text);
    }

    let unknown = |n: &RevisionNumber| DeltaError::UnknownRevision {
        path: history.path.clone(),
        revision: n.to_string(),
    };
    let missing = |n: &RevisionNumber| DeltaError::MissingText {
        path: history.path.clone(),
        revision: n.to_string(),
    };

    // Walk towards a known text. `chain` holds revisions still to build,
    // nearest-to-base last.
    let mut chain: Vec<RevisionNumber> = Vec::new();
    let mut cursor = number.clone();
    let base_text: Arc<[u8]> = loop {
        if let Some(text) = cache.get(&history.path, &cursor) {
            break text;
        }
        let record = history.revision(&cursor).ok_or_else(|| unknown(&cursor))?;
        let delta = record.delta.as_ref().ok_or_else(|| missing(&cursor))?;
        if delta.format == DeltaFormat::FullText {
            break cache.insert(&history.path, &cursor, delta.bytes.clone());
        }
        if chain.len() > history.revision_count() {
            return Err(missing(number));
        }
        chain.push(cursor.clone());
        cursor = history.delta_base(&cursor).ok_or_else(|| missing(&cursor))?;
    };

    debug!(path = %history.path, revision = %number, steps = chain.len(), "materializing");

    let mut text = base_text;
    while let Some(next) = chain.pop() {
        let record = history.revision(&next).ok_or_else(|| unknown(&next))?;
        let delta = record.delta.as_ref().ok_or_else(|| missing(&next))?;
        let built = apply_rcs_diff(&text, &delta.bytes)?;
        text = cache.insert(&history.path, &next, built);
    }
    Ok(text)
}

/// Provider of revision contents, chosen once per run.
pub trait ContentSource: Send + Sync {
    /// Final bytes of `revision` as they should be archived.
    fn content(&self, history: &FileHistory, revision: &RevisionNumber) -> Result<Arc<[u8]>, DeltaError>;

    /// Whether the file should be archived with the executable mode. Only
    /// meaningful after `content` has been called for the file.
    fn is_executable(&self, history: &FileHistory) -> bool {
        history.executable
    }
}

/// Contents rebuilt from the delta payloads of parsed `,v` files.
pub struct RcsContentSource {
    cache: Arc<ContentCache>,
    expand: bool,
    repository_root: String,
}

impl RcsContentSource {
    pub fn new(cache: Arc<ContentCache>, expand: bool, repository_root: impl Into<String>) -> Self {
        Self {
            cache,
            expand,
            repository_root: repository_root.into(),
        }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }
}

impl ContentSource for RcsContentSource {
    fn content(&self, history: &FileHistory, revision: &RevisionNumber) -> Result<Arc<[u8]>, DeltaError> {
        let raw = materialize(history, revision, &self.cache)?;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rcs::parse_rcs;
    use crate::revnum::rev;

    const FILE: &str = "head 1.3;\nsymbols B:1.2.0.2;\nlocks; strict;\n\n\
1.3 date 2001.01.03.00.00.00; author a; state Exp; branches; next 1.2;\n\
1.2 date 2001.01.02.00.00.00; author a; state Exp; branches 1.2.2.1; next 1.1;\n\
1.1 date 2001.01.01.00.00.00; author a; state Exp; branches; next ;\n\
1.2.2.1 date 2001.01.04.00.00.00; author b; state Exp; branches; next 1.2.2.2;\n\
1.2.2.2 date 2001.01.05.00.00.00; author b; state Exp; branches; next ;\n\
desc @@\n\
1.3 log @c@ text @one\ntwo\nthree\n$Revision$\n@\n\
1.2 log @b@ text @d3 1\n@\n\
1.1 log @a@ text @d2 1\n@\n\
1.2.2.1 log @x@ text @a2 1\nbranch\n@\n\
1.2.2.2 log @y@ text @d1 1\n@\n";

    #[test]
    fn test_materialize_trunk_and_branch() {
        let h = parse_rcs("f.txt", FILE.as_bytes(), false).unwrap();
        let cache = ContentCache::new();
        assert_eq!(&*materialize(&h, &rev("1.3"), &cache).unwrap(), b"one\ntwo\nthree\n$Revision$\n");
        assert_eq!(&*materialize(&h, &rev("1.2"), &cache).unwrap(), b"one\ntwo\n$Revision$\n");
        assert_eq!(&*materialize(&h, &rev("1.1"), &cache).unwrap(), b"one\n$Revision$\n");
        assert_eq!(
            &*materialize(&h, &rev("1.2.2.1"), &cache).unwrap(),
            b"one\ntwo\nbranch\n$Revision$\n"
        );
        assert_eq!(
            &*materialize(&h, &rev("1.2.2.2"), &cache).unwrap(),
            b"two\nbranch\n$Revision$\n"
        );
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn test_cache_is_write_once() {
        let cache = ContentCache::new();
        let first = cache.insert("p", &rev("1.1"), b"a".to_vec());
        let second = cache.insert("p", &rev("1.1"), b"b".to_vec());
        assert_eq!(&*first, b"a");
        assert_eq!(&*second, b"a");
        cache.evict_path("p");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_source_expands_keywords() {
        let h = parse_rcs("f.txt", FILE.as_bytes(), false).unwrap();
        let source = RcsContentSource::new(Arc::new(ContentCache::new()), true, "/cvsroot/m");
        let text = source.content(&h, &rev("1.1")).unwrap();
        assert_eq!(&*text, b"one\n$Revision: 1.1 $\n");
        // Raw text stays cached unexpanded.
        assert_eq!(&*source.cache().get("f.txt", &rev("1.1")).unwrap(), b"one\n$Revision$\n");

        let plain = RcsContentSource::new(Arc::new(ContentCache::new()), false, "");
        assert_eq!(&*plain.content(&h, &rev("1.1")).unwrap(), b"one\n$Revision$\n");
    }

    #[test]
    fn test_missing_revision_is_an_error() {
        let h = parse_rcs("f.txt", FILE.as_bytes(), false).unwrap();
        let cache = ContentCache::new();
        assert!(matches!(
            materialize(&h, &rev("1.9"), &cache),
            Err(DeltaError::UnknownRevision { .. })
        ));
    }
}
