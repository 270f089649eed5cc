//! Content-addressed archive objects.
//!
//! Identifiers are SHA-256 digests over git-style framed manifests:
//! `<kind> <length>\0<payload>`. Trees list entries sorted the way git
//! sorts them (directories compare as `name/`).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim()).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    fn hash_framed(kind: &str, payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{} {}\0", kind, payload.len()).as_bytes());
        hasher.update(payload);
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..12])
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid object id '{}'", s)))
    }
}

/// File contents. `data` is `None` when the content was too large to
/// archive and is only referenced by hash.
#[derive(Debug, Clone)]
pub struct Blob {
    pub id: ObjectId,
    pub length: usize,
    pub data: Option<Arc<[u8]>>,
}

impl Blob {
    pub fn new(data: Arc<[u8]>) -> Self {
        Self {
            id: blob_id(&data),
            length: data.len(),
            data: Some(data),
        }
    }

    /// Reference to content that will not be stored.
    pub fn skipped(data: &[u8]) -> Self {
        Self {
            id: blob_id(data),
            length: data.len(),
            data: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.data.is_none()
    }
}

pub fn blob_id(data: &[u8]) -> ObjectId {
    ObjectId::hash_framed("blob", data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    File,
    Executable,
    Directory,
}

impl EntryMode {
    pub fn octal(&self) -> &'static str {
        match self {
            EntryMode::File => "100644",
            EntryMode::Executable => "100755",
            EntryMode::Directory => "40000",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub mode: EntryMode,
    pub target: ObjectId,
}

impl TreeEntry {
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.mode == EntryMode::Directory {
            key.push(b'/');
        }
        key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub id: ObjectId,
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Build a tree, sorting entries and computing the identifier.
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by_key(|e| e.sort_key());
        let mut payload = Vec::new();
        for e in &entries {
            payload.extend_from_slice(e.mode.octal().as_bytes());
            payload.push(b' ');
            payload.extend_from_slice(e.name.as_bytes());
            payload.push(0);
            payload.extend_from_slice(e.target.as_bytes());
        }
        Self {
            id: ObjectId::hash_framed("tree", &payload),
            entries,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// An archived synthesized commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: String,
    pub date: DateTime<Utc>,
    pub message: String,
    pub branch: String,
    /// Changeset key of the commit this revision was built from.
    pub changeset_key: String,
}

impl Revision {
    pub fn new(
        tree: ObjectId,
        parents: Vec<ObjectId>,
        author: String,
        date: DateTime<Utc>,
        message: String,
        branch: String,
        changeset_key: String,
    ) -> Self {
        let mut header = String::new();
        header.push_str(&format!("tree {}\n", tree));
        for p in &parents {
            header.push_str(&format!("parent {}\n", p));
        }
        header.push_str(&format!("author {} {} +0000\n", author, date.timestamp()));
        header.push_str(&format!("committer {} {} +0000\n", author, date.timestamp()));
        header.push_str(&format!("branch {}\n", branch));
        header.push_str(&format!("changeset {}\n\n", changeset_key));
        let mut payload = header.into_bytes();
        payload.extend_from_slice(message.as_bytes());
        Self {
            id: ObjectId::hash_framed("revision", &payload),
            tree,
            parents,
            author,
            date,
            message,
            branch,
            changeset_key,
        }
    }
}

/// Branch and tag names of an origin at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: ObjectId,
    pub branches: BTreeMap<String, ObjectId>,
}

impl Snapshot {
    pub fn new(branches: BTreeMap<String, ObjectId>) -> Self {
        let mut payload = Vec::new();
        for (name, target) in &branches {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
            payload.extend_from_slice(target.as_bytes());
        }
        Self {
            id: ObjectId::hash_framed("snapshot", &payload),
            branches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_id_matches_known_framing() {
        let mut hasher = Sha256::new();
        hasher.update(b"blob 6\0hello\n");
        let expected = hex::encode(hasher.finalize());
        assert_eq!(blob_id(b"hello\n").to_hex(), expected);
        assert_eq!(Blob::skipped(b"hello\n").id, blob_id(b"hello\n"));
    }

    #[test]
    fn test_tree_order_is_git_order() {
        let id = blob_id(b"x");
        let tree = Tree::new(vec![
            TreeEntry { name: "foo.c".into(), mode: EntryMode::File, target: id },
            TreeEntry { name: "foo".into(), mode: EntryMode::Directory, target: id },
            TreeEntry { name: "bar".into(), mode: EntryMode::Executable, target: id },
        ]);
        let names: Vec<&str> = tree.entries.iter().map(|e| e.name.as_str()).collect();
        // "foo.c" < "foo/" because '.' < '/'.
        assert_eq!(names, vec!["bar", "foo.c", "foo"]);
        let again = Tree::new(tree.entries.clone());
        assert_eq!(again.id, tree.id);
    }

    #[test]
    fn test_revision_id_depends_on_changeset_key() {
        let tree = Tree::empty().id;
        let date = DateTime::from_timestamp(1000, 0).unwrap();
        let a = Revision::new(tree, vec![], "joe".into(), date, "m".into(), "HEAD".into(), "k1".into());
        let b = Revision::new(tree, vec![], "joe".into(), date, "m".into(), "HEAD".into(), "k2".into());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_object_id_hex_roundtrip_and_serde() {
        let id = blob_id(b"abc");
        assert_eq!(ObjectId::from_hex(&id.to_hex()), Some(id));
        assert!(ObjectId::from_hex("zz").is_none());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
