//! Dotted RCS revision numbers.
//!
//! A [`RevisionNumber`] is an ordered tuple of integers. Ordering is
//! lexicographic by component, so `1.2 < 1.3 < 1.3.1.1 < 1.10`. String
//! comparison is never used.
//!
//! # Shapes
//!
//! | Shape | Example | Meaning |
//! |-------|---------|---------|
//! | even length, 2 | `1.4` | trunk revision |
//! | even length, ≥ 4 | `1.4.2.3` | revision on branch `1.4.2` |
//! | odd length | `1.4.2` | branch number |
//! | magic | `1.4.0.2` | CVS branch symbol, normalizes to `1.4.2` |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A parsed revision or branch number such as `1.2` or `1.2.4.1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RevisionNumber(Vec<u32>);

impl RevisionNumber {
    pub fn new(components: Vec<u32>) -> Self {
        Self(components)
    }

    /// Parse a dotted number. Returns `None` on empty input, empty
    /// components, or non-numeric components.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        let mut parts = Vec::new();
        for part in s.split('.') {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            parts.push(part.parse::<u32>().ok()?);
        }
        Some(Self(parts))
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> u32 {
        self.0.last().copied().unwrap_or(0)
    }

    /// A revision (as opposed to a branch number) has an even number of
    /// components.
    pub fn is_revision(&self) -> bool {
        !self.0.is_empty() && self.0.len() % 2 == 0
    }

    pub fn is_trunk(&self) -> bool {
        self.0.len() == 2
    }

    /// CVS stores branch symbols as `x.y.0.z`.
    pub fn is_magic_branch(&self) -> bool {
        let n = self.0.len();
        n >= 4 && n % 2 == 0 && self.0[n - 2] == 0
    }

    /// Branch-number symbols are either odd-length (`1.1.1`) or magic.
    pub fn is_branch_symbol(&self) -> bool {
        self.0.len() % 2 == 1 || self.is_magic_branch()
    }

    /// Turn a magic branch number `1.2.0.4` into `1.2.4`. Other numbers are
    /// returned unchanged.
    pub fn normalize_branch(&self) -> RevisionNumber {
        if self.is_magic_branch() {
            let n = self.0.len();
            let mut parts = self.0[..n - 2].to_vec();
            parts.push(self.0[n - 1]);
            RevisionNumber(parts)
        } else {
            self.clone()
        }
    }

    /// The branch a revision lives on: `1.2` → `1`, `1.2.4.1` → `1.2.4`.
    pub fn branch(&self) -> Option<RevisionNumber> {
        if self.0.len() < 2 {
            return None;
        }
        Some(RevisionNumber(self.0[..self.0.len() - 1].to_vec()))
    }

    /// The revision a branch forks from: `1.2.4.1` → `1.2`, `1.2.4` → `1.2`.
    /// Trunk revisions have no branch point.
    pub fn branch_point(&self) -> Option<RevisionNumber> {
        let n = self.0.len();
        if self.is_revision() {
            if n < 4 {
                return None;
            }
            Some(RevisionNumber(self.0[..n - 2].to_vec()))
        } else {
            if n < 3 {
                return None;
            }
            Some(RevisionNumber(self.0[..n - 1].to_vec()))
        }
    }

    /// The number with its last component replaced.
    pub fn with_last(&self, last: u32) -> RevisionNumber {
        let mut parts = self.0.clone();
        if let Some(slot) = parts.last_mut() {
            *slot = last;
        }
        RevisionNumber(parts)
    }

    /// Append a component, e.g. branch `1.2.4` + `1` → revision `1.2.4.1`.
    pub fn child(&self, component: u32) -> RevisionNumber {
        let mut parts = self.0.clone();
        parts.push(component);
        RevisionNumber(parts)
    }

    /// True when `self` lies on `branch` (a branch number).
    pub fn is_on_branch(&self, branch: &RevisionNumber) -> bool {
        self.0.len() == branch.0.len() + 1 && self.0.starts_with(&branch.0)
    }
}

impl fmt::Display for RevisionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

impl FromStr for RevisionNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RevisionNumber::parse(s).ok_or_else(|| format!("invalid revision number: '{}'", s))
    }
}

#[cfg(test)]
pub(crate) fn rev(s: &str) -> RevisionNumber {
    RevisionNumber::parse(s).unwrap_or_else(|| RevisionNumber(Vec::new()))
}
