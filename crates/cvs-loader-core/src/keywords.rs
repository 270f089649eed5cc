//! RCS keyword substitution.
//!
//! Recognizes `$Keyword$` and already-expanded `$Keyword: value $` forms
//! on a single line and rewrites them for the revision being
//! materialized. `$Log$` is left untouched because its expansion would
//! splice log history into the file body.

use chrono::{DateTime, Utc};

use crate::models::{ExpandMode, FileHistory, RevisionRecord};
use crate::revnum::RevisionNumber;

const KEYWORDS: &[&str] = &[
    "Author", "Date", "Header", "Id", "Locker", "Name", "RCSfile", "Revision", "Source", "State",
];

/// Values substituted into keywords for one revision.
#[derive(Debug, Clone)]
pub struct KeywordContext<'a> {
    pub rcs_filename: String,
    /// Full repository path of the RCS file, used by `$Header$`/`$Source$`.
    pub source_path: String,
    pub revision: &'a RevisionNumber,
    pub timestamp: DateTime<Utc>,
    pub author: &'a str,
    pub state: &'a str,
    pub locker: Option<&'a str>,
    pub name: Option<&'a str>,
}

impl<'a> KeywordContext<'a> {
    /// Build the context for `record` of `history`. `repository_root` is the
    /// directory the logical path is relative to (e.g. `/cvsroot/module`).
    pub fn for_revision(history: &'a FileHistory, record: &'a RevisionRecord, repository_root: &str) -> Self {
        let rcs_filename = history.rcs_filename();
        let mut source_path = String::new();
        if !repository_root.is_empty() {
            source_path.push_str(repository_root.trim_end_matches('/'));
            source_path.push('/');
        }
        source_path.push_str(&history.path);
        source_path.push_str(",v");
        Self {
            rcs_filename,
            source_path,
            revision: &record.number,
            timestamp: record.timestamp,
            author: &record.author,
            state: &record.state_label,
            locker: history.locker_of(&record.number),
            name: history.tag_for(&record.number),
        }
    }

    fn date(&self) -> String {
        self.timestamp.format("%Y/%m/%d %H:%M:%S").to_string()
    }

    fn id_line(&self, file: &str, with_locker: bool) -> String {
        let mut s = format!(
            "{} {} {} {} {}",
            file,
            self.revision,
            self.date(),
            self.author,
            self.state
        );
        if with_locker {
            if let Some(locker) = self.locker {
                s.push(' ');
                s.push_str(locker);
            }
        }
        s
    }

    fn value(&self, keyword: &str, mode: ExpandMode) -> String {
        let with_locker = mode == ExpandMode::Kkv;
        match keyword {
            "Author" => self.author.to_string(),
            "Date" => self.date(),
            "Header" => self.id_line(&self.source_path, with_locker),
            "Id" => self.id_line(&self.rcs_filename, with_locker),
            "Locker" => self.locker.unwrap_or_default().to_string(),
            "Name" => self.name.unwrap_or_default().to_string(),
            "RCSfile" => self.rcs_filename.clone(),
            "Revision" => self.revision.to_string(),
            "Source" => self.source_path.clone(),
            "State" => self.state.to_string(),
            _ => String::new(),
        }
    }
}

/// Expand every recognized keyword of `text` according to `mode`.
pub fn expand_keywords(text: &[u8], mode: ExpandMode, ctx: &KeywordContext<'_>) -> Vec<u8> {
    if mode.is_verbatim() || !text.contains(&b'$') {
        return text.to_vec();
    }
    let mut out = Vec::with_capacity(text.len() + 64);
    let mut i = 0;
    while i < text.len() {
        if text[i] != b'$' {
            out.push(text[i]);
            i += 1;
            continue;
        }
        match scan_keyword(text, i) {
            Some((keyword, end)) => {
                match mode {
                    ExpandMode::K => {
                        out.push(b'$');
                        out.extend_from_slice(keyword.as_bytes());
                        out.push(b'$');
                    }
                    ExpandMode::V => out.extend_from_slice(ctx.value(keyword, mode).as_bytes()),
                    _ => {
                        let value = ctx.value(keyword, mode);
                        out.push(b'$');
                        out.extend_from_slice(keyword.as_bytes());
                        out.extend_from_slice(b": ");
                        out.extend_from_slice(value.as_bytes());
                        out.extend_from_slice(b" $");
                    }
                }
                i = end;
            }
            None => {
                out.push(b'$');
                i += 1;
            }
        }
    }
    out
}

/// At `text[start] == '$'`, recognize a keyword. Returns the keyword and the
/// index just past its closing `$`.
fn scan_keyword(text: &[u8], start: usize) -> Option<(&'static str, usize)> {
    let mut j = start + 1;
    while j < text.len() && text[j].is_ascii_alphabetic() {
        j += 1;
    }
    let word = std::str::from_utf8(&text[start + 1..j]).ok()?;
    let keyword = KEYWORDS.iter().copied().find(|k| *k == word)?;
    match text.get(j)? {
        b'$' => Some((keyword, j + 1)),
        b':' => {
            let rest = &text[j + 1..];
            let close = rest.iter().position(|b| *b == b'$' || *b == b'\n')?;
            if rest[close] != b'$' {
                return None;
            }
            Some((keyword, j + 1 + close + 1))
        }
        _ => None,
    }
}
