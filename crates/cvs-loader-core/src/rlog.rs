//! Parser for `rlog` transcripts as served by a CVS server.
//!
//! A transcript holds one block per RCS file: a header (`RCS file:`,
//! `head:`, `symbolic names:` ...), then revision entries separated by a
//! line of 28 dashes, and a closing line of 77 equals signs. The resulting
//! [`FileHistory`] has no delta payloads; parents are derived from revision
//! numbers.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::delta::split_lines;
use crate::errors::MalformedRevisionFile;
use crate::models::{logical_path, ExpandMode, FileHistory, RevisionRecord, RevisionState};
use crate::revnum::RevisionNumber;

pub const LOG_END_MARKER: &str =
    "=============================================================================";
pub const ENTRY_END_MARKER: &str = "----------------------------";

/// Split a multi-file transcript into per-file blocks. Each block ends
/// with (and includes) its `=` terminator line. Trailing text without a
/// terminator is returned as a final block so the caller can report it.
pub fn split_rlog(text: &[u8]) -> Vec<&[u8]> {
    let mut blocks = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in split_lines(text) {
        offset += line.len();
        if trim_eol(line) == LOG_END_MARKER.as_bytes() {
            blocks.push(&text[start..offset]);
            start = offset;
        }
    }
    if text[start..].iter().any(|b| !b.is_ascii_whitespace()) {
        blocks.push(&text[start..]);
    }
    blocks
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parse an rlog date: `YYYY/MM/DD HH:MM:SS` (UTC) or
/// `YYYY-MM-DD HH:MM:SS ±ZZZZ`.
pub fn parse_rlog_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.contains('/') {
        // Old servers print two-digit years, which belong to the 1900s.
        let full = match s.split_once('/') {
            Some((year, rest)) if year.len() == 2 => format!("19{}/{}", year, rest),
            _ => s.to_string(),
        };
        return NaiveDateTime::parse_from_str(&full, "%Y/%m/%d %H:%M:%S")
            .ok()
            .map(|dt| dt.and_utc());
    }
    DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

enum HeaderList {
    None,
    Symbols,
    Locks,
    Access,
}

/// Parse one file block. `module_root` is the repository directory of the
/// module (`/cvsroot/module`); the `RCS file:` path is made relative to it.
pub fn parse_rlog_file(block: &[u8], module_root: &str) -> Result<FileHistory, MalformedRevisionFile> {
    let lines = split_lines(block);
    let mut offsets = Vec::with_capacity(lines.len());
    let mut acc = 0;
    for l in &lines {
        offsets.push(acc);
        acc += l.len();
    }
    let text = |i: usize| String::from_utf8_lossy(trim_eol(lines[i])).into_owned();

    let mut rcs_file: Option<String> = None;
    let err = |i: usize, expected: &str, rcs_file: &Option<String>| MalformedRevisionFile {
        path: rcs_file.clone().unwrap_or_else(|| "<rlog>".to_string()),
        offset: offsets.get(i).copied().unwrap_or(acc),
        expected: expected.to_string(),
    };

    let mut head = None;
    let mut default_branch = None;
    let mut symbols = BTreeMap::new();
    let mut locks = BTreeMap::new();
    let mut access = Vec::new();
    let mut expand = ExpandMode::Kv;
    let mut description = String::new();
    let mut list = HeaderList::None;

    let mut i = 0;
    // Header.
    loop {
        if i >= lines.len() {
            return Err(err(i, "revision entries or terminator", &rcs_file));
        }
        let line = text(i);
        if line.starts_with('\t') || (line.starts_with(' ') && !matches!(list, HeaderList::None)) {
            let item = line.trim();
            match list {
                HeaderList::Symbols | HeaderList::Locks => {
                    let (name, num) = item
                        .rsplit_once(':')
                        .ok_or_else(|| err(i, "'name: revision'", &rcs_file))?;
                    let number = RevisionNumber::parse(num)
                        .ok_or_else(|| err(i, "revision number", &rcs_file))?;
                    if matches!(list, HeaderList::Symbols) {
                        symbols.insert(name.trim().to_string(), number);
                    } else {
                        locks.insert(name.trim().to_string(), number);
                    }
                }
                HeaderList::Access => access.push(item.to_string()),
                HeaderList::None => {}
            }
            i += 1;
            continue;
        }
        list = HeaderList::None;

        if line == ENTRY_END_MARKER || line == LOG_END_MARKER {
            break;
        }
        if let Some(v) = line.strip_prefix("RCS file:") {
            rcs_file = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("head:") {
            head = RevisionNumber::parse(v);
        } else if let Some(v) = line.strip_prefix("branch:") {
            default_branch = RevisionNumber::parse(v);
        } else if line.starts_with("locks:") {
            list = HeaderList::Locks;
        } else if line.starts_with("access list:") {
            list = HeaderList::Access;
        } else if line.starts_with("symbolic names:") {
            list = HeaderList::Symbols;
        } else if let Some(v) = line.strip_prefix("keyword substitution:") {
            expand = ExpandMode::parse(v).unwrap_or_default();
        } else if line.starts_with("description:") {
            let mut desc = Vec::new();
            i += 1;
            while i < lines.len() {
                let l = text(i);
                if l == ENTRY_END_MARKER || l == LOG_END_MARKER {
                    break;
                }
                desc.push(l);
                i += 1;
            }
            description = desc.join("\n");
            continue;
        } else if rcs_file.is_none() && !line.trim().is_empty() && !line.starts_with("Working file:") {
            // rlog error lines ("rlog: foo,v: No such file") come before any header.
            return Err(err(i, "'RCS file:' header", &rcs_file));
        }
        i += 1;
    }

    let rcs_path = rcs_file.clone().ok_or_else(|| err(0, "'RCS file:' header", &rcs_file))?;
    let relative = rcs_path
        .strip_prefix(module_root.trim_end_matches('/'))
        .unwrap_or(&rcs_path);
    let (path, deleted) =
        logical_path(relative).ok_or_else(|| err(0, "RCS file path ending in ',v'", &rcs_file))?;

    // Entries.
    let mut records = Vec::new();
    while i < lines.len() && text(i) == ENTRY_END_MARKER {
        i += 1;
        let rev_line = text(i.min(lines.len().saturating_sub(1)));
        let number = rev_line
            .strip_prefix("revision")
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(RevisionNumber::parse)
            .ok_or_else(|| err(i, "'revision N'", &rcs_file))?;
        i += 1;
        if i >= lines.len() {
            return Err(err(i, "'date:' line", &rcs_file));
        }
        let info = parse_info_line(&text(i)).ok_or_else(|| err(i, "'date: ...; author: ...; state: ...;'", &rcs_file))?;
        i += 1;

        let mut message: Vec<u8> = Vec::new();
        let mut first = true;
        while i < lines.len() {
            let raw = lines[i];
            let l = trim_eol(raw);
            if l == ENTRY_END_MARKER.as_bytes() || l == LOG_END_MARKER.as_bytes() {
                break;
            }
            if first && l.starts_with(b"branches:") {
                i += 1;
                first = false;
                continue;
            }
            first = false;
            message.extend_from_slice(l);
            message.push(b'\n');
            i += 1;
        }

        records.push(RevisionRecord {
            state: RevisionState::from_rcs(&info.state),
            state_label: info.state,
            number,
            author: info.author,
            message: String::from_utf8_lossy(&message).into_owned(),
            timestamp: info.date,
            delta: None,
            next: None,
            branches: Vec::new(),
            commitid: info.commitid,
            symbols: Vec::new(),
        });
    }

    if i >= lines.len() || text(i) != LOG_END_MARKER {
        return Err(err(i, "'=' terminator line", &rcs_file));
    }

    Ok(FileHistory::assemble(
        path,
        deleted,
        head,
        default_branch,
        expand,
        access,
        locks,
        None,
        description,
        symbols,
        records,
    ))
}

struct InfoLine {
    date: DateTime<Utc>,
    author: String,
    state: String,
    commitid: Option<String>,
}

fn parse_info_line(line: &str) -> Option<InfoLine> {
    let mut date = None;
    let mut author = None;
    let mut state = None;
    let mut commitid = None;
    for field in line.split(';') {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "date" => date = parse_rlog_date(value),
            "author" => author = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            "commitid" => commitid = Some(value.to_string()),
            _ => {}
        }
    }
    Some(InfoLine {
        date: date?,
        author: author?,
        state: state?,
        commitid,
    })
}
