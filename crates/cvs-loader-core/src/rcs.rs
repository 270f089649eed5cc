//! RCS `,v` file parser.
//!
//! Decodes the four sections of a revision file (admin, delta, `desc`,
//! deltatext) into a [`FileHistory`]. Deltas are kept as opaque bytes;
//! nothing here reconstructs file contents (see [`crate::content`]).
//!
//! Unknown phrases ("newphrases" in `rcsfile(5)`) are skipped in every
//! section, which covers CVSNT extensions such as `deltatype` and
//! `kopt`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::errors::MalformedRevisionFile;
use crate::models::{DeltaFormat, DeltaText, ExpandMode, FileHistory, RevisionRecord, RevisionState};
use crate::revnum::RevisionNumber;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Str(Vec<u8>),
    Colon,
    Semi,
}

struct Lexer<'a> {
    path: &'a str,
    buf: &'a [u8],
    pos: usize,
    peeked: Option<(usize, Token)>,
}

impl<'a> Lexer<'a> {
    fn new(path: &'a str, buf: &'a [u8]) -> Self {
        Self {
            path,
            buf,
            pos: 0,
            peeked: None,
        }
    }

    fn error(&self, offset: usize, expected: &str) -> MalformedRevisionFile {
        MalformedRevisionFile {
            path: self.path.to_string(),
            offset,
            expected: expected.to_string(),
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.buf.len() && self.buf[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn lex(&mut self) -> Result<Option<(usize, Token)>, MalformedRevisionFile> {
        self.skip_ws();
        let start = self.pos;
        let Some(&c) = self.buf.get(self.pos) else {
            return Ok(None);
        };
        match c {
            b':' => {
                self.pos += 1;
                Ok(Some((start, Token::Colon)))
            }
            b';' => {
                self.pos += 1;
                Ok(Some((start, Token::Semi)))
            }
            b'@' => {
                self.pos += 1;
                let mut out = Vec::new();
                loop {
                    match self.buf.get(self.pos) {
                        None => return Err(self.error(start, "closing '@'")),
                        Some(b'@') => {
                            if self.buf.get(self.pos + 1) == Some(&b'@') {
                                out.push(b'@');
                                self.pos += 2;
                            } else {
                                self.pos += 1;
                                break;
                            }
                        }
                        Some(&b) => {
                            out.push(b);
                            self.pos += 1;
                        }
                    }
                }
                Ok(Some((start, Token::Str(out))))
            }
            _ => {
                while let Some(&b) = self.buf.get(self.pos) {
                    if b.is_ascii_whitespace() || b == b':' || b == b';' || b == b'@' {
                        break;
                    }
                    self.pos += 1;
                }
                let word = String::from_utf8_lossy(&self.buf[start..self.pos]).into_owned();
                Ok(Some((start, Token::Word(word))))
            }
        }
    }

    fn peek(&mut self) -> Result<Option<&Token>, MalformedRevisionFile> {
        if self.peeked.is_none() {
            self.peeked = self.lex()?;
        }
        Ok(self.peeked.as_ref().map(|(_, t)| t))
    }

    fn next(&mut self) -> Result<Option<(usize, Token)>, MalformedRevisionFile> {
        match self.peeked.take() {
            Some(t) => Ok(Some(t)),
            None => self.lex(),
        }
    }

    fn offset(&self) -> usize {
        match &self.peeked {
            Some((off, _)) => *off,
            None => self.pos,
        }
    }

    fn expect_word(&mut self, what: &str) -> Result<(usize, String), MalformedRevisionFile> {
        let off = self.offset();
        match self.next()? {
            Some((off, Token::Word(w))) => Ok((off, w)),
            _ => Err(self.error(off, what)),
        }
    }

    fn expect_string(&mut self, what: &str) -> Result<Vec<u8>, MalformedRevisionFile> {
        let off = self.offset();
        match self.next()? {
            Some((_, Token::Str(s))) => Ok(s),
            _ => Err(self.error(off, what)),
        }
    }

    fn expect_semi(&mut self) -> Result<(), MalformedRevisionFile> {
        let off = self.offset();
        match self.next()? {
            Some((_, Token::Semi)) => Ok(()),
            _ => Err(self.error(off, "';'")),
        }
    }

    fn expect_colon(&mut self) -> Result<(), MalformedRevisionFile> {
        let off = self.offset();
        match self.next()? {
            Some((_, Token::Colon)) => Ok(()),
            _ => Err(self.error(off, "':'")),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), MalformedRevisionFile> {
        let off = self.offset();
        match self.next()? {
            Some((_, Token::Word(w))) if w == keyword => Ok(()),
            _ => Err(self.error(off, &format!("'{}'", keyword))),
        }
    }

    /// Words up to the terminating `;` (consumed).
    fn words_until_semi(&mut self) -> Result<Vec<(usize, String)>, MalformedRevisionFile> {
        let mut words = Vec::new();
        loop {
            let off = self.offset();
            match self.next()? {
                Some((_, Token::Semi)) => return Ok(words),
                Some((off, Token::Word(w))) => words.push((off, w)),
                _ => return Err(self.error(off, "word or ';'")),
            }
        }
    }

    /// Optional single string followed by `;`.
    fn opt_string_semi(&mut self) -> Result<Option<Vec<u8>>, MalformedRevisionFile> {
        let value = match self.peek()? {
            Some(Token::Str(_)) => match self.next()? {
                Some((_, Token::Str(s))) => Some(s),
                _ => None,
            },
            _ => None,
        };
        self.expect_semi()?;
        Ok(value)
    }

    /// Skip an unknown phrase body through its `;`.
    fn skip_phrase(&mut self) -> Result<(), MalformedRevisionFile> {
        loop {
            let off = self.offset();
            match self.next()? {
                Some((_, Token::Semi)) => return Ok(()),
                Some(_) => continue,
                None => return Err(self.error(off, "';'")),
            }
        }
    }
}

fn parse_num(lx: &Lexer<'_>, off: usize, word: &str) -> Result<RevisionNumber, MalformedRevisionFile> {
    RevisionNumber::parse(word).ok_or_else(|| lx.error(off, "revision number"))
}

fn is_num(word: &str) -> bool {
    !word.is_empty() && word.bytes().all(|b| b.is_ascii_digit() || b == b'.')
}

/// Parse an RCS date `YY.MM.DD.hh.mm.ss` or `YYYY.MM.DD.hh.mm.ss` (UTC).
/// Two-digit years belong to the 1900s.
pub fn parse_rcs_date(s: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 6 {
        return None;
    }
    let mut nums = [0u32; 6];
    for (slot, part) in nums.iter_mut().zip(&parts) {
        *slot = part.parse().ok()?;
    }
    let year = if parts[0].len() == 2 {
        1900 + nums[0] as i32
    } else {
        nums[0] as i32
    };
    let dt = NaiveDate::from_ymd_opt(year, nums[1], nums[2])?.and_hms_opt(nums[3], nums[4], nums[5])?;
    Some(dt.and_utc())
}

struct DeltaNode {
    number: RevisionNumber,
    date: DateTime<Utc>,
    author: String,
    state: String,
    branches: Vec<RevisionNumber>,
    next: Option<RevisionNumber>,
    commitid: Option<String>,
}

/// Parse one revision file. `path` is the logical path used in errors and
/// in the resulting history; `deleted` marks files found in the Attic.
pub fn parse_rcs(path: &str, bytes: &[u8], deleted: bool) -> Result<FileHistory, MalformedRevisionFile> {
    let mut lx = Lexer::new(path, bytes);

    let mut head = None;
    let mut default_branch = None;
    let mut access = Vec::new();
    let mut symbols = BTreeMap::new();
    let mut locks = BTreeMap::new();
    let mut comment = None;
    let mut expand = ExpandMode::Kv;

    // Admin section. Ends at the first revision number or `desc`.
    let (first_off, first) = lx.expect_word("'head'")?;
    if first != "head" {
        return Err(lx.error(first_off, "'head'"));
    }
    let words = lx.words_until_semi()?;
    if let Some((off, w)) = words.first() {
        head = Some(parse_num(&lx, *off, w)?);
    }

    let mut pending: Option<(usize, String)> = None;
    loop {
        let (off, word) = match lx.peek()? {
            Some(Token::Word(_)) => lx.expect_word("keyword")?,
            _ => return Err(lx.error(lx.offset(), "admin keyword")),
        };
        if is_num(&word) || word == "desc" {
            pending = Some((off, word));
            break;
        }
        match word.as_str() {
            "branch" => {
                if let Some((off, w)) = lx.words_until_semi()?.first() {
                    default_branch = Some(parse_num(&lx, *off, w)?);
                }
            }
            "access" => {
                access = lx.words_until_semi()?.into_iter().map(|(_, w)| w).collect();
            }
            "symbols" => loop {
                let off = lx.offset();
                match lx.next()? {
                    Some((_, Token::Semi)) => break,
                    Some((_, Token::Word(name))) => {
                        lx.expect_colon()?;
                        let (noff, num) = lx.expect_word("revision number")?;
                        symbols.insert(name, parse_num(&lx, noff, &num)?);
                    }
                    _ => return Err(lx.error(off, "symbol or ';'")),
                }
            },
            "locks" => {
                loop {
                    let off = lx.offset();
                    match lx.next()? {
                        Some((_, Token::Semi)) => break,
                        Some((_, Token::Word(who))) => {
                            lx.expect_colon()?;
                            let (noff, num) = lx.expect_word("revision number")?;
                            locks.insert(who, parse_num(&lx, noff, &num)?);
                        }
                        _ => return Err(lx.error(off, "locker or ';'")),
                    }
                }
                if let Some(Token::Word(w)) = lx.peek()? {
                    if w == "strict" {
                        lx.next()?;
                        lx.expect_semi()?;
                    }
                }
            }
            "strict" => lx.expect_semi()?,
            "comment" => {
                comment = lx
                    .opt_string_semi()?
                    .map(|s| String::from_utf8_lossy(&s).into_owned());
            }
            "expand" => {
                if let Some(s) = lx.opt_string_semi()? {
                    expand = ExpandMode::parse(&String::from_utf8_lossy(&s)).unwrap_or_default();
                }
            }
            _ => lx.skip_phrase()?,
        }
    }

    // Delta section.
    let mut nodes: Vec<DeltaNode> = Vec::new();
    loop {
        let (off, word) = match pending.take() {
            Some(p) => p,
            None => lx.expect_word("revision number or 'desc'")?,
        };
        if word == "desc" {
            break;
        }
        let number = parse_num(&lx, off, &word)?;
        if !number.is_revision() {
            return Err(lx.error(off, "revision number with an even number of components"));
        }

        let mut date = None;
        let mut author = String::new();
        let mut state = String::new();
        let mut branches = Vec::new();
        let mut next = None;
        let mut commitid = None;

        loop {
            let (koff, key) = lx.expect_word("delta keyword")?;
            if is_num(&key) || key == "desc" {
                pending = Some((koff, key));
                break;
            }
            match key.as_str() {
                "date" => {
                    let words = lx.words_until_semi()?;
                    let (doff, d) = words.first().ok_or_else(|| lx.error(koff, "date value"))?;
                    date = Some(parse_rcs_date(d).ok_or_else(|| lx.error(*doff, "date YY.MM.DD.hh.mm.ss"))?);
                }
                "author" => {
                    author = lx.words_until_semi()?.into_iter().map(|(_, w)| w).next().unwrap_or_default();
                }
                "state" => {
                    state = lx.words_until_semi()?.into_iter().map(|(_, w)| w).next().unwrap_or_default();
                }
                "branches" => {
                    for (boff, b) in lx.words_until_semi()? {
                        branches.push(parse_num(&lx, boff, &b)?);
                    }
                }
                "next" => {
                    if let Some((noff, n)) = lx.words_until_semi()?.first() {
                        next = Some(parse_num(&lx, *noff, n)?);
                    }
                }
                "commitid" => {
                    commitid = lx.words_until_semi()?.into_iter().map(|(_, w)| w).next();
                }
                _ => lx.skip_phrase()?,
            }
        }

        let date = date.ok_or_else(|| lx.error(off, "'date' in delta"))?;
        nodes.push(DeltaNode {
            number,
            date,
            author,
            state,
            branches,
            next,
            commitid,
        });
    }

    let description = String::from_utf8_lossy(&lx.expect_string("description string")?).into_owned();

    // Deltatext section.
    let mut texts: BTreeMap<RevisionNumber, (String, Vec<u8>)> = BTreeMap::new();
    while lx.peek()?.is_some() {
        let (off, word) = lx.expect_word("revision number")?;
        let number = parse_num(&lx, off, &word)?;
        lx.expect_keyword("log")?;
        let log = String::from_utf8_lossy(&lx.expect_string("log string")?).into_owned();
        loop {
            let (koff, key) = lx.expect_word("'text'")?;
            if key == "text" {
                break;
            }
            if is_num(&key) {
                return Err(lx.error(koff, "'text'"));
            }
            lx.skip_phrase()?;
        }
        let text = lx.expect_string("text string")?;
        texts.insert(number, (log, text));
    }

    let records = nodes
        .into_iter()
        .map(|node| {
            let (message, delta) = match texts.remove(&node.number) {
                Some((log, text)) => {
                    let format = if Some(&node.number) == head.as_ref() {
                        DeltaFormat::FullText
                    } else {
                        DeltaFormat::RcsDiff
                    };
                    (log, Some(DeltaText { format, bytes: text }))
                }
                None => (String::new(), None),
            };
            RevisionRecord {
                state: RevisionState::from_rcs(&node.state),
                state_label: node.state,
                number: node.number,
                author: node.author,
                message,
                timestamp: node.date,
                delta,
                next: node.next,
                branches: node.branches,
                commitid: node.commitid,
                symbols: Vec::new(),
            }
        })
        .collect();

    Ok(FileHistory::assemble(
        path.to_string(),
        deleted,
        head,
        default_branch,
        expand,
        access,
        locks,
        comment,
        description,
        symbols,
        records,
    ))
}
