//! Remote CVS session with reconnect-and-retry.
//!
//! One [`RemoteClient`] owns at most one live connection behind a mutex, so
//! only one request is ever outstanding. Transient faults (I/O errors,
//! dropped connections) discard the connection and the request is retried
//! on a fresh one with exponential backoff. A malformed response fails the
//! request; the client then reads up to the response terminator, or drops
//! the connection when it cannot find one, so the next request starts
//! clean.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use cvs_loader_core::revnum::RevisionNumber;

use crate::config::RemoteConfig;
use crate::cvsroot::{Method, OriginLocation};

use super::scramble::scramble;
use super::transport::Connection;
use super::{ProtocolError, VALID_RESPONSES};

/// Lines read while looking for a terminator before giving up on a session.
const RESYNC_LIMIT: usize = 100_000;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub max_retries: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub ssh_program: String,
    pub cvs_program: String,
    /// Used when the origin URL carries no password.
    pub password: Option<String>,
    /// Largest byte count accepted for one `Mbinary` or file transfer.
    pub max_transfer: u64,
}

impl ClientSettings {
    pub fn from_config(remote: &RemoteConfig, password: Option<String>) -> Self {
        Self {
            connect_timeout: remote.connect_timeout(),
            io_timeout: remote.io_timeout(),
            max_retries: remote.max_retries,
            backoff_initial: Duration::from_millis(remote.backoff_initial_ms),
            backoff_max: Duration::from_millis(remote.backoff_max_ms),
            ssh_program: remote.ssh_program.clone(),
            cvs_program: remote.cvs_program.clone(),
            password,
            max_transfer: remote.max_transfer_bytes,
        }
    }

    /// Delay before retry number `attempt` (1-based): doubling from the
    /// initial delay, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        self.backoff_initial.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Contents of one checked-out revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedOut {
    pub data: Vec<u8>,
    pub executable: bool,
}

pub struct RemoteClient {
    location: OriginLocation,
    settings: ClientSettings,
    session: Mutex<Option<Connection>>,
}

impl RemoteClient {
    pub fn new(location: OriginLocation, settings: ClientSettings) -> Self {
        Self {
            location,
            settings,
            session: Mutex::new(None),
        }
    }

    pub fn location(&self) -> &OriginLocation {
        &self.location
    }

    /// Connect, authenticate and handshake eagerly. Requests connect lazily
    /// anyway; this surfaces configuration problems before any work starts.
    pub fn connect(&self) -> Result<(), ProtocolError> {
        self.request("connect", |_| Ok(()))
    }

    /// RCS file paths of the module, relative to the module directory
    /// (`dir/file.c,v`, `dir/Attic/old.c,v`), sorted.
    pub fn list_files(&self) -> Result<Vec<String>, ProtocolError> {
        let request = format!(
            "Global_option -q\nArgument -R\nArgument --\nArgument {}\nrlog\n",
            self.location.module
        );
        let limit = self.settings.max_transfer;
        let output = self.request("rlog -R", |conn| {
            conn.write_all(request.as_bytes())?;
            read_text_response(conn, limit)
        })?;

        let prefix = format!("{}/", self.location.module_path());
        let mut files: Vec<String> = String::from_utf8_lossy(&output)
            .lines()
            .map(str::trim)
            .filter(|l| l.ends_with(",v"))
            .map(|l| l.strip_prefix(&prefix).unwrap_or(l).to_string())
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// `rlog` transcript of one file (by logical path) or, with `None`, of
    /// the whole module.
    pub fn fetch_rlog(&self, logical_path: Option<&str>) -> Result<Vec<u8>, ProtocolError> {
        let target = match logical_path {
            Some(p) => format!("{}/{}", self.location.module, p),
            None => self.location.module.clone(),
        };
        let request = format!("Global_option -q\nArgument --\nArgument {}\nrlog\n", target);
        let limit = self.settings.max_transfer;
        self.request("rlog", |conn| {
            conn.write_all(request.as_bytes())?;
            read_text_response(conn, limit)
        })
    }

    /// Unexpanded (`-kb`) contents of `revision` of a file.
    pub fn checkout(&self, logical_path: &str, revision: &RevisionNumber) -> Result<CheckedOut, ProtocolError> {
        let request = format!(
            "Directory .\n{root}\nGlobal_option -q\nArgument -r{rev}\nArgument -kb\nArgument --\nArgument {module}/{path}\nco\n",
            root = self.location.root,
            rev = revision,
            module = self.location.module,
            path = logical_path,
        );
        let what = format!("co {}", logical_path);
        let limit = self.settings.max_transfer;
        self.request(&what, |conn| {
            conn.write_all(request.as_bytes())?;
            read_checkout_response(conn, limit)
        })?
        .ok_or_else(|| ProtocolError::Server(format!("no content returned for {} {}", logical_path, revision)))
    }

    fn request<T>(
        &self,
        what: &str,
        mut op: impl FnMut(&mut Connection) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let mut last_err: Option<ProtocolError> = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let delay = self.settings.backoff(attempt);
                warn!(
                    request = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_err.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                    "retrying remote request"
                );
                std::thread::sleep(delay);
            }

            if guard.is_none() {
                match self.open() {
                    Ok(conn) => *guard = Some(conn),
                    Err(e) if e.is_transient() => {
                        last_err = Some(e);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            let Some(conn) = guard.as_mut() else {
                continue;
            };

            match op(conn) {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() => {
                    *guard = None;
                    last_err = Some(e);
                }
                Err(e @ ProtocolError::Malformed(_)) => {
                    if !resync(conn) {
                        debug!(request = what, "no response terminator found, dropping connection");
                        *guard = None;
                    }
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProtocolError::Exhausted {
            attempts: self.settings.max_retries + 1,
            last: last_err.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    fn open(&self) -> Result<Connection, ProtocolError> {
        let loc = &self.location;
        let host = loc.host.clone().unwrap_or_default();
        let mut conn = match loc.method {
            Method::Pserver => {
                let mut conn = Connection::tcp(
                    &host,
                    loc.port_or_default(),
                    self.settings.connect_timeout,
                    self.settings.io_timeout,
                )?;
                self.authenticate(&mut conn, &host)?;
                conn
            }
            Method::Ssh => {
                let mut args = Vec::new();
                if let Some(user) = &loc.user {
                    args.extend(["-l".to_string(), user.clone()]);
                }
                if let Some(port) = loc.port {
                    args.extend(["-p".to_string(), port.to_string()]);
                }
                args.extend([
                    "-o".to_string(),
                    "StrictHostKeyChecking=accept-new".to_string(),
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    "-o".to_string(),
                    format!("ConnectTimeout={}", self.settings.connect_timeout.as_secs().max(1)),
                    "--".to_string(),
                    host.clone(),
                    "cvs".to_string(),
                    "server".to_string(),
                ]);
                Connection::process(&self.settings.ssh_program, &args, self.settings.io_timeout)?
            }
            Method::Fork => Connection::process(
                &self.settings.cvs_program,
                &["server".to_string()],
                self.settings.io_timeout,
            )?,
            Method::Local | Method::Rsync => {
                return Err(ProtocolError::Server(
                    "local and rsync origins are read from disk, not through a cvs server".into(),
                ))
            }
        };
        handshake(&mut conn, &loc.root)?;
        debug!(method = %loc.method, root = %loc.root, "cvs session established");
        Ok(conn)
    }

    fn authenticate(&self, conn: &mut Connection, host: &str) -> Result<(), ProtocolError> {
        let loc = &self.location;
        let password = loc
            .password
            .as_deref()
            .or(self.settings.password.as_deref())
            .unwrap_or("");
        let mut request = format!("BEGIN AUTH REQUEST\n{}\n{}\n", loc.root, loc.user_or_anonymous()).into_bytes();
        request.extend(scramble(password));
        request.extend_from_slice(b"\nEND AUTH REQUEST\n");
        conn.write_all(&request)?;

        let mut detail = String::new();
        loop {
            let line = conn.expect_line()?;
            match line.as_slice() {
                b"I LOVE YOU\n" => return Ok(()),
                b"I HATE YOU\n" => {
                    return Err(ProtocolError::AuthRejected {
                        host: host.to_string(),
                        reason: "bad user name or password".into(),
                    })
                }
                l if l.starts_with(b"E ") => detail.push_str(String::from_utf8_lossy(&l[2..]).trim_end()),
                l if l.starts_with(b"error") => {
                    detail.push_str(String::from_utf8_lossy(&l[5..]).trim());
                    return Err(ProtocolError::AuthRejected {
                        host: host.to_string(),
                        reason: detail,
                    });
                }
                l => {
                    return Err(ProtocolError::Malformed(format!(
                        "unexpected authentication reply: {}",
                        String::from_utf8_lossy(l).trim_end()
                    )))
                }
            }
        }
    }
}

fn handshake(conn: &mut Connection, root: &str) -> Result<(), ProtocolError> {
    let request = format!(
        "Root {}\nValid-responses {}\nvalid-requests\nUseUnchanged\n",
        root,
        VALID_RESPONSES.join(" ")
    );
    conn.write_all(request.as_bytes())?;

    let line = conn.expect_line()?;
    if line.starts_with(b"error") {
        return Err(ProtocolError::Server(String::from_utf8_lossy(&line).trim_end().to_string()));
    }
    if !line.starts_with(b"Valid-requests ") {
        return Err(ProtocolError::Malformed(format!(
            "expected Valid-requests, got: {}",
            String::from_utf8_lossy(&line).trim_end()
        )));
    }
    let line = conn.expect_line()?;
    if line != b"ok\n" {
        return Err(ProtocolError::Malformed(format!(
            "expected ok after Valid-requests, got: {}",
            String::from_utf8_lossy(&line).trim_end()
        )));
    }
    Ok(())
}

/// Server-side error: the `E` lines seen so far plus the `error` line.
fn server_error(stderr: &str, line: &[u8]) -> ProtocolError {
    let tail = String::from_utf8_lossy(&line[5.min(line.len())..]).trim().to_string();
    let msg = match (stderr.is_empty(), tail.is_empty()) {
        (true, _) => tail,
        (false, true) => stderr.to_string(),
        (false, false) => format!("{} ({})", stderr, tail),
    };
    ProtocolError::Server(msg)
}

fn malformed(line: &[u8]) -> ProtocolError {
    ProtocolError::Malformed(String::from_utf8_lossy(line).trim_end().to_string())
}

/// Collect the `M`/`MT`/`Mbinary` output of a request up to `ok`.
fn read_text_response(conn: &mut Connection, limit: u64) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    let mut stderr = String::new();
    loop {
        let line = conn.expect_line()?;
        let l = line.as_slice();
        if l == b"ok\n" {
            return Ok(out);
        } else if l.starts_with(b"error") {
            return Err(server_error(&stderr, l));
        } else if let Some(rest) = l.strip_prefix(b"M ") {
            out.extend_from_slice(rest);
        } else if l == b"M\n" {
            out.push(b'\n');
        } else if let Some(rest) = l.strip_prefix(b"MT ") {
            append_tagged_text(&mut out, rest);
        } else if let Some(rest) = l.strip_prefix(b"E ") {
            stderr.push_str(String::from_utf8_lossy(rest).trim_end());
        } else if l == b"Mbinary\n" {
            let len = read_length(conn, limit)?;
            out.extend(conn.read_exact(len)?);
        } else if l.starts_with(b"F ") || l == b"F\n" || l == b"E\n" {
            continue;
        } else {
            return Err(malformed(l));
        }
    }
}

/// `MT tagname [text]`: `newline` ends the line, `+x`/`-x` tags only
/// bracket groups, anything else contributes its text.
fn append_tagged_text(out: &mut Vec<u8>, rest: &[u8]) {
    let rest = rest.strip_suffix(b"\n").unwrap_or(rest);
    let (tag, text) = match rest.iter().position(|b| *b == b' ') {
        Some(i) => (&rest[..i], &rest[i + 1..]),
        None => (rest, &[][..]),
    };
    if tag == b"newline" {
        out.push(b'\n');
    } else if !tag.starts_with(b"+") && !tag.starts_with(b"-") {
        out.extend_from_slice(text);
    }
}

/// Byte count line preceding a transfer, at most `limit`.
fn read_length(conn: &mut Connection, limit: u64) -> Result<u64, ProtocolError> {
    let line = conn.expect_line()?;
    let text = String::from_utf8_lossy(&line);
    let len = text
        .trim()
        .parse::<u64>()
        .map_err(|_| ProtocolError::Malformed(format!("bad byte count: {}", text.trim_end())))?;
    if len > limit {
        return Err(ProtocolError::Malformed(format!(
            "byte count {} exceeds the transfer limit of {}",
            len, limit
        )));
    }
    Ok(len)
}

/// Parse the reply to `co`: an `Updated`/`Created`/`Update-existing`
/// block (directory, repository path, entries line, mode line, byte
/// count, bytes) followed by `ok`.
fn read_checkout_response(conn: &mut Connection, limit: u64) -> Result<Option<CheckedOut>, ProtocolError> {
    let mut result = None;
    let mut stderr = String::new();
    loop {
        let line = conn.expect_line()?;
        let l = line.as_slice();
        if l == b"ok\n" {
            return Ok(result);
        } else if l.starts_with(b"error") {
            return Err(server_error(&stderr, l));
        } else if l.starts_with(b"Created ") || l.starts_with(b"Updated ") || l.starts_with(b"Update-existing ") {
            let _repository = conn.expect_line()?;
            let entry = conn.expect_line()?;
            if !entry.starts_with(b"/") {
                return Err(malformed(&entry));
            }
            let mode = conn.expect_line()?;
            if !mode.starts_with(b"u=") {
                return Err(malformed(&mode));
            }
            let executable = String::from_utf8_lossy(&mode)
                .split(',')
                .find(|p| p.starts_with("u="))
                .map(|p| p.contains('x'))
                .unwrap_or(false);
            let len = read_length(conn, limit)?;
            let data = conn.read_exact(len)?;
            result = Some(CheckedOut { data, executable });
        } else if let Some(rest) = l.strip_prefix(b"E ") {
            stderr.push_str(String::from_utf8_lossy(rest).trim_end());
        } else if l.starts_with(b"M ")
            || l == b"M\n"
            || l.starts_with(b"MT ")
            || l.starts_with(b"Checksum ")
            || l.starts_with(b"Mode ")
            || l.starts_with(b"F ")
            || l == b"F\n"
            || l == b"E\n"
        {
            continue;
        } else {
            return Err(malformed(l));
        }
    }
}

/// Skip to the end of the current response. `true` when a terminator was
/// found and the connection can be reused.
fn resync(conn: &mut Connection) -> bool {
    for _ in 0..RESYNC_LIMIT {
        match conn.read_line() {
            Ok(Some(line)) if line == b"ok\n" || line.starts_with(b"error") => return true,
            Ok(Some(_)) => continue,
            _ => return false,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ClientSettings {
        ClientSettings::from_config(&RemoteConfig::default(), None)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let s = ClientSettings {
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_millis(500),
            ..settings()
        };
        assert_eq!(s.backoff(1), Duration::from_millis(100));
        assert_eq!(s.backoff(2), Duration::from_millis(200));
        assert_eq!(s.backoff(3), Duration::from_millis(400));
        assert_eq!(s.backoff(4), Duration::from_millis(500));
        assert_eq!(s.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_tagged_text() {
        let mut out = Vec::new();
        append_tagged_text(&mut out, b"text hello\n");
        append_tagged_text(&mut out, b"+updated\n");
        append_tagged_text(&mut out, b"date 2001/02/03 04:05:06\n");
        append_tagged_text(&mut out, b"newline\n");
        assert_eq!(out, b"hello2001/02/03 04:05:06\n");
    }
}
