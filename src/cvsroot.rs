//! Origin URL and CVSROOT parsing.
//!
//! Accepted forms:
//!
//! | Form | Access |
//! |------|--------|
//! | `/cvsroot/module`, `file:///cvsroot/module` | local `,v` files |
//! | `pserver://[user[:password]@]host[:port]/cvsroot/module` | pserver over TCP |
//! | `ssh://[user@]host[:port]/cvsroot/module` | `cvs server` over ssh |
//! | `local:///cvsroot/module` | `cvs server` subprocess |
//! | `rsync://host[:port]/cvsroot/module` | local `,v` files mirrored with rsync |
//! | `:pserver:user@host[:port]:/cvsroot` + module | classic CVSROOT |
//!
//! For URL forms the module is the last path component.

use std::fmt;

pub const DEFAULT_PSERVER_PORT: u16 = 2401;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("unsupported origin scheme '{0}'")]
    Unsupported(String),

    #[error("invalid origin '{url}': {reason}")]
    Invalid { url: String, reason: String },

    #[error("origin '{0}' names no module; set origin.module")]
    MissingModule(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Read `,v` files straight from disk.
    Local,
    Pserver,
    Ssh,
    /// `cvs server` run as a local subprocess.
    Fork,
    /// `,v` files copied from an rsync daemon, then read from disk.
    Rsync,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Local => "local",
            Method::Pserver => "pserver",
            Method::Ssh => "ssh",
            Method::Fork => "fork",
            Method::Rsync => "rsync",
        };
        f.write_str(s)
    }
}

/// A parsed repository location.
#[derive(Clone, PartialEq, Eq)]
pub struct OriginLocation {
    pub method: Method,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Repository root directory (the CVSROOT), e.g. `/cvsroot`.
    pub root: String,
    pub module: String,
}

impl fmt::Debug for OriginLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginLocation")
            .field("method", &self.method)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("root", &self.root)
            .field("module", &self.module)
            .finish()
    }
}

impl OriginLocation {
    pub fn parse(url: &str, module: Option<&str>) -> Result<Self, LocationError> {
        let url = url.trim();
        let invalid = |reason: &str| LocationError::Invalid {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        if url.starts_with(':') {
            return parse_classic(url, module);
        }

        let (method, rest) = match url.split_once("://") {
            None => (Method::Local, url),
            Some(("file", rest)) => (Method::Local, rest),
            Some(("pserver", rest)) => (Method::Pserver, rest),
            Some(("ssh", rest)) => (Method::Ssh, rest),
            Some(("local", rest)) => (Method::Fork, rest),
            Some(("rsync", rest)) => (Method::Rsync, rest),
            Some((scheme, _)) => return Err(LocationError::Unsupported(scheme.to_string())),
        };

        let (authority, path) = match method {
            Method::Local | Method::Fork => ("", rest),
            _ => match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => return Err(invalid("missing repository path")),
            },
        };

        let mut loc = OriginLocation {
            method,
            user: None,
            password: None,
            host: None,
            port: None,
            root: String::new(),
            module: String::new(),
        };

        if !authority.is_empty() {
            let (userinfo, hostport) = match authority.rsplit_once('@') {
                Some((u, h)) => (Some(u), h),
                None => (None, authority),
            };
            if let Some(userinfo) = userinfo {
                match userinfo.split_once(':') {
                    Some((u, p)) => {
                        loc.user = Some(u.to_string());
                        loc.password = Some(p.to_string());
                    }
                    None => loc.user = Some(userinfo.to_string()),
                }
            }
            let (host, port) = split_host_port(hostport).ok_or_else(|| invalid("bad port"))?;
            if host.is_empty() {
                return Err(invalid("missing host"));
            }
            loc.host = Some(host.to_string());
            loc.port = port;
        } else if matches!(method, Method::Pserver | Method::Ssh | Method::Rsync) {
            return Err(invalid("missing host"));
        }

        let path = path.trim_end_matches('/');
        match module {
            Some(m) if !m.is_empty() => {
                loc.root = path.to_string();
                loc.module = m.trim_matches('/').to_string();
            }
            _ => {
                let (root, module) = path
                    .rsplit_once('/')
                    .ok_or_else(|| LocationError::MissingModule(url.to_string()))?;
                if module.is_empty() {
                    return Err(LocationError::MissingModule(url.to_string()));
                }
                loc.root = if root.is_empty() { "/".to_string() } else { root.to_string() };
                loc.module = module.to_string();
            }
        }
        Ok(loc)
    }

    /// Directory holding the module's `,v` files.
    pub fn module_path(&self) -> String {
        format!("{}/{}", self.root.trim_end_matches('/'), self.module)
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PSERVER_PORT)
    }

    pub fn user_or_anonymous(&self) -> &str {
        self.user.as_deref().unwrap_or("anonymous")
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self.method, Method::Local)
    }

    /// Classic CVSROOT string, e.g. `:pserver:anonymous@host:2401/cvsroot`.
    /// Used as the key of pserver password scrambling.
    pub fn cvsroot_string(&self) -> String {
        match self.method {
            Method::Local | Method::Fork => self.root.clone(),
            Method::Rsync => self.rsync_url(""),
            _ => format!(
                ":{}:{}@{}:{}{}",
                self.method,
                self.user_or_anonymous(),
                self.host.as_deref().unwrap_or_default(),
                self.port_or_default(),
                self.root
            ),
        }
    }
}

impl OriginLocation {
    /// `rsync://[user@]host[:port]<root>/<sub>`. Directory URLs keep a
    /// trailing slash so rsync copies their contents.
    pub fn rsync_url(&self, sub: &str) -> String {
        let mut url = String::from("rsync://");
        if let Some(user) = &self.user {
            url.push_str(user);
            url.push('@');
        }
        url.push_str(self.host.as_deref().unwrap_or_default());
        if let Some(port) = self.port {
            url.push_str(&format!(":{}", port));
        }
        url.push_str(self.root.trim_end_matches('/'));
        url.push('/');
        url.push_str(sub);
        url
    }
}

fn split_host_port(s: &str) -> Option<(&str, Option<u16>)> {
    match s.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() => Some((host, Some(port.parse().ok()?))),
        Some((host, _)) => Some((host, None)),
        None => Some((s, None)),
    }
}

/// `:method:[user[:password]@]host[:port]:/path` or `:local:/path`.
fn parse_classic(url: &str, module: Option<&str>) -> Result<OriginLocation, LocationError> {
    let invalid = |reason: &str| LocationError::Invalid {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let rest = &url[1..];
    let (method_name, rest) = rest.split_once(':').ok_or_else(|| invalid("missing method"))?;
    let method = match method_name {
        "pserver" => Method::Pserver,
        "ext" | "ssh" => Method::Ssh,
        "local" => Method::Local,
        "fork" => Method::Fork,
        other => return Err(LocationError::Unsupported(other.to_string())),
    };
    let module = module
        .filter(|m| !m.is_empty())
        .ok_or_else(|| LocationError::MissingModule(url.to_string()))?
        .trim_matches('/')
        .to_string();

    let mut loc = OriginLocation {
        method,
        user: None,
        password: None,
        host: None,
        port: None,
        root: String::new(),
        module,
    };

    if matches!(method, Method::Local | Method::Fork) {
        loc.root = rest.trim_end_matches('/').to_string();
        return Ok(loc);
    }

    let slash = rest.find('/').ok_or_else(|| invalid("missing repository path"))?;
    let (head, path) = rest.split_at(slash);
    let head = head.trim_end_matches(':');
    let (userinfo, hostport) = match head.rsplit_once('@') {
        Some((u, h)) => (Some(u), h),
        None => (None, head),
    };
    if let Some(userinfo) = userinfo {
        match userinfo.split_once(':') {
            Some((u, p)) => {
                loc.user = Some(u.to_string());
                loc.password = Some(p.to_string());
            }
            None => loc.user = Some(userinfo.to_string()),
        }
    }
    let (host, port) = split_host_port(hostport).ok_or_else(|| invalid("bad port"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    loc.host = Some(host.to_string());
    loc.port = port;
    loc.root = path.trim_end_matches('/').to_string();
    Ok(loc)
}
