//! Connection settings for the test database

use crate::error::{Error, Result};
use std::fmt;

/// Environment variable naming the test database
pub const ENV_DBNAME: &str = "PGPROBE_TESTDB";
pub const ENV_HOST: &str = "PGPROBE_TESTDB_HOST";
pub const ENV_PORT: &str = "PGPROBE_TESTDB_PORT";
pub const ENV_USER: &str = "PGPROBE_TESTDB_USER";
pub const ENV_PASSWORD: &str = "PGPROBE_TESTDB_PASSWORD";

/// Database used when `PGPROBE_TESTDB` is unset
pub const DEFAULT_DBNAME: &str = "pgprobe_test";

/// Where to find the test database
///
/// Only `dbname` is mandatory; everything else falls through to libpq-style
/// defaults (local socket, current user) when absent.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnConfig {
    pub dbname: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            dbname: DEFAULT_DBNAME.to_string(),
            host: None,
            port: None,
            user: None,
            password: None,
        }
    }
}

impl ConnConfig {
    /// Build a config from the `PGPROBE_TESTDB*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let port = match get(ENV_PORT) {
            Some(raw) => Some(raw.parse::<u16>().map_err(|e| {
                Error::Config(format!("{} must be a port number, got '{}': {}", ENV_PORT, raw, e))
            })?),
            None => None,
        };

        Ok(Self {
            dbname: get(ENV_DBNAME).unwrap_or_else(|| DEFAULT_DBNAME.to_string()),
            host: get(ENV_HOST),
            port,
            user: get(ENV_USER),
            password: get(ENV_PASSWORD),
        })
    }

    /// Render a libpq key/value connection string
    ///
    /// ```
    /// use pgprobe_client::ConnConfig;
    ///
    /// let config = ConnConfig {
    ///     host: Some("db.local".to_string()),
    ///     port: Some(5433),
    ///     ..ConnConfig::default()
    /// };
    /// assert_eq!(config.dsn(), "dbname=pgprobe_test host=db.local port=5433");
    /// ```
    pub fn dsn(&self) -> String {
        let mut dsn = format!("dbname={}", quote_dsn_value(&self.dbname));
        if let Some(host) = &self.host {
            dsn.push_str(&format!(" host={}", quote_dsn_value(host)));
        }
        if let Some(port) = self.port {
            dsn.push_str(&format!(" port={}", port));
        }
        if let Some(user) = &self.user {
            dsn.push_str(&format!(" user={}", quote_dsn_value(user)));
        }
        if let Some(password) = &self.password {
            dsn.push_str(&format!(" password={}", quote_dsn_value(password)));
        }
        dsn
    }
}

// Passwords stay out of logs.
impl fmt::Debug for ConnConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnConfig")
            .field("dbname", &self.dbname)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

impl fmt::Display for ConnConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dbname={}", self.dbname)?;
        if let Some(host) = &self.host {
            write!(f, " host={}", host)?;
        }
        if let Some(port) = self.port {
            write!(f, " port={}", port)?;
        }
        if let Some(user) = &self.user {
            write!(f, " user={}", user)?;
        }
        Ok(())
    }
}

fn quote_dsn_value(value: &str) -> String {
    let needs_quotes =
        value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

/// A connection string safe to log: passwords are replaced by `****`
///
/// Handles both `key=value` strings and `postgres://` URLs.
pub(crate) fn redact_dsn(dsn: &str) -> String {
    for scheme in ["postgresql://", "postgres://"] {
        if let Some(rest) = dsn.strip_prefix(scheme) {
            return redact_url(scheme, rest);
        }
    }
    redact_keywords(dsn)
}

fn redact_keywords(dsn: &str) -> String {
    let mut out = String::with_capacity(dsn.len());
    let mut chars = dsn.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&key);
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next_if_eq(&'=').is_none() {
            // malformed; drop the rest rather than guess where values end
            break;
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            value.push('\'');
            while let Some(c) = chars.next() {
                value.push(c);
                if c == '\\' {
                    value.extend(chars.next());
                } else if c == '\'' {
                    break;
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                value.push(c);
                if c == '\\' {
                    value.extend(chars.next());
                }
            }
        }

        out.push('=');
        if key == "password" {
            out.push_str("****");
        } else {
            out.push_str(&value);
        }
    }
    out
}

fn redact_url(scheme: &str, rest: &str) -> String {
    let authority_end = rest.find(|c: char| c == '/' || c == '?').unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);

    let authority = match authority.rsplit_once('@') {
        Some((userinfo, host)) => match userinfo.split_once(':') {
            Some((user, _)) => format!("{}:****@{}", user, host),
            None => authority.to_string(),
        },
        None => authority.to_string(),
    };
    let tail = match tail.split_once('?') {
        Some((path, query)) => {
            let query = query
                .split('&')
                .map(|pair| match pair.split_once('=') {
                    Some(("password", _)) => "password=****".to_string(),
                    _ => pair.to_string(),
                })
                .collect::<Vec<_>>()
                .join("&");
            format!("{}?{}", path, query)
        }
        None => tail.to_string(),
    };
    format!("{}{}{}", scheme, authority, tail)
}
