use std::sync::LazyLock;

use regex::Regex;

use crate::error::SqlExecError;
use crate::server_kind::{ServerKind, sniff_server_kind, split_override_token};

/// Default command timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u32 = 30;
/// Smallest command timeout the layer will use, in seconds.
pub const MIN_TIMEOUT_SECS: u32 = 10;

static PASSWORD_SEMICOLON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(password|pwd)(\s*=\s*)[^;]*").expect("password pattern is valid")
});

static PASSWORD_SPACED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(password|pwd)(\s*=\s*)(?:'[^']*'|\S*)").expect("password pattern is valid")
});

static KEY_EQUALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*=\s*").expect("key separator pattern is valid"));

static URL_CREDENTIALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(://[^:/@\s]+:)[^@\s]*@").expect("url credential pattern is valid")
});

/// Replace every password in a connection string with asterisks.
///
/// ```rust
/// use resilient_sql::connection::mask_password;
///
/// assert_eq!(
///     mask_password("Server=x;Password=secret;Database=y"),
///     "Server=x;Password=******;Database=y"
/// );
/// ```
#[must_use]
pub fn mask_password(connection_string: &str) -> String {
    let masked = URL_CREDENTIALS.replace_all(connection_string, "${1}******@");
    let masked = if masked.contains(';') {
        PASSWORD_SEMICOLON.replace_all(&masked, "${1}${2}******")
    } else {
        PASSWORD_SPACED.replace_all(&masked, "${1}${2}******")
    };
    masked.into_owned()
}

/// Split a connection string into lower-cased keys and raw values.
///
/// Handles `key=value;` (ADO.NET / Npgsql), `key=value key=value` (libpq) and
/// `postgres://user:pw@host:port/db?key=value` URLs.
#[must_use]
pub fn parse_key_values(connection_string: &str) -> Vec<(String, String)> {
    let trimmed = connection_string.trim();
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with("postgres://") || lowered.starts_with("postgresql://") {
        return parse_url(trimmed);
    }

    let pairs: Vec<String> = if trimmed.contains(';') {
        trimmed.split(';').map(str::to_string).collect()
    } else {
        split_libpq(trimmed)
    };

    pairs
        .into_iter()
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return None;
            }
            let value = value.trim().trim_matches('\'').trim_matches('"').to_string();
            Some((key, value))
        })
        .collect()
}

fn split_libpq(text: &str) -> Vec<String> {
    let normalized = KEY_EQUALS.replace_all(text, "=");
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in normalized.chars() {
        match ch {
            '\'' => {
                quoted = !quoted;
                current.push(ch);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_url(url: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let Some((_, rest)) = url.split_once("://") else {
        return pairs;
    };
    let (authority_and_path, query) = match rest.split_once('?') {
        Some((head, tail)) => (head, Some(tail)),
        None => (rest, None),
    };
    let (authority, path) = match authority_and_path.split_once('/') {
        Some((head, tail)) => (head, tail),
        None => (authority_and_path, ""),
    };
    let host_part = match authority.rsplit_once('@') {
        Some((credentials, host)) => {
            match credentials.split_once(':') {
                Some((user, password)) => {
                    pairs.push(("user".to_string(), user.to_string()));
                    pairs.push(("password".to_string(), password.to_string()));
                }
                None => pairs.push(("user".to_string(), credentials.to_string())),
            }
            host
        }
        None => authority,
    };
    match host_part.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
            pairs.push(("host".to_string(), host.to_string()));
            pairs.push(("port".to_string(), port.to_string()));
        }
        _ => pairs.push(("host".to_string(), host_part.to_string())),
    }
    if !path.is_empty() {
        pairs.push(("dbname".to_string(), path.to_string()));
    }
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                pairs.push((key.to_ascii_lowercase(), value.to_string()));
            }
        }
    }
    pairs
}

fn first_value<'a>(pairs: &'a [(String, String)], keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|wanted| {
        pairs
            .iter()
            .find(|(key, _)| key == wanted)
            .map(|(_, value)| value.as_str())
    })
}

/// Everything the executors need to know about where they connect.
///
/// Built from a connection string; changing the string re-derives the engine, host and
/// database. The command timeout never drops below [`MIN_TIMEOUT_SECS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    connection_string: String,
    server_kind: ServerKind,
    server: String,
    database: String,
    timeout_secs: u32,
}

impl ConnectionDescriptor {
    /// Build a descriptor, sniffing the engine from the string.
    ///
    /// # Errors
    /// Returns `SqlExecError::ConfigError` when the engine cannot be determined.
    pub fn new(connection_string: &str) -> Result<Self, SqlExecError> {
        let kind = sniff_server_kind(connection_string).ok_or_else(|| {
            SqlExecError::ConfigError(format!(
                "Unable to determine the server type from connection string {}",
                mask_password(connection_string)
            ))
        })?;
        Ok(Self::with_kind(connection_string, kind))
    }

    /// Build a descriptor for an engine chosen by the caller.
    #[must_use]
    pub fn with_kind(connection_string: &str, server_kind: ServerKind) -> Self {
        let mut descriptor = Self {
            connection_string: String::new(),
            server_kind,
            server: String::new(),
            database: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        };
        descriptor.apply(connection_string, server_kind);
        descriptor
    }

    /// Replace the connection string and re-derive host, database and engine.
    ///
    /// # Errors
    /// Returns `SqlExecError::ConfigError` when the new string names no usable engine.
    pub fn set_connection_string(&mut self, connection_string: &str) -> Result<(), SqlExecError> {
        let kind = sniff_server_kind(connection_string).ok_or_else(|| {
            SqlExecError::ConfigError(format!(
                "Unable to determine the server type from connection string {}",
                mask_password(connection_string)
            ))
        })?;
        self.apply(connection_string, kind);
        Ok(())
    }

    fn apply(&mut self, connection_string: &str, server_kind: ServerKind) {
        let (stripped, _) = split_override_token(connection_string);
        let pairs = parse_key_values(&stripped);

        let (host_keys, db_keys): (&[&str], &[&str]) = match server_kind {
            ServerKind::SqlServer => (
                &["data source", "server", "address", "addr", "network address"],
                &["initial catalog", "database"],
            ),
            ServerKind::Postgres => (&["host", "server"], &["database", "dbname", "db"]),
        };

        let raw_host = first_value(&pairs, host_keys).unwrap_or_default();
        let host = raw_host.trim_start_matches("tcp:");
        let host = host.split(',').next().unwrap_or_default().trim();

        self.server = host.to_string();
        self.database = first_value(&pairs, db_keys).unwrap_or_default().to_string();
        if let Some(secs) = first_value(&pairs, &["command timeout", "commandtimeout"])
            .and_then(|v| v.parse::<u32>().ok())
        {
            self.set_timeout_secs(secs);
        }
        self.connection_string = stripped.into_owned();
        self.server_kind = server_kind;
    }

    /// The connection string as handed to the driver (override token removed).
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Connection string safe to log.
    #[must_use]
    pub fn masked_connection_string(&self) -> String {
        mask_password(&self.connection_string)
    }

    #[must_use]
    pub fn server_kind(&self) -> ServerKind {
        self.server_kind
    }

    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    pub fn set_timeout_secs(&mut self, timeout_secs: u32) {
        self.timeout_secs = timeout_secs.max(MIN_TIMEOUT_SECS);
    }

    /// Value of an arbitrary key in the connection string (keys are case-insensitive).
    #[must_use]
    pub fn value_of(&self, key: &str) -> Option<String> {
        let pairs = parse_key_values(&self.connection_string);
        let wanted = key.to_ascii_lowercase();
        first_value(&pairs, &[wanted.as_str()]).map(str::to_string)
    }
}
