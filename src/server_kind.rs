use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// The database engines this layer can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
pub enum ServerKind {
    /// Microsoft SQL Server (the legacy tabular engine)
    SqlServer,
    /// `PostgreSQL`
    Postgres,
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerKind::SqlServer => f.write_str("SQL Server"),
            ServerKind::Postgres => f.write_str("PostgreSQL"),
        }
    }
}

/// `DbServerType=Postgres;` style prefix that forces the engine choice.
static OVERRIDE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|;)\s*DbServerType\s*=\s*([a-z]+)\s*;?")
        .expect("server type override pattern is valid")
});

static KEY_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*=\s*").expect("key separator pattern is valid"));

/// Connection-string keywords and the engine they point to.
///
/// Keys shared by both dialects (`server`, `database`, `password`, ...) are absent on purpose.
static SERVER_KEYWORDS: LazyLock<Vec<(&'static str, ServerKind)>> = LazyLock::new(|| {
    vec![
        ("data source", ServerKind::SqlServer),
        ("initial catalog", ServerKind::SqlServer),
        ("integrated security", ServerKind::SqlServer),
        ("trusted_connection", ServerKind::SqlServer),
        ("trustservercertificate", ServerKind::SqlServer),
        ("multipleactiveresultsets", ServerKind::SqlServer),
        ("user id", ServerKind::SqlServer),
        ("network address", ServerKind::SqlServer),
        ("host", ServerKind::Postgres),
        ("hostaddr", ServerKind::Postgres),
        ("username", ServerKind::Postgres),
        ("dbname", ServerKind::Postgres),
        ("sslmode", ServerKind::Postgres),
        ("search path", ServerKind::Postgres),
        ("search_path", ServerKind::Postgres),
        ("include error detail", ServerKind::Postgres),
        ("port", ServerKind::Postgres),
    ]
});

fn parse_kind_name(name: &str) -> Option<ServerKind> {
    match name.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" | "npgsql" => Some(ServerKind::Postgres),
        "sqlserver" | "mssql" | "sqlsrv" => Some(ServerKind::SqlServer),
        _ => None,
    }
}

/// Remove a `DbServerType=...;` override from `connection_string`, returning the
/// remaining text and the engine it names (if recognized).
#[must_use]
pub fn split_override_token(connection_string: &str) -> (Cow<'_, str>, Option<ServerKind>) {
    let Some(caps) = OVERRIDE_TOKEN.captures(connection_string) else {
        return (Cow::Borrowed(connection_string), None);
    };
    let kind = caps.get(1).and_then(|m| parse_kind_name(m.as_str()));
    let whole = caps.get(0).map_or(0..0, |m| m.range());
    let mut remaining = String::with_capacity(connection_string.len());
    remaining.push_str(&connection_string[..whole.start]);
    if whole.start > 0 && !remaining.ends_with(';') {
        remaining.push(';');
    }
    remaining.push_str(&connection_string[whole.end..]);
    let trimmed = remaining.trim().trim_start_matches(';').to_string();
    (Cow::Owned(trimmed), kind)
}

/// Decide which engine a connection string targets.
///
/// An explicit `DbServerType=` token wins; URLs with a `postgres` scheme are Postgres;
/// otherwise each engine-specific keyword scores a point and the higher score wins.
/// Returns `None` when the string gives no usable hint or the scores tie.
#[must_use]
pub fn sniff_server_kind(connection_string: &str) -> Option<ServerKind> {
    let (stripped, explicit) = split_override_token(connection_string);
    if explicit.is_some() {
        return explicit;
    }

    let lowered = stripped.trim().to_ascii_lowercase();
    if lowered.starts_with("postgres://") || lowered.starts_with("postgresql://") {
        return Some(ServerKind::Postgres);
    }

    let normalized = KEY_SEPARATOR.replace_all(&lowered, "=");
    let mut sql_server = 0usize;
    let mut postgres = 0usize;
    for (keyword, kind) in SERVER_KEYWORDS.iter() {
        if contains_key(&normalized, keyword) {
            match kind {
                ServerKind::SqlServer => sql_server += 1,
                ServerKind::Postgres => postgres += 1,
            }
        }
    }

    match sql_server.cmp(&postgres) {
        std::cmp::Ordering::Greater => Some(ServerKind::SqlServer),
        std::cmp::Ordering::Less => Some(ServerKind::Postgres),
        // "Server=x;Database=y" with nothing else is the SQL Server convention
        std::cmp::Ordering::Equal if sql_server == 0 && contains_key(&normalized, "server") => {
            Some(ServerKind::SqlServer)
        }
        std::cmp::Ordering::Equal => None,
    }
}

/// True when `key=` appears at a key position (start, after `;` or after whitespace).
fn contains_key(haystack: &str, key: &str) -> bool {
    let needle = format!("{key}=");
    haystack.match_indices(&needle).any(|(idx, _)| {
        idx == 0
            || haystack[..idx]
                .chars()
                .next_back()
                .is_some_and(|c| c == ';' || c.is_whitespace())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_sql_server_strings() {
        assert_eq!(
            sniff_server_kind("Data Source=gigasax;Initial Catalog=DMS5;Integrated Security=SSPI;"),
            Some(ServerKind::SqlServer)
        );
        assert_eq!(
            sniff_server_kind("Server=proteinseqs;Database=Manager_Control;User Id=svc;Password=x"),
            Some(ServerKind::SqlServer)
        );
    }

    #[test]
    fn sniffs_postgres_strings() {
        assert_eq!(
            sniff_server_kind("Host=prismdb2;Port=5432;Database=dms;Username=svc-dms"),
            Some(ServerKind::Postgres)
        );
        assert_eq!(
            sniff_server_kind("host=localhost dbname=dms user=dmsreader"),
            Some(ServerKind::Postgres)
        );
        assert_eq!(
            sniff_server_kind("postgresql://svc:pw@prismdb2:5432/dms"),
            Some(ServerKind::Postgres)
        );
    }

    #[test]
    fn override_token_wins_and_is_removed() {
        let raw = "DbServerType=Postgres;Server=prismdb2;Database=dms;Username=svc";
        assert_eq!(sniff_server_kind(raw), Some(ServerKind::Postgres));
        let (stripped, kind) = split_override_token(raw);
        assert_eq!(kind, Some(ServerKind::Postgres));
        assert_eq!(stripped, "Server=prismdb2;Database=dms;Username=svc");

        let (untouched, none) = split_override_token("Host=a;Database=b");
        assert!(matches!(untouched, Cow::Borrowed(_)));
        assert_eq!(none, None);
    }

    #[test]
    fn override_token_in_the_middle() {
        let (stripped, kind) = split_override_token("Server=a;DbServerType=SqlServer;Database=b");
        assert_eq!(kind, Some(ServerKind::SqlServer));
        assert_eq!(stripped, "Server=a;Database=b");
    }

    #[test]
    fn undetermined_strings_return_none() {
        assert_eq!(sniff_server_kind(""), None);
        assert_eq!(sniff_server_kind("Database=dms;Password=x"), None);
    }

    #[test]
    fn keys_must_start_at_a_key_position() {
        // "ghost=" must not count as "host="
        assert_eq!(sniff_server_kind("ghost=1;Data Source=x"), Some(ServerKind::SqlServer));
    }
}
