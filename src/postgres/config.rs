use std::time::Duration;

use tokio_postgres::{Client, Config as PgConfig, NoTls};

use crate::connection::{ConnectionDescriptor, parse_key_values};
use crate::error::SqlExecError;

const DEFAULT_PORT: u16 = 5432;
const APPLICATION_NAME: &str = "resilient-sql";

fn first<'a>(pairs: &'a [(String, String)], keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|wanted| {
        pairs
            .iter()
            .find(|(key, value)| key == wanted && !value.is_empty())
            .map(|(_, value)| value.as_str())
    })
}

/// Build a `tokio_postgres` configuration from any of the accepted connection-string
/// forms (URL, libpq `key=value`, or `Key=Value;` pairs).
///
/// # Errors
/// Returns `SqlExecError::ConfigError` if host, database or user is missing, or the
/// port is not a number.
pub fn build_pg_config(descriptor: &ConnectionDescriptor) -> Result<PgConfig, SqlExecError> {
    let pairs = parse_key_values(descriptor.connection_string());

    let host = first(&pairs, &["host", "server"])
        .ok_or_else(|| SqlExecError::ConfigError("host is required".to_string()))?;
    let dbname = first(&pairs, &["dbname", "database", "db", "initial catalog"])
        .ok_or_else(|| SqlExecError::ConfigError("dbname is required".to_string()))?;
    let user = first(&pairs, &["user", "username", "user id", "userid", "uid"])
        .ok_or_else(|| SqlExecError::ConfigError("user is required".to_string()))?;

    let port = match first(&pairs, &["port"]) {
        Some(text) => text.parse::<u16>().map_err(|e| {
            SqlExecError::ConfigError(format!("port '{text}' is not valid: {e}"))
        })?,
        None => DEFAULT_PORT,
    };

    let mut config = PgConfig::new();
    for h in host.split(',').map(str::trim).filter(|h| !h.is_empty()) {
        config.host(h);
    }
    config.port(port);
    config.dbname(dbname);
    config.user(user);
    if let Some(password) = first(&pairs, &["password", "pwd"]) {
        config.password(password);
    }
    config.application_name(
        first(&pairs, &["application_name", "application name", "applicationname"])
            .unwrap_or(APPLICATION_NAME),
    );
    config.connect_timeout(Duration::from_secs(u64::from(descriptor.timeout_secs())));
    Ok(config)
}

/// Open a fresh connection; the connection task is driven on the runtime until the
/// client is dropped.
///
/// # Errors
/// Returns configuration errors or the driver's connect error.
pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<Client, SqlExecError> {
    let config = build_pg_config(descriptor)?;
    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(target: "resilient_sql", "postgres connection closed: {e}");
        }
    });
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_kind::ServerKind;

    fn config_for(conn: &str) -> Result<PgConfig, SqlExecError> {
        build_pg_config(&ConnectionDescriptor::with_kind(conn, ServerKind::Postgres))
    }

    #[test]
    fn semicolon_form() {
        let cfg = config_for("Host=db1;Port=5433;Database=dms;Username=svc;Password=pw").unwrap();
        assert_eq!(cfg.get_dbname(), Some("dms"));
        assert_eq!(cfg.get_user(), Some("svc"));
        assert_eq!(cfg.get_ports(), &[5433]);
        assert_eq!(cfg.get_password(), Some(&b"pw"[..]));
    }

    #[test]
    fn libpq_and_url_forms() {
        let cfg = config_for("host=db1 dbname=dms user=svc").unwrap();
        assert_eq!(cfg.get_ports(), &[DEFAULT_PORT]);
        assert_eq!(cfg.get_password(), None);

        let cfg = config_for("postgresql://svc:pw@db1:6432/dms?application_name=loader").unwrap();
        assert_eq!(cfg.get_dbname(), Some("dms"));
        assert_eq!(cfg.get_ports(), &[6432]);
        assert_eq!(cfg.get_application_name(), Some("loader"));
    }

    #[test]
    fn missing_pieces_are_config_errors() {
        assert!(matches!(
            config_for("host=db1 user=svc"),
            Err(SqlExecError::ConfigError(msg)) if msg.contains("dbname")
        ));
        assert!(matches!(
            config_for("host=db1 dbname=x user=svc port=abc"),
            Err(SqlExecError::ConfigError(_))
        ));
    }
}
