use tiberius::{Client, Config as TiberiusConfig};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::connection::ConnectionDescriptor;
use crate::error::SqlExecError;

/// Type alias for a SQL Server client over tokio's TCP stream
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Build a tiberius configuration from an ADO.NET connection string.
///
/// Server certificates are trusted unless the string says otherwise.
///
/// # Errors
/// Returns `SqlExecError::ConfigError` if tiberius cannot parse the string.
pub fn build_tiberius_config(
    descriptor: &ConnectionDescriptor,
) -> Result<TiberiusConfig, SqlExecError> {
    let mut config = TiberiusConfig::from_ado_string(descriptor.connection_string()).map_err(
        |e| {
            SqlExecError::ConfigError(format!(
                "Invalid SQL Server connection string {}: {e}",
                descriptor.masked_connection_string()
            ))
        },
    )?;
    let explicit_trust = descriptor
        .value_of("trustservercertificate")
        .is_some_and(|v| !v.is_empty());
    if !explicit_trust {
        config.trust_cert();
    }
    Ok(config)
}

/// Open a fresh connection for one attempt.
///
/// # Errors
/// Returns configuration errors, `SqlExecError::ConnectionError` when the TCP
/// connection fails, or the driver's login error.
pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<MssqlClient, SqlExecError> {
    let config = build_tiberius_config(descriptor)?;
    let addr = config.get_addr();
    let tcp = TcpStream::connect(&addr).await.map_err(|e| {
        SqlExecError::ConnectionError(format!("TCP connection to {addr} failed: {e}"))
    })?;
    tcp.set_nodelay(true).ok();

    Ok(Client::connect(config, tcp.compat_write()).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_kind::ServerKind;

    fn descriptor(conn: &str) -> ConnectionDescriptor {
        ConnectionDescriptor::with_kind(conn, ServerKind::SqlServer)
    }

    #[test]
    fn ado_strings_resolve_an_address() {
        let cfg = build_tiberius_config(&descriptor(
            "Server=tcp:dms-sql,1444;Database=DMS5;User Id=svc;Password=pw",
        ))
        .unwrap();
        assert_eq!(cfg.get_addr(), "dms-sql:1444");
    }

    #[test]
    fn default_port_is_used() {
        let cfg =
            build_tiberius_config(&descriptor("Data Source=dms-sql;Initial Catalog=DMS5")).unwrap();
        assert_eq!(cfg.get_addr(), "dms-sql:1433");
    }
}
