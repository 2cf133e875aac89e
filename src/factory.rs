use std::sync::Arc;

use crate::connection::ConnectionDescriptor;
use crate::error::SqlExecError;
use crate::events::EventSink;
use crate::executor::DbExecutor;
use crate::server_kind::ServerKind;

/// Pick the executor for `connection_string`.
///
/// The engine comes from a `DbServerType=` token when present, otherwise from the
/// connection-string keywords.
///
/// ```rust
/// use resilient_sql::prelude::*;
///
/// let executor = create_executor(
///     "DbServerType=Postgres;Host=db1;Database=dms;Username=svc",
///     default_sink(),
/// )
/// .unwrap();
/// assert_eq!(executor.server_kind(), ServerKind::Postgres);
/// assert_eq!(executor.descriptor().database(), "dms");
/// ```
///
/// # Errors
/// Returns `SqlExecError::ConfigError` when the engine cannot be determined, or
/// `SqlExecError::Unimplemented` when its feature is not compiled in.
pub fn create_executor(
    connection_string: &str,
    events: Arc<dyn EventSink>,
) -> Result<Box<dyn DbExecutor>, SqlExecError> {
    let descriptor = ConnectionDescriptor::new(connection_string)?;
    match descriptor.server_kind() {
        #[cfg(feature = "postgres")]
        ServerKind::Postgres => Ok(Box::new(crate::postgres::PostgresExecutor::new(
            descriptor, events,
        ))),
        #[cfg(feature = "mssql")]
        ServerKind::SqlServer => Ok(Box::new(crate::mssql::MssqlExecutor::new(
            descriptor, events,
        ))),
        #[allow(unreachable_patterns)]
        other => {
            drop(events);
            Err(SqlExecError::Unimplemented(format!(
                "{other} support is not enabled in this build"
            )))
        }
    }
}

#[cfg(all(test, feature = "postgres", feature = "mssql"))]
mod tests {
    use super::*;
    use crate::events::default_sink;

    #[test]
    fn sniffed_engines_get_their_executor() {
        let pg = create_executor("host=db1 dbname=dms user=svc", default_sink()).unwrap();
        assert_eq!(pg.server_kind(), ServerKind::Postgres);

        let ms = create_executor(
            "Data Source=dms-sql;Initial Catalog=DMS5;User ID=svc;Password=pw",
            default_sink(),
        )
        .unwrap();
        assert_eq!(ms.server_kind(), ServerKind::SqlServer);
        assert_eq!(ms.descriptor().server(), "dms-sql");
    }

    #[test]
    fn unknown_strings_are_config_errors() {
        assert!(matches!(
            create_executor("just some text", default_sink()),
            Err(SqlExecError::ConfigError(_))
        ));
    }
}
