use thiserror::Error;

#[cfg(feature = "mssql")]
use tiberius;
#[cfg(feature = "postgres")]
use tokio_postgres;

#[derive(Debug, Error)]
pub enum SqlExecError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "mssql")]
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    /// The caller handed the executor something it can never run, e.g. a command
    /// built for the other engine. Never retried.
    #[error("Invalid use of the execution layer: {0}")]
    Misuse(String),

    #[error("{message} (return code {return_code})")]
    RetriesExhausted { return_code: i32, message: String },

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),
}

impl SqlExecError {
    /// Full text of the failure, including driver detail that `Display` hides.
    ///
    /// `tokio_postgres::Error` only prints "db error" through `Display`; the server
    /// message, SQLSTATE and detail live on the inner `DbError`.
    #[must_use]
    pub fn message_text(&self) -> String {
        match self {
            #[cfg(feature = "postgres")]
            SqlExecError::PostgresError(err) => postgres_error_text(err),
            #[cfg(feature = "mssql")]
            SqlExecError::MssqlError(err) => mssql_error_text(err),
            other => other.to_string(),
        }
    }

    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(self, SqlExecError::Misuse(_))
    }
}

#[cfg(feature = "postgres")]
fn postgres_error_text(err: &tokio_postgres::Error) -> String {
    if let Some(db) = err.as_db_error() {
        let mut text = format!(
            "{}: {} (SQLSTATE {})",
            db.severity(),
            db.message(),
            db.code().code()
        );
        if let Some(detail) = db.detail() {
            text.push_str("; ");
            text.push_str(detail);
        }
        return text;
    }

    // Connection-level errors keep their cause (io error, resolver error) in `source`.
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(feature = "mssql")]
fn mssql_error_text(err: &tiberius::error::Error) -> String {
    match err {
        tiberius::error::Error::Server(token) => {
            format!("{} (error {})", token.message(), token.code())
        }
        other => other.to_string(),
    }
}
