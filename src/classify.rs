//! Fatal / transient / deadlock classification of execution failures.
//!
//! Each engine has its own classifier because the two vendors word their errors
//! differently, but both answer the same question: would retrying reproduce the
//! identical failure? Structured codes (SQLSTATE, SQL Server error numbers) are
//! consulted first; the phrase lists only apply when no code is available.

use crate::error::SqlExecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Worth retrying: network hiccups, lock waits, momentary unavailability.
    Transient,
    /// A retry would fail the same way.
    Fatal,
    /// Transient, but reported separately when retries run out.
    Deadlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: ErrorClass,
    /// Only affects log wording.
    pub permission_denied: bool,
}

impl Classification {
    #[must_use]
    pub fn transient() -> Self {
        Self {
            class: ErrorClass::Transient,
            permission_denied: false,
        }
    }

    #[must_use]
    pub fn fatal() -> Self {
        Self {
            class: ErrorClass::Fatal,
            permission_denied: false,
        }
    }

    #[must_use]
    pub fn deadlock() -> Self {
        Self {
            class: ErrorClass::Deadlock,
            permission_denied: false,
        }
    }

    #[must_use]
    pub fn permission_denied() -> Self {
        Self {
            class: ErrorClass::Fatal,
            permission_denied: true,
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.class == ErrorClass::Fatal
    }
}

/// Decides whether a failure is worth another attempt.
pub trait ErrorClassifier: Send + Sync {
    /// Lower-case phrases that mark a failure as fatal.
    fn fatal_phrases(&self) -> &'static [&'static str];

    /// Lower-case phrases that mean the caller lacks permission (subset of fatal).
    fn permission_phrases(&self) -> &'static [&'static str];

    /// Lower-case phrases that mark a deadlock.
    fn deadlock_phrases(&self) -> &'static [&'static str];

    /// Classification from a structured error code, when the driver exposes one.
    fn classify_structured(&self, _err: &SqlExecError) -> Option<Classification> {
        None
    }

    fn classify(&self, err: &SqlExecError) -> Classification {
        match err {
            SqlExecError::Misuse(_) | SqlExecError::ConfigError(_) => {
                return Classification::fatal();
            }
            SqlExecError::Timeout(_) => return Classification::transient(),
            _ => {}
        }
        if let Some(found) = self.classify_structured(err) {
            return found;
        }
        self.classify_message(&err.message_text())
    }

    fn classify_message(&self, message: &str) -> Classification {
        let lowered = message.to_lowercase();
        let permission_denied = self
            .permission_phrases()
            .iter()
            .any(|phrase| lowered.contains(phrase));
        if permission_denied {
            return Classification::permission_denied();
        }
        if self
            .fatal_phrases()
            .iter()
            .any(|phrase| lowered.contains(phrase))
        {
            return Classification::fatal();
        }
        if self
            .deadlock_phrases()
            .iter()
            .any(|phrase| lowered.contains(phrase))
        {
            return Classification::deadlock();
        }
        Classification::transient()
    }
}

/// Classifier for Postgres-family servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresClassifier;

impl ErrorClassifier for PostgresClassifier {
    fn fatal_phrases(&self) -> &'static [&'static str] {
        &[
            "does not exist",
            "no such host is known",
            "failed to lookup address information",
            "open data reader exists for this command",
            "ldap authentication failed for user",
            "no password has been provided but the backend requires one",
            "password missing",
            "password authentication failed for user",
        ]
    }

    fn permission_phrases(&self) -> &'static [&'static str] {
        &["permission denied"]
    }

    fn deadlock_phrases(&self) -> &'static [&'static str] {
        &["was deadlocked", "deadlock detected"]
    }

    #[cfg(feature = "postgres")]
    fn classify_structured(&self, err: &SqlExecError) -> Option<Classification> {
        use tokio_postgres::error::SqlState;

        let SqlExecError::PostgresError(pg) = err else {
            return None;
        };
        let code = pg.code()?;
        if *code == SqlState::T_R_DEADLOCK_DETECTED {
            Some(Classification::deadlock())
        } else if *code == SqlState::INSUFFICIENT_PRIVILEGE {
            Some(Classification::permission_denied())
        } else if [
            SqlState::UNDEFINED_TABLE,
            SqlState::UNDEFINED_FUNCTION,
            SqlState::UNDEFINED_COLUMN,
            SqlState::UNDEFINED_OBJECT,
            SqlState::INVALID_SCHEMA_NAME,
            SqlState::INVALID_CATALOG_NAME,
            SqlState::INVALID_PASSWORD,
            SqlState::INVALID_AUTHORIZATION_SPECIFICATION,
        ]
        .contains(code)
        {
            Some(Classification::fatal())
        } else {
            None
        }
    }
}

/// Classifier for SQL Server.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlClassifier;

impl ErrorClassifier for MssqlClassifier {
    fn fatal_phrases(&self) -> &'static [&'static str] {
        &[
            "does not exist",
            "could not find stored procedure",
            "invalid object name",
            "no such host is known",
            "failed to lookup address information",
            "open data reader exists for this command",
            "login failed for user",
            "password missing",
        ]
    }

    fn permission_phrases(&self) -> &'static [&'static str] {
        &["permission denied", "permission was denied", "cannot use procedure"]
    }

    fn deadlock_phrases(&self) -> &'static [&'static str] {
        &["was deadlocked"]
    }

    #[cfg(feature = "mssql")]
    fn classify_structured(&self, err: &SqlExecError) -> Option<Classification> {
        let SqlExecError::MssqlError(tiberius::error::Error::Server(token)) = err else {
            return None;
        };
        match token.code() {
            1205 => Some(Classification::deadlock()),
            229 | 230 | 262 | 297 => Some(Classification::permission_denied()),
            208 | 2812 | 4060 | 18456 => Some(Classification::fatal()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec_err(msg: &str) -> SqlExecError {
        SqlExecError::ExecutionError(msg.to_string())
    }

    #[test]
    fn missing_objects_are_fatal() {
        let pg = PostgresClassifier;
        let found = pg.classify(&exec_err("ERROR: function public.get_job(integer) does not exist"));
        assert_eq!(found, Classification::fatal());

        let ms = MssqlClassifier;
        let found = ms.classify(&exec_err("Could not find stored procedure 'AddJob'."));
        assert!(found.is_fatal());
    }

    #[test]
    fn bad_configuration_is_not_retried() {
        let err = SqlExecError::ConfigError("dbname is required".into());
        assert!(PostgresClassifier.classify(&err).is_fatal());
        assert!(MssqlClassifier.classify(&err).is_fatal());
    }

    #[test]
    fn permission_denied_sets_the_flag() {
        let found = PostgresClassifier.classify(&exec_err("permission denied for table t_jobs"));
        assert_eq!(found.class, ErrorClass::Fatal);
        assert!(found.permission_denied);

        let found = MssqlClassifier
            .classify(&exec_err("User 'svc' cannot use procedure AddUpdateJob in database DMS5"));
        assert!(found.permission_denied);
    }

    #[test]
    fn authentication_failures_are_fatal() {
        for msg in [
            "password authentication failed for user \"svc\"",
            "LDAP authentication failed for user \"svc\"",
            "No password has been provided but the backend requires one (in MD5)",
        ] {
            assert!(PostgresClassifier.classify(&exec_err(msg)).is_fatal(), "{msg}");
        }
        assert!(
            MssqlClassifier
                .classify(&exec_err("Login failed for user 'svc'."))
                .is_fatal()
        );
    }

    #[test]
    fn host_and_reader_misuse_are_fatal() {
        for classifier in [&PostgresClassifier as &dyn ErrorClassifier, &MssqlClassifier] {
            assert!(classifier.classify(&exec_err("No such host is known.")).is_fatal());
            assert!(
                classifier
                    .classify(&exec_err("An open data reader exists for this command"))
                    .is_fatal()
            );
        }
    }

    #[test]
    fn deadlocks_are_recognized() {
        let msg = "Transaction (Process ID 61) was deadlocked on lock resources with another process";
        assert_eq!(MssqlClassifier.classify(&exec_err(msg)).class, ErrorClass::Deadlock);
        assert_eq!(PostgresClassifier.classify(&exec_err(msg)).class, ErrorClass::Deadlock);
    }

    #[test]
    fn fatal_wins_over_deadlock() {
        let msg = "relation t_x does not exist; transaction was deadlocked";
        assert_eq!(PostgresClassifier.classify(&exec_err(msg)).class, ErrorClass::Fatal);
    }

    #[test]
    fn everything_else_is_transient() {
        for err in [
            exec_err("connection reset by peer"),
            exec_err("Lock request time out period exceeded"),
            SqlExecError::Timeout(30),
        ] {
            assert_eq!(MssqlClassifier.classify(&err).class, ErrorClass::Transient);
            assert_eq!(PostgresClassifier.classify(&err).class, ErrorClass::Transient);
        }
    }

    #[test]
    fn misuse_never_retries() {
        let err = SqlExecError::Misuse("wrong engine".into());
        assert!(PostgresClassifier.classify(&err).is_fatal());
    }
}
