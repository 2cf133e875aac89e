use serde::{Deserialize, Serialize};

use crate::connection::MIN_TIMEOUT_SECS;
use crate::error::SqlExecError;

/// Default number of attempts per call.
pub const DEFAULT_RETRY_COUNT: u32 = 3;
/// Default pause between attempts, in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u32 = 5;

/// Per-call execution knobs.
///
/// Floors are enforced by the accessors, so values loaded from JSON cannot bypass them:
/// ```rust
/// use resilient_sql::prelude::*;
///
/// let opts = ExecOptions::from_json(r#"{ "retry_count": 0, "max_rows": 50 }"#).unwrap();
/// assert_eq!(opts.retry_count(), 1);
/// assert_eq!(opts.retry_delay_secs(), 5);
/// assert_eq!(opts.max_rows(), 50);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecOptions {
    retry_count: u32,
    retry_delay_secs: u32,
    timeout_secs: Option<u32>,
    max_rows: usize,
    capitalize_column_names: bool,
}

/// True once `rows_read` reached `max_rows`; a limit of 0 never is.
#[must_use]
pub fn row_limit_reached(max_rows: usize, rows_read: usize) -> bool {
    max_rows > 0 && rows_read >= max_rows
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            timeout_secs: None,
            max_rows: 0,
            capitalize_column_names: true,
        }
    }
}

impl ExecOptions {
    /// Load options from a JSON document; absent keys keep their defaults.
    ///
    /// # Errors
    /// Returns `SqlExecError::ConfigError` if the document is not valid JSON for this shape.
    pub fn from_json(json: &str) -> Result<Self, SqlExecError> {
        serde_json::from_str(json)
            .map_err(|e| SqlExecError::ConfigError(format!("Invalid execution options: {e}")))
    }

    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    #[must_use]
    pub fn with_retry_delay_secs(mut self, retry_delay_secs: u32) -> Self {
        self.retry_delay_secs = retry_delay_secs;
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    #[must_use]
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    #[must_use]
    pub fn with_capitalized_column_names(mut self, capitalize: bool) -> Self {
        self.capitalize_column_names = capitalize;
        self
    }

    /// Attempts per call; never below 1.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count.max(1)
    }

    /// Seconds between attempts; never below 1.
    #[must_use]
    pub fn retry_delay_secs(&self) -> u32 {
        self.retry_delay_secs.max(1)
    }

    /// Timeout requested for this call, if any (floored at [`MIN_TIMEOUT_SECS`]).
    #[must_use]
    pub fn timeout_secs(&self) -> Option<u32> {
        self.timeout_secs.map(|secs| secs.max(MIN_TIMEOUT_SECS))
    }

    /// Timeout for this call, falling back to `default_secs`.
    #[must_use]
    pub fn effective_timeout_secs(&self, default_secs: u32) -> u32 {
        self.timeout_secs()
            .unwrap_or_else(|| default_secs.max(MIN_TIMEOUT_SECS))
    }

    /// Row limit; 0 means unbounded.
    #[must_use]
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    #[must_use]
    pub fn capitalize_column_names(&self) -> bool {
        self.capitalize_column_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = ExecOptions::default();
        assert_eq!(opts.retry_count(), 3);
        assert_eq!(opts.retry_delay_secs(), 5);
        assert_eq!(opts.timeout_secs(), None);
        assert_eq!(opts.effective_timeout_secs(30), 30);
        assert_eq!(opts.max_rows(), 0);
        assert!(opts.capitalize_column_names());
    }

    #[test]
    fn floors_apply_to_builder_values() {
        let opts = ExecOptions::default()
            .with_retry_count(0)
            .with_retry_delay_secs(0)
            .with_timeout_secs(2);
        assert_eq!(opts.retry_count(), 1);
        assert_eq!(opts.retry_delay_secs(), 1);
        assert_eq!(opts.timeout_secs(), Some(10));
        assert_eq!(opts.effective_timeout_secs(45), 10);
    }

    #[test]
    fn row_limit_of_zero_is_unbounded() {
        let unbounded = ExecOptions::default();
        assert!(!row_limit_reached(unbounded.max_rows(), 1_000_000));
        let limited = ExecOptions::default().with_max_rows(2);
        assert!(!row_limit_reached(limited.max_rows(), 1));
        assert!(row_limit_reached(limited.max_rows(), 2));
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let err = ExecOptions::from_json("{ retry_count: ").unwrap_err();
        assert!(matches!(err, SqlExecError::ConfigError(_)));
    }
}
