//! The attempt loop shared by both engines.
//!
//! A call is a sequence of attempts. Each attempt opens its own connection and
//! either succeeds or fails with an error that the engine's classifier labels
//! fatal, transient or deadlock. Fatal failures end the loop at once; the others
//! sleep for the configured delay and try again until the attempts run out.

use std::time::Duration;

use async_trait::async_trait;

use crate::classify::{Classification, ErrorClass, ErrorClassifier};
use crate::error::SqlExecError;
use crate::events::EventSink;
use crate::options::ExecOptions;
use crate::return_code::{RET_VAL_DEADLOCK, RET_VAL_EXCESSIVE_RETRIES, RET_VAL_UNDEFINED_ERROR};

/// Attempt count, pause and per-attempt timeout for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Policy for a call made with `options`; `default_timeout_secs` applies when
    /// the options carry no timeout of their own.
    #[must_use]
    pub fn from_options(options: &ExecOptions, default_timeout_secs: u32) -> Self {
        Self {
            attempts: options.retry_count(),
            delay: Duration::from_secs(u64::from(options.retry_delay_secs())),
            timeout: Duration::from_secs(u64::from(
                options.effective_timeout_secs(default_timeout_secs),
            )),
        }
    }
}

/// One try at the work of a call.
///
/// Implementors keep their inputs (the command in particular) across calls to
/// `run`, so the same parameter bindings are seen by every attempt.
#[async_trait]
pub trait Attempt: Send {
    type Output: Send;

    async fn run(&mut self) -> Result<Self::Output, SqlExecError>;
}

/// What the loop needs to know to report failures.
pub struct RetryContext<'a> {
    pub operation: &'a str,
    pub masked_connection: &'a str,
    pub command_text: &'a str,
    pub events: &'a dyn EventSink,
    pub classifier: &'a dyn ErrorClassifier,
}

/// Outcome of a call whose attempts all failed, or that hit a fatal error.
#[derive(Debug)]
pub struct FailureReport {
    pub return_code: i32,
    pub message: String,
    pub class: ErrorClass,
    pub attempts: u32,
    pub error: SqlExecError,
}

impl FailureReport {
    /// True when the loop ended because attempts ran out.
    #[must_use]
    pub fn retries_exhausted(&self) -> bool {
        self.class != ErrorClass::Fatal
    }

    /// Turn the report into an error value, e.g. for the lazy row stream.
    #[must_use]
    pub fn into_error(self) -> SqlExecError {
        if self.retries_exhausted() {
            SqlExecError::RetriesExhausted {
                return_code: self.return_code,
                message: self.message,
            }
        } else {
            self.error
        }
    }
}

/// Run `attempt` under `policy`, sleeping between failures.
///
/// # Errors
/// Returns a [`FailureReport`] when an attempt fails fatally, or when every attempt
/// failed. Its return code is [`RET_VAL_UNDEFINED_ERROR`] for fatal failures,
/// [`RET_VAL_DEADLOCK`] when the last failure was a deadlock and
/// [`RET_VAL_EXCESSIVE_RETRIES`] otherwise.
pub async fn run_with_retries<A: Attempt>(
    policy: RetryPolicy,
    ctx: &RetryContext<'_>,
    attempt: &mut A,
) -> Result<A::Output, FailureReport> {
    let attempts = policy.attempts.max(1);
    let mut remaining = attempts;
    let mut saw_deadlock = false;
    let mut failures = 0u32;

    loop {
        remaining -= 1;
        let outcome = match tokio::time::timeout(policy.timeout, attempt.run()).await {
            Ok(result) => result,
            Err(_) => Err(SqlExecError::Timeout(policy.timeout.as_secs())),
        };

        let err = match outcome {
            Ok(output) => {
                if failures > 0 {
                    ctx.events.status(&format!(
                        "{} succeeded after {failures} failed attempt(s)",
                        ctx.operation
                    ));
                }
                return Ok(output);
            }
            Err(err) => err,
        };
        failures += 1;

        let found = ctx.classifier.classify(&err);
        log_failure(ctx, &err, found, remaining);

        if found.is_fatal() {
            return Err(FailureReport {
                return_code: RET_VAL_UNDEFINED_ERROR,
                message: err.message_text(),
                class: ErrorClass::Fatal,
                attempts: failures,
                error: err,
            });
        }
        if found.class == ErrorClass::Deadlock {
            saw_deadlock = true;
        }

        if remaining == 0 {
            return Err(exhausted(ctx, err, found.class, saw_deadlock, failures));
        }
        tokio::time::sleep(policy.delay).await;
    }
}

fn log_failure(ctx: &RetryContext<'_>, err: &SqlExecError, found: Classification, remaining: u32) {
    let label = if found.permission_denied {
        "Permission denied"
    } else {
        match found.class {
            ErrorClass::Fatal => "Fatal error",
            ErrorClass::Deadlock => "Deadlock",
            ErrorClass::Transient => "Error",
        }
    };
    ctx.events.error(&format!(
        "{label} in {}: {}; ConnectionString: {}, RetryCount = {remaining}; Command: {}",
        ctx.operation,
        err.message_text(),
        ctx.masked_connection,
        ctx.command_text,
    ));
}

fn exhausted(
    ctx: &RetryContext<'_>,
    err: SqlExecError,
    last: ErrorClass,
    saw_deadlock: bool,
    failures: u32,
) -> FailureReport {
    let (return_code, summary) = if last == ErrorClass::Deadlock {
        (RET_VAL_DEADLOCK, "excessive retries including deadlock")
    } else if saw_deadlock {
        (RET_VAL_EXCESSIVE_RETRIES, "excessive retries including deadlock")
    } else {
        (RET_VAL_EXCESSIVE_RETRIES, "excessive retries")
    };
    let message = format!(
        "{} failed after {failures} attempt(s), {summary}: {}",
        ctx.operation,
        err.message_text()
    );
    ctx.events.error(&message);
    FailureReport {
        return_code,
        message,
        class: last,
        attempts: failures,
        error: err,
    }
}
