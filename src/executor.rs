//! The engine-neutral execution contract.
//!
//! Both engines implement [`DbExecutor`]. The two core methods run a text query or a
//! procedure under the retry policy and return every result set read; the provided
//! methods shape that output into scalars, string rows, tables or data sets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;

use crate::classify::ErrorClassifier;
use crate::command::{Command, CommandKind};
use crate::connection::ConnectionDescriptor;
use crate::error::SqlExecError;
use crate::events::EventSink;
use crate::options::{ExecOptions, row_limit_reached};
use crate::results::{CustomDbRow, DataSet, DataTable, RowStream, StringRows};
use crate::retry::{Attempt, FailureReport, RetryContext, RetryPolicy, run_with_retries};
use crate::return_code::RET_VAL_OK;
use crate::server_kind::ServerKind;
use crate::types::RowValues;

/// Capacity of the channel behind a [`RowStream`].
pub(crate) const ROW_STREAM_BUFFER: usize = 64;

/// Outcome of one call: success flag, shaped data and return code.
///
/// Operational failures (transient, deadlock, fatal) land here with `success`
/// false; only misuse of the API surfaces as `Err` from the entry points.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult<T> {
    pub success: bool,
    pub data: T,
    pub return_code: i32,
    pub error_message: Option<String>,
}

impl<T> ExecutionResult<T> {
    #[must_use]
    pub fn ok(data: T, return_code: i32) -> Self {
        Self {
            success: true,
            data,
            return_code,
            error_message: None,
        }
    }

    /// Reshape the data, keeping flag, code and message.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ExecutionResult<U> {
        ExecutionResult {
            success: self.success,
            data: f(self.data),
            return_code: self.return_code,
            error_message: self.error_message,
        }
    }
}

impl<T: Default> ExecutionResult<T> {
    #[must_use]
    pub fn failed(report: FailureReport) -> Self {
        Self {
            success: false,
            data: T::default(),
            return_code: report.return_code,
            error_message: Some(report.message),
        }
    }
}

/// How much of the engine's output a call wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// First column of the first row.
    Scalar,
    /// First result set.
    Table,
    /// Every result set.
    DataSet,
    /// Nothing; run for side effects and the return code.
    NoData,
}

impl ResultShape {
    #[must_use]
    pub fn wants_rows(self) -> bool {
        self != ResultShape::NoData
    }

    #[must_use]
    pub fn wants_all_sets(self) -> bool {
        self == ResultShape::DataSet
    }

    /// Row limit for this shape: a scalar never needs more than one row.
    #[must_use]
    pub fn row_limit(self, options: &ExecOptions) -> usize {
        match self {
            ResultShape::Scalar => 1,
            ResultShape::NoData => 0,
            ResultShape::Table | ResultShape::DataSet => options.max_rows(),
        }
    }
}

/// Reject commands that were built for the other engine or for another entry point.
///
/// # Errors
/// Returns `SqlExecError::Misuse` on either mismatch.
pub(crate) fn ensure_command(
    command: &Command,
    server_kind: ServerKind,
    expected: CommandKind,
) -> Result<(), SqlExecError> {
    if command.server_kind() != server_kind {
        return Err(SqlExecError::Misuse(format!(
            "Command was built for {} but executed on {server_kind}",
            command.server_kind()
        )));
    }
    if command.kind() != expected {
        let entry = match expected {
            CommandKind::Text => "query entry point",
            CommandKind::StoredProcedure => "procedure entry point",
        };
        return Err(SqlExecError::Misuse(format!(
            "{:?} command '{}' passed to a {entry}",
            command.kind(),
            command.text()
        )));
    }
    Ok(())
}

/// Run `attempt` with the retry loop, using the executor's descriptor for log lines.
pub(crate) async fn retry_call<A: Attempt>(
    operation: &str,
    descriptor: &ConnectionDescriptor,
    command_text: &str,
    events: &dyn EventSink,
    classifier: &dyn ErrorClassifier,
    policy: RetryPolicy,
    attempt: &mut A,
) -> Result<A::Output, FailureReport> {
    let masked = descriptor.masked_connection_string();
    let ctx = RetryContext {
        operation,
        masked_connection: &masked,
        command_text,
        events,
        classifier,
    };
    run_with_retries(policy, &ctx, attempt).await
}

/// Sending half of a [`RowStream`], counting delivered rows.
pub(crate) struct RowSender {
    tx: mpsc::Sender<Result<CustomDbRow, SqlExecError>>,
    delivered: usize,
    max_rows: usize,
}

impl RowSender {
    /// Deliver a row. Returns false when the consumer went away or the row limit
    /// was reached, in which case the producer stops reading.
    pub(crate) async fn send(&mut self, row: CustomDbRow) -> bool {
        if self.tx.send(Ok(row)).await.is_err() {
            return false;
        }
        self.delivered += 1;
        !row_limit_reached(self.max_rows, self.delivered)
    }

    /// True once any row reached the consumer; failures after this point are not retried.
    pub(crate) fn has_delivered(&self) -> bool {
        self.delivered > 0
    }
}

/// Owned retry context for work that runs on its own task.
pub(crate) struct StreamJob {
    pub operation: &'static str,
    pub descriptor: ConnectionDescriptor,
    pub command_text: String,
    pub events: Arc<dyn EventSink>,
    pub classifier: &'static dyn ErrorClassifier,
    pub policy: RetryPolicy,
}

/// Spawn `make_attempt`'s work on a task feeding a bounded channel.
///
/// The attempt's output is `Ok(Err(_))` when it failed after rows were delivered;
/// that error ends the stream without another attempt. Row delivery is paced by the
/// consumer, so the loop sets no deadline of its own: the attempt bounds its setup
/// with `job.policy.timeout`.
pub(crate) fn spawn_row_stream<A, F>(job: StreamJob, max_rows: usize, make_attempt: F) -> RowStream
where
    A: Attempt<Output = Result<(), SqlExecError>> + 'static,
    F: FnOnce(RowSender) -> A + Send + 'static,
{
    let (tx, rx) = mpsc::channel(ROW_STREAM_BUFFER);
    let error_tx = tx.clone();
    let sender = RowSender {
        tx,
        delivered: 0,
        max_rows,
    };

    tokio::spawn(async move {
        let mut attempt = make_attempt(sender);
        let outcome = retry_call(
            job.operation,
            &job.descriptor,
            &job.command_text,
            job.events.as_ref(),
            job.classifier,
            RetryPolicy {
                timeout: Duration::MAX,
                ..job.policy
            },
            &mut attempt,
        )
        .await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                job.events.error(&format!(
                    "{} stopped after rows were delivered: {}; ConnectionString: {}; Command: {}",
                    job.operation,
                    err.message_text(),
                    job.descriptor.masked_connection_string(),
                    job.command_text
                ));
                Some(err)
            }
            Err(report) => Some(report.into_error()),
        };
        if let Some(err) = failure {
            let _ = error_tx.send(Err(err)).await;
        }
    });

    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

/// Uniform contract over the SQL Server and Postgres engines.
#[async_trait]
pub trait DbExecutor: Send + Sync {
    fn descriptor(&self) -> &ConnectionDescriptor;

    fn events(&self) -> &dyn EventSink;

    fn server_kind(&self) -> ServerKind {
        self.descriptor().server_kind()
    }

    /// Open a connection and report the server version.
    async fn test_connection(&self, options: &ExecOptions) -> ExecutionResult<String>;

    /// Run a text command and return the result sets `shape` asks for.
    ///
    /// # Errors
    /// Returns `SqlExecError::Misuse` when `command` is a procedure or was built for
    /// the other engine. Operational failures are reported in the result.
    async fn execute_query(
        &self,
        command: &mut Command,
        shape: ResultShape,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<DataSet>, SqlExecError>;

    /// Call a stored procedure, copy outputs back into `command` and return its data.
    ///
    /// # Errors
    /// Returns `SqlExecError::Misuse` when `command` is not a procedure, was built
    /// for the other engine or names an unsafe identifier.
    async fn execute_procedure(
        &self,
        command: &mut Command,
        shape: ResultShape,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<DataSet>, SqlExecError>;

    /// Lazily stream the rows of a text command.
    ///
    /// Attempts are retried until the first row arrives; after that a failure ends
    /// the stream with a single `Err` item.
    ///
    /// # Errors
    /// Returns `SqlExecError::Misuse` for procedures or commands built for the other engine.
    async fn get_query_stream(
        &self,
        command: Command,
        options: &ExecOptions,
    ) -> Result<RowStream, SqlExecError>;

    /// A command for this engine, using the descriptor's timeout.
    fn create_command(&self, text: &str, kind: CommandKind) -> Command {
        let mut command = Command::new(text, kind, self.server_kind());
        command.set_timeout_secs(self.descriptor().timeout_secs());
        command
    }

    /// First column of the first row.
    ///
    /// # Errors
    /// See [`DbExecutor::execute_query`].
    async fn get_query_scalar(
        &self,
        command: &mut Command,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<Option<RowValues>>, SqlExecError> {
        let result = self
            .execute_query(command, ResultShape::Scalar, options)
            .await?;
        Ok(result.map(|set| set.first().and_then(DataTable::scalar).cloned()))
    }

    /// Rows as strings with their column names.
    ///
    /// # Errors
    /// See [`DbExecutor::execute_query`].
    async fn get_query_results(
        &self,
        command: &mut Command,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<StringRows>, SqlExecError> {
        let result = self
            .execute_query(command, ResultShape::Table, options)
            .await?;
        Ok(result.map(|set| set.first().map(StringRows::from).unwrap_or_default()))
    }

    /// First result set as a typed table.
    ///
    /// # Errors
    /// See [`DbExecutor::execute_query`].
    async fn get_query_table(
        &self,
        command: &mut Command,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<DataTable>, SqlExecError> {
        let result = self
            .execute_query(command, ResultShape::Table, options)
            .await?;
        Ok(result.map(|set| set.tables.into_iter().next().unwrap_or_default()))
    }

    /// Every result set.
    ///
    /// # Errors
    /// See [`DbExecutor::execute_query`].
    async fn get_query_dataset(
        &self,
        command: &mut Command,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<DataSet>, SqlExecError> {
        self.execute_query(command, ResultShape::DataSet, options)
            .await
    }

    /// # Errors
    /// See [`DbExecutor::execute_query`].
    async fn get_query_scalar_sql(
        &self,
        sql: &str,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<Option<RowValues>>, SqlExecError> {
        let mut command = self.create_command(sql, CommandKind::Text);
        self.get_query_scalar(&mut command, options).await
    }

    /// # Errors
    /// See [`DbExecutor::execute_query`].
    async fn get_query_results_sql(
        &self,
        sql: &str,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<StringRows>, SqlExecError> {
        let mut command = self.create_command(sql, CommandKind::Text);
        self.get_query_results(&mut command, options).await
    }

    /// # Errors
    /// See [`DbExecutor::execute_query`].
    async fn get_query_table_sql(
        &self,
        sql: &str,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<DataTable>, SqlExecError> {
        let mut command = self.create_command(sql, CommandKind::Text);
        self.get_query_table(&mut command, options).await
    }

    /// # Errors
    /// See [`DbExecutor::execute_query`].
    async fn get_query_dataset_sql(
        &self,
        sql: &str,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<DataSet>, SqlExecError> {
        let mut command = self.create_command(sql, CommandKind::Text);
        self.get_query_dataset(&mut command, options).await
    }

    /// Call a procedure for its side effects; the result carries the return code and,
    /// on failure, the error message.
    ///
    /// # Errors
    /// See [`DbExecutor::execute_procedure`].
    async fn execute_sp(
        &self,
        command: &mut Command,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<()>, SqlExecError> {
        let result = self
            .execute_procedure(command, ResultShape::NoData, options)
            .await?;
        Ok(result.map(|_| ()))
    }

    /// Call a procedure and return its first result set as strings.
    ///
    /// # Errors
    /// See [`DbExecutor::execute_procedure`].
    async fn execute_sp_data(
        &self,
        command: &mut Command,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<StringRows>, SqlExecError> {
        let result = self
            .execute_procedure(command, ResultShape::Table, options)
            .await?;
        Ok(result.map(|set| set.first().map(StringRows::from).unwrap_or_default()))
    }

    /// # Errors
    /// See [`DbExecutor::execute_procedure`].
    async fn execute_sp_table(
        &self,
        command: &mut Command,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<DataTable>, SqlExecError> {
        let result = self
            .execute_procedure(command, ResultShape::Table, options)
            .await?;
        Ok(result.map(|set| set.tables.into_iter().next().unwrap_or_default()))
    }

    /// # Errors
    /// See [`DbExecutor::execute_procedure`].
    async fn execute_sp_dataset(
        &self,
        command: &mut Command,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<DataSet>, SqlExecError> {
        self.execute_procedure(command, ResultShape::DataSet, options)
            .await
    }
}

/// Stream a text command's rows through `mapper`.
///
/// ```rust,no_run
/// use futures_util::StreamExt;
/// use resilient_sql::prelude::*;
///
/// # async fn demo(executor: &dyn DbExecutor) -> Result<(), SqlExecError> {
/// let command = executor.create_command("SELECT job, state FROM t_jobs", CommandKind::Text);
/// let mut jobs = run_lazy_query(executor, command, &ExecOptions::default(), |row| {
///     row.get("job").and_then(RowValues::as_int).copied().unwrap_or_default()
/// })
/// .await?;
/// while let Some(job) = jobs.next().await {
///     println!("{}", job?);
/// }
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// See [`DbExecutor::get_query_stream`].
pub async fn run_lazy_query<T, F>(
    executor: &dyn DbExecutor,
    command: Command,
    options: &ExecOptions,
    mut mapper: F,
) -> Result<BoxStream<'static, Result<T, SqlExecError>>, SqlExecError>
where
    T: Send + 'static,
    F: FnMut(&CustomDbRow) -> T + Send + 'static,
{
    let rows = executor.get_query_stream(command, options).await?;
    Ok(rows.map(move |item| item.map(|row| mapper(&row))).boxed())
}

/// Result of a procedure whose attempts all succeeded: data plus the return code
/// found in its parameters.
pub(crate) fn procedure_result(command: &Command, data: DataSet) -> ExecutionResult<DataSet> {
    ExecutionResult::ok(data, command.return_code())
}

/// Result of a text query.
pub(crate) fn query_result(data: DataSet) -> ExecutionResult<DataSet> {
    ExecutionResult::ok(data, RET_VAL_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorClass;

    #[test]
    fn failed_results_carry_report() {
        let report = FailureReport {
            return_code: -5,
            message: "excessive retries".into(),
            class: ErrorClass::Transient,
            attempts: 3,
            error: SqlExecError::Timeout(30),
        };
        let result: ExecutionResult<StringRows> = ExecutionResult::failed(report);
        assert!(!result.success);
        assert_eq!(result.return_code, -5);
        assert!(result.data.is_empty());
        assert_eq!(result.error_message.as_deref(), Some("excessive retries"));
    }

    #[test]
    fn wrong_engine_or_kind_is_misuse() {
        let cmd = Command::new("get_jobs", CommandKind::StoredProcedure, ServerKind::Postgres);
        assert!(ensure_command(&cmd, ServerKind::Postgres, CommandKind::StoredProcedure).is_ok());
        assert!(matches!(
            ensure_command(&cmd, ServerKind::SqlServer, CommandKind::StoredProcedure),
            Err(SqlExecError::Misuse(_))
        ));
        assert!(matches!(
            ensure_command(&cmd, ServerKind::Postgres, CommandKind::Text),
            Err(SqlExecError::Misuse(_))
        ));
    }

    #[test]
    fn scalar_shape_reads_one_row() {
        let opts = ExecOptions::default().with_max_rows(50);
        assert_eq!(ResultShape::Scalar.row_limit(&opts), 1);
        assert_eq!(ResultShape::Table.row_limit(&opts), 50);
        assert!(!ResultShape::NoData.wants_rows());
    }

    struct Feed {
        rows: Vec<i64>,
        fail_after: Option<usize>,
        sender: RowSender,
        calls: u32,
    }

    #[async_trait]
    impl Attempt for Feed {
        type Output = Result<(), SqlExecError>;

        async fn run(&mut self) -> Result<Self::Output, SqlExecError> {
            self.calls += 1;
            let names = Arc::new(vec!["n".to_string()]);
            for (i, n) in self.rows.iter().enumerate() {
                if self.fail_after == Some(i) {
                    let err = SqlExecError::ExecutionError("connection reset".into());
                    if self.sender.has_delivered() {
                        return Ok(Err(err));
                    }
                    return Err(err);
                }
                let row = CustomDbRow::new(Arc::clone(&names), vec![RowValues::Int(*n)]);
                if !self.sender.send(row).await {
                    break;
                }
            }
            Ok(Ok(()))
        }
    }

    fn job(events: Arc<dyn EventSink>) -> StreamJob {
        StreamJob {
            operation: "GetQueryStream",
            descriptor: ConnectionDescriptor::with_kind("host=db dbname=dms", ServerKind::Postgres),
            command_text: "select n from t".into(),
            events,
            classifier: &crate::classify::PostgresClassifier,
            policy: RetryPolicy {
                attempts: 3,
                delay: Duration::from_secs(1),
                timeout: Duration::from_secs(30),
            },
        }
    }

    #[tokio::test]
    async fn stream_respects_row_limit() {
        let events = crate::events::RecordingEvents::new();
        let stream = spawn_row_stream(job(events), 2, |sender| Feed {
            rows: vec![1, 2, 3, 4],
            fail_after: None,
            sender,
            calls: 0,
        });
        let rows: Vec<_> = stream.collect().await;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn failure_after_delivery_ends_with_one_error() {
        let events = crate::events::RecordingEvents::new();
        let stream = spawn_row_stream(job(events.clone()), 0, |sender| Feed {
            rows: vec![1, 2, 3],
            fail_after: Some(2),
            sender,
            calls: 0,
        });
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        assert!(matches!(items[2], Err(SqlExecError::ExecutionError(_))));
        assert_eq!(
            events.messages(crate::events::EventLevel::Error).len(),
            1,
            "no retry once rows were delivered"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_before_first_row_is_retried_then_reported() {
        let events = crate::events::RecordingEvents::new();
        let stream = spawn_row_stream(job(events), 0, |sender| Feed {
            rows: vec![1],
            fail_after: Some(0),
            sender,
            calls: 0,
        });
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(SqlExecError::RetriesExhausted { return_code: -5, .. })
        ));
    }
}
