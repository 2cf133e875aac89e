use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use tiberius::{Query, QueryItem};
use tokio::time::{Instant, timeout_at};

use super::command::{RenderedBatch, copy_outputs, render_batch};
use super::config::connect;
use super::params::{bind_parameters, bind_values};
use super::query::{ReadLimit, read_results, row_values, table_for_columns};
use crate::classify::MssqlClassifier;
use crate::command::{Command, CommandKind};
use crate::connection::ConnectionDescriptor;
use crate::error::SqlExecError;
use crate::events::{EventSink, default_sink};
use crate::executor::{
    DbExecutor, ExecutionResult, ResultShape, RowSender, StreamJob, ensure_command,
    procedure_result, query_result, retry_call, spawn_row_stream,
};
use crate::options::ExecOptions;
use crate::results::{DataSet, DataTable, RowStream};
use crate::retry::{Attempt, RetryPolicy};
use crate::server_kind::ServerKind;

static CLASSIFIER: MssqlClassifier = MssqlClassifier;

/// Executor for SQL Server.
///
/// Every attempt opens its own connection. Procedures run as a single batch whose
/// last result set carries the return value and output parameters.
#[derive(Clone)]
pub struct MssqlExecutor {
    descriptor: ConnectionDescriptor,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for MssqlExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlExecutor")
            .field("connection", &self.descriptor.masked_connection_string())
            .finish_non_exhaustive()
    }
}

impl MssqlExecutor {
    #[must_use]
    pub fn new(descriptor: ConnectionDescriptor, events: Arc<dyn EventSink>) -> Self {
        Self { descriptor, events }
    }

    /// Executor for `connection_string`, logging through `tracing`.
    #[must_use]
    pub fn from_connection_string(connection_string: &str) -> Self {
        Self::new(
            ConnectionDescriptor::with_kind(connection_string, ServerKind::SqlServer),
            default_sink(),
        )
    }
}

struct VersionAttempt<'a> {
    descriptor: &'a ConnectionDescriptor,
}

#[async_trait]
impl Attempt for VersionAttempt<'_> {
    type Output = String;

    async fn run(&mut self) -> Result<String, SqlExecError> {
        let mut client = connect(self.descriptor).await?;
        let row = client.simple_query("SELECT @@VERSION").await?.into_row().await?;
        let version = match row {
            Some(row) => row.try_get::<&str, _>(0)?.unwrap_or_default().to_string(),
            None => String::new(),
        };
        Ok(version)
    }
}

struct QueryAttempt<'a> {
    descriptor: &'a ConnectionDescriptor,
    command: &'a Command,
    limit: ReadLimit,
}

#[async_trait]
impl Attempt for QueryAttempt<'_> {
    type Output = DataSet;

    async fn run(&mut self) -> Result<DataSet, SqlExecError> {
        let mut client = connect(self.descriptor).await?;
        let mut query = Query::new(self.command.text());
        bind_parameters(&mut query, self.command.parameters());
        let stream = query.query(&mut client).await?;
        read_results(stream, self.limit).await
    }
}

struct ProcedureAttempt<'a> {
    descriptor: &'a ConnectionDescriptor,
    command: &'a mut Command,
    batch: RenderedBatch,
    shape: ResultShape,
    max_rows: usize,
}

#[async_trait]
impl Attempt for ProcedureAttempt<'_> {
    type Output = DataSet;

    async fn run(&mut self) -> Result<DataSet, SqlExecError> {
        let mut client = connect(self.descriptor).await?;
        let mut data = {
            let mut query = Query::new(self.batch.sql.as_str());
            bind_values(
                &mut query,
                self.batch
                    .bound
                    .iter()
                    .map(|&i| &self.command.parameters()[i].value),
            );
            let stream = query.query(&mut client).await?;
            // keep reading past the row limit so the output set is reached
            let max_rows_per_set = if self.shape.wants_rows() { self.max_rows } else { 1 };
            read_results(stream, ReadLimit::AllSets { max_rows_per_set }).await?
        };

        if self.batch.has_output_set() {
            let outputs: Option<DataTable> = data.tables.pop();
            if let Some(row) = outputs.as_ref().and_then(|t| t.rows().first()) {
                copy_outputs(self.command, &self.batch, &row.rows);
            }
        }

        match self.shape {
            ResultShape::NoData => data.tables.clear(),
            ResultShape::Scalar | ResultShape::Table => data.tables.truncate(1),
            ResultShape::DataSet => {}
        }
        Ok(data)
    }
}

struct StreamAttempt {
    descriptor: ConnectionDescriptor,
    command: Command,
    setup_timeout: Duration,
    sender: RowSender,
}

impl StreamAttempt {
    fn after_rows(&self, err: SqlExecError) -> Result<Result<(), SqlExecError>, SqlExecError> {
        if self.sender.has_delivered() {
            Ok(Err(err))
        } else {
            Err(err)
        }
    }
}

#[async_trait]
impl Attempt for StreamAttempt {
    type Output = Result<(), SqlExecError>;

    async fn run(&mut self) -> Result<Self::Output, SqlExecError> {
        let deadline = Instant::now() + self.setup_timeout;
        let secs = self.setup_timeout.as_secs();
        let elapsed = move |_| SqlExecError::Timeout(secs);

        let mut client = timeout_at(deadline, connect(&self.descriptor))
            .await
            .map_err(elapsed)??;
        let mut query = Query::new(self.command.text().to_string());
        bind_parameters(&mut query, self.command.parameters());
        let mut stream = timeout_at(deadline, query.query(&mut client))
            .await
            .map_err(elapsed)??;

        let mut table: Option<DataTable> = None;
        loop {
            let item = match stream.try_next().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => return self.after_rows(e.into()),
            };
            match item {
                QueryItem::Metadata(meta) => {
                    if meta.result_index() > 0 {
                        break;
                    }
                    table = Some(table_for_columns(meta.columns()));
                }
                QueryItem::Row(row) => {
                    let Some(table) = table.as_ref() else {
                        continue;
                    };
                    let values = match row_values(&row) {
                        Ok(values) => values,
                        Err(e) => return self.after_rows(e),
                    };
                    if !self.sender.send(table.row_from(values)).await {
                        break;
                    }
                }
            }
        }
        Ok(Ok(()))
    }
}

#[async_trait]
impl DbExecutor for MssqlExecutor {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn events(&self) -> &dyn EventSink {
        self.events.as_ref()
    }

    async fn test_connection(&self, options: &ExecOptions) -> ExecutionResult<String> {
        let policy = RetryPolicy::from_options(options, self.descriptor.timeout_secs());
        let mut attempt = VersionAttempt {
            descriptor: &self.descriptor,
        };
        match retry_call(
            "TestDatabaseConnection",
            &self.descriptor,
            "SELECT @@VERSION",
            self.events.as_ref(),
            &CLASSIFIER,
            policy,
            &mut attempt,
        )
        .await
        {
            Ok(version) => {
                self.events.debug(&format!(
                    "Connected to {} on {}",
                    self.descriptor.database(),
                    self.descriptor.server()
                ));
                ExecutionResult::ok(version, 0)
            }
            Err(report) => ExecutionResult::failed(report),
        }
    }

    async fn execute_query(
        &self,
        command: &mut Command,
        shape: ResultShape,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<DataSet>, SqlExecError> {
        ensure_command(command, ServerKind::SqlServer, CommandKind::Text)?;
        let policy = RetryPolicy::from_options(options, command.timeout_secs());
        let max_rows = shape.row_limit(options);
        let limit = if shape.wants_all_sets() {
            ReadLimit::AllSets {
                max_rows_per_set: max_rows,
            }
        } else {
            ReadLimit::FirstSet { max_rows }
        };
        let mut attempt = QueryAttempt {
            descriptor: &self.descriptor,
            command,
            limit,
        };
        let outcome = retry_call(
            "GetQueryResults",
            &self.descriptor,
            command.display_text(),
            self.events.as_ref(),
            &CLASSIFIER,
            policy,
            &mut attempt,
        )
        .await;
        Ok(match outcome {
            Ok(data) => query_result(data),
            Err(report) => ExecutionResult::failed(report),
        })
    }

    async fn execute_procedure(
        &self,
        command: &mut Command,
        shape: ResultShape,
        options: &ExecOptions,
    ) -> Result<ExecutionResult<DataSet>, SqlExecError> {
        ensure_command(command, ServerKind::SqlServer, CommandKind::StoredProcedure)?;
        let batch = render_batch(command)?;
        command.set_final_text(batch.sql.clone());
        let display = batch.sql.clone();

        let policy = RetryPolicy::from_options(options, command.timeout_secs());
        let mut attempt = ProcedureAttempt {
            descriptor: &self.descriptor,
            command: &mut *command,
            batch,
            shape,
            max_rows: shape.row_limit(options),
        };
        let outcome = retry_call(
            "ExecuteSP",
            &self.descriptor,
            &display,
            self.events.as_ref(),
            &CLASSIFIER,
            policy,
            &mut attempt,
        )
        .await;
        Ok(match outcome {
            Ok(data) => procedure_result(command, data),
            Err(report) => ExecutionResult::failed(report),
        })
    }

    async fn get_query_stream(
        &self,
        command: Command,
        options: &ExecOptions,
    ) -> Result<RowStream, SqlExecError> {
        ensure_command(&command, ServerKind::SqlServer, CommandKind::Text)?;
        let policy = RetryPolicy::from_options(options, command.timeout_secs());
        let job = StreamJob {
            operation: "GetQueryStream",
            descriptor: self.descriptor.clone(),
            command_text: command.display_text().to_string(),
            events: Arc::clone(&self.events),
            classifier: &CLASSIFIER,
            policy,
        };
        let descriptor = self.descriptor.clone();
        Ok(spawn_row_stream(job, options.max_rows(), move |sender| {
            StreamAttempt {
                descriptor,
                command,
                setup_timeout: policy.timeout,
                sender,
            }
        }))
    }
}
