use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{TryStreamExt, pin_mut};

use super::config::connect;
use super::params::Params;
use super::procedure::{
    RenderedCall, copy_outputs, normalize_parameters, render_call, select_cursor,
};
use super::query::{
    RawText, is_refcursor, query_table, quote_cursor_name, row_values, simple_query_dataset,
    table_for_columns,
};
use crate::classify::PostgresClassifier;
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

static CLASSIFIER: PostgresClassifier = PostgresClassifier;

/// Executor for Postgres-family servers.
///
/// Every attempt opens its own connection. Procedures that return data run inside a
/// transaction so a refcursor they open can be fetched before it is closed.
#[derive(Clone)]
pub struct PostgresExecutor {
    descriptor: ConnectionDescriptor,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PostgresExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresExecutor")
            .field("connection", &self.descriptor.masked_connection_string())
            .finish_non_exhaustive()
    }
}

impl PostgresExecutor {
    #[must_use]
    pub fn new(descriptor: ConnectionDescriptor, events: Arc<dyn EventSink>) -> Self {
        Self { descriptor, events }
    }

    /// Executor for `connection_string`, logging through `tracing`.
    #[must_use]
    pub fn from_connection_string(connection_string: &str) -> Self {
        Self::new(
            ConnectionDescriptor::with_kind(connection_string, ServerKind::Postgres),
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
        let client = connect(self.descriptor).await?;
        let row = client.query_one("SELECT version()", &[]).await?;
        Ok(row.try_get::<_, String>(0)?)
    }
}

struct QueryAttempt<'a> {
    descriptor: &'a ConnectionDescriptor,
    command: &'a Command,
    shape: ResultShape,
    max_rows: usize,
    capitalize: bool,
}

#[async_trait]
impl Attempt for QueryAttempt<'_> {
    type Output = DataSet;

    async fn run(&mut self) -> Result<DataSet, SqlExecError> {
        let client = connect(self.descriptor).await?;
        let sql = self.command.text();
        if self.shape.wants_all_sets() && self.command.parameters().is_empty() {
            return simple_query_dataset(&client, sql, self.max_rows, self.capitalize).await;
        }

        let params = Params::from_parameters(self.command.parameters());
        let table = query_table(
            &client,
            sql,
            &params,
            self.max_rows,
            self.capitalize.then_some(sql),
        )
        .await?;
        Ok(DataSet {
            tables: vec![table],
        })
    }
}

struct ProcedureAttempt<'a> {
    descriptor: &'a ConnectionDescriptor,
    command: &'a mut Command,
    call: RenderedCall,
    shape: ResultShape,
    max_rows: usize,
    events: &'a dyn EventSink,
}

impl ProcedureAttempt<'_> {
    /// Name of the cursor to fetch from the output row, per [`select_cursor`].
    fn cursor_name(&self, row: &tokio_postgres::Row) -> Result<Option<String>, SqlExecError> {
        let mut cursors = Vec::new();
        for (idx, column) in row.columns().iter().enumerate() {
            if is_refcursor(column.type_()) {
                let name = row
                    .try_get::<_, Option<RawText>>(idx)?
                    .map(|RawText(name)| name);
                cursors.push((column.name(), name));
            }
        }
        let cursors: Vec<(&str, Option<&str>)> = cursors
            .iter()
            .map(|(column, name)| (*column, name.as_deref()))
            .collect();
        Ok(select_cursor(self.command.text(), &cursors, self.events).map(str::to_string))
    }

    async fn run_with_data(
        &mut self,
        client: &mut tokio_postgres::Client,
    ) -> Result<DataSet, SqlExecError> {
        let tx = client.transaction().await?;
        let stmt = tx.prepare(&self.call.sql).await?;
        let rows = {
            let params = Params::from_values(
                self.call
                    .bound
                    .iter()
                    .map(|&i| &self.command.parameters()[i].value),
            );
            tx.query(&stmt, params.as_refs()).await?
        };

        let mut data = DataSet::default();
        if let Some(row) = rows.first() {
            copy_outputs(self.command, row)?;
            match self.cursor_name(row)? {
                Some(cursor) => {
                    let fetch = format!("FETCH ALL FROM {}", quote_cursor_name(&cursor));
                    let table =
                        query_table(&tx, &fetch, &Params::from_values([]), self.max_rows, None)
                            .await?;
                    data.tables.push(table);
                }
                None => {
                    let mut table: DataTable = table_for_columns(stmt.columns(), None);
                    table.add_row_values(row_values(row)?);
                    data.tables.push(table);
                }
            }
        }
        tx.commit().await?;
        Ok(data)
    }

    async fn run_without_data(
        &mut self,
        client: &tokio_postgres::Client,
    ) -> Result<DataSet, SqlExecError> {
        let rows = {
            let params = Params::from_values(
                self.call
                    .bound
                    .iter()
                    .map(|&i| &self.command.parameters()[i].value),
            );
            client.query(&self.call.sql, params.as_refs()).await?
        };
        if let Some(row) = rows.first() {
            copy_outputs(self.command, row)?;
        }
        Ok(DataSet::default())
    }
}

#[async_trait]
impl Attempt for ProcedureAttempt<'_> {
    type Output = DataSet;

    async fn run(&mut self) -> Result<DataSet, SqlExecError> {
        let mut client = connect(self.descriptor).await?;
        if self.shape.wants_rows() {
            self.run_with_data(&mut client).await
        } else {
            self.run_without_data(&client).await
        }
    }
}

struct StreamAttempt {
    descriptor: ConnectionDescriptor,
    command: Command,
    setup_timeout: Duration,
    capitalize: bool,
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
        let sql = self.command.text();
        let setup = async {
            let client = connect(&self.descriptor).await?;
            let stmt = client.prepare(sql).await?;
            let table = table_for_columns(stmt.columns(), self.capitalize.then_some(sql));
            let params = Params::from_parameters(self.command.parameters());
            let rows = client
                .query_raw(&stmt, params.as_refs().iter().copied())
                .await?;
            Ok::<_, SqlExecError>((client, table, rows))
        };
        let (_client, table, rows) = tokio::time::timeout(self.setup_timeout, setup)
            .await
            .map_err(|_| SqlExecError::Timeout(self.setup_timeout.as_secs()))??;

        pin_mut!(rows);
        loop {
            let row = match rows.try_next().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return self.after_rows(e.into()),
            };
            let values = match row_values(&row) {
                Ok(values) => values,
                Err(e) => return self.after_rows(e),
            };
            if !self.sender.send(table.row_from(values)).await {
                break;
            }
        }
        Ok(Ok(()))
    }
}

#[async_trait]
impl DbExecutor for PostgresExecutor {
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
            "SELECT version()",
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
        ensure_command(command, ServerKind::Postgres, CommandKind::Text)?;
        let policy = RetryPolicy::from_options(options, command.timeout_secs());
        let mut attempt = QueryAttempt {
            descriptor: &self.descriptor,
            command,
            shape,
            max_rows: shape.row_limit(options),
            capitalize: options.capitalize_column_names(),
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
        ensure_command(command, ServerKind::Postgres, CommandKind::StoredProcedure)?;
        normalize_parameters(command);
        let call = render_call(command)?;
        command.set_final_text(call.sql.clone());
        let display = call.sql.clone();

        let policy = RetryPolicy::from_options(options, command.timeout_secs());
        let mut attempt = ProcedureAttempt {
            descriptor: &self.descriptor,
            command: &mut *command,
            call,
            shape,
            max_rows: shape.row_limit(options),
            events: self.events.as_ref(),
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
        ensure_command(&command, ServerKind::Postgres, CommandKind::Text)?;
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
        let capitalize = options.capitalize_column_names();
        Ok(spawn_row_stream(job, options.max_rows(), move |sender| {
            StreamAttempt {
                descriptor,
                command,
                setup_timeout: policy.timeout,
                capitalize,
                sender,
            }
        }))
    }
}
