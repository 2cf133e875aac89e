#![cfg(all(feature = "postgres", feature = "mssql"))]

use std::sync::Arc;

use chrono::NaiveDate;
use futures_util::StreamExt;
use resilient_sql::prelude::*;
use tokio::runtime::Runtime;

// Nothing listens on port 1, so connects are refused at once.
const PG_REFUSED: &str = "host=127.0.0.1 port=1 dbname=x user=y password=hunter2";
const MSSQL_REFUSED: &str = "Server=127.0.0.1,1;Database=x;User Id=y;Password=hunter2";

fn quick_options(retry_count: u32) -> ExecOptions {
    ExecOptions::default()
        .with_retry_count(retry_count)
        .with_retry_delay_secs(1)
}

fn pg_executor(conn: &str, events: &Arc<RecordingEvents>) -> PostgresExecutor {
    let sink: Arc<dyn EventSink> = events.clone();
    PostgresExecutor::new(
        ConnectionDescriptor::with_kind(conn, ServerKind::Postgres),
        sink,
    )
}

fn mssql_executor(conn: &str, events: &Arc<RecordingEvents>) -> MssqlExecutor {
    let sink: Arc<dyn EventSink> = events.clone();
    MssqlExecutor::new(
        ConnectionDescriptor::with_kind(conn, ServerKind::SqlServer),
        sink,
    )
}

fn assert_no_password(events: &RecordingEvents) {
    for (_, message) in events.events() {
        assert!(!message.contains("hunter2"), "password leaked: {message}");
    }
}

#[test]
fn options_and_factory() -> Result<(), Box<dyn std::error::Error>> {
    let opts = ExecOptions::from_json(r#"{ "retry_count": 4, "retry_delay_secs": 0, "timeout_secs": 3 }"#)?;
    assert_eq!(opts.retry_count(), 4);
    assert_eq!(opts.retry_delay_secs(), 1);
    assert_eq!(opts.timeout_secs(), Some(10));
    assert!(opts.capitalize_column_names());

    let executor = create_executor(
        "DbServerType=SqlServer;Server=dms-sql;Database=DMS5;User Id=svc;Password=hunter2",
        default_sink(),
    )?;
    assert_eq!(executor.server_kind(), ServerKind::SqlServer);
    assert_eq!(executor.descriptor().database(), "DMS5");
    assert!(!executor.descriptor().masked_connection_string().contains("hunter2"));

    let command = executor.create_command("SELECT 1", CommandKind::Text);
    assert_eq!(command.server_kind(), ServerKind::SqlServer);
    assert_eq!(command.timeout_secs(), executor.descriptor().timeout_secs());
    Ok(())
}

#[test]
fn procedure_commands_report_their_return_code() {
    let events = RecordingEvents::new();
    let mut command = create_command(
        "get_job_steps",
        CommandKind::StoredProcedure,
        ServerKind::Postgres,
    );
    add_parameter(
        &mut command,
        "_job",
        SqlType::Int,
        None,
        Some(RowValues::Int(1234)),
        ParamDirection::Input,
    );
    add_parameter(&mut command, "_message", SqlType::Text, None, None, ParamDirection::InputOutput);
    assert!(
        add_parameter_by_type_name(
            &mut command,
            "_mode",
            "hyperloglog",
            None,
            ParamDirection::Input,
            events.as_ref(),
        )
        .is_none()
    );
    add_parameter_by_type_name(
        &mut command,
        "_returnCode",
        "text",
        None,
        ParamDirection::InputOutput,
        events.as_ref(),
    );

    assert_eq!(command.parameters().len(), 3);
    assert_eq!(command.parameter("_MESSAGE").map(|p| &p.value), Some(&RowValues::Text(String::new())));
    assert_eq!(events.messages(EventLevel::Warning).len(), 1);
    assert_eq!(command.return_code(), RET_VAL_OK);

    if let Some(param) = command.parameter_mut("_returnCode") {
        param.value = RowValues::Text("U5201".to_string());
    }
    assert_eq!(command.return_code(), 5201);
}

#[test]
fn string_rows_turn_nulls_into_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let mut table = DataTable::new(vec![
        DataColumn::new("Job", Some(SqlType::Int)),
        DataColumn::new("Finish", Some(SqlType::DateTime)),
        DataColumn::new("Comment", Some(SqlType::Text)),
    ]);
    table.add_row_values(vec![RowValues::Int(5), RowValues::Null, RowValues::Null]);

    let rows = StringRows::from(&table);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.get_value(0, "finish"), Some(""));
    assert_eq!(rows.column_i64(0, "JOB", 0)?, 5);
    assert_eq!(rows.column_str(0, "comment", "none"), "none");

    let fallback = NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or("bad date")?;
    assert_eq!(rows.column_datetime(0, "Finish", fallback)?, fallback);
    Ok(())
}

#[test]
fn misuse_is_rejected_before_connecting() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let events = RecordingEvents::new();
        let mssql = mssql_executor(MSSQL_REFUSED, &events);
        let mut pg_command = create_command("SELECT 1", CommandKind::Text, ServerKind::Postgres);
        assert!(matches!(
            mssql.get_query_table(&mut pg_command, &quick_options(1)).await,
            Err(SqlExecError::Misuse(_))
        ));

        let pg = pg_executor(PG_REFUSED, &events);
        let mut proc_command = pg.create_command("get_jobs", CommandKind::StoredProcedure);
        assert!(matches!(
            pg.get_query_results(&mut proc_command, &quick_options(1)).await,
            Err(SqlExecError::Misuse(_))
        ));
        assert!(matches!(
            pg.get_query_stream(proc_command, &quick_options(1)).await,
            Err(SqlExecError::Misuse(_))
        ));

        let mut bad_name = pg.create_command("jobs; DROP TABLE t", CommandKind::StoredProcedure);
        assert!(matches!(
            pg.execute_sp(&mut bad_name, &quick_options(1)).await,
            Err(SqlExecError::Misuse(_))
        ));

        assert!(events.events().is_empty());
    });
    Ok(())
}

#[test]
fn fatal_errors_are_not_retried() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let events = RecordingEvents::new();
        let pg = pg_executor("host=127.0.0.1 user=y password=hunter2", &events);

        let result = pg
            .get_query_scalar_sql("SELECT 1", &quick_options(3))
            .await?;
        assert!(!result.success);
        assert_eq!(result.return_code, RET_VAL_UNDEFINED_ERROR);
        assert_eq!(result.data, None);
        assert!(result.error_message.as_deref().unwrap_or_default().contains("dbname"));

        let errors = events.messages(EventLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Fatal error in GetQueryResults"));
        assert_no_password(&events);
        Ok::<(), SqlExecError>(())
    })?;
    Ok(())
}

#[test]
fn refused_postgres_connections_exhaust_retries() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let events = RecordingEvents::new();
        let pg = pg_executor(PG_REFUSED, &events);

        let result = pg.test_connection(&quick_options(2)).await;
        assert!(!result.success);
        assert_eq!(result.return_code, RET_VAL_EXCESSIVE_RETRIES);

        let errors = events.messages(EventLevel::Error);
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("Error in TestDatabaseConnection"));
        assert!(errors[0].contains("RetryCount = 1"));
        assert!(errors[1].contains("RetryCount = 0"));
        assert!(errors[2].contains("failed after 2 attempt(s), excessive retries"));
        assert_no_password(&events);
    });
    Ok(())
}

#[test]
fn refused_sql_server_connections_exhaust_retries() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let events = RecordingEvents::new();
        let mssql = mssql_executor(MSSQL_REFUSED, &events);

        let mut command = mssql.create_command("dbo.AddUpdateJob", CommandKind::StoredProcedure);
        add_parameter(
            &mut command,
            "@job",
            SqlType::Int,
            None,
            Some(RowValues::Int(1)),
            ParamDirection::Input,
        );
        let result = mssql.execute_sp(&mut command, &quick_options(2)).await?;
        assert!(!result.success);
        assert_eq!(result.return_code, RET_VAL_EXCESSIVE_RETRIES);
        assert!(command.final_text().is_some_and(|sql| sql.contains("EXEC")));

        let errors = events.messages(EventLevel::Error);
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|m| m.contains("ExecuteSP")));
        assert_no_password(&events);
        Ok::<(), SqlExecError>(())
    })?;
    Ok(())
}

#[test]
fn stream_reports_exhaustion_as_its_only_item() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let events = RecordingEvents::new();
        let pg = pg_executor(PG_REFUSED, &events);

        let command = pg.create_command("SELECT job FROM t_jobs", CommandKind::Text);
        let mut rows = pg.get_query_stream(command, &quick_options(1)).await?;
        match rows.next().await {
            Some(Err(SqlExecError::RetriesExhausted { return_code, .. })) => {
                assert_eq!(return_code, RET_VAL_EXCESSIVE_RETRIES);
            }
            Some(Err(other)) => panic!("unexpected error: {other}"),
            Some(Ok(row)) => panic!("unexpected row: {:?}", row.to_strings()),
            None => panic!("stream ended without an error"),
        }
        assert!(rows.next().await.is_none());
        assert_no_password(&events);
        Ok::<(), SqlExecError>(())
    })?;
    Ok(())
}
