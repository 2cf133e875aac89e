#![cfg(feature = "mssql")]

// Runs against a real server when RESILIENT_SQL_MSSQL holds an ADO.NET connection string, e.g.
// RESILIENT_SQL_MSSQL="Server=localhost,1433;Database=tempdb;User Id=sa;Password=..."

use resilient_sql::prelude::*;
use tokio::runtime::Runtime;

const CREATE_PROC: &str = r"
CREATE OR ALTER PROCEDURE dbo.rs_test_add
    @a int,
    @b int,
    @sum int OUTPUT,
    @message varchar(64) OUTPUT
AS
BEGIN
    SET @sum = @a + @b;
    SET @message = 'added';
    SELECT @a AS A, @b AS B
    UNION ALL SELECT @b, @a;
    RETURN 7;
END
";

#[test]
fn live_mssql_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let Ok(conn) = std::env::var("RESILIENT_SQL_MSSQL") else {
        return Ok(());
    };
    let rt = Runtime::new()?;
    rt.block_on(async {
        let events = RecordingEvents::new();
        let sink: std::sync::Arc<dyn EventSink> = events.clone();
        let ms = MssqlExecutor::new(
            ConnectionDescriptor::with_kind(&conn, ServerKind::SqlServer),
            sink,
        );
        let opts = ExecOptions::default().with_retry_count(1);

        let version = ms.test_connection(&opts).await;
        assert!(version.success, "{:?}", version.error_message);
        assert!(version.data.contains("Microsoft SQL Server"));

        let created = ms.get_query_dataset_sql(CREATE_PROC, &opts).await?;
        assert!(created.success, "{:?}", created.error_message);

        let mut command = ms.create_command("dbo.rs_test_add", CommandKind::StoredProcedure);
        add_parameter(&mut command, "@a", SqlType::Int, None, Some(RowValues::Int(2)), ParamDirection::Input);
        add_parameter(&mut command, "@b", SqlType::Int, None, Some(RowValues::Int(3)), ParamDirection::Input);
        add_parameter(&mut command, "@sum", SqlType::Int, None, None, ParamDirection::Output);
        add_parameter(&mut command, "@message", SqlType::VarChar, Some(64), None, ParamDirection::Output);
        add_parameter(&mut command, "@Return", SqlType::Int, None, None, ParamDirection::ReturnValue);

        let rows = ms.execute_sp_data(&mut command, &opts).await?;
        assert!(rows.success, "{:?}", rows.error_message);
        assert_eq!(rows.return_code, 7);
        assert_eq!(rows.data.column_names, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(rows.data.len(), 2);
        assert_eq!(rows.data.column_i64(1, "a", 0)?, 3);
        assert_eq!(command.parameter("@sum").map(|p| p.value.clone()), Some(RowValues::Int(5)));
        assert_eq!(
            command.parameter("@message").map(|p| p.value.clone()),
            Some(RowValues::Text("added".to_string()))
        );

        let limited = ms
            .execute_sp_table(&mut command, &opts.clone().with_max_rows(1))
            .await?;
        assert_eq!(limited.data.len(), 1);
        assert_eq!(limited.return_code, 7);

        let mut query = ms.create_command("SELECT @P1 + 1 AS Next", CommandKind::Text);
        add_parameter(&mut query, "@P1", SqlType::Int, None, Some(RowValues::Int(41)), ParamDirection::Input);
        let next = ms.get_query_scalar(&mut query, &opts).await?;
        assert_eq!(next.data, Some(RowValues::Int(42)));

        let missing = ms
            .get_query_scalar_sql("SELECT * FROM dbo.rs_test_no_such_table", &opts.clone().with_retry_count(3))
            .await?;
        assert_eq!(missing.return_code, RET_VAL_UNDEFINED_ERROR);
        assert_eq!(events.messages(EventLevel::Error).len(), 1);

        ms.get_query_dataset_sql("DROP PROCEDURE IF EXISTS dbo.rs_test_add", &opts)
            .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
