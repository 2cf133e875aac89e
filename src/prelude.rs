//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::command::{
    Command, CommandKind, Parameter, add_parameter, add_parameter_by_type_name, create_command,
};
pub use crate::connection::{ConnectionDescriptor, mask_password};
pub use crate::error::SqlExecError;
pub use crate::events::{EventLevel, EventSink, RecordingEvents, TracingEvents, default_sink};
pub use crate::executor::{DbExecutor, ExecutionResult, ResultShape, run_lazy_query};
pub use crate::factory::create_executor;
pub use crate::options::ExecOptions;
pub use crate::results::{CustomDbRow, DataColumn, DataSet, DataTable, RowStream, StringRows};
pub use crate::return_code::{
    RET_VAL_DEADLOCK, RET_VAL_EXCESSIVE_RETRIES, RET_VAL_OK, RET_VAL_UNDEFINED_ERROR,
};
pub use crate::server_kind::{ServerKind, sniff_server_kind};
pub use crate::types::{ParamDirection, RowValues, SqlType};

#[cfg(feature = "mssql")]
pub use crate::mssql::MssqlExecutor;
#[cfg(feature = "postgres")]
pub use crate::postgres::PostgresExecutor;
