//! Retrying execution layer for queries and stored procedures on SQL Server
//! (tiberius) and PostgreSQL (tokio-postgres).
//!
//! Callers get a [`DbExecutor`] from [`create_executor`], build a [`Command`] and call
//! one of the entry points. Each call opens a fresh connection per attempt, retries
//! transient failures and deadlocks, stops at once on fatal errors, and reports the
//! outcome as an [`ExecutionResult`] with a return code.

pub mod capitalize;
pub mod classify;
pub mod command;
pub mod connection;
pub mod error;
pub mod events;
pub mod executor;
pub mod factory;
pub mod options;
pub mod prelude;
pub mod results;
pub mod retry;
pub mod return_code;
pub mod server_kind;
pub mod types;

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use command::{Command, CommandKind, Parameter};
pub use error::SqlExecError;
pub use executor::{DbExecutor, ExecutionResult, ResultShape, run_lazy_query};
pub use factory::create_executor;
