// MSSQL module - runs commands through tiberius
//
// This module is split into several sub-modules:
// - config: ADO.NET connection strings and per-attempt connections
// - params: Parameter binding for RowValues
// - command: Procedure batches with output parameters
// - query: Value extraction and result-set reading
// - executor: The DbExecutor implementation

pub mod command;
pub mod config;
pub mod executor;
pub mod params;
pub mod query;

// Re-export the public API
pub use command::render_batch;
pub use config::{MssqlClient, build_tiberius_config};
pub use executor::MssqlExecutor;
