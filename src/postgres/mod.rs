// PostgreSQL module - runs commands through tokio-postgres
//
// This module is split into several sub-modules:
// - config: Connection-string parsing and per-attempt connections
// - params: Coercing parameter binding for RowValues
// - query: Value extraction and result materialization
// - procedure: CALL rendering and output-parameter copy-back
// - executor: The DbExecutor implementation

pub mod config;
pub mod executor;
pub mod params;
pub mod procedure;
pub mod query;

// Re-export the public API
pub use config::build_pg_config;
pub use executor::PostgresExecutor;
pub use params::Params;
pub use procedure::{normalize_parameters, render_call};
