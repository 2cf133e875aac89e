//! Rendering of stored-procedure commands as one T-SQL batch.
//!
//! tiberius has no output-parameter binding, so output and return values travel
//! through locals: the batch declares them, passes them to `EXEC ... OUTPUT` and
//! selects them in a trailing result set that is read back into the parameters.

use std::fmt::Write;
use std::sync::LazyLock;

use regex::Regex;

use crate::command::{Command, Parameter};
use crate::error::SqlExecError;
use crate::types::{ParamDirection, RowValues};

static PROCEDURE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.\[\]]+$").expect("procedure name pattern is valid"));

static PARAMETER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@?[A-Za-z_#][\w@$#]*$").expect("parameter name pattern is valid")
});

const RETURN_LOCAL: &str = "@rs_ret";

/// A rendered batch, the parameters bound to `@P1..@Pn`, and the parameters the
/// trailing result set fills (in column order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBatch {
    pub sql: String,
    pub bound: Vec<usize>,
    pub outputs: Vec<usize>,
}

impl RenderedBatch {
    /// True when the batch ends with the result set of output values.
    #[must_use]
    pub fn has_output_set(&self) -> bool {
        !self.outputs.is_empty()
    }
}

fn prefixed(name: &str) -> String {
    if name.starts_with('@') {
        name.to_string()
    } else {
        format!("@{name}")
    }
}

fn column_alias(name: &str) -> String {
    format!("[{}]", name.trim_start_matches('@').replace(']', "]]"))
}

fn declaration(param: &Parameter, procedure: &str) -> Result<String, SqlExecError> {
    param
        .sql_type
        .mssql_declaration(param.size, param.precision, param.scale)
        .ok_or_else(|| {
            SqlExecError::Misuse(format!(
                "{} parameter {} of {procedure} cannot be declared on SQL Server",
                param.sql_type, param.name
            ))
        })
}

/// Render `command` as `DECLARE ...; EXEC @ret = proc @a = @P1, @b = @o1 OUTPUT; SELECT ...`.
///
/// # Errors
/// Returns `SqlExecError::Misuse` when the procedure or a parameter name contains
/// anything but identifier characters, or an output parameter has a type SQL Server
/// cannot declare.
pub fn render_batch(command: &Command) -> Result<RenderedBatch, SqlExecError> {
    let procedure = command.text().trim();
    if !PROCEDURE_NAME.is_match(procedure) {
        return Err(SqlExecError::Misuse(format!(
            "'{procedure}' is not a valid procedure name"
        )));
    }

    let mut declares = String::new();
    let mut args = Vec::new();
    let mut selected = Vec::new();
    let mut bound = Vec::new();
    let mut outputs = Vec::new();
    let mut return_index = None;

    for (idx, param) in command.parameters().iter().enumerate() {
        if !PARAMETER_NAME.is_match(&param.name) {
            return Err(SqlExecError::Misuse(format!(
                "'{}' is not a valid parameter name for {procedure}",
                param.name
            )));
        }
        match param.direction {
            ParamDirection::ReturnValue => {
                // only the first return value can be captured
                if return_index.is_none() {
                    return_index = Some(idx);
                }
            }
            ParamDirection::Input => {
                bound.push(idx);
                args.push(format!("{} = @P{}", prefixed(&param.name), bound.len()));
            }
            ParamDirection::Output | ParamDirection::InputOutput => {
                let local = format!("@rs_o{idx}");
                let declared = declaration(param, procedure)?;
                if param.direction == ParamDirection::InputOutput {
                    bound.push(idx);
                    let _ = writeln!(declares, "DECLARE {local} {declared} = @P{};", bound.len());
                } else {
                    let _ = writeln!(declares, "DECLARE {local} {declared};");
                }
                args.push(format!("{} = {local} OUTPUT", prefixed(&param.name)));
                selected.push(format!("{local} AS {}", column_alias(&param.name)));
                outputs.push(idx);
            }
        }
    }

    let mut sql = String::from("SET NOCOUNT ON;\n");
    sql.push_str(&declares);
    if let Some(idx) = return_index {
        let _ = writeln!(sql, "DECLARE {RETURN_LOCAL} int;");
        let alias = column_alias(&command.parameters()[idx].name);
        selected.insert(0, format!("{RETURN_LOCAL} AS {alias}"));
        outputs.insert(0, idx);
        let _ = write!(sql, "EXEC {RETURN_LOCAL} = {procedure}");
    } else {
        let _ = write!(sql, "EXEC {procedure}");
    }
    if !args.is_empty() {
        sql.push(' ');
        sql.push_str(&args.join(", "));
    }
    sql.push_str(";\n");
    if !selected.is_empty() {
        let _ = write!(sql, "SELECT {};", selected.join(", "));
    }

    Ok(RenderedBatch {
        sql,
        bound,
        outputs,
    })
}

/// Copy the trailing result set's values into the output parameters.
pub fn copy_outputs(command: &mut Command, batch: &RenderedBatch, values: &[RowValues]) {
    let parameters = command.parameters_mut();
    for (&idx, value) in batch.outputs.iter().zip(values) {
        if let Some(param) = parameters.get_mut(idx) {
            param.value = value.clone();
        }
    }
}
