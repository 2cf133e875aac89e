//! Rendering of stored-procedure commands as Postgres `CALL` statements.

use std::sync::LazyLock;

use regex::Regex;
use tokio_postgres::Row;

use super::query::postgres_extract_value;
use crate::command::{Command, Parameter};
use crate::error::SqlExecError;
use crate::events::EventSink;
use crate::return_code::{LEGACY_RETURN_PARAMETER, RETURN_CODE_PARAMETER};
use crate::types::{ParamDirection, RowValues, SqlType};

const IDENTIFIER_PART: &str = r#"(?:"[^"]+"|[A-Za-z_][A-Za-z0-9_$]*)"#;

static PROCEDURE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^{IDENTIFIER_PART}(?:\.{IDENTIFIER_PART})*$"))
        .expect("procedure name pattern is valid")
});

static PARAMETER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("parameter name pattern is valid")
});

/// A rendered `CALL` and the indexes of the parameters bound to `$1..$n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCall {
    pub sql: String,
    pub bound: Vec<usize>,
}

/// Rewrite parameter names for Postgres: `@Return` (as a return value) becomes the
/// `_returnCode` text in/out parameter and any other leading `@` becomes `_`.
///
/// Applying it twice changes nothing.
pub fn normalize_parameters(command: &mut Command) {
    for param in command.parameters_mut() {
        if param.direction == ParamDirection::ReturnValue
            && param.name.eq_ignore_ascii_case(LEGACY_RETURN_PARAMETER)
        {
            param.name = RETURN_CODE_PARAMETER.to_string();
            param.sql_type = SqlType::Text;
            param.direction = ParamDirection::InputOutput;
            param.value = RowValues::Text(String::new());
        } else if let Some(rest) = param.name.strip_prefix('@') {
            param.name = format!("_{rest}");
        }
    }
}

fn cast_of(param: &Parameter) -> String {
    param
        .sql_type
        .postgres_cast(param.size, param.precision, param.scale)
}

fn passes_null(param: &Parameter) -> bool {
    if param.direction == ParamDirection::Output {
        return true;
    }
    // an unnamed cursor lets the server pick the portal name
    param.sql_type == SqlType::Cursor && param.value.to_string().is_empty()
}

/// Render `command` as `CALL name(_p => $1::type, ...)`.
///
/// Output-only parameters are passed as typed NULLs; return-value parameters are not
/// passed at all.
///
/// # Errors
/// Returns `SqlExecError::Misuse` when the procedure or a parameter name is not a
/// plain identifier.
pub fn render_call(command: &Command) -> Result<RenderedCall, SqlExecError> {
    let name = command.text().trim();
    if !PROCEDURE_NAME.is_match(name) {
        return Err(SqlExecError::Misuse(format!(
            "'{name}' is not a valid procedure name"
        )));
    }

    let mut args = Vec::new();
    let mut bound = Vec::new();
    for (idx, param) in command.parameters().iter().enumerate() {
        if param.direction == ParamDirection::ReturnValue {
            continue;
        }
        if !PARAMETER_NAME.is_match(&param.name) {
            return Err(SqlExecError::Misuse(format!(
                "'{}' is not a valid parameter name for {name}",
                param.name
            )));
        }
        if passes_null(param) {
            args.push(format!("{} => NULL::{}", param.name, cast_of(param)));
        } else {
            bound.push(idx);
            args.push(format!("{} => ${}::{}", param.name, bound.len(), cast_of(param)));
        }
    }

    Ok(RenderedCall {
        sql: format!("CALL {name}({})", args.join(", ")),
        bound,
    })
}

/// Copy the values of the row a `CALL` returns into the matching output parameters.
///
/// # Errors
/// Returns `SqlExecError` if a value cannot be decoded.
pub fn copy_outputs(command: &mut Command, row: &Row) -> Result<(), SqlExecError> {
    for (idx, column) in row.columns().iter().enumerate() {
        let Some(param) = command.parameter_mut(column.name()) else {
            continue;
        };
        if param.direction.receives_value() {
            param.value = postgres_extract_value(row, idx)?;
        }
    }
    Ok(())
}

/// Pick the cursor to fetch from the refcursor outputs of `procedure`, given as
/// `(column, cursor name)` pairs in column order.
///
/// The first named cursor wins; each later one is reported as a warning and skipped.
pub fn select_cursor<'a>(
    procedure: &str,
    cursors: &[(&'a str, Option<&'a str>)],
    events: &dyn EventSink,
) -> Option<&'a str> {
    let mut found = None;
    for &(column, name) in cursors {
        let Some(name) = name else { continue };
        if found.is_some() {
            events.warning(&format!(
                "Procedure {procedure} returned more than one refcursor; {column} is not supported and was ignored"
            ));
            continue;
        }
        found = Some(name);
    }
    found
}
