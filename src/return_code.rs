use std::sync::LazyLock;

use regex::Regex;

use crate::command::Parameter;
use crate::types::{ParamDirection, RowValues};

/// Procedure completed and reported success.
pub const RET_VAL_OK: i32 = 0;
/// Return code could not be interpreted, or the call failed fatally.
pub const RET_VAL_UNDEFINED_ERROR: i32 = -1;
/// Retries were exhausted and the last failure was a deadlock.
pub const RET_VAL_DEADLOCK: i32 = -4;
/// Retries were exhausted.
pub const RET_VAL_EXCESSIVE_RETRIES: i32 = -5;

/// Name of the text in/out parameter Postgres procedures use to report status.
pub const RETURN_CODE_PARAMETER: &str = "_returnCode";
/// Name SQL Server callers give the procedure return value.
pub const LEGACY_RETURN_PARAMETER: &str = "@Return";

static EMBEDDED_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("integer pattern is valid"));

/// True for `_returnCode`, `@returnCode`, `returncode`, ...
#[must_use]
pub fn is_return_code_name(name: &str) -> bool {
    name.trim_start_matches(['@', '_'])
        .eq_ignore_ascii_case("returnCode")
}

/// Interpret a textual return code.
///
/// Empty text and integers are taken at face value; otherwise the first non-zero
/// integer embedded in the text is the code (`"22P06"` is 22, `"U5201"` is 5201).
/// Text without one is [`RET_VAL_UNDEFINED_ERROR`].
#[must_use]
pub fn parse_return_code_text(text: &str) -> i32 {
    let text = text.trim();
    if text.is_empty() {
        return RET_VAL_OK;
    }
    if let Ok(code) = text.parse::<i32>() {
        return code;
    }
    EMBEDDED_INTEGER
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<i64>().ok())
        .find(|value| *value != 0)
        .map_or(RET_VAL_UNDEFINED_ERROR, |value| {
            i32::try_from(value).unwrap_or(RET_VAL_UNDEFINED_ERROR)
        })
}

fn value_as_return_code(value: &RowValues) -> i32 {
    match value {
        RowValues::Null => RET_VAL_OK,
        RowValues::Int(i) => i32::try_from(*i).unwrap_or(RET_VAL_UNDEFINED_ERROR),
        RowValues::Bool(b) => i32::from(*b),
        RowValues::Text(s) => parse_return_code_text(s),
        other => parse_return_code_text(&other.to_string()),
    }
}

/// Resolve the return code of a finished procedure call from its parameters.
///
/// A parameter named like `_returnCode` wins; otherwise the first `ReturnValue`
/// parameter; otherwise [`RET_VAL_OK`].
#[must_use]
pub fn resolve_return_code(parameters: &[Parameter]) -> i32 {
    if let Some(param) = parameters.iter().find(|p| is_return_code_name(&p.name)) {
        return value_as_return_code(&param.value);
    }
    if let Some(param) = parameters
        .iter()
        .find(|p| p.direction == ParamDirection::ReturnValue)
    {
        return value_as_return_code(&param.value);
    }
    RET_VAL_OK
}
