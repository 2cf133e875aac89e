use crate::connection::{DEFAULT_TIMEOUT_SECS, MIN_TIMEOUT_SECS};
use crate::events::EventSink;
use crate::return_code::resolve_return_code;
use crate::server_kind::ServerKind;
use crate::types::{
    DEFAULT_DECIMAL_PRECISION, DEFAULT_DECIMAL_SCALE, ParamDirection, RowValues, SqlType,
};

/// Whether a command's text is SQL or the name of a stored procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    #[default]
    Text,
    StoredProcedure,
}

/// A named, typed, directed value attached to a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub sql_type: SqlType,
    /// Length hint for character and binary types
    pub size: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub direction: ParamDirection,
    pub value: RowValues,
}

impl Parameter {
    /// New parameter holding NULL. Decimal parameters start at precision 9, scale 5.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: SqlType, direction: ParamDirection) -> Self {
        let (precision, scale) = if sql_type == SqlType::Decimal {
            (Some(DEFAULT_DECIMAL_PRECISION), Some(DEFAULT_DECIMAL_SCALE))
        } else {
            (None, None)
        };
        Self {
            name: name.into(),
            sql_type,
            size: None,
            precision,
            scale,
            direction,
            value: RowValues::Null,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: RowValues) -> Self {
        self.value = value;
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// The value as text, empty for NULL.
    #[must_use]
    pub fn value_text(&self) -> String {
        self.value.to_string()
    }
}

/// A unit of work: SQL text or a procedure name, plus parameters.
///
/// One command instance is reused across every retry of a call so output parameters
/// keep their bindings; executors never clone it for an attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    text: String,
    kind: CommandKind,
    parameters: Vec<Parameter>,
    timeout_secs: u32,
    server_kind: ServerKind,
    final_text: Option<String>,
}

impl Command {
    #[must_use]
    pub fn new(text: impl Into<String>, kind: CommandKind, server_kind: ServerKind) -> Self {
        Self {
            text: text.into(),
            kind,
            parameters: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            server_kind,
            final_text: None,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    #[must_use]
    pub fn is_procedure(&self) -> bool {
        self.kind == CommandKind::StoredProcedure
    }

    /// Engine this command was built for.
    #[must_use]
    pub fn server_kind(&self) -> ServerKind {
        self.server_kind
    }

    #[must_use]
    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    pub fn set_timeout_secs(&mut self, timeout_secs: u32) {
        self.timeout_secs = timeout_secs.max(MIN_TIMEOUT_SECS);
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut Vec<Parameter> {
        &mut self.parameters
    }

    /// Parameter by name, ignoring case.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.parameters
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Append `parameter` and hand it back for further changes.
    pub fn push_parameter(&mut self, parameter: Parameter) -> &mut Parameter {
        self.parameters.push(parameter);
        let last = self.parameters.len() - 1;
        &mut self.parameters[last]
    }

    /// Text actually sent to the engine after dialect translation, once rendered.
    #[must_use]
    pub fn final_text(&self) -> Option<&str> {
        self.final_text.as_deref()
    }

    pub(crate) fn set_final_text(&mut self, text: String) {
        self.final_text = Some(text);
    }

    /// Text to show in log lines: the rendered form when available.
    #[must_use]
    pub fn display_text(&self) -> &str {
        self.final_text.as_deref().unwrap_or(&self.text)
    }

    /// Return code reported through the parameters (see [`resolve_return_code`]).
    #[must_use]
    pub fn return_code(&self) -> i32 {
        resolve_return_code(&self.parameters)
    }
}

/// Build a command with the engine's default timeout.
#[must_use]
pub fn create_command(text: &str, kind: CommandKind, server_kind: ServerKind) -> Command {
    Command::new(text, kind, server_kind)
}

/// Append a parameter to `command`.
///
/// Text and sizeless varchar parameters default to an empty string instead of NULL
/// when no value is supplied, so both engines see the same input.
pub fn add_parameter<'c>(
    command: &'c mut Command,
    name: &str,
    sql_type: SqlType,
    size: Option<u32>,
    value: Option<RowValues>,
    direction: ParamDirection,
) -> &'c mut Parameter {
    let mut parameter = Parameter::new(name, sql_type, direction);
    parameter.size = size.filter(|s| *s > 0);
    parameter.value = match value {
        Some(value) => value,
        None if defaults_to_empty_text(sql_type, parameter.size) => RowValues::Text(String::new()),
        None => RowValues::Null,
    };
    command.push_parameter(parameter)
}

fn defaults_to_empty_text(sql_type: SqlType, size: Option<u32>) -> bool {
    match sql_type {
        SqlType::Text => true,
        SqlType::VarChar | SqlType::NVarChar => size.is_none(),
        _ => false,
    }
}

/// Append a parameter whose type is given by name (`"int4"`, `"boolean"`, ...).
///
/// Returns `None` and reports a warning when the type name is not recognized.
pub fn add_parameter_by_type_name<'c>(
    command: &'c mut Command,
    name: &str,
    type_name: &str,
    size: Option<u32>,
    direction: ParamDirection,
    events: &dyn EventSink,
) -> Option<&'c mut Parameter> {
    let Some(sql_type) = SqlType::from_type_name(type_name) else {
        events.warning(&format!(
            "Unrecognized type name '{type_name}' for parameter {name}; parameter not added"
        ));
        return None;
    };
    Some(add_parameter(command, name, sql_type, size, None, direction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventLevel, RecordingEvents};

    fn proc_command() -> Command {
        create_command("add_update_job", CommandKind::StoredProcedure, ServerKind::SqlServer)
    }

    #[test]
    fn decimal_parameters_carry_default_precision() {
        let mut cmd = proc_command();
        let param = add_parameter(
            &mut cmd,
            "@Ratio",
            SqlType::Decimal,
            None,
            None,
            ParamDirection::Input,
        );
        assert_eq!((param.precision, param.scale), (Some(9), Some(5)));
        param.precision = Some(12);
        assert_eq!(cmd.parameter("@ratio").and_then(|p| p.precision), Some(12));
    }

    #[test]
    fn text_parameters_default_to_empty_string() {
        let mut cmd = proc_command();
        add_parameter(&mut cmd, "@Message", SqlType::Text, None, None, ParamDirection::Output);
        add_parameter(&mut cmd, "@Name", SqlType::VarChar, None, None, ParamDirection::Input);
        add_parameter(&mut cmd, "@Code", SqlType::VarChar, Some(8), None, ParamDirection::Input);
        add_parameter(&mut cmd, "@Job", SqlType::Int, None, None, ParamDirection::Input);

        assert_eq!(cmd.parameters()[0].value, RowValues::Text(String::new()));
        assert_eq!(cmd.parameters()[1].value, RowValues::Text(String::new()));
        assert_eq!(cmd.parameters()[2].value, RowValues::Null);
        assert_eq!(cmd.parameters()[3].value, RowValues::Null);
    }

    #[test]
    fn explicit_values_are_kept() {
        let mut cmd = proc_command();
        add_parameter(
            &mut cmd,
            "@Message",
            SqlType::Text,
            None,
            Some(RowValues::Null),
            ParamDirection::Input,
        );
        assert!(cmd.parameters()[0].value.is_null());
    }

    #[test]
    fn type_names_resolve_or_warn() {
        let events = RecordingEvents::new();
        let mut cmd = proc_command();

        let added = add_parameter_by_type_name(
            &mut cmd,
            "@Job",
            "integer",
            None,
            ParamDirection::Input,
            events.as_ref(),
        );
        assert_eq!(added.map(|p| p.sql_type), Some(SqlType::Int));

        let missing = add_parameter_by_type_name(
            &mut cmd,
            "@Blob",
            "geography",
            None,
            ParamDirection::Input,
            events.as_ref(),
        );
        assert!(missing.is_none());
        assert_eq!(cmd.parameters().len(), 1);
        assert_eq!(events.messages(EventLevel::Warning).len(), 1);
    }

    #[test]
    fn timeout_floor_applies_to_commands() {
        let mut cmd = proc_command();
        assert_eq!(cmd.timeout_secs(), DEFAULT_TIMEOUT_SECS);
        cmd.set_timeout_secs(1);
        assert_eq!(cmd.timeout_secs(), MIN_TIMEOUT_SECS);
    }

    #[test]
    fn display_text_prefers_rendered_form() {
        let mut cmd = proc_command();
        assert_eq!(cmd.display_text(), "add_update_job");
        cmd.set_final_text("EXEC add_update_job".to_string());
        assert_eq!(cmd.display_text(), "EXEC add_update_job");
    }
}
