use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Precision applied to `SqlType::Decimal` parameters unless the caller overrides it.
pub const DEFAULT_DECIMAL_PRECISION: u8 = 9;
/// Scale applied to `SqlType::Decimal` parameters unless the caller overrides it.
pub const DEFAULT_DECIMAL_SCALE: u8 = 5;

/// Engine-neutral column / parameter type.
///
/// Each engine maps this to its own type system; the textual form accepts the usual
/// synonyms from both dialects:
/// ```rust
/// use resilient_sql::prelude::*;
///
/// assert_eq!(SqlType::from_type_name("int4"), Some(SqlType::Int));
/// assert_eq!(SqlType::from_type_name("Character Varying(50)"), Some(SqlType::VarChar));
/// assert_eq!(SqlType::BigInt.type_name(), "bigint");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Real,
    Float,
    Decimal,
    Bit,
    Char,
    VarChar,
    NVarChar,
    Text,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
    Uuid,
    Json,
    Xml,
    VarBinary,
    /// Postgres `refcursor`; only meaningful as an output of a procedure.
    Cursor,
}

impl SqlType {
    /// Resolve a free-text type name (`"int4"`, `"boolean"`, `"varchar(50)"`, ...).
    ///
    /// Size suffixes are ignored. Returns `None` for names we do not recognize.
    #[must_use]
    pub fn from_type_name(type_name: &str) -> Option<SqlType> {
        let lowered = type_name.trim().to_ascii_lowercase();
        let base = match lowered.find('(') {
            Some(idx) => lowered[..idx].trim_end(),
            None => lowered.as_str(),
        };

        let resolved = match base {
            "tinyint" | "int1" => SqlType::TinyInt,
            "smallint" | "int2" | "smallserial" | "short" => SqlType::SmallInt,
            "int" | "int4" | "integer" | "serial" => SqlType::Int,
            "bigint" | "int8" | "bigserial" | "long" => SqlType::BigInt,
            "real" | "float4" | "single" => SqlType::Real,
            "float" | "float8" | "double" | "double precision" => SqlType::Float,
            "numeric" | "decimal" | "money" | "smallmoney" => SqlType::Decimal,
            "bool" | "boolean" | "bit" => SqlType::Bit,
            "char" | "character" | "bpchar" | "nchar" => SqlType::Char,
            "varchar" | "character varying" | "citext" | "name" => SqlType::VarChar,
            "nvarchar" => SqlType::NVarChar,
            "text" | "ntext" | "string" => SqlType::Text,
            "date" => SqlType::Date,
            "time" | "time without time zone" => SqlType::Time,
            "datetime" | "datetime2" | "smalldatetime" | "timestamp"
            | "timestamp without time zone" => SqlType::DateTime,
            "datetimeoffset" | "timestamptz" | "timestamp with time zone" => {
                SqlType::DateTimeOffset
            }
            "uuid" | "uniqueidentifier" | "guid" => SqlType::Uuid,
            "json" | "jsonb" => SqlType::Json,
            "xml" => SqlType::Xml,
            "varbinary" | "binary" | "bytea" | "image" => SqlType::VarBinary,
            "refcursor" | "cursor" => SqlType::Cursor,
            _ => return None,
        };
        Some(resolved)
    }

    /// Canonical lower-case name of this type.
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            SqlType::TinyInt => "tinyint",
            SqlType::SmallInt => "smallint",
            SqlType::Int => "int",
            SqlType::BigInt => "bigint",
            SqlType::Real => "real",
            SqlType::Float => "float",
            SqlType::Decimal => "decimal",
            SqlType::Bit => "bit",
            SqlType::Char => "char",
            SqlType::VarChar => "varchar",
            SqlType::NVarChar => "nvarchar",
            SqlType::Text => "text",
            SqlType::Date => "date",
            SqlType::Time => "time",
            SqlType::DateTime => "datetime",
            SqlType::DateTimeOffset => "datetimeoffset",
            SqlType::Uuid => "uuid",
            SqlType::Json => "json",
            SqlType::Xml => "xml",
            SqlType::VarBinary => "varbinary",
            SqlType::Cursor => "refcursor",
        }
    }

    /// Postgres cast target used when rendering a `CALL` argument, e.g. `numeric(9,5)`.
    #[must_use]
    pub fn postgres_cast(self, size: Option<u32>, precision: Option<u8>, scale: Option<u8>) -> String {
        match self {
            SqlType::TinyInt | SqlType::SmallInt => "int2".to_string(),
            SqlType::Int => "int4".to_string(),
            SqlType::BigInt => "int8".to_string(),
            SqlType::Real => "float4".to_string(),
            SqlType::Float => "float8".to_string(),
            SqlType::Decimal => format!(
                "numeric({},{})",
                precision.unwrap_or(DEFAULT_DECIMAL_PRECISION),
                scale.unwrap_or(DEFAULT_DECIMAL_SCALE)
            ),
            SqlType::Bit => "boolean".to_string(),
            SqlType::Char => match size {
                Some(n) if n > 0 => format!("char({n})"),
                _ => "char".to_string(),
            },
            SqlType::VarChar | SqlType::NVarChar => match size {
                Some(n) if n > 0 => format!("varchar({n})"),
                _ => "varchar".to_string(),
            },
            SqlType::Text => "text".to_string(),
            SqlType::Date => "date".to_string(),
            SqlType::Time => "time".to_string(),
            SqlType::DateTime => "timestamp".to_string(),
            SqlType::DateTimeOffset => "timestamptz".to_string(),
            SqlType::Uuid => "uuid".to_string(),
            SqlType::Json => "json".to_string(),
            SqlType::Xml => "xml".to_string(),
            SqlType::VarBinary => "bytea".to_string(),
            SqlType::Cursor => "refcursor".to_string(),
        }
    }

    /// T-SQL type used to `DECLARE` a local for an output parameter.
    ///
    /// `None` for types SQL Server cannot hold in a scalar local (cursors).
    #[must_use]
    pub fn mssql_declaration(
        self,
        size: Option<u32>,
        precision: Option<u8>,
        scale: Option<u8>,
    ) -> Option<String> {
        let sized = |base: &str| match size {
            Some(n) if n > 0 && n <= 8000 => format!("{base}({n})"),
            _ => format!("{base}(max)"),
        };
        let declared = match self {
            SqlType::TinyInt => "tinyint".to_string(),
            SqlType::SmallInt => "smallint".to_string(),
            SqlType::Int => "int".to_string(),
            SqlType::BigInt => "bigint".to_string(),
            SqlType::Real => "real".to_string(),
            SqlType::Float => "float".to_string(),
            SqlType::Decimal => format!(
                "decimal({},{})",
                precision.unwrap_or(DEFAULT_DECIMAL_PRECISION),
                scale.unwrap_or(DEFAULT_DECIMAL_SCALE)
            ),
            SqlType::Bit => "bit".to_string(),
            SqlType::Char => match size {
                Some(n) if n > 0 && n <= 8000 => format!("char({n})"),
                _ => "char(1)".to_string(),
            },
            SqlType::VarChar | SqlType::Text => sized("varchar"),
            SqlType::NVarChar | SqlType::Json => match size {
                Some(n) if n > 0 && n <= 4000 => format!("nvarchar({n})"),
                _ => "nvarchar(max)".to_string(),
            },
            SqlType::Date => "date".to_string(),
            SqlType::Time => "time".to_string(),
            SqlType::DateTime => "datetime2".to_string(),
            SqlType::DateTimeOffset => "datetimeoffset".to_string(),
            SqlType::Uuid => "uniqueidentifier".to_string(),
            SqlType::Xml => "xml".to_string(),
            SqlType::VarBinary => sized("varbinary"),
            SqlType::Cursor => return None,
        };
        Some(declared)
    }

    #[cfg(feature = "postgres")]
    #[must_use]
    pub fn from_postgres_type(ty: &tokio_postgres::types::Type) -> Option<SqlType> {
        SqlType::from_type_name(ty.name())
    }

    #[cfg(feature = "mssql")]
    #[must_use]
    pub fn from_mssql_column_type(ty: tiberius::ColumnType) -> Option<SqlType> {
        use tiberius::ColumnType;
        let resolved = match ty {
            ColumnType::Bit | ColumnType::Bitn => SqlType::Bit,
            ColumnType::Int1 => SqlType::TinyInt,
            ColumnType::Int2 => SqlType::SmallInt,
            ColumnType::Int4 | ColumnType::Intn => SqlType::Int,
            ColumnType::Int8 => SqlType::BigInt,
            ColumnType::Float4 => SqlType::Real,
            ColumnType::Float8 | ColumnType::Floatn => SqlType::Float,
            ColumnType::Money
            | ColumnType::Money4
            | ColumnType::Decimaln
            | ColumnType::Numericn => SqlType::Decimal,
            ColumnType::Datetime
            | ColumnType::Datetime4
            | ColumnType::Datetimen
            | ColumnType::Datetime2 => SqlType::DateTime,
            ColumnType::DatetimeOffsetn => SqlType::DateTimeOffset,
            ColumnType::Daten => SqlType::Date,
            ColumnType::Timen => SqlType::Time,
            ColumnType::Guid => SqlType::Uuid,
            ColumnType::BigChar | ColumnType::NChar => SqlType::Char,
            ColumnType::BigVarChar => SqlType::VarChar,
            ColumnType::NVarchar => SqlType::NVarChar,
            ColumnType::Text | ColumnType::NText => SqlType::Text,
            ColumnType::Xml => SqlType::Xml,
            ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => {
                SqlType::VarBinary
            }
            _ => return None,
        };
        Some(resolved)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Direction of a procedure parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ParamDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

impl ParamDirection {
    /// True when the engine writes a value back into the parameter.
    #[must_use]
    pub fn receives_value(self) -> bool {
        !matches!(self, ParamDirection::Input)
    }
}

/// Values that can be stored in a database row or used as query parameters.
///
/// Shared by both engines so materialization and parameter code never branch on
/// driver types:
/// ```rust
/// use resilient_sql::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Null,
/// ];
/// assert_eq!(params[2].to_string(), "");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Exact numeric value
    Decimal(Decimal),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            RowValues::Timestamp(value) => Some(*value),
            RowValues::TimestampTz(value) => Some(value.naive_utc()),
            RowValues::Date(value) => value.and_hms_opt(0, 0, 0),
            RowValues::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            RowValues::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            RowValues::Int(value) => Some(*value as f64),
            RowValues::Decimal(value) => value.to_string().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

impl fmt::Display for RowValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowValues::Int(i) => write!(f, "{i}"),
            RowValues::Float(v) => write!(f, "{v}"),
            RowValues::Decimal(d) => write!(f, "{d}"),
            RowValues::Text(s) => f.write_str(s),
            RowValues::Bool(b) => write!(f, "{b}"),
            RowValues::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            RowValues::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            RowValues::Timestamp(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            RowValues::TimestampTz(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f%:z")),
            RowValues::Uuid(u) => write!(f, "{u}"),
            RowValues::Null => Ok(()),
            RowValues::JSON(js) => write!(f, "{js}"),
            RowValues::Blob(bytes) => {
                f.write_str("0x")?;
                for byte in bytes {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
        }
    }
}

/// Parse the timestamp layouts both engines produce in text form.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for layout in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %I:%M:%S %p",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
