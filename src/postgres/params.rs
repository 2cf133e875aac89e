use std::error::Error;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{IsNull, Kind, ToSql, Type, to_sql_checked};
use tokio_util::bytes;
use uuid::Uuid;

use crate::command::Parameter;
use crate::types::{RowValues, parse_timestamp};

type BoxError = Box<dyn Error + Sync + Send>;

/// Borrowed parameter values in the order they are bound (`$1`, `$2`, ...).
pub struct Params<'a> {
    references: Vec<&'a (dyn ToSql + Sync)>,
}

impl<'a> Params<'a> {
    #[must_use]
    pub fn from_values(values: impl IntoIterator<Item = &'a RowValues>) -> Self {
        Self {
            references: values
                .into_iter()
                .map(|v| v as &(dyn ToSql + Sync))
                .collect(),
        }
    }

    #[must_use]
    pub fn from_parameters(parameters: &'a [Parameter]) -> Self {
        Self::from_values(parameters.iter().map(|p| &p.value))
    }

    #[must_use]
    pub fn as_refs(&self) -> &[&'a (dyn ToSql + Sync)] {
        &self.references
    }
}

fn is_text_like(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN | Type::REFCURSOR | Type::XML
    ) || matches!(ty.kind(), Kind::Enum(_))
}

fn write_text(text: &str, out: &mut bytes::BytesMut) -> IsNull {
    out.extend_from_slice(text.as_bytes());
    IsNull::No
}

fn mismatch(value: &str, ty: &Type) -> BoxError {
    format!("cannot bind {value} to a {ty} parameter").into()
}

fn int_to_sql(value: i64, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(value)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(value)?.to_sql(ty, out),
        Type::INT8 => value.to_sql(ty, out),
        #[allow(clippy::cast_precision_loss)]
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        #[allow(clippy::cast_precision_loss)]
        Type::FLOAT8 => (value as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(value).to_sql(ty, out),
        Type::BOOL => (value != 0).to_sql(ty, out),
        _ if is_text_like(ty) => Ok(write_text(&value.to_string(), out)),
        _ => Err(mismatch("an integer", ty)),
    }
}

fn float_to_sql(value: f64, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        #[allow(clippy::cast_possible_truncation)]
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => value.to_sql(ty, out),
        Type::NUMERIC => Decimal::try_from(value)?.to_sql(ty, out),
        _ if is_text_like(ty) => Ok(write_text(&value.to_string(), out)),
        _ => Err(mismatch("a float", ty)),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Text is the lingua franca of callers; parse it into whatever the server expects.
fn text_to_sql(text: &str, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
    if is_text_like(ty) {
        return Ok(write_text(text, out));
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(IsNull::Yes);
    }
    match *ty {
        Type::INT2 | Type::INT4 | Type::INT8 => int_to_sql(trimmed.parse::<i64>()?, ty, out),
        Type::FLOAT4 | Type::FLOAT8 => float_to_sql(trimmed.parse::<f64>()?, ty, out),
        Type::NUMERIC => Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))?
            .to_sql(ty, out),
        Type::BOOL => parse_bool(trimmed)
            .ok_or_else(|| mismatch(&format!("'{trimmed}'"), ty))?
            .to_sql(ty, out),
        Type::DATE => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")?.to_sql(ty, out),
        Type::TIME => NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")?.to_sql(ty, out),
        Type::TIMESTAMP => parse_timestamp(trimmed)
            .ok_or_else(|| mismatch(&format!("'{trimmed}'"), ty))?
            .to_sql(ty, out),
        Type::TIMESTAMPTZ => {
            let parsed = match DateTime::parse_from_rfc3339(trimmed) {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(_) => parse_timestamp(trimmed)
                    .map(|naive| Utc.from_utc_datetime(&naive))
                    .ok_or_else(|| mismatch(&format!("'{trimmed}'"), ty))?,
            };
            parsed.to_sql(ty, out)
        }
        Type::UUID => Uuid::parse_str(trimmed)?.to_sql(ty, out),
        Type::JSON | Type::JSONB => {
            serde_json::from_str::<serde_json::Value>(trimmed)?.to_sql(ty, out)
        }
        Type::BYTEA => text.as_bytes().to_sql(ty, out),
        _ => Err(mismatch("text", ty)),
    }
}

impl ToSql for RowValues {
    fn to_sql(&self, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
        match self {
            RowValues::Null => Ok(IsNull::Yes),
            RowValues::Int(i) => int_to_sql(*i, ty, out),
            RowValues::Float(f) => float_to_sql(*f, ty, out),
            RowValues::Decimal(d) => match *ty {
                Type::NUMERIC => d.to_sql(ty, out),
                Type::FLOAT4 | Type::FLOAT8 => float_to_sql(d.to_string().parse()?, ty, out),
                _ if is_text_like(ty) => Ok(write_text(&d.to_string(), out)),
                _ => Err(mismatch("a decimal", ty)),
            },
            RowValues::Text(s) => text_to_sql(s, ty, out),
            RowValues::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 => int_to_sql(i64::from(*b), ty, out),
                _ if is_text_like(ty) => Ok(write_text(&b.to_string(), out)),
                _ => Err(mismatch("a boolean", ty)),
            },
            RowValues::Date(d) => match *ty {
                Type::TIMESTAMP => d.and_time(NaiveTime::MIN).to_sql(ty, out),
                _ if is_text_like(ty) => Ok(write_text(&self.to_string(), out)),
                _ => d.to_sql(ty, out),
            },
            RowValues::Time(t) => match *ty {
                _ if is_text_like(ty) => Ok(write_text(&self.to_string(), out)),
                _ => t.to_sql(ty, out),
            },
            RowValues::Timestamp(dt) => match *ty {
                Type::TIMESTAMPTZ => Utc.from_utc_datetime(dt).to_sql(ty, out),
                Type::DATE => dt.date().to_sql(ty, out),
                _ if is_text_like(ty) => Ok(write_text(&self.to_string(), out)),
                _ => dt.to_sql(ty, out),
            },
            RowValues::TimestampTz(dt) => match *ty {
                Type::TIMESTAMP => dt.naive_utc().to_sql(ty, out),
                _ if is_text_like(ty) => Ok(write_text(&dt.to_rfc3339(), out)),
                _ => dt.to_sql(ty, out),
            },
            RowValues::Uuid(u) => match *ty {
                Type::UUID => u.to_sql(ty, out),
                _ if is_text_like(ty) => Ok(write_text(&u.to_string(), out)),
                _ => Err(mismatch("a uuid", ty)),
            },
            RowValues::JSON(jsval) => match *ty {
                Type::JSON | Type::JSONB => jsval.to_sql(ty, out),
                _ if is_text_like(ty) => Ok(write_text(&jsval.to_string(), out)),
                _ => Err(mismatch("json", ty)),
            },
            RowValues::Blob(bytes) => bytes.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        is_text_like(ty)
            || matches!(
                *ty,
                Type::INT2
                    | Type::INT4
                    | Type::INT8
                    | Type::FLOAT4
                    | Type::FLOAT8
                    | Type::NUMERIC
                    | Type::BOOL
                    | Type::DATE
                    | Type::TIME
                    | Type::TIMESTAMP
                    | Type::TIMESTAMPTZ
                    | Type::UUID
                    | Type::JSON
                    | Type::JSONB
                    | Type::BYTEA
            )
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &RowValues, ty: &Type) -> Result<(IsNull, Vec<u8>), BoxError> {
        let mut buf = bytes::BytesMut::new();
        let is_null = value.to_sql(ty, &mut buf)?;
        Ok((is_null, buf.to_vec()))
    }

    #[test]
    fn integers_narrow_to_declared_width() {
        let (_, int4) = encode(&RowValues::Int(42), &Type::INT4).unwrap();
        assert_eq!(int4, 42i32.to_be_bytes());
        let (_, int2) = encode(&RowValues::Int(7), &Type::INT2).unwrap();
        assert_eq!(int2, 7i16.to_be_bytes());
        assert!(encode(&RowValues::Int(i64::from(i32::MAX) + 1), &Type::INT4).is_err());
    }

    #[test]
    fn text_is_parsed_for_typed_targets() {
        let (_, int8) = encode(&RowValues::Text(" 12 ".into()), &Type::INT8).unwrap();
        assert_eq!(int8, 12i64.to_be_bytes());
        let (_, b) = encode(&RowValues::Text("yes".into()), &Type::BOOL).unwrap();
        assert_eq!(b, vec![1]);
        assert!(encode(&RowValues::Text("abc".into()), &Type::INT4).is_err());
    }

    #[test]
    fn empty_text_is_null_for_non_text_targets() {
        let (is_null, _) = encode(&RowValues::Text(String::new()), &Type::INT4).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        let (is_null, bytes) = encode(&RowValues::Text(String::new()), &Type::TEXT).unwrap();
        assert!(matches!(is_null, IsNull::No));
        assert!(bytes.is_empty());
    }

    #[test]
    fn refcursor_and_text_accept_plain_strings() {
        assert!(<RowValues as ToSql>::accepts(&Type::REFCURSOR));
        let (_, bytes) = encode(&RowValues::Text("c1".into()), &Type::REFCURSOR).unwrap();
        assert_eq!(bytes, b"c1");
        let (_, bytes) = encode(&RowValues::Int(5), &Type::VARCHAR).unwrap();
        assert_eq!(bytes, b"5");
    }
}
