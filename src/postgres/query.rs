use std::error::Error;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::{TryStreamExt, pin_mut};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Column, GenericClient, Row, SimpleQueryMessage};
use uuid::Uuid;

use super::params::Params;
use crate::capitalize::apply_capitalization;
use crate::error::SqlExecError;
use crate::options::row_limit_reached;
use crate::results::{DataColumn, DataSet, DataTable};
use crate::types::{RowValues, SqlType};

/// Raw text of a column whose type the driver has no mapping for
/// (refcursor names, enums, domains over text).
pub struct RawText(pub String);

impl<'a> FromSql<'a> for RawText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(RawText(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

type BoxError = Box<dyn Error + Sync + Send>;

/// A `numeric` column value. Values that fit `Decimal` exactly become
/// `RowValues::Decimal`; wider ones (more than 28 digits, NaN, infinities) keep
/// their decimal text.
pub struct PgNumeric(pub RowValues);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let text = numeric_text(raw)?;
        Ok(PgNumeric(match Decimal::from_str_exact(&text) {
            Ok(d) => RowValues::Decimal(d),
            Err(_) => RowValues::Text(text),
        }))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn read_u16(raw: &[u8], at: usize) -> Result<u16, BoxError> {
    match raw.get(at..at + 2) {
        Some(&[hi, lo]) => Ok(u16::from_be_bytes([hi, lo])),
        _ => Err("numeric value is truncated".into()),
    }
}

/// Decimal text of a binary `numeric`: base-10000 digit groups, a group weight,
/// a sign word and the display scale.
fn numeric_text(raw: &[u8]) -> Result<String, BoxError> {
    let ndigits = usize::from(read_u16(raw, 0)?);
    let weight = i32::from(i16::from_be_bytes(read_u16(raw, 2)?.to_be_bytes()));
    let sign = read_u16(raw, 4)?;
    let dscale = usize::from(read_u16(raw, 6)?);
    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }
    let digits = (0..ndigits)
        .map(|i| read_u16(raw, 8 + 2 * i))
        .collect::<Result<Vec<_>, _>>()?;
    let group = |i: i32| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == 0x4000 {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&group(0).to_string());
        for i in 1..=weight {
            text.push_str(&format!("{:04}", group(i)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

/// True for the server-side cursor type.
#[must_use]
pub fn is_refcursor(ty: &Type) -> bool {
    *ty == Type::REFCURSOR || ty.name() == "refcursor"
}

/// Extracts a `RowValues` from a `tokio_postgres` Row at the given index.
///
/// # Errors
/// Returns `SqlExecError` if the column cannot be retrieved.
pub fn postgres_extract_value(row: &Row, idx: usize) -> Result<RowValues, SqlExecError> {
    let type_info = row.columns()[idx].type_();

    let value = match type_info.name() {
        "int2" => row.try_get::<_, Option<i16>>(idx)?.map(|v| RowValues::Int(i64::from(v))),
        "int4" => row.try_get::<_, Option<i32>>(idx)?.map(|v| RowValues::Int(i64::from(v))),
        "int8" => row.try_get::<_, Option<i64>>(idx)?.map(RowValues::Int),
        "oid" => row.try_get::<_, Option<u32>>(idx)?.map(|v| RowValues::Int(i64::from(v))),
        "float4" => row.try_get::<_, Option<f32>>(idx)?.map(|v| RowValues::Float(f64::from(v))),
        "float8" => row.try_get::<_, Option<f64>>(idx)?.map(RowValues::Float),
        "numeric" => row.try_get::<_, Option<PgNumeric>>(idx)?.map(|PgNumeric(v)| v),
        "bool" => row.try_get::<_, Option<bool>>(idx)?.map(RowValues::Bool),
        "date" => row.try_get::<_, Option<NaiveDate>>(idx)?.map(RowValues::Date),
        "time" => row.try_get::<_, Option<NaiveTime>>(idx)?.map(RowValues::Time),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(RowValues::Timestamp),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(RowValues::TimestampTz),
        "uuid" => row.try_get::<_, Option<Uuid>>(idx)?.map(RowValues::Uuid),
        "json" | "jsonb" => row.try_get::<_, Option<Value>>(idx)?.map(RowValues::JSON),
        "bytea" => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(RowValues::Blob),
        "text" | "varchar" | "bpchar" | "name" | "citext" => {
            row.try_get::<_, Option<String>>(idx)?.map(RowValues::Text)
        }
        _ => row
            .try_get::<_, Option<RawText>>(idx)?
            .map(|RawText(text)| RowValues::Text(text)),
    };
    Ok(value.unwrap_or(RowValues::Null))
}

/// An empty table shaped like `columns`, optionally with the caller's capitalization.
#[must_use]
pub fn table_for_columns(columns: &[Column], capitalize_from: Option<&str>) -> DataTable {
    let mut names: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
    if let Some(sql) = capitalize_from {
        apply_capitalization(sql, &mut names);
    }
    DataTable::new(
        names
            .into_iter()
            .zip(columns)
            .map(|(name, col)| DataColumn::new(name, SqlType::from_postgres_type(col.type_())))
            .collect(),
    )
}

/// All values of `row`.
///
/// # Errors
/// Returns `SqlExecError` if a column cannot be decoded.
pub fn row_values(row: &Row) -> Result<Vec<RowValues>, SqlExecError> {
    (0..row.columns().len())
        .map(|idx| postgres_extract_value(row, idx))
        .collect()
}

/// Run a prepared statement and read at most `max_rows` rows (0 = all).
///
/// # Errors
/// Returns errors from preparation, execution or value extraction.
pub async fn query_table<C: GenericClient + Sync>(
    client: &C,
    sql: &str,
    params: &Params<'_>,
    max_rows: usize,
    capitalize_from: Option<&str>,
) -> Result<DataTable, SqlExecError> {
    let stmt = client.prepare(sql).await?;
    let mut table = table_for_columns(stmt.columns(), capitalize_from);

    let rows = client.query_raw(&stmt, params.as_refs().iter().copied()).await?;
    pin_mut!(rows);
    while let Some(row) = rows.try_next().await? {
        table.add_row_values(row_values(&row)?);
        if row_limit_reached(max_rows, table.len()) {
            break;
        }
    }
    Ok(table)
}

/// Run parameterless SQL through the simple-query protocol, one table per statement
/// that returns rows. Values arrive as text.
///
/// # Errors
/// Returns errors from execution.
pub async fn simple_query_dataset(
    client: &Client,
    sql: &str,
    max_rows: usize,
    capitalize: bool,
) -> Result<DataSet, SqlExecError> {
    let messages = client.simple_query(sql).await?;
    let capitalize_from = capitalize.then_some(sql);

    let mut set = DataSet::default();
    let mut current: Option<DataTable> = None;
    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(columns) => {
                if let Some(done) = current.take() {
                    set.tables.push(done);
                }
                let mut names: Vec<String> =
                    columns.iter().map(|c| c.name().to_string()).collect();
                if let Some(sql) = capitalize_from {
                    apply_capitalization(sql, &mut names);
                }
                current = Some(DataTable::new(
                    names.into_iter().map(|n| DataColumn::new(n, None)).collect(),
                ));
            }
            SimpleQueryMessage::Row(row) => {
                let table = current.get_or_insert_with(|| {
                    DataTable::new(
                        row.columns()
                            .iter()
                            .map(|c| DataColumn::new(c.name(), None))
                            .collect(),
                    )
                });
                if row_limit_reached(max_rows, table.len()) {
                    continue;
                }
                let values = (0..row.len())
                    .map(|i| {
                        row.get(i)
                            .map_or(RowValues::Null, |text| RowValues::Text(text.to_string()))
                    })
                    .collect();
                table.add_row_values(values);
            }
            SimpleQueryMessage::CommandComplete(_) => {
                if let Some(done) = current.take() {
                    set.tables.push(done);
                }
            }
            _ => {}
        }
    }
    if let Some(done) = current.take() {
        set.tables.push(done);
    }
    Ok(set)
}

/// Quote a cursor name for `FETCH ALL FROM`.
#[must_use]
pub fn quote_cursor_name(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_names_are_quoted() {
        assert_eq!(quote_cursor_name("<unnamed portal 1>"), "\"<unnamed portal 1>\"");
        assert_eq!(quote_cursor_name("a\"b"), "\"a\"\"b\"");
    }

    fn numeric_bytes(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&u16::try_from(digits.len()).unwrap().to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    fn numeric(raw: &[u8]) -> RowValues {
        PgNumeric::from_sql(&Type::NUMERIC, raw).unwrap().0
    }

    #[test]
    fn numerics_that_fit_become_decimals() {
        let value = numeric(&numeric_bytes(0, 0x4000, 2, &[12, 5000]));
        assert_eq!(value, RowValues::Decimal(Decimal::new(-1250, 2)));
        assert_eq!(numeric(&numeric_bytes(0, 0, 0, &[])).to_string(), "0");
        assert_eq!(numeric(&numeric_bytes(-2, 0, 8, &[12])).to_string(), "0.00000012");
    }

    #[test]
    fn numerics_beyond_decimal_range_keep_their_text() {
        // 1e40
        let huge = numeric(&numeric_bytes(10, 0, 0, &[1]));
        assert_eq!(huge, RowValues::Text(format!("1{}", "0".repeat(40))));

        // 0.1 with scale 30
        let fine = numeric(&numeric_bytes(-1, 0, 30, &[1000]));
        assert_eq!(fine, RowValues::Text(format!("0.1{}", "0".repeat(29))));

        assert_eq!(numeric(&numeric_bytes(0, 0xC000, 0, &[])), RowValues::Text("NaN".into()));
        assert!(PgNumeric::from_sql(&Type::NUMERIC, &[0, 1, 0]).is_err());
    }

    #[test]
    fn raw_text_reads_any_type() {
        assert!(<RawText as FromSql>::accepts(&Type::REFCURSOR));
        let RawText(name) = RawText::from_sql(&Type::REFCURSOR, b"c_jobs").unwrap();
        assert_eq!(name, "c_jobs");
        assert!(is_refcursor(&Type::REFCURSOR));
        assert!(!is_refcursor(&Type::TEXT));
    }
}
