use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::TryStreamExt;
use rust_decimal::Decimal;
use tiberius::{Column, ColumnData, QueryItem, QueryStream, Row};

use crate::error::SqlExecError;
use crate::options::row_limit_reached;
use crate::results::{DataColumn, DataSet, DataTable};
use crate::types::{RowValues, SqlType};

/// How many result sets to read and how many rows of each to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLimit {
    /// Only the first result set; reading stops as soon as `max_rows` rows are in.
    FirstSet { max_rows: usize },
    /// Every result set; rows past `max_rows` per set are skipped, not stored.
    AllSets { max_rows_per_set: usize },
}

fn plain_value(data: &ColumnData<'_>) -> RowValues {
    match data {
        ColumnData::Bit(Some(b)) => RowValues::Bool(*b),
        ColumnData::U8(Some(v)) => RowValues::Int(i64::from(*v)),
        ColumnData::I16(Some(v)) => RowValues::Int(i64::from(*v)),
        ColumnData::I32(Some(v)) => RowValues::Int(i64::from(*v)),
        ColumnData::I64(Some(v)) => RowValues::Int(*v),
        ColumnData::F32(Some(v)) => RowValues::Float(f64::from(*v)),
        ColumnData::F64(Some(v)) => RowValues::Float(*v),
        // decimal(38, s) can exceed rust_decimal's 28 digits; keep those as text
        ColumnData::Numeric(Some(n)) => {
            match Decimal::try_from_i128_with_scale(n.value(), u32::from(n.scale())) {
                Ok(d) => RowValues::Decimal(d),
                Err(_) => RowValues::Text(n.to_string()),
            }
        }
        ColumnData::String(Some(s)) => RowValues::Text(s.to_string()),
        ColumnData::Guid(Some(g)) => RowValues::Uuid(*g),
        ColumnData::Binary(Some(b)) => RowValues::Blob(b.to_vec()),
        ColumnData::Xml(Some(xml)) => RowValues::Text(xml.to_string()),
        _ => RowValues::Null,
    }
}

/// All values of `row`; date and time columns go through chrono.
///
/// # Errors
/// Returns `SqlExecError` if a date/time value cannot be converted.
pub fn row_values(row: &Row) -> Result<Vec<RowValues>, SqlExecError> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, (_, data)) in row.cells().enumerate() {
        let value = match data {
            ColumnData::DateTime(Some(_))
            | ColumnData::SmallDateTime(Some(_))
            | ColumnData::DateTime2(Some(_)) => row
                .try_get::<NaiveDateTime, _>(idx)?
                .map_or(RowValues::Null, RowValues::Timestamp),
            ColumnData::DateTimeOffset(Some(_)) => row
                .try_get::<DateTime<Utc>, _>(idx)?
                .map_or(RowValues::Null, RowValues::TimestampTz),
            ColumnData::Date(Some(_)) => row
                .try_get::<NaiveDate, _>(idx)?
                .map_or(RowValues::Null, RowValues::Date),
            ColumnData::Time(Some(_)) => row
                .try_get::<NaiveTime, _>(idx)?
                .map_or(RowValues::Null, RowValues::Time),
            other => plain_value(other),
        };
        values.push(value);
    }
    Ok(values)
}

/// An empty table shaped like `columns`.
#[must_use]
pub fn table_for_columns(columns: &[Column]) -> DataTable {
    DataTable::new(
        columns
            .iter()
            .map(|c| DataColumn::new(c.name(), SqlType::from_mssql_column_type(c.column_type())))
            .collect(),
    )
}

/// Drain `stream` into tables, one per result set, honoring `limit`.
///
/// # Errors
/// Returns the driver's error for any failure while reading.
pub async fn read_results(
    mut stream: QueryStream<'_>,
    limit: ReadLimit,
) -> Result<DataSet, SqlExecError> {
    let mut set = DataSet::default();
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                if meta.result_index() > 0 && matches!(limit, ReadLimit::FirstSet { .. }) {
                    break;
                }
                set.tables.push(table_for_columns(meta.columns()));
            }
            QueryItem::Row(row) => {
                let Some(table) = set.tables.last_mut() else {
                    continue;
                };
                match limit {
                    ReadLimit::FirstSet { max_rows } => {
                        table.add_row_values(row_values(&row)?);
                        if row_limit_reached(max_rows, table.len()) {
                            break;
                        }
                    }
                    ReadLimit::AllSets { max_rows_per_set } => {
                        if row_limit_reached(max_rows_per_set, table.len()) {
                            continue;
                        }
                        table.add_row_values(row_values(&row)?);
                    }
                }
            }
        }
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use tiberius::numeric::Numeric;
    use uuid::Uuid;

    #[test]
    fn scalar_column_data_maps_to_row_values() {
        assert_eq!(plain_value(&ColumnData::I32(Some(7))), RowValues::Int(7));
        assert_eq!(plain_value(&ColumnData::Bit(Some(true))), RowValues::Bool(true));
        assert_eq!(
            plain_value(&ColumnData::String(Some(Cow::Borrowed("abc")))),
            RowValues::Text("abc".into())
        );
        assert_eq!(plain_value(&ColumnData::I32(None)), RowValues::Null);
        assert_eq!(plain_value(&ColumnData::String(None)).to_string(), "");
    }

    #[test]
    fn numerics_keep_their_scale() {
        let value = plain_value(&ColumnData::Numeric(Some(Numeric::new_with_scale(12345, 2))));
        assert_eq!(value.to_string(), "123.45");
    }

    #[test]
    fn numerics_beyond_decimal_range_become_text() {
        let wide_scale = plain_value(&ColumnData::Numeric(Some(Numeric::new_with_scale(
            10i128.pow(29),
            30,
        ))));
        match wide_scale {
            RowValues::Text(text) => assert!(text.starts_with("0.1"), "{text}"),
            other => panic!("expected text, got {other:?}"),
        }

        let wide_mantissa = plain_value(&ColumnData::Numeric(Some(Numeric::new_with_scale(
            10i128.pow(32) - 1,
            0,
        ))));
        match wide_mantissa {
            RowValues::Text(text) => assert!(text.starts_with(&"9".repeat(32)), "{text}"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn guids_become_uuids() {
        let id = Uuid::nil();
        assert_eq!(plain_value(&ColumnData::Guid(Some(id))), RowValues::Uuid(id));
    }
}
