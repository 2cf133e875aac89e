use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures_util::stream::BoxStream;

use crate::error::SqlExecError;
use crate::types::{RowValues, SqlType, parse_timestamp};

/// Lazy, single-pass sequence of rows.
///
/// Produced by [`crate::executor::DbExecutor::get_query_stream`]; ends early with one
/// `Err` item if the connection fails after rows were delivered.
pub type RowStream = BoxStream<'static, Result<CustomDbRow, SqlExecError>>;

fn index_cache(column_names: &[String]) -> Arc<HashMap<String, usize>> {
    let mut cache = HashMap::with_capacity(column_names.len() * 2);
    for (i, name) in column_names.iter().enumerate() {
        cache.entry(name.clone()).or_insert(i);
        cache.entry(name.to_lowercase()).or_insert(i);
    }
    Arc::new(cache)
}

/// A row from a database query result
///
/// Column names and the name-to-index cache are shared by every row of a table.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub rows: Vec<RowValues>,
    #[doc(hidden)]
    pub(crate) column_index_cache: Arc<HashMap<String, usize>>,
}

impl CustomDbRow {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, rows: Vec<RowValues>) -> Self {
        let cache = index_cache(&column_names);
        Self {
            column_names,
            rows,
            column_index_cache: cache,
        }
    }

    /// Index of a column; exact match first, then case-insensitive.
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }
        self.column_index_cache
            .get(&column_name.to_lowercase())
            .copied()
    }

    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.rows.get(idx))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.rows.get(index)
    }

    /// The row as strings, NULL mapped to the empty string.
    #[must_use]
    pub fn to_strings(&self) -> Vec<String> {
        self.rows.iter().map(ToString::to_string).collect()
    }
}

/// Column metadata of a [`DataTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataColumn {
    pub name: String,
    /// Neutral type of the column when the driver reported a known one.
    pub sql_type: Option<SqlType>,
}

impl DataColumn {
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: Option<SqlType>) -> Self {
        Self {
            name: name.into(),
            sql_type,
        }
    }
}

/// Typed tabular result: the engine-native shape.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    columns: Vec<DataColumn>,
    column_names: Arc<Vec<String>>,
    column_index_cache: Arc<HashMap<String, usize>>,
    rows: Vec<CustomDbRow>,
}

impl DataTable {
    #[must_use]
    pub fn new(columns: Vec<DataColumn>) -> Self {
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let cache = index_cache(&names);
        Self {
            columns,
            column_names: Arc::new(names),
            column_index_cache: cache,
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[DataColumn] {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    #[must_use]
    pub fn rows(&self) -> &[CustomDbRow] {
        &self.rows
    }

    #[must_use]
    pub fn into_rows(self) -> Vec<CustomDbRow> {
        self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row; the values are matched to columns by position.
    pub fn add_row_values(&mut self, values: Vec<RowValues>) {
        self.rows.push(self.row_from(values));
    }

    /// Build a row sharing this table's column names without storing it.
    #[must_use]
    pub fn row_from(&self, values: Vec<RowValues>) -> CustomDbRow {
        CustomDbRow {
            column_names: Arc::clone(&self.column_names),
            rows: values,
            column_index_cache: Arc::clone(&self.column_index_cache),
        }
    }

    /// First cell of the first row, if any.
    #[must_use]
    pub fn scalar(&self) -> Option<&RowValues> {
        self.rows.first().and_then(|row| row.get_by_index(0))
    }
}

/// Several tables, in the order the engine produced them.
#[derive(Debug, Clone, Default)]
pub struct DataSet {
    pub tables: Vec<DataTable>,
}

impl DataSet {
    #[must_use]
    pub fn first(&self) -> Option<&DataTable> {
        self.tables.first()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Rows rendered as strings, with the column names captured alongside.
///
/// NULL cells become empty strings; the typed accessors turn empty strings
/// back into the caller's default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringRows {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl StringRows {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column name (lower-cased) to index. The first occurrence wins for duplicates.
    #[must_use]
    pub fn column_map(&self) -> HashMap<String, usize> {
        let mut map = HashMap::with_capacity(self.column_names.len());
        for (i, name) in self.column_names.iter().enumerate() {
            map.entry(name.to_lowercase()).or_insert(i);
        }
        map
    }

    /// Cell of `row` under `column`, matched case-insensitively.
    #[must_use]
    pub fn get_value(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self
            .column_names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))?;
        self.rows.get(row)?.get(idx).map(String::as_str)
    }

    /// Cell text, or `default` when the column is missing or the cell is empty.
    #[must_use]
    pub fn column_str<'a>(&'a self, row: usize, column: &str, default: &'a str) -> &'a str {
        match self.get_value(row, column) {
            Some(value) if !value.is_empty() => value,
            _ => default,
        }
    }

    /// # Errors
    /// Returns `SqlExecError::ParameterError` when the cell holds text that is not an integer.
    pub fn column_i64(&self, row: usize, column: &str, default: i64) -> Result<i64, SqlExecError> {
        self.parse_cell(row, column, default, |s| s.parse::<i64>().ok())
    }

    /// # Errors
    /// Returns `SqlExecError::ParameterError` when the cell holds text that is not a number.
    pub fn column_f64(&self, row: usize, column: &str, default: f64) -> Result<f64, SqlExecError> {
        self.parse_cell(row, column, default, |s| s.parse::<f64>().ok())
    }

    /// # Errors
    /// Returns `SqlExecError::ParameterError` when the cell holds text that is not a timestamp.
    pub fn column_datetime(
        &self,
        row: usize,
        column: &str,
        default: NaiveDateTime,
    ) -> Result<NaiveDateTime, SqlExecError> {
        self.parse_cell(row, column, default, parse_timestamp)
    }

    fn parse_cell<T>(
        &self,
        row: usize,
        column: &str,
        default: T,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, SqlExecError> {
        let text = match self.get_value(row, column) {
            Some(value) if !value.trim().is_empty() => value.trim(),
            _ => return Ok(default),
        };
        parse(text).ok_or_else(|| {
            SqlExecError::ParameterError(format!(
                "Value '{text}' in column {column} cannot be converted"
            ))
        })
    }
}

impl From<&DataTable> for StringRows {
    fn from(table: &DataTable) -> Self {
        Self {
            column_names: table.column_names().to_vec(),
            rows: table.rows().iter().map(CustomDbRow::to_strings).collect(),
        }
    }
}
