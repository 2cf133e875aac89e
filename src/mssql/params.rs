use tiberius::Query;
use tiberius::numeric::Numeric;

use crate::command::Parameter;
use crate::types::RowValues;

/// Bind `values` to `@P1..@Pn` of `query`, in order.
///
/// Values are cloned into the query; tiberius owns the data it sends.
pub fn bind_values<'a, 'v>(query: &mut Query<'a>, values: impl IntoIterator<Item = &'v RowValues>) {
    for value in values {
        match value {
            RowValues::Int(i) => query.bind(*i),
            RowValues::Float(f) => query.bind(*f),
            RowValues::Decimal(d) => {
                #[allow(clippy::cast_possible_truncation)]
                let scale = d.scale() as u8;
                query.bind(Numeric::new_with_scale(d.mantissa(), scale));
            }
            RowValues::Text(s) => query.bind(s.clone()),
            RowValues::Bool(b) => query.bind(*b),
            RowValues::Date(d) => query.bind(*d),
            RowValues::Time(t) => query.bind(*t),
            RowValues::Timestamp(dt) => query.bind(*dt),
            RowValues::TimestampTz(dt) => query.bind(*dt),
            RowValues::Uuid(u) => query.bind(*u),
            RowValues::Null => query.bind(Option::<String>::None),
            RowValues::JSON(jsval) => query.bind(jsval.to_string()),
            RowValues::Blob(bytes) => query.bind(bytes.clone()),
        }
    }
}

/// Bind the values of `parameters` (all of them, in order).
pub fn bind_parameters<'a>(query: &mut Query<'a>, parameters: &[Parameter]) {
    bind_values(query, parameters.iter().map(|p| &p.value));
}
