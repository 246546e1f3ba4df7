//! Row factories
//!
//! A cursor hands every fetched [`Row`] to a factory, which decides the
//! shape the caller gets back.

use crate::types::{Row, Value};
use std::collections::HashMap;

/// Builds the caller's representation of a row
pub trait RowFactory {
    type Output;

    fn build(&mut self, row: Row) -> Self::Output;
}

/// Plain list of values, in column order
#[derive(Debug, Clone, Copy, Default)]
pub struct TupleRow;

impl RowFactory for TupleRow {
    type Output = Vec<Value>;

    fn build(&mut self, row: Row) -> Vec<Value> {
        row.into_values()
    }
}

/// Column name → value
#[derive(Debug, Clone, Copy, Default)]
pub struct DictRow;

impl RowFactory for DictRow {
    type Output = HashMap<String, Value>;

    fn build(&mut self, row: Row) -> HashMap<String, Value> {
        row.to_map()
    }
}

/// `(name, value)` pairs in column order, duplicates kept
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedDictRow;

impl RowFactory for OrderedDictRow {
    type Output = Vec<(String, Value)>;

    fn build(&mut self, row: Row) -> Vec<(String, Value)> {
        let names: Vec<String> = row.columns().iter().map(|c| c.name.clone()).collect();
        names.into_iter().zip(row.into_values()).collect()
    }
}

impl<F, T> RowFactory for F
where
    F: FnMut(Row) -> T,
{
    type Output = T;

    fn build(&mut self, row: Row) -> T {
        self(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Column;
    use std::sync::Arc;

    fn sample() -> Row {
        let columns: Arc<[Column]> = vec![
            Column::named("id"),
            Column::named("name"),
            Column::named("id"),
        ]
        .into();
        Row::new(
            columns,
            vec![Value::Int(1), Value::from("alice"), Value::Int(2)],
        )
    }

    #[test]
    fn test_tuple_row() {
        assert_eq!(
            TupleRow.build(sample()),
            vec![Value::Int(1), Value::from("alice"), Value::Int(2)]
        );
    }

    #[test]
    fn test_dict_row_last_duplicate_wins() {
        let map = DictRow.build(sample());
        assert_eq!(map.len(), 2);
        assert_eq!(map["id"], Value::Int(2));
        assert_eq!(map["name"], Value::from("alice"));
    }

    #[test]
    fn test_ordered_dict_keeps_order_and_duplicates() {
        let pairs = OrderedDictRow.build(sample());
        let names: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, ["id", "name", "id"]);
    }

    #[test]
    fn test_closure_factory() {
        let mut seen = 0;
        let mut factory = |row: Row| {
            seen += 1;
            row.get("name").and_then(|v| v.as_str().map(str::to_owned))
        };
        assert_eq!(factory.build(sample()), Some("alice".to_string()));
        assert_eq!(factory.build(sample()), Some("alice".to_string()));
        drop(factory);
        assert_eq!(seen, 2);
    }
}
