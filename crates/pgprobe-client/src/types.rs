//! Core types for the pgprobe client library

use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use uuid::Uuid;

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const TIMESTAMP_MICROS_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]");
const OFFSET_FORMAT: &[FormatItem<'static>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");

/// A query argument or a value returned from a query
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Float(f64),
    /// Exact decimal, kept as its text form
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(Date),
    Timestamp(PrimitiveDateTime),
    TimestampTz(OffsetDateTime),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    /// Try to convert value to a bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to convert value to an i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i64::from(*i)),
            Value::BigInt(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to convert value to a f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(f64::from(*i)),
            Value::BigInt(i) => Some(*i as f64),
            Value::Numeric(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert value to a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Numeric(s) => Some(s),
            _ => None,
        }
    }

    /// Try to convert value to a UUID
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Try to view value as array elements
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the value's kind, for messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Float(_) => "float",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
        }
    }

    /// JSON form used when deserializing rows into structs
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::BigInt(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Numeric(s) => s
                .parse::<serde_json::Number>()
                .map(J::Number)
                .unwrap_or_else(|_| J::String(s.clone())),
            Value::Text(s) => J::String(s.clone()),
            Value::Bytes(b) => J::Array(b.iter().map(|x| J::from(*x)).collect()),
            Value::Json(j) => j.clone(),
            Value::Array(items) => J::Array(items.iter().map(Value::to_json).collect()),
            other => J::String(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::BigInt(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Numeric(s) | Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => {
                f.write_str("\\x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Date(d) => f.write_str(&d.format(DATE_FORMAT).map_err(|_| fmt::Error)?),
            Value::Timestamp(ts) => f.write_str(&format_timestamp(ts)?),
            Value::TimestampTz(ts) => {
                let local = PrimitiveDateTime::new(ts.date(), ts.time());
                f.write_str(&format_timestamp(&local)?)?;
                f.write_str(&ts.offset().format(OFFSET_FORMAT).map_err(|_| fmt::Error)?)
            }
            Value::Json(j) => write!(f, "{}", j),
            Value::Array(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

fn format_timestamp(ts: &PrimitiveDateTime) -> Result<String, fmt::Error> {
    let format = if ts.nanosecond() == 0 {
        TIMESTAMP_FORMAT
    } else {
        TIMESTAMP_MICROS_FORMAT
    };
    ts.format(format).map_err(|_| fmt::Error)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i16 => Int,
    i32 => Int,
    i64 => BigInt,
    f32 => Float,
    f64 => Float,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
    &[u8] => Bytes,
    Uuid => Uuid,
    Date => Date,
    PrimitiveDateTime => Timestamp,
    OffsetDateTime => TimestampTz,
    serde_json::Value => Json,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

macro_rules! impl_from_vec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for Value {
                fn from(items: Vec<$ty>) -> Self {
                    Value::Array(items.into_iter().map(Value::from).collect())
                }
            }

            impl From<Vec<Option<$ty>>> for Value {
                fn from(items: Vec<Option<$ty>>) -> Self {
                    Value::Array(items.into_iter().map(Value::from).collect())
                }
            }
        )*
    };
}

// Vec<u8> is bytea, not an array. NULL elements come in as `Vec<Option<_>>`.
impl_from_vec!(bool, i16, i32, i64, f64, String, &str, Uuid, Value);

/// Arguments bound to a query's placeholders
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    /// No arguments: the query is sent as written
    #[default]
    None,
    /// Arguments for `%s` placeholders, in order
    Positional(Vec<Value>),
    /// Arguments for `%(name)s` placeholders
    Named(BTreeMap<String, Value>),
}

impl Params {
    /// Build named arguments from key/value pairs
    pub fn named<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Params::None)
    }

    /// Number of supplied arguments
    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(values) => values.len(),
            Params::Named(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::None
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(values: [Value; N]) -> Self {
        Params::Positional(values.into())
    }
}

impl From<BTreeMap<String, Value>> for Params {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Params::Named(map)
    }
}

impl From<HashMap<String, Value>> for Params {
    fn from(map: HashMap<String, Value>) -> Self {
        Params::Named(map.into_iter().collect())
    }
}

/// Description of one result column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Type OID, when the protocol reports it
    pub type_oid: Option<u32>,
    pub type_name: Option<String>,
}

impl Column {
    /// Column known only by name (simple query protocol)
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_oid: None,
            type_name: None,
        }
    }
}

/// A row returned from a query
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Arc<[Column]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Get value by column name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get value by index
    pub fn get_idx(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Get all column descriptions
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Get all values
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Take the values, dropping the column descriptions
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Convert row to a HashMap
    ///
    /// With duplicate column names the rightmost value wins.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.columns
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| (k.name.clone(), v.clone()))
            .collect()
    }

    /// Deserialize row into a typed struct
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let object: serde_json::Map<String, serde_json::Value> = self
            .columns
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| (k.name.clone(), v.to_json()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use time::macros::{date, datetime};

    fn columns(names: &[&str]) -> Arc<[Column]> {
        names.iter().map(|n| Column::named(*n)).collect()
    }

    #[test]
    fn test_value_conversions() {
        let v = Value::Int(42);
        assert_eq!(v.as_i64(), Some(42));
        assert_eq!(v.as_f64(), Some(42.0));
        assert!(!v.is_null());

        let v = Value::Null;
        assert!(v.is_null());
        assert_eq!(v.as_i64(), None);

        assert_eq!(Value::from(7_000_000_000i64), Value::BigInt(7_000_000_000));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(
            Value::from(vec![1, 2]),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_vec_of_options_keeps_nulls() {
        assert_eq!(
            Value::from(vec![None::<i32>, Some(1)]),
            Value::Array(vec![Value::Null, Value::Int(1)])
        );
        assert_eq!(
            Value::from(vec![Some("a"), None]),
            Value::Array(vec![Value::Text("a".to_string()), Value::Null])
        );
        assert_eq!(
            Value::from(vec![Some(Value::from(vec![1i32, 2])), None]),
            Value::Array(vec![
                Value::Array(vec![Value::Int(1), Value::Int(2)]),
                Value::Null
            ])
        );
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "\\xdead");
        assert_eq!(
            Value::Array(vec![Value::Int(1), Value::Null]).to_string(),
            "[1, NULL]"
        );
        assert_eq!(Value::Date(date!(2012 - 03 - 04)).to_string(), "2012-03-04");
        assert_eq!(
            Value::Timestamp(datetime!(2012-03-04 05:06:07)).to_string(),
            "2012-03-04 05:06:07"
        );
        assert_eq!(
            Value::Timestamp(datetime!(2012-03-04 05:06:07.25)).to_string(),
            "2012-03-04 05:06:07.250000"
        );
        assert_eq!(
            Value::TimestampTz(datetime!(2012-03-04 05:06:07 +02:00)).to_string(),
            "2012-03-04 05:06:07+02:00"
        );
    }

    #[test]
    fn test_row_access() {
        let row = Row::new(
            columns(&["id", "name"]),
            vec![Value::Int(1), Value::Text("Alice".to_string())],
        );

        assert_eq!(row.get("id").and_then(|v| v.as_i64()), Some(1));
        assert_eq!(row.get("name").and_then(|v| v.as_str()), Some("Alice"));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 2);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Model {
        id: i64,
        module: String,
        noupdate: Option<bool>,
    }

    #[test]
    fn test_row_deserialize() {
        let row = Row::new(
            columns(&["id", "module", "noupdate"]),
            vec![
                Value::BigInt(9),
                Value::Text("base".to_string()),
                Value::Null,
            ],
        );

        let model: Model = row.deserialize().unwrap();
        assert_eq!(
            model,
            Model {
                id: 9,
                module: "base".to_string(),
                noupdate: None
            }
        );
    }

    #[test]
    fn test_params_named_builder() {
        let params = Params::named([("a", 1), ("b", 2)]);
        assert_eq!(params.len(), 2);
        match params {
            Params::Named(map) => assert_eq!(map.get("b"), Some(&Value::Int(2))),
            other => panic!("expected named params, got {:?}", other),
        }
    }
}
