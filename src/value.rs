//! Native values produced by the cell decoder and accepted as query parameters.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde_json::Value as JsonValue;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Date(NaiveDate),
    /// Millisecond precision.
    Timestamp(NaiveDateTime),
    ZonedTimestamp(DateTime<Tz>),
    /// Arrays and rows.
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders the value as a SQL literal for `EXECUTE ... USING`.
    ///
    /// Strings are wrapped in single quotes as-is. Embedded quotes are not
    /// escaped, so callers must not pass untrusted text as a string parameter.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::String(s) => quote(s),
            Value::Integer(i) => i.to_string(),
            // Keeps a fractional part or exponent so `1.0` is not sent as an integer.
            Value::Double(d) => format!("{:?}", d),
            Value::Boolean(b) => b.to_string(),
            Value::Date(_) | Value::Timestamp(_) | Value::ZonedTimestamp(_) => {
                quote(&self.canonical_string())
            }
            Value::Array(items) => format!(
                "ARRAY[{}]",
                items
                    .iter()
                    .map(Value::to_sql_literal)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Map(entries) => {
                let keys: Vec<String> = entries.keys().map(|k| quote(k)).collect();
                let values: Vec<String> = entries.values().map(Value::to_sql_literal).collect();
                format!(
                    "MAP(ARRAY[{}], ARRAY[{}])",
                    keys.join(", "),
                    values.join(", ")
                )
            }
        }
    }

    /// The engine's textual form of temporal values; other scalars use their
    /// default display form.
    pub fn canonical_string(&self) -> String {
        match self {
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
            Value::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
            Value::ZonedTimestamp(ts) => format!(
                "{} {}",
                ts.naive_local().format(TIMESTAMP_FORMAT),
                ts.timezone().name()
            ),
            Value::String(s) => s.clone(),
            other => other.to_sql_literal(),
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s)
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Double).unwrap_or(Value::Null),
            },
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(ts: NaiveDateTime) -> Self {
        Value::Timestamp(ts)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
