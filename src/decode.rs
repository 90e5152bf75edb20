//! Converts the engine's text cells into typed [`Value`]s.
//!
//! Composite cells are not JSON. Maps and rows use a brace grammar
//! (`{a=1, b=x}`) and arrays a bracket grammar (`[{a=1}, {a=2}]`), except that
//! arrays of scalars nested inside a map value are emitted as JSON
//! (`{ids=[10, 20]}`). Both forms are decoded as the engine writes them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, TimeZone};
use chrono_tz::Tz;
use serde_json::Value as JsonValue;

use crate::models::{AthenaError, ColumnInfo, Result};
use crate::value::Value;

/// Decoder category for an engine column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Integer,
    Floating,
    Boolean,
    Date,
    Timestamp,
    TimestampWithZone,
    Map,
    Array,
    Row,
    String,
}

impl TypeTag {
    /// Maps an engine type name such as `bigint`, `decimal(10,2)` or
    /// `timestamp with time zone` to its tag.
    pub fn from_engine_type(type_name: &str) -> Self {
        let lower = type_name.trim().to_ascii_lowercase();
        if lower.starts_with("timestamp") && lower.ends_with("with time zone") {
            return TypeTag::TimestampWithZone;
        }
        let base = lower
            .split(|c: char| c == '(' || c == '<')
            .next()
            .unwrap_or_default()
            .trim();
        match base {
            "tinyint" | "smallint" | "integer" | "int" | "bigint" => TypeTag::Integer,
            "float" | "real" | "double" | "decimal" => TypeTag::Floating,
            "boolean" => TypeTag::Boolean,
            "date" => TypeTag::Date,
            "timestamp" => TypeTag::Timestamp,
            "map" => TypeTag::Map,
            "array" => TypeTag::Array,
            "row" | "struct" => TypeTag::Row,
            _ => TypeTag::String,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Integer => "integer",
            TypeTag::Floating => "floating",
            TypeTag::Boolean => "boolean",
            TypeTag::Date => "date",
            TypeTag::Timestamp => "timestamp",
            TypeTag::TimestampWithZone => "timestamp with time zone",
            TypeTag::Map => "map",
            TypeTag::Array => "array",
            TypeTag::Row => "row",
            TypeTag::String => "string",
        };
        f.write_str(name)
    }
}

fn decode_error(value: &str, tag: TypeTag, reason: impl fmt::Display) -> AthenaError {
    AthenaError::Decode {
        value: value.to_string(),
        type_name: tag.to_string(),
        reason: reason.to_string(),
    }
}

/// Decodes one cell. Empty and absent cells are null for every type.
pub fn decode_cell(cell: Option<&str>, tag: TypeTag) -> Result<Value> {
    let text = match cell {
        None | Some("") => return Ok(Value::Null),
        Some(text) => text,
    };

    match tag {
        TypeTag::Integer => text
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| decode_error(text, tag, e)),
        TypeTag::Floating => text
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|e| decode_error(text, tag, e)),
        TypeTag::Boolean => match text {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(decode_error(text, tag, "expected true or false")),
        },
        TypeTag::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|e| decode_error(text, tag, e)),
        TypeTag::Timestamp => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .map(|ts| Value::Timestamp(ts.trunc_subsecs(3)))
            .map_err(|e| decode_error(text, tag, e)),
        TypeTag::TimestampWithZone => decode_zoned(text),
        TypeTag::Map | TypeTag::Row => decode_map(text, tag),
        TypeTag::Array => decode_array(text),
        TypeTag::String => Ok(Value::String(text.to_string())),
    }
}

/// Decodes one result row against its column metadata.
pub fn decode_row(cells: &[Option<String>], columns: &[ColumnInfo]) -> Result<Vec<Value>> {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let cell = cells.get(i).and_then(|c| c.as_deref());
            decode_cell(cell, TypeTag::from_engine_type(&column.type_name))
        })
        .collect()
}

fn decode_zoned(text: &str) -> Result<Value> {
    let tag = TypeTag::TimestampWithZone;
    let parts: Vec<&str> = text.split_whitespace().collect();
    let [date, time, zone] = parts.as_slice() else {
        return Err(decode_error(text, tag, "expected <date> <time> <zone>"));
    };

    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| decode_error(text, tag, e))?;
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S%.f").map_err(|e| decode_error(text, tag, e))?;
    let zone: Tz = zone.parse().map_err(|e| decode_error(text, tag, e))?;

    zone.from_local_datetime(&date.and_time(time).trunc_subsecs(3))
        .earliest()
        .map(Value::ZonedTimestamp)
        .ok_or_else(|| decode_error(text, tag, "local time does not exist in zone"))
}

fn strip_delimiters<'a>(text: &'a str, open: char, close: char, tag: TypeTag) -> Result<&'a str> {
    text.trim()
        .strip_prefix(open)
        .and_then(|rest| rest.strip_suffix(close))
        .ok_or_else(|| decode_error(text, tag, format!("expected {}...{}", open, close)))
}

/// Decodes `{k=v, ...}`. Values are kept as strings unless they are bracketed
/// arrays, which are decoded with [`decode_array`].
fn decode_map(text: &str, tag: TypeTag) -> Result<Value> {
    let inner = strip_delimiters(text, '{', '}', tag)?;
    let mut entries = BTreeMap::new();
    if inner.trim().is_empty() {
        return Ok(Value::Map(entries));
    }

    for pair in split_pairs(inner) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| decode_error(text, tag, format!("missing '=' in {:?}", pair)))?;
        let value = value.trim();
        let value = if value.starts_with('[') && value.ends_with(']') {
            decode_array(value)?
        } else {
            Value::String(value.to_string())
        };
        entries.insert(key.trim().to_string(), value);
    }
    Ok(Value::Map(entries))
}

/// Decodes `[e, ...]`. Arrays of maps/rows use the brace grammar per element;
/// arrays of scalars are JSON. Elements that are neither stay as strings.
fn decode_array(text: &str) -> Result<Value> {
    let tag = TypeTag::Array;
    let inner = strip_delimiters(text, '[', ']', tag)?;
    if inner.trim().is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    let elements = split_top_level(inner, tag)?;
    if !elements.iter().any(|e| e.starts_with('{')) {
        if let Ok(json) = serde_json::from_str::<JsonValue>(text.trim()) {
            return Ok(Value::from(json));
        }
    }

    elements
        .into_iter()
        .map(|element| {
            if element.starts_with('{') {
                decode_map(element, TypeTag::Row)
            } else if element.starts_with('[') {
                decode_array(element)
            } else {
                Ok(Value::String(element.to_string()))
            }
        })
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

/// True when the text after a comma begins another `key=` pair. The scan
/// stops at the first character that cannot be part of a key.
fn starts_new_pair(rest: &str) -> bool {
    for (i, c) in rest.trim_start().char_indices() {
        match c {
            '=' => return i > 0,
            ',' | '[' | ']' | '{' | '}' => return false,
            c if c.is_whitespace() => return false,
            _ => {}
        }
    }
    false
}

/// Splits map or row contents into `key=value` pieces.
///
/// Commas inside brackets never split, so nested composites stay whole.
/// Map values are free text, so stray closers are ignored, and if an opener
/// is never closed the brackets are disregarded and only the `key=`
/// lookahead decides.
fn split_pairs(text: &str) -> Vec<&str> {
    let mut depth = 0usize;
    let pieces = split_at(text, |c, rest| {
        match c {
            '[' | '{' => depth += 1,
            ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        c == ',' && depth == 0 && starts_new_pair(rest)
    });
    if depth == 0 {
        return pieces;
    }
    split_at(text, |c, rest| c == ',' && starts_new_pair(rest))
}

/// Splits `text` at every character for which `split` returns true. `split`
/// sees each character and the text after it.
fn split_at<'a>(text: &'a str, mut split: impl FnMut(char, &str) -> bool) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        let next = i + c.len_utf8();
        if split(c, &text[next..]) {
            pieces.push(text[start..i].trim());
            start = next;
        }
    }
    pieces.push(text[start..].trim());
    pieces
}

/// Splits array contents on commas outside any bracket pair. Brackets must
/// balance.
fn split_top_level<'a>(text: &'a str, tag: TypeTag) -> Result<Vec<&'a str>> {
    let mut open: Vec<char> = Vec::new();
    let mut unbalanced = None;
    let pieces = split_at(text, |c, _| match c {
        '[' | '{' => {
            open.push(c);
            false
        }
        ']' | '}' => {
            let expected = if c == ']' { '[' } else { '{' };
            if open.pop() != Some(expected) && unbalanced.is_none() {
                unbalanced = Some(format!("unbalanced '{}'", c));
            }
            false
        }
        ',' => open.is_empty(),
        _ => false,
    });
    if let Some(reason) = unbalanced {
        return Err(decode_error(text, tag, reason));
    }
    if let Some(c) = open.last() {
        return Err(decode_error(text, tag, format!("unclosed '{}'", c)));
    }
    Ok(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    fn s(text: &str) -> Value {
        Value::String(text.to_string())
    }

    #[test]
    fn test_type_tags_from_engine_names() {
        assert_eq!(TypeTag::from_engine_type("bigint"), TypeTag::Integer);
        assert_eq!(TypeTag::from_engine_type("decimal(10,2)"), TypeTag::Floating);
        assert_eq!(TypeTag::from_engine_type("DOUBLE"), TypeTag::Floating);
        assert_eq!(
            TypeTag::from_engine_type("timestamp with time zone"),
            TypeTag::TimestampWithZone
        );
        assert_eq!(TypeTag::from_engine_type("timestamp(3)"), TypeTag::Timestamp);
        assert_eq!(TypeTag::from_engine_type("array<integer>"), TypeTag::Array);
        assert_eq!(TypeTag::from_engine_type("row"), TypeTag::Row);
        assert_eq!(TypeTag::from_engine_type("varchar"), TypeTag::String);
        assert_eq!(TypeTag::from_engine_type("json"), TypeTag::String);
    }

    #[test]
    fn test_scalars() {
        assert_eq!(decode_cell(Some("1"), TypeTag::Integer).unwrap(), Value::Integer(1));
        assert_eq!(decode_cell(Some("-42"), TypeTag::Integer).unwrap(), Value::Integer(-42));
        assert_eq!(decode_cell(Some("0.25"), TypeTag::Floating).unwrap(), Value::Double(0.25));
        assert_eq!(decode_cell(Some("true"), TypeTag::Boolean).unwrap(), Value::Boolean(true));
        assert_eq!(decode_cell(Some("false"), TypeTag::Boolean).unwrap(), Value::Boolean(false));
        assert_eq!(decode_cell(Some("abc"), TypeTag::String).unwrap(), s("abc"));
    }

    #[test]
    fn test_empty_and_absent_cells_are_null() {
        for tag in [TypeTag::Integer, TypeTag::String, TypeTag::Map, TypeTag::Array] {
            assert_eq!(decode_cell(None, tag).unwrap(), Value::Null);
            assert_eq!(decode_cell(Some(""), tag).unwrap(), Value::Null);
        }
    }

    #[test]
    fn test_dates_and_timestamps() {
        let date = NaiveDate::from_ymd_opt(2012, 10, 30).unwrap();
        assert_eq!(decode_cell(Some("2012-10-30"), TypeTag::Date).unwrap(), Value::Date(date));

        let expected = NaiveDate::from_ymd_opt(2017, 1, 21)
            .unwrap()
            .and_hms_milli_opt(12, 51, 34, 0)
            .unwrap();
        assert_eq!(
            decode_cell(Some("2017-01-21 12:51:34.000"), TypeTag::Timestamp).unwrap(),
            Value::Timestamp(expected)
        );

        let truncated = NaiveDate::from_ymd_opt(2017, 1, 21)
            .unwrap()
            .and_hms_milli_opt(12, 51, 34, 123)
            .unwrap();
        assert_eq!(
            decode_cell(Some("2017-01-21 12:51:34.123456"), TypeTag::Timestamp).unwrap(),
            Value::Timestamp(truncated)
        );
        assert_eq!(
            decode_cell(Some("2017-01-21 12:51:34"), TypeTag::Timestamp).unwrap(),
            Value::Timestamp(expected)
        );
    }

    #[test]
    fn test_zoned_timestamp() {
        let value = decode_cell(
            Some("2020-06-01  08:00:00.250 America/New_York"),
            TypeTag::TimestampWithZone,
        )
        .unwrap();
        let Value::ZonedTimestamp(ts) = value else {
            panic!("expected zoned timestamp");
        };
        assert_eq!(ts.timezone(), chrono_tz::America::New_York);
        assert_eq!(
            ts.naive_local(),
            NaiveDate::from_ymd_opt(2020, 6, 1)
                .unwrap()
                .and_hms_milli_opt(8, 0, 0, 250)
                .unwrap()
        );
        assert_eq!(ts.naive_utc().to_string(), "2020-06-01 12:00:00.250");
    }

    #[test]
    fn test_malformed_scalars_fail() {
        assert!(matches!(
            decode_cell(Some("1.5"), TypeTag::Integer),
            Err(AthenaError::Decode { .. })
        ));
        assert!(decode_cell(Some("TRUE"), TypeTag::Boolean).is_err());
        assert!(decode_cell(Some("2012-13-01"), TypeTag::Date).is_err());
        assert!(decode_cell(Some("2020-06-01 08:00:00"), TypeTag::TimestampWithZone).is_err());
        assert!(decode_cell(Some("2020-06-01 08:00:00 Mars/Base"), TypeTag::TimestampWithZone).is_err());
    }

    #[test]
    fn test_empty_composites() {
        assert_eq!(decode_cell(Some("{}"), TypeTag::Map).unwrap(), map(vec![]));
        assert_eq!(decode_cell(Some("[]"), TypeTag::Array).unwrap(), Value::Array(vec![]));
    }

    #[test]
    fn test_nested_braces_do_not_split() {
        assert_eq!(
            decode_cell(Some("{a=1, b=[{x=2}]}"), TypeTag::Map).unwrap(),
            map(vec![("a", s("1")), ("b", Value::Array(vec![map(vec![("x", s("2"))])]))])
        );
    }

    #[test]
    fn test_scalar_array_in_map_value_is_json() {
        assert_eq!(
            decode_cell(Some("{ids=[10, 20]}"), TypeTag::Map).unwrap(),
            map(vec![("ids", Value::Array(vec![Value::Integer(10), Value::Integer(20)]))])
        );
    }

    #[test]
    fn test_comma_inside_value_needs_key_lookahead() {
        assert_eq!(
            decode_cell(Some("{greeting=hello, world, n=2}"), TypeTag::Row).unwrap(),
            map(vec![("greeting", s("hello, world")), ("n", s("2"))])
        );
    }

    #[test]
    fn test_nested_map_value_stays_raw() {
        assert_eq!(
            decode_cell(Some("{outer={inner=1, other=2}}"), TypeTag::Map).unwrap(),
            map(vec![("outer", s("{inner=1, other=2}"))])
        );
    }

    #[test]
    fn test_array_of_rows() {
        assert_eq!(
            decode_cell(Some("[{a=1, b=x}, {a=2, b=[1]}]"), TypeTag::Array).unwrap(),
            Value::Array(vec![
                map(vec![("a", s("1")), ("b", s("x"))]),
                map(vec![("a", s("2")), ("b", Value::Array(vec![Value::Integer(1)]))]),
            ])
        );
    }

    #[test]
    fn test_array_of_bare_words() {
        assert_eq!(
            decode_cell(Some("[alpha, beta]"), TypeTag::Array).unwrap(),
            Value::Array(vec![s("alpha"), s("beta")])
        );
    }

    #[test]
    fn test_stray_brackets_in_map_values() {
        assert_eq!(
            decode_cell(Some("{note=see ], n=2}"), TypeTag::Map).unwrap(),
            map(vec![("note", s("see ]")), ("n", s("2"))])
        );
        assert_eq!(
            decode_cell(Some("{face=:-{, n=2}"), TypeTag::Row).unwrap(),
            map(vec![("face", s(":-{")), ("n", s("2"))])
        );
        assert_eq!(
            decode_cell(Some("{a=[1, 2}"), TypeTag::Map).unwrap(),
            map(vec![("a", s("[1, 2"))])
        );
    }

    #[test]
    fn test_long_comma_separated_value_decodes_in_linear_time() {
        let cell = format!("{{a=x{}, b=1}}", ",y".repeat(200_000));
        let started = std::time::Instant::now();
        let Value::Map(entries) = decode_cell(Some(&cell), TypeTag::Map).unwrap() else {
            panic!("expected map");
        };
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["b"], s("1"));
        let Value::String(a) = &entries["a"] else {
            panic!("expected string");
        };
        assert_eq!(a.len(), 1 + 400_000);
    }

    #[test]
    fn test_unbalanced_composites_fail() {
        assert!(decode_cell(Some("{a=1"), TypeTag::Map).is_err());
        assert!(decode_cell(Some("[{a=1]"), TypeTag::Array).is_err());
        assert!(decode_cell(Some("{novalue}"), TypeTag::Map).is_err());
    }

    #[test]
    fn test_decode_row_uses_column_types() {
        let columns = vec![
            ColumnInfo {
                name: "id".to_string(),
                type_name: "integer".to_string(),
                ..Default::default()
            },
            ColumnInfo {
                name: "tags".to_string(),
                type_name: "map".to_string(),
                ..Default::default()
            },
        ];
        let cells = vec![Some("7".to_string()), None];
        assert_eq!(
            decode_row(&cells, &columns).unwrap(),
            vec![Value::Integer(7), Value::Null]
        );
    }
}
