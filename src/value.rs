use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};

use crate::errors::RowGraphError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Integer,
    Float,
    Text,
    /// Seconds since the Unix epoch.
    Date,
}

impl ValueType {
    pub fn parse(name: &str) -> Result<Self, RowGraphError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" | "long" | "number" => Ok(ValueType::Integer),
            "float" | "double" | "real" => Ok(ValueType::Float),
            "text" | "string" | "varchar" | "varchar2" | "char" => Ok(ValueType::Text),
            "date" => Ok(ValueType::Date),
            other => Err(RowGraphError::schema(format!(
                "unsupported column type {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::Text => "text",
            ValueType::Date => "date",
        }
    }

    pub fn sql_type(self) -> &'static str {
        match self {
            ValueType::Integer | ValueType::Date => "INTEGER",
            ValueType::Float => "REAL",
            ValueType::Text => "TEXT",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Date(i64),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            ColumnValue::Null => None,
            ColumnValue::Integer(_) => Some(ValueType::Integer),
            ColumnValue::Float(_) => Some(ValueType::Float),
            ColumnValue::Text(_) => Some(ValueType::Text),
            ColumnValue::Date(_) => Some(ValueType::Date),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Integer(v) | ColumnValue::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Integer(v) | ColumnValue::Date(v) => Some(*v as f64),
            ColumnValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Parses raw text into a value of the given type. `null` (any case) and
    /// the empty string become `Null`.
    pub fn parse_as(value_type: ValueType, raw: &str) -> Result<Self, RowGraphError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
            return Ok(ColumnValue::Null);
        }
        match value_type {
            ValueType::Integer => trimmed
                .parse::<i64>()
                .map(ColumnValue::Integer)
                .map_err(|_| RowGraphError::invalid_input(format!("{trimmed} is not an integer"))),
            ValueType::Date => trimmed
                .parse::<i64>()
                .map(ColumnValue::Date)
                .map_err(|_| RowGraphError::invalid_input(format!("{trimmed} is not a date"))),
            ValueType::Float => trimmed
                .parse::<f64>()
                .map(ColumnValue::Float)
                .map_err(|_| RowGraphError::invalid_input(format!("{trimmed} is not a float"))),
            ValueType::Text => Ok(ColumnValue::Text(
                trimmed
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .unwrap_or(trimmed)
                    .to_string(),
            )),
        }
    }

    /// Coerces this value into the column type, widening integers to floats.
    pub fn coerce(self, value_type: ValueType) -> Result<Self, RowGraphError> {
        match (value_type, self) {
            (_, ColumnValue::Null) => Ok(ColumnValue::Null),
            (ValueType::Integer, v @ ColumnValue::Integer(_)) => Ok(v),
            (ValueType::Integer, ColumnValue::Date(v)) => Ok(ColumnValue::Integer(v)),
            (ValueType::Float, v @ ColumnValue::Float(_)) => Ok(v),
            (ValueType::Float, ColumnValue::Integer(v)) => Ok(ColumnValue::Float(v as f64)),
            (ValueType::Text, v @ ColumnValue::Text(_)) => Ok(v),
            (ValueType::Date, v @ ColumnValue::Date(_)) => Ok(v),
            (ValueType::Date, ColumnValue::Integer(v)) => Ok(ColumnValue::Date(v)),
            (expected, other) => Err(RowGraphError::invalid_input(format!(
                "value {other} does not fit column type {expected:?}"
            ))),
        }
    }

    /// Equality with an absolute tolerance applied to floating values.
    pub fn tolerant_eq(&self, other: &ColumnValue, tolerance: f64) -> bool {
        match (self, other) {
            (ColumnValue::Float(a), ColumnValue::Float(b)) => (a - b).abs() <= tolerance,
            (ColumnValue::Float(a), ColumnValue::Integer(b))
            | (ColumnValue::Integer(b), ColumnValue::Float(a)) => (a - *b as f64).abs() <= tolerance,
            (a, b) => a == b,
        }
    }

    /// Orders numbers against numbers and text against text; anything else,
    /// including `Null`, is unordered.
    pub fn compare(&self, other: &ColumnValue) -> Option<Ordering> {
        match (self, other) {
            (ColumnValue::Text(a), ColumnValue::Text(b)) => Some(a.cmp(b)),
            (ColumnValue::Integer(a), ColumnValue::Integer(b))
            | (ColumnValue::Date(a), ColumnValue::Date(b))
            | (ColumnValue::Integer(a), ColumnValue::Date(b))
            | (ColumnValue::Date(a), ColumnValue::Integer(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Renders the value as a SQL literal.
    pub fn to_sql_literal(&self) -> String {
        match self {
            ColumnValue::Null => String::from("NULL"),
            ColumnValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "null"),
            ColumnValue::Integer(v) | ColumnValue::Date(v) => write!(f, "{v}"),
            ColumnValue::Float(v) => write!(f, "{v}"),
            ColumnValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Integer(value)
    }
}

impl From<f64> for ColumnValue {
    fn from(value: f64) -> Self {
        ColumnValue::Float(value)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}
