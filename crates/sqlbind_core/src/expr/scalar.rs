use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use sqlbind_error::{Result, SqlError};

use crate::types::DataType;

/// A constant value appearing in a resolved plan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Int64(i64),
    Double(f64),
    String(String),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// JSON text, validated when the literal was bound.
    Json(String),
}

impl ScalarValue {
    /// Parse the text of a typed literal such as `DATE '2024-01-01'`.
    pub fn parse_typed(datatype: &DataType, text: &str) -> Result<Self> {
        match datatype {
            DataType::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(ScalarValue::Date)
                .map_err(|_| SqlError::new(format!("Invalid DATE literal: '{text}'"))),
            DataType::Timestamp => {
                const FORMATS: &[&str] = &[
                    "%Y-%m-%d %H:%M:%S%.f",
                    "%Y-%m-%dT%H:%M:%S%.f",
                    "%Y-%m-%d %H:%M",
                ];
                for format in FORMATS {
                    if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
                        return Ok(ScalarValue::Timestamp(ts));
                    }
                }
                // Date only, midnight.
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(ScalarValue::Timestamp)
                    .ok_or_else(|| SqlError::new(format!("Invalid TIMESTAMP literal: '{text}'")))
            }
            DataType::Json => match serde_json::from_str::<serde_json::Value>(text) {
                Ok(_) => Ok(ScalarValue::Json(text.to_string())),
                Err(e) => Err(SqlError::new(format!("Invalid JSON literal: {e}"))),
            },
            DataType::String => Ok(ScalarValue::String(text.to_string())),
            other => Err(SqlError::new(format!(
                "Typed literals of type {other} are not supported"
            ))),
        }
    }

    pub fn try_as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn try_as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v:?}"),
            Self::String(v) => write!(f, "'{v}'"),
            Self::Bool(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            Self::Date(v) => write!(f, "DATE '{v}'"),
            Self::Timestamp(v) => write!(f, "TIMESTAMP '{v}'"),
            Self::Json(v) => write!(f, "JSON '{v}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_dates_and_timestamps() {
        let date = ScalarValue::parse_typed(&DataType::Date, "2024-02-29").unwrap();
        assert_eq!("DATE '2024-02-29'", date.to_string());

        ScalarValue::parse_typed(&DataType::Date, "2023-02-29").unwrap_err();

        let ts = ScalarValue::parse_typed(&DataType::Timestamp, "2024-01-01 10:30:00").unwrap();
        assert_eq!("TIMESTAMP '2024-01-01 10:30:00'", ts.to_string());

        let midnight = ScalarValue::parse_typed(&DataType::Timestamp, "2024-01-01").unwrap();
        assert_eq!("TIMESTAMP '2024-01-01 00:00:00'", midnight.to_string());
    }

    #[test]
    fn parse_json() {
        ScalarValue::parse_typed(&DataType::Json, r#"{"a": [1, 2]}"#).unwrap();
        ScalarValue::parse_typed(&DataType::Json, "{oops").unwrap_err();
    }
}
