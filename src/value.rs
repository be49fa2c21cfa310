use serde::{Deserialize, Serialize};
use std::fmt;

/// A single typed cell of a [`Table`](crate::table::Table).
///
/// Spreadsheet sources hand us loosely typed data: integers, floats, text and
/// blanks. Every cell is normalized into one of these four variants at load
/// time so that downstream code never has to guess.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Missing or blank cell
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Parse a raw text cell (as read from CSV) into a typed value
    ///
    /// Blank cells become [`Value::Null`], integers and floats are recognised,
    /// anything else is kept as text.
    ///
    /// # Examples
    /// ```
    /// use dti_dashboard::value::Value;
    ///
    /// assert_eq!(Value::parse(""), Value::Null);
    /// assert_eq!(Value::parse("2021"), Value::Int(2021));
    /// assert_eq!(Value::parse("0.5"), Value::Float(0.5));
    /// assert_eq!(Value::parse("万科A"), Value::Text("万科A".to_string()));
    /// ```
    pub fn parse(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Value::from_f64(f);
        }
        Value::Text(trimmed.to_string())
    }

    /// Wrap a float, mapping NaN to null
    pub fn from_f64(f: f64) -> Value {
        if f.is_nan() { Value::Null } else { Value::Float(f) }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell, `None` for blanks and non-numeric text
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if f.is_nan() => None,
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| !f.is_nan()),
        }
    }

    /// Integer view of the cell; integral floats and numeric text are accepted
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => integral(*f),
            Value::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(integral))
            }
            Value::Null => None,
        }
    }

    /// Text view of the cell, `None` for blanks
    ///
    /// Integral floats render without a fractional part so that a code read
    /// from a workbook as `1.0` becomes `"1"`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::from_f64(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}
