//! Query execution.
//!
//! Every check talks to the server through [`QueryExecutor`], which returns
//! rows of loosely typed scalars. Three implementations exist:
//! - [`PostgresExecutor`]: native driver (`postgres` crate), typed columns.
//! - [`PsqlExecutor`]: shells out to `psql`, capturing unaligned output in
//!   a scratch temp file. For hosts where only the client binary is allowed.
//! - [`MockExecutor`]: scripted responses for tests.
//!
//! Typed accessors on [`Row`] coerce text to numbers, so both real paths
//! look the same to the checks.

mod driver;
pub mod mock;
mod psql;

pub use driver::{PostgresExecutor, format_postgres_error};
pub use mock::MockExecutor;
pub use psql::{PsqlExecutor, find_in_path};

use serde::Serialize;

use crate::error::{CheckError, ExecError};

/// A single scalar value from a result row.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders the value the way `psql` would print it.
    pub fn to_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => if *b { "t" } else { "f" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", *f as i64)
                } else {
                    format!("{:.2}", f)
                }
            }
            Value::Text(s) => s.clone(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// One result row.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    fn value(&self, idx: usize) -> Result<&Value, CheckError> {
        self.0.get(idx).ok_or(CheckError::Unparsable {
            column: idx,
            value: "<missing column>".to_string(),
        })
    }

    fn unparsable(idx: usize, v: &Value) -> CheckError {
        CheckError::Unparsable {
            column: idx,
            value: v.to_display(),
        }
    }

    /// Integer column; NULL maps to `None`.
    pub fn opt_i64(&self, idx: usize) -> Result<Option<i64>, CheckError> {
        match self.value(idx)? {
            Value::Null => Ok(None),
            Value::Int(i) => Ok(Some(*i)),
            Value::Float(f) => Ok(Some(f.round() as i64)),
            Value::Bool(b) => Ok(Some(i64::from(*b))),
            v @ Value::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return Ok(None);
                }
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
                    .map(Some)
                    .ok_or_else(|| Self::unparsable(idx, v))
            }
        }
    }

    pub fn get_i64(&self, idx: usize) -> Result<i64, CheckError> {
        self.opt_i64(idx)?
            .ok_or_else(|| Self::unparsable(idx, &Value::Null))
    }

    /// Integer column with NULL treated as 0.
    pub fn i64_or_zero(&self, idx: usize) -> Result<i64, CheckError> {
        Ok(self.opt_i64(idx)?.unwrap_or(0))
    }

    pub fn opt_f64(&self, idx: usize) -> Result<Option<f64>, CheckError> {
        match self.value(idx)? {
            Value::Null => Ok(None),
            Value::Int(i) => Ok(Some(*i as f64)),
            Value::Float(f) => Ok(Some(*f)),
            Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
            v @ Value::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return Ok(None);
                }
                s.parse::<f64>()
                    .map(Some)
                    .map_err(|_| Self::unparsable(idx, v))
            }
        }
    }

    pub fn get_f64(&self, idx: usize) -> Result<f64, CheckError> {
        self.opt_f64(idx)?
            .ok_or_else(|| Self::unparsable(idx, &Value::Null))
    }

    pub fn get_bool(&self, idx: usize) -> Result<bool, CheckError> {
        match self.value(idx)? {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            v @ Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "on" | "yes" | "1" => Ok(true),
                "f" | "false" | "off" | "no" | "0" => Ok(false),
                _ => Err(Self::unparsable(idx, v)),
            },
            v => Err(Self::unparsable(idx, v)),
        }
    }

    /// Text column; NULL maps to an empty string.
    pub fn get_str(&self, idx: usize) -> Result<String, CheckError> {
        Ok(self.value(idx)?.to_display())
    }

    /// All columns rendered as display strings.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(Value::to_display).collect()
    }
}

/// Executes SQL against the target database.
pub trait QueryExecutor {
    /// Runs `sql` and returns all result rows.
    fn query(&mut self, sql: &str) -> Result<Vec<Row>, ExecError>;

    /// Short name of the execution path, for logs.
    fn describe(&self) -> &'static str;

    /// Runs `sql` and returns the first row, or [`CheckError::NoRows`].
    fn query_one(&mut self, sql: &str) -> Result<Row, CheckError> {
        self.query(sql)?.into_iter().next().ok_or(CheckError::NoRows)
    }

    /// Verifies the execution path end to end.
    fn ping(&mut self) -> Result<(), ExecError> {
        self.query("SELECT 1").map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_values_coerce_to_numbers() {
        let row = Row::new(vec!["42".into(), " 3.5 ".into(), "".into()]);
        assert_eq!(row.get_i64(0).unwrap(), 42);
        assert_eq!(row.get_f64(1).unwrap(), 3.5);
        assert_eq!(row.opt_i64(2).unwrap(), None);
        assert_eq!(row.i64_or_zero(2).unwrap(), 0);
    }

    #[test]
    fn decimal_text_rounds_to_integer() {
        let row = Row::new(vec!["94.85".into()]);
        assert_eq!(row.get_i64(0).unwrap(), 95);
    }

    #[test]
    fn garbage_text_is_unparsable() {
        let row = Row::new(vec!["n/a".into()]);
        assert!(matches!(
            row.get_i64(0),
            Err(CheckError::Unparsable { column: 0, .. })
        ));
    }

    #[test]
    fn missing_column_is_unparsable() {
        let row = Row::new(vec![Value::Int(1)]);
        assert!(row.get_i64(3).is_err());
    }

    #[test]
    fn booleans_accept_psql_spelling() {
        let row = Row::new(vec!["t".into(), "off".into(), Value::Bool(true)]);
        assert!(row.get_bool(0).unwrap());
        assert!(!row.get_bool(1).unwrap());
        assert!(row.get_bool(2).unwrap());
    }

    #[test]
    fn display_matches_psql_output() {
        assert_eq!(Value::Bool(false).to_display(), "f");
        assert_eq!(Value::Float(12.0).to_display(), "12");
        assert_eq!(Value::Float(12.345).to_display(), "12.35");
        assert_eq!(Value::Null.to_display(), "");
    }
}
