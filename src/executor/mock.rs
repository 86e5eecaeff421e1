//! Scripted executor for tests.
//!
//! Responses are matched by SQL substring, first match wins. Every
//! executed statement is recorded so tests can assert which queries ran.

use super::{QueryExecutor, Row, Value};
use crate::error::ExecError;

#[derive(Clone, Debug)]
enum Response {
    Rows(Vec<Row>),
    Fail(String),
}

/// In-memory query executor.
#[derive(Clone, Debug, Default)]
pub struct MockExecutor {
    responses: Vec<(String, Response)>,
    executed: Vec<String>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers any query containing `pattern` with `rows`.
    pub fn on(mut self, pattern: &str, rows: Vec<Row>) -> Self {
        self.responses
            .push((pattern.to_string(), Response::Rows(rows)));
        self
    }

    /// Answers any query containing `pattern` with a single row.
    pub fn on_row(self, pattern: &str, values: Vec<Value>) -> Self {
        self.on(pattern, vec![Row::new(values)])
    }

    /// Fails any query containing `pattern`.
    pub fn fail(mut self, pattern: &str, message: &str) -> Self {
        self.responses
            .push((pattern.to_string(), Response::Fail(message.to_string())));
        self
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// True if any executed statement contains `pattern`.
    pub fn ran(&self, pattern: &str) -> bool {
        self.executed.iter().any(|sql| sql.contains(pattern))
    }
}

impl QueryExecutor for MockExecutor {
    fn query(&mut self, sql: &str) -> Result<Vec<Row>, ExecError> {
        self.executed.push(sql.to_string());
        match self
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            Some((_, Response::Rows(rows))) => Ok(rows.clone()),
            Some((_, Response::Fail(msg))) => Err(ExecError::Query(msg.clone())),
            None => Err(ExecError::Query(format!(
                "no scripted response for: {}",
                sql.split_whitespace().collect::<Vec<_>>().join(" ")
            ))),
        }
    }

    fn describe(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_pattern_wins() {
        let mut exec = MockExecutor::new()
            .on_row("pg_stat_database", vec![Value::Int(1)])
            .on_row("pg_stat", vec![Value::Int(2)]);
        let rows = exec.query("SELECT 1 FROM pg_stat_database").unwrap();
        assert_eq!(rows[0].get_i64(0).unwrap(), 1);
        assert!(exec.ran("pg_stat_database"));
    }

    #[test]
    fn unscripted_query_fails() {
        let mut exec = MockExecutor::new();
        assert!(matches!(exec.query("SELECT 1"), Err(ExecError::Query(_))));
        assert_eq!(exec.executed().len(), 1);
    }

    #[test]
    fn query_one_on_empty_result_is_no_rows() {
        let mut exec = MockExecutor::new().on("pg_class", Vec::new());
        assert!(matches!(
            exec.query_one("SELECT * FROM pg_class"),
            Err(crate::error::CheckError::NoRows)
        ));
    }
}
