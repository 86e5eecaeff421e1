//! Error taxonomy.
//!
//! Three layers, matching how far a failure is allowed to travel:
//! - [`ExecError`]: the query execution path itself failed.
//! - [`CheckError`]: one diagnostic check could not produce a result.
//!   Recorded in the report, never aborts the run.
//! - [`SetupError`]: anything that goes wrong before the cluster context
//!   exists. Always fatal (exit code 1).

use thiserror::Error;

/// Failure reported by a query executor.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("command-line client not found: {0}")]
    ClientMissing(String),

    #[error("unparsable client output: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single diagnostic check.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Query(#[from] ExecError),

    #[error("column {column}: cannot interpret {value:?}")]
    Unparsable { column: usize, value: String },

    /// The query succeeded but returned no row where one was expected.
    #[error("query returned no rows")]
    NoRows,

    #[error("external tool failed: {0}")]
    Tool(String),
}

/// Fatal error while preparing a run.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("cannot reach database: {0}")]
    Connect(String),

    #[error("{0}")]
    ClientMissing(String),

    #[error("cannot gather cluster facts: {0}")]
    Context(#[from] CheckError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ExecError> for SetupError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Connection(msg) => SetupError::Connect(msg),
            ExecError::ClientMissing(msg) => SetupError::ClientMissing(msg),
            other => SetupError::Context(CheckError::Query(other)),
        }
    }
}

/// Failure of an ad-hoc action.
#[derive(Debug, Error)]
pub enum AdhocError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{action} query error: {source}")]
    Query {
        action: &'static str,
        #[source]
        source: CheckError,
    },

    #[error("mail error: {0}")]
    Mail(String),

    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}
