//! Native driver execution path.

use postgres::types::Type;
use postgres::{Client, NoTls};
use tracing::debug;

use super::{QueryExecutor, Row, Value};
use crate::config::{ConnectionOptions, SslMode};
use crate::error::ExecError;

/// Executes queries over a single `postgres::Client` connection.
pub struct PostgresExecutor {
    client: Client,
}

impl PostgresExecutor {
    /// Connects using the resolved connection options.
    pub fn connect(opts: &ConnectionOptions) -> Result<Self, ExecError> {
        let conn_str = opts.connection_string();
        let result = match opts.sslmode {
            SslMode::Disable => Client::connect(&conn_str, NoTls),
            SslMode::Prefer | SslMode::Require => {
                // sslmode=require does not verify the server certificate.
                let connector = native_tls::TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .build()
                    .map_err(|e| ExecError::Connection(format!("TLS setup failed: {}", e)))?;
                let tls = postgres_native_tls::MakeTlsConnector::new(connector);
                Client::connect(&conn_str, tls)
            }
        };

        let client = result.map_err(|e| ExecError::Connection(format_postgres_error(&e)))?;
        debug!(host = %opts.host, port = opts.port, dbname = %opts.dbname, "connected");
        Ok(Self { client })
    }
}

impl QueryExecutor for PostgresExecutor {
    fn query(&mut self, sql: &str) -> Result<Vec<Row>, ExecError> {
        let rows = self
            .client
            .query(sql, &[])
            .map_err(|e| ExecError::Query(format_postgres_error(&e)))?;

        rows.iter().map(convert_row).collect()
    }

    fn describe(&self) -> &'static str {
        "driver"
    }
}

fn convert_row(row: &postgres::Row) -> Result<Row, ExecError> {
    (0..row.len())
        .map(|idx| convert_value(row, idx))
        .collect::<Result<Vec<_>, _>>()
        .map(Row::new)
}

fn convert_value(row: &postgres::Row, idx: usize) -> Result<Value, ExecError> {
    let column = &row.columns()[idx];
    let conv = |e: postgres::Error| {
        ExecError::Parse(format!(
            "column {} ({}): {}",
            column.name(),
            column.type_().name(),
            e
        ))
    };

    let value = match *column.type_() {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .map_err(conv)?
            .map(Value::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(conv)?
            .map(|v| Value::Int(i64::from(v))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map_err(conv)?
            .map(|v| Value::Int(i64::from(v))),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .map_err(conv)?
            .map(Value::Int),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)
            .map_err(conv)?
            .map(|v| Value::Int(i64::from(v))),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(conv)?
            .map(|v| Value::Float(f64::from(v))),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .map_err(conv)?
            .map(Value::Float),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map_err(conv)?
            .map(Value::Text),
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Formats PostgreSQL error message for display.
pub fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}
