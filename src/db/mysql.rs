use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, Connection, Executor, Row, Statement, TypeInfo};
use tracing::debug;

use super::{decode_cell, ConnectionParameters, Connector, Dialect, ExecutionError, Session};
use crate::models::TabularResult;

pub struct MySqlConnector {
    options: MySqlConnectOptions,
}

impl MySqlConnector {
    pub fn new(params: &ConnectionParameters) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.user)
            .password(&params.password)
            .database(&params.database);
        Self { options }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn connect(&self) -> Result<Box<dyn Session>, ExecutionError> {
        let conn = MySqlConnection::connect_with(&self.options).await?;
        debug!("Opened MySQL connection");
        Ok(Box::new(MySqlSession { conn }))
    }
}

struct MySqlSession {
    conn: MySqlConnection,
}

#[async_trait]
impl Session for MySqlSession {
    async fn fetch_all(&mut self, sql: &str) -> Result<TabularResult, ExecutionError> {
        let statement = (&mut self.conn).prepare(sql).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect();

        let kinds: Vec<MySqlCell> = statement
            .columns()
            .iter()
            .map(|col| MySqlCell::from_type_name(col.type_info().name()))
            .collect();

        // Plain query text goes over the text protocol, which returns every value as text
        let rows = if kinds.contains(&MySqlCell::Other) {
            debug!("Reading result as text for unmapped column types");
            (&mut self.conn).fetch_all(sqlx::raw_sql(sql)).await?
        } else {
            (&mut self.conn).fetch_all(statement.query()).await?
        };

        let rows = rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| {
                        let kind = kinds.get(i).copied().unwrap_or(MySqlCell::Other);
                        extract_value(row, i, kind)
                    })
                    .collect()
            })
            .collect();

        Ok(TabularResult { columns, rows })
    }

    async fn execute_and_commit(&mut self, sql: &str) -> Result<u64, ExecutionError> {
        let mut tx = self.conn.begin().await?;
        let result = (&mut *tx).execute(sqlx::raw_sql(sql)).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn close(self: Box<Self>) -> Result<(), ExecutionError> {
        self.conn.close().await?;
        debug!("Closed MySQL connection");
        Ok(())
    }
}

/// How cells of a MySQL column are turned into JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MySqlCell {
    Bool,
    Int,
    UInt,
    Float,
    Double,
    Decimal,
    Text,
    Bytes,
    Date,
    Time,
    DateTime,
    Timestamp,
    Json,
    Other,
}

impl MySqlCell {
    fn from_type_name(name: &str) -> Self {
        match name.to_uppercase().as_str() {
            "BOOLEAN" => MySqlCell::Bool,
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => MySqlCell::Int,
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
            | "BIGINT UNSIGNED" => MySqlCell::UInt,
            "FLOAT" => MySqlCell::Float,
            "DOUBLE" => MySqlCell::Double,
            "DECIMAL" => MySqlCell::Decimal,
            "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM"
            | "SET" => MySqlCell::Text,
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
                MySqlCell::Bytes
            }
            "DATE" => MySqlCell::Date,
            "TIME" => MySqlCell::Time,
            "DATETIME" => MySqlCell::DateTime,
            "TIMESTAMP" => MySqlCell::Timestamp,
            "JSON" => MySqlCell::Json,
            _ => MySqlCell::Other,
        }
    }
}

fn extract_value(row: &MySqlRow, index: usize, kind: MySqlCell) -> Value {
    let value = match kind {
        MySqlCell::Bool => decode_cell(row, index, |v: bool| Value::Bool(v)),
        MySqlCell::Int => decode_cell(row, index, |v: i64| Value::from(v)),
        MySqlCell::UInt => decode_cell(row, index, |v: u64| Value::from(v)),
        MySqlCell::Float => decode_cell(row, index, |v: f32| Value::from(f64::from(v))),
        MySqlCell::Double => decode_cell(row, index, |v: f64| Value::from(v)),
        MySqlCell::Decimal => decode_cell(row, index, |v: Decimal| Value::String(v.to_string())),
        MySqlCell::Text => decode_cell(row, index, |v: String| Value::String(v)),
        MySqlCell::Bytes => decode_cell(row, index, |v: Vec<u8>| Value::String(hex_text(&v))),
        MySqlCell::Date => decode_cell(row, index, |v: NaiveDate| Value::String(v.to_string())),
        MySqlCell::Time => decode_cell(row, index, |v: NaiveTime| Value::String(v.to_string())),
        MySqlCell::DateTime => {
            decode_cell(row, index, |v: NaiveDateTime| Value::String(v.to_string()))
        }
        MySqlCell::Timestamp => {
            decode_cell(row, index, |v: DateTime<Utc>| Value::String(v.to_rfc3339()))
        }
        MySqlCell::Json => decode_cell(row, index, |v: Value| v),
        MySqlCell::Other => None,
    };

    value.unwrap_or_else(|| {
        let type_name = row.column(index).type_info().name().to_string();
        text_fallback(row, index, &type_name)
    })
}

/// Unmapped columns are read over the text protocol, so their bytes are the text rendering.
fn text_fallback(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    match row.try_get_unchecked::<Option<String>, _>(index) {
        Ok(Some(s)) => Value::String(s),
        Ok(None) => Value::Null,
        Err(_) => Value::String(format!("<{}>", type_name.to_lowercase())),
    }
}

/// MySQL's hexadecimal literal form.
fn hex_text(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode_upper(bytes))
}
