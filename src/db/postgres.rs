use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::types::{Oid, PgInterval, PgMoney};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgValueFormat};
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::types::Uuid;
use sqlx::{Column, Connection, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::debug;

use super::{decode_cell, ConnectionParameters, Connector, Dialect, ExecutionError, Session};
use crate::models::TabularResult;

pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn new(params: &ConnectionParameters) -> Self {
        let options = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.user)
            .password(&params.password)
            .database(&params.database);
        Self { options }
    }
}

#[async_trait]
impl Connector for PgConnector {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    async fn connect(&self) -> Result<Box<dyn Session>, ExecutionError> {
        let conn = PgConnection::connect_with(&self.options).await?;
        debug!("Opened PostgreSQL connection");
        Ok(Box::new(PgSession { conn }))
    }
}

struct PgSession {
    conn: PgConnection,
}

#[async_trait]
impl Session for PgSession {
    async fn fetch_all(&mut self, sql: &str) -> Result<TabularResult, ExecutionError> {
        // Columns come from the statement so empty results still report them
        let statement = (&mut self.conn).prepare(sql).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect();
        let kinds: Vec<PgCell> = statement
            .columns()
            .iter()
            .map(|col| PgCell::from_type_name(col.type_info().name()))
            .collect();

        // The simple query protocol returns every value as text
        let rows = if kinds.contains(&PgCell::Other) {
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
                        let kind = kinds.get(i).copied().unwrap_or(PgCell::Other);
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
        debug!("Closed PostgreSQL connection");
        Ok(())
    }
}

/// How cells of a PostgreSQL column are turned into JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PgCell {
    SmallInt,
    Int,
    BigInt,
    Real,
    Double,
    Numeric,
    Money,
    Bool,
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
    Uuid,
    Inet,
    Cidr,
    Bytea,
    Interval,
    Oid,
    Array(PgElement),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PgElement {
    SmallInt,
    Int,
    BigInt,
    Double,
    Bool,
    Text,
    Uuid,
}

impl PgCell {
    fn from_type_name(name: &str) -> Self {
        let name = name.to_uppercase();
        if let Some(element) = name.strip_suffix("[]") {
            let element = match element {
                "INT2" => PgElement::SmallInt,
                "INT4" => PgElement::Int,
                "INT8" => PgElement::BigInt,
                "FLOAT8" => PgElement::Double,
                "BOOL" => PgElement::Bool,
                "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => PgElement::Text,
                "UUID" => PgElement::Uuid,
                _ => return PgCell::Other,
            };
            return PgCell::Array(element);
        }

        match name.as_str() {
            "INT2" | "SMALLINT" | "SMALLSERIAL" => PgCell::SmallInt,
            "INT4" | "INT" | "INTEGER" | "SERIAL" => PgCell::Int,
            "INT8" | "BIGINT" | "BIGSERIAL" => PgCell::BigInt,
            "FLOAT4" | "REAL" => PgCell::Real,
            "FLOAT8" | "DOUBLE PRECISION" => PgCell::Double,
            "NUMERIC" | "DECIMAL" => PgCell::Numeric,
            "MONEY" => PgCell::Money,
            "BOOL" | "BOOLEAN" => PgCell::Bool,
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" => PgCell::Text,
            "DATE" => PgCell::Date,
            "TIME" => PgCell::Time,
            "TIMESTAMP" => PgCell::Timestamp,
            "TIMESTAMPTZ" => PgCell::TimestampTz,
            "JSON" | "JSONB" => PgCell::Json,
            "UUID" => PgCell::Uuid,
            "INET" => PgCell::Inet,
            "CIDR" => PgCell::Cidr,
            "BYTEA" => PgCell::Bytea,
            "INTERVAL" => PgCell::Interval,
            "OID" => PgCell::Oid,
            _ => PgCell::Other,
        }
    }
}

/// Converts one PostgreSQL cell to JSON.
fn extract_value(row: &PgRow, index: usize, kind: PgCell) -> Value {
    let value = match kind {
        PgCell::SmallInt => decode_cell(row, index, |v: i16| Value::from(v)),
        PgCell::Int => decode_cell(row, index, |v: i32| Value::from(v)),
        PgCell::BigInt => decode_cell(row, index, |v: i64| Value::from(v)),
        PgCell::Real => decode_cell(row, index, |v: f32| Value::from(f64::from(v))),
        PgCell::Double => decode_cell(row, index, |v: f64| Value::from(v)),
        // Kept as text so no precision is lost
        PgCell::Numeric => decode_cell(row, index, |v: Decimal| Value::String(v.to_string())),
        PgCell::Money => {
            decode_cell(row, index, |v: PgMoney| Value::String(v.to_decimal(2).to_string()))
        }
        PgCell::Bool => decode_cell(row, index, |v: bool| Value::Bool(v)),
        PgCell::Text => decode_cell(row, index, |v: String| Value::String(v)),
        PgCell::Date => decode_cell(row, index, |v: NaiveDate| Value::String(v.to_string())),
        PgCell::Time => decode_cell(row, index, |v: NaiveTime| Value::String(v.to_string())),
        PgCell::Timestamp => {
            decode_cell(row, index, |v: NaiveDateTime| Value::String(v.to_string()))
        }
        PgCell::TimestampTz => {
            decode_cell(row, index, |v: DateTime<Utc>| Value::String(v.to_rfc3339()))
        }
        PgCell::Json => decode_cell(row, index, |v: Value| v),
        PgCell::Uuid => decode_cell(row, index, |v: Uuid| Value::String(v.to_string())),
        PgCell::Inet => decode_cell(row, index, |v: IpNetwork| Value::String(inet_text(&v))),
        PgCell::Cidr => decode_cell(row, index, |v: IpNetwork| Value::String(v.to_string())),
        PgCell::Bytea => decode_cell(row, index, |v: Vec<u8>| Value::String(bytea_text(&v))),
        PgCell::Interval => decode_cell(row, index, |v: PgInterval| {
            Value::String(interval_text(v.months, v.days, v.microseconds))
        }),
        PgCell::Oid => decode_cell(row, index, |v: Oid| Value::from(v.0)),
        PgCell::Array(element) => extract_array(row, index, element),
        PgCell::Other => None,
    };

    value.unwrap_or_else(|| text_fallback(row, index))
}

fn extract_array(row: &PgRow, index: usize, element: PgElement) -> Option<Value> {
    match element {
        PgElement::SmallInt => decode_cell(row, index, |v: Vec<i16>| Value::from(v)),
        PgElement::Int => decode_cell(row, index, |v: Vec<i32>| Value::from(v)),
        PgElement::BigInt => decode_cell(row, index, |v: Vec<i64>| Value::from(v)),
        PgElement::Double => decode_cell(row, index, |v: Vec<f64>| Value::from(v)),
        PgElement::Bool => decode_cell(row, index, |v: Vec<bool>| Value::from(v)),
        PgElement::Text => decode_cell(row, index, |v: Vec<String>| Value::from(v)),
        PgElement::Uuid => decode_cell(row, index, |v: Vec<Uuid>| {
            Value::Array(v.iter().map(|u| Value::String(u.to_string())).collect())
        }),
    }
}

/// Text-format values are taken as they are; binary ones are never read as text.
fn text_fallback(row: &PgRow, index: usize) -> Value {
    let type_name = row.column(index).type_info().name().to_lowercase();
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => Value::Null,
        Ok(raw) if matches!(raw.format(), PgValueFormat::Text) => match raw.as_str() {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::String(format!("<{}>", type_name)),
        },
        _ => Value::String(format!("<{}>", type_name)),
    }
}

/// Single host addresses are shown without their prefix length.
fn inet_text(network: &IpNetwork) -> String {
    let single_host = match network {
        IpNetwork::V4(net) => net.prefix() == 32,
        IpNetwork::V6(net) => net.prefix() == 128,
    };
    if single_host {
        network.ip().to_string()
    } else {
        network.to_string()
    }
}

/// PostgreSQL's hex output format.
fn bytea_text(bytes: &[u8]) -> String {
    format!("\\x{}", hex::encode(bytes))
}

/// Renders an interval the way PostgreSQL prints it, e.g. `1 year 2 mons 3 days 04:05:06.5`.
fn interval_text(months: i32, days: i32, microseconds: i64) -> String {
    let unit = |n: i32, name: &str| {
        let plural = if n.abs() == 1 { "" } else { "s" };
        format!("{} {}{}", n, name, plural)
    };

    let mut parts = Vec::new();
    if months / 12 != 0 {
        parts.push(unit(months / 12, "year"));
    }
    if months % 12 != 0 {
        parts.push(unit(months % 12, "mon"));
    }
    if days != 0 {
        parts.push(unit(days, "day"));
    }
    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 { "-" } else { "" };
        let micros = microseconds.unsigned_abs();
        let secs = micros / 1_000_000;
        let (hours, minutes, seconds) = (secs / 3600, secs % 3600 / 60, secs % 60);
        let mut clock = format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds);
        if micros % 1_000_000 != 0 {
            let fraction = format!("{:06}", micros % 1_000_000);
            clock.push('.');
            clock.push_str(fraction.trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_names_map_to_cells() {
        assert_eq!(PgCell::from_type_name("INT4"), PgCell::Int);
        assert_eq!(PgCell::from_type_name("uuid"), PgCell::Uuid);
        assert_eq!(PgCell::from_type_name("INET"), PgCell::Inet);
        assert_eq!(PgCell::from_type_name("BYTEA"), PgCell::Bytea);
        assert_eq!(PgCell::from_type_name("INTERVAL"), PgCell::Interval);
        assert_eq!(PgCell::from_type_name("MONEY"), PgCell::Money);
        assert_eq!(PgCell::from_type_name("INT8[]"), PgCell::Array(PgElement::BigInt));
        assert_eq!(PgCell::from_type_name("TEXT[]"), PgCell::Array(PgElement::Text));
    }

    #[test]
    fn test_unmapped_types_are_other() {
        for name in ["XML", "TSVECTOR", "POINT", "INT4RANGE", "mood", "XML[]", "INTERVAL[]"] {
            assert_eq!(PgCell::from_type_name(name), PgCell::Other, "{}", name);
        }
    }

    #[test]
    fn test_inet_hides_host_prefix() {
        let host: IpNetwork = "10.0.0.1/32".parse().unwrap();
        let net: IpNetwork = "10.0.0.0/8".parse().unwrap();
        let v6: IpNetwork = "::1/128".parse().unwrap();
        assert_eq!(inet_text(&host), "10.0.0.1");
        assert_eq!(inet_text(&net), "10.0.0.0/8");
        assert_eq!(inet_text(&v6), "::1");
    }

    #[test]
    fn test_bytea_is_hex() {
        assert_eq!(bytea_text(&[0xde, 0xad, 0x01]), "\\xdead01");
        assert_eq!(bytea_text(&[]), "\\x");
    }

    #[test]
    fn test_interval_text() {
        assert_eq!(interval_text(14, 3, 0), "1 year 2 mons 3 days");
        assert_eq!(interval_text(0, 1, 7_200_000_000), "1 day 02:00:00");
        assert_eq!(interval_text(0, 0, 3_723_500_000), "01:02:03.5");
        assert_eq!(interval_text(0, 0, -90_000_000), "-00:01:30");
        assert_eq!(interval_text(0, 0, 0), "00:00:00");
        assert_eq!(interval_text(-1, -2, 0), "-1 mons -2 days");
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL server at DATABASE_URL
    async fn test_cells_from_live_server() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let options: PgConnectOptions = url.parse().unwrap();
        let conn = PgConnection::connect_with(&options).await.unwrap();
        let mut session = PgSession { conn };

        let table = session
            .fetch_all(
                r"SELECT 'a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11'::uuid AS id,
                         interval '1 day 02:00:00' AS wait,
                         '\xdead'::bytea AS blob,
                         '10.0.0.1'::inet AS addr,
                         ARRAY[1, 2] AS nums,
                         NULL::uuid AS missing",
            )
            .await
            .unwrap();
        assert_eq!(table.columns, vec!["id", "wait", "blob", "addr", "nums", "missing"]);
        assert_eq!(
            table.rows,
            vec![vec![
                json!("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"),
                json!("1 day 02:00:00"),
                json!("\\xdead"),
                json!("10.0.0.1"),
                json!([1, 2]),
                Value::Null,
            ]]
        );

        // An unmapped column switches the whole read to text
        let table = session
            .fetch_all(
                "SELECT '<a/>'::xml AS doc, 7 AS n, \
                 'a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11'::uuid AS id",
            )
            .await
            .unwrap();
        assert_eq!(
            table.rows,
            vec![vec![json!("<a/>"), json!(7), json!("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11")]]
        );

        let err = session.fetch_all("SELECT 1; SELECT 2").await.unwrap_err();
        assert!(err.0.contains("multiple commands"), "{}", err);

        Box::new(session).close().await.unwrap();
    }
}
