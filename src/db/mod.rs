pub mod mysql;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::{ColumnIndex, Decode, Row, Type};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::DatabaseConfig;
use crate::error::ConfigurationError;
use crate::models::{Outcome, TabularResult};

/// Acknowledgment text for statements that do not return rows.
pub const SUCCESS_MESSAGE: &str = "Query executed successfully.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    PostgreSql,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::PostgreSql => "postgresql",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Dialect::MySql => 3306,
            Dialect::PostgreSql => 5432,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Dialect::MySql),
            "postgresql" | "postgres" => Ok(Dialect::PostgreSql),
            _ => Err(ConfigurationError::UnsupportedDialect(s.to_string())),
        }
    }
}

/// Everything needed to open one connection.
#[derive(Clone, PartialEq)]
pub struct ConnectionParameters {
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

impl TryFrom<&DatabaseConfig> for ConnectionParameters {
    type Error = ConfigurationError;

    fn try_from(config: &DatabaseConfig) -> Result<Self, Self::Error> {
        let dialect: Dialect = config.dialect.parse()?;
        Ok(Self {
            dialect,
            host: config.host.clone(),
            port: config.port.unwrap_or_else(|| dialect.default_port()),
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.name.clone(),
        })
    }
}

/// A database failure, carrying the driver's message text.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct ExecutionError(pub String);

impl From<sqlx::Error> for ExecutionError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db_err) => ExecutionError(db_err.message().to_string()),
            other => ExecutionError(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
}

impl StatementKind {
    /// Prefix check only: leading comments, parentheses or CTEs classify as writes.
    pub fn classify(sql: &str) -> Self {
        if sql.trim().to_lowercase().starts_with("select") {
            StatementKind::Read
        } else {
            StatementKind::Write
        }
    }
}

/// One open connection. Dropping it without `close` still releases it.
#[async_trait]
pub trait Session: Send {
    async fn fetch_all(&mut self, sql: &str) -> Result<TabularResult, ExecutionError>;
    /// Runs the statement in a transaction and commits it. Returns affected rows.
    async fn execute_and_commit(&mut self, sql: &str) -> Result<u64, ExecutionError>;
    async fn close(self: Box<Self>) -> Result<(), ExecutionError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn dialect(&self) -> Dialect;
    async fn connect(&self) -> Result<Box<dyn Session>, ExecutionError>;
}

/// Runs generated statements, one fresh connection per call.
pub struct DatabaseGateway {
    connector: Box<dyn Connector>,
}

impl DatabaseGateway {
    pub fn new(config: &DatabaseConfig) -> Result<Self, ConfigurationError> {
        let params = ConnectionParameters::try_from(config)?;
        let connector: Box<dyn Connector> = match params.dialect {
            Dialect::MySql => Box::new(mysql::MySqlConnector::new(&params)),
            Dialect::PostgreSql => Box::new(postgres::PgConnector::new(&params)),
        };
        info!(
            "Database gateway ready for {} at {}:{}/{}",
            params.dialect, params.host, params.port, params.database
        );
        Ok(Self { connector })
    }

    pub fn with_connector(connector: Box<dyn Connector>) -> Self {
        Self { connector }
    }

    pub fn dialect(&self) -> Dialect {
        self.connector.dialect()
    }

    /// Never fails: database errors come back as `Outcome::Failed`.
    pub async fn execute(&self, sql: &str) -> Outcome {
        match self.try_execute(sql).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{} query failed: {}", self.dialect(), e);
                Outcome::execution_failed(e.to_string())
            }
        }
    }

    async fn try_execute(&self, sql: &str) -> Result<Outcome, ExecutionError> {
        let mut session = self.connector.connect().await?;

        let kind = StatementKind::classify(sql);
        debug!("Classified statement as {:?}", kind);

        let result = match kind {
            StatementKind::Read => session.fetch_all(sql).await.map(|table| {
                info!("Query returned {} rows", table.rows.len());
                Outcome::Rows(table)
            }),
            StatementKind::Write => session.execute_and_commit(sql).await.map(|affected| {
                info!("Statement committed, {} rows affected", affected);
                Outcome::Acknowledged {
                    message: SUCCESS_MESSAGE.to_string(),
                    rows_affected: affected,
                }
            }),
        };

        if let Err(e) = session.close().await {
            warn!("Failed to close {} connection: {}", self.dialect(), e);
        }

        result
    }
}

/// Decodes one cell as `T`, or `None` when the column does not decode as `T`.
pub(crate) fn decode_cell<'r, R, T, F>(row: &'r R, index: usize, convert: F) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
    F: FnOnce(T) -> Value,
{
    row.try_get::<Option<T>, _>(index)
        .ok()
        .map(|v| v.map_or(Value::Null, convert))
}


#[cfg(test)]
mod tests {
    use super::testing::FakeConnector;
    use super::*;
    use crate::config::AppConfig;
    use std::sync::Arc;

    #[test]
    fn test_dialect_parsing() {
        assert_eq!("mysql".parse::<Dialect>().unwrap(), Dialect::MySql);
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::PostgreSql);
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::PostgreSql);
        for tag in ["sqlite", "oracle", "", "my sql"] {
            assert!(matches!(
                tag.parse::<Dialect>(),
                Err(ConfigurationError::UnsupportedDialect(_))
            ));
        }
    }

    #[test]
    fn test_gateway_rejects_unknown_dialect_before_connecting() {
        let mut config = AppConfig::default().database;
        config.dialect = "mssql".to_string();
        // Nothing is listening on this host; construction must fail without trying
        config.host = "db.invalid".to_string();
        match DatabaseGateway::new(&config) {
            Err(ConfigurationError::UnsupportedDialect(tag)) => assert_eq!(tag, "mssql"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("gateway built for an unsupported dialect"),
        }
    }

    #[test]
    fn test_connection_parameters_default_port() {
        let mut config = AppConfig::default().database;
        config.dialect = "postgresql".to_string();
        let params = ConnectionParameters::try_from(&config).unwrap();
        assert_eq!(params.port, 5432);
        assert_eq!(params.database, "testdb");

        config.password = "s3cret".to_string();
        let params = ConnectionParameters::try_from(&config).unwrap();
        assert!(!format!("{:?}", params).contains("s3cret"));
    }

    #[test]
    fn test_classification_is_a_prefix_check() {
        assert_eq!(StatementKind::classify("SELECT 1"), StatementKind::Read);
        assert_eq!(StatementKind::classify("  \n select * from t"), StatementKind::Read);
        assert_eq!(StatementKind::classify("SeLeCt now()"), StatementKind::Read);

        for sql in [
            "DELETE FROM users WHERE active = 0;",
            "insert into t values (1)",
            "CREATE TABLE t (id int)",
            "WITH x AS (SELECT 1) SELECT * FROM x",
            "(SELECT 1)",
            "-- list users\nSELECT * FROM users",
            "",
        ] {
            assert_eq!(StatementKind::classify(sql), StatementKind::Write, "{}", sql);
        }
    }

    #[tokio::test]
    async fn test_select_returns_rows_and_releases_connection() {
        let connector = FakeConnector::new();
        let counters = Arc::clone(&connector.counters);
        let gateway = DatabaseGateway::with_connector(Box::new(connector));

        let outcome = gateway.execute("SELECT id, email FROM users").await;

        match outcome {
            Outcome::Rows(table) => {
                assert_eq!(table.columns, vec!["id", "email"]);
                assert_eq!(table.rows.len(), 1);
            }
            other => panic!("expected rows, got {:?}", other),
        }
        assert_eq!(counters.connects(), 1);
        assert_eq!(counters.closes(), 1);
        assert_eq!(counters.commits(), 0);
    }

    #[tokio::test]
    async fn test_non_select_is_acknowledged_and_committed() {
        let connector = FakeConnector::new();
        let counters = Arc::clone(&connector.counters);
        let gateway = DatabaseGateway::with_connector(Box::new(connector));

        for sql in ["UPDATE users SET active = 1", "WITH x AS (SELECT 1) SELECT * FROM x"] {
            let outcome = gateway.execute(sql).await;
            assert_eq!(
                outcome,
                Outcome::Acknowledged {
                    message: SUCCESS_MESSAGE.to_string(),
                    rows_affected: 3,
                }
            );
        }
        assert_eq!(counters.commits(), 2);
        assert_eq!(counters.closes(), 2);
    }

    #[tokio::test]
    async fn test_driver_error_becomes_failure_outcome() {
        let message = "Table 'testdb.userz' doesn't exist";
        let connector = FakeConnector::failing(message);
        let counters = Arc::clone(&connector.counters);
        let gateway = DatabaseGateway::with_connector(Box::new(connector));

        for sql in ["SELECT * FROM userz", "DROP TABLE userz"] {
            assert_eq!(gateway.execute(sql).await, Outcome::execution_failed(message));
        }
        assert_eq!(counters.connects(), 2);
        assert_eq!(counters.closes(), 2);
        assert_eq!(counters.commits(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_becomes_failure_outcome() {
        let mut connector = FakeConnector::new();
        connector.refuse_connection = true;
        let counters = Arc::clone(&connector.counters);
        let gateway = DatabaseGateway::with_connector(Box::new(connector));

        let outcome = gateway.execute("SELECT 1").await;
        assert_eq!(
            outcome,
            Outcome::execution_failed("Connection refused (os error 111)")
        );
        assert_eq!(counters.closes(), 0);
        assert!(counters.statements.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sqlx_errors_keep_driver_text() {
        let err = ExecutionError::from(sqlx::Error::Protocol("unexpected packet".to_string()));
        assert!(err.to_string().contains("unexpected packet"));
    }
}
