use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::db::Dialect;

/// Rows of a read statement, in result order.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Generation,
    Execution,
}

/// Result of executing (or skipping) one generated statement. Exactly one shape per outcome.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Rows(TabularResult),
    Acknowledged { message: String, rows_affected: u64 },
    Failed { stage: FailureStage, error: String },
    NotExecuted,
}

impl Outcome {
    pub fn generation_failed(error: impl Into<String>) -> Self {
        Outcome::Failed {
            stage: FailureStage::Generation,
            error: error.into(),
        }
    }

    pub fn execution_failed(error: impl Into<String>) -> Self {
        Outcome::Failed {
            stage: FailureStage::Execution,
            error: error.into(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn columns(&self) -> Option<&[String]> {
        match self {
            Outcome::Rows(table) => Some(&table.columns),
            _ => None,
        }
    }
}

/// One completed pipeline run. Never mutated once stored.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryEntry {
    /// 1-based position in the session.
    pub id: usize,
    pub prompt: String,
    /// Generated text as returned by the provider; empty when generation failed.
    pub sql: String,
    pub columns: Option<Vec<String>>,
    pub outcome: Outcome,
    pub provider: String,
    pub dialect: Dialect,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        id: usize,
        prompt: &str,
        sql: String,
        outcome: Outcome,
        provider: &str,
        dialect: Dialect,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            id,
            prompt: prompt.to_string(),
            sql,
            columns: outcome.columns().map(<[String]>::to_vec),
            outcome,
            provider: provider.to_string(),
            dialect,
            elapsed_ms,
            created_at: Utc::now(),
        }
    }
}
