use serde::Serialize;

use crate::db::Dialect;

// Input data for SQL generation, built fresh for every call
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerationRequest {
    pub instruction: String,
    pub dialect: Dialect,
}

impl GenerationRequest {
    pub fn new(instruction: &str, dialect: Dialect) -> Self {
        Self {
            instruction: instruction.to_string(),
            dialect,
        }
    }

    pub fn system_instruction(&self) -> String {
        format!(
            "You are an expert SQL assistant for a {} database. Generate only the SQL query, nothing else.",
            self.dialect
        )
    }

    /// System and user text as a single prompt, for providers without chat roles.
    pub fn single_prompt(&self) -> String {
        format!("{}\nQuery: {}", self.system_instruction(), self.instruction)
    }
}
