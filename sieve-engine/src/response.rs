use crate::paginator::Paginator;
use serde::{Deserialize, Serialize};
use sieve_core::{FilterViolation, SortDirection};

/// How the returned page was ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortStrategy {
    /// No sort requested; store default order
    None,
    /// `ORDER BY` pushed to the store
    Database,
    /// Ordered in memory by a computed value
    Memory,
    /// Virtual sort was infeasible; store default order
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortMeta {
    pub sort_by: Option<String>,
    pub sort_direction: SortDirection,
    pub strategy: SortStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Active filter clauses, persisted and virtual
    pub filters: Vec<serde_json::Value>,
    /// Clauses and options dropped in lenient mode
    pub warnings: Vec<FilterViolation>,
    pub pagination: Paginator,
    pub sort: SortMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub data: Vec<serde_json::Value>,
    pub meta: ResponseMeta,
}

impl QueryResponse {
    /// Ids of the returned rows, in order
    pub fn ids(&self) -> Vec<serde_json::Value> {
        self.data
            .iter()
            .filter_map(|row| row.get("id").cloned())
            .collect()
    }

    pub fn column(&self, name: &str) -> Vec<serde_json::Value> {
        self.data
            .iter()
            .map(|row| row.get(name).cloned().unwrap_or(serde_json::Value::Null))
            .collect()
    }
}
