use crate::types::{EntityId, Operator, OperatorMismatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Structured context attached to every error for observability
pub type ErrorContext = BTreeMap<String, String>;

fn context<const N: usize>(pairs: [(&str, String); N]) -> ErrorContext {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Invalid field or virtual-field definition. Raised at registration; fatal to startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Invalid callback for virtual field '{field}': {reason}")]
    InvalidCallback { field: String, reason: String },

    #[error("Invalid operator for field '{field}': {mismatch}")]
    InvalidOperator { field: String, mismatch: OperatorMismatch },

    #[error("Virtual field '{field}' declares an empty dependency name")]
    EmptyDependency { field: String },

    #[error("Virtual field '{field}' declares an empty relationship name")]
    EmptyRelationship { field: String },

    #[error("Field '{name}' is already registered")]
    DuplicateField { name: String },

    #[error("Circular dependency detected: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("Invalid definition for field '{field}': {reason}")]
    InvalidDefinition { field: String, reason: String },
}

impl ConfigurationError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigurationError::InvalidCallback { .. } => "invalid_callback",
            ConfigurationError::InvalidOperator { .. } => "invalid_operator",
            ConfigurationError::EmptyDependency { .. } => "empty_dependency",
            ConfigurationError::EmptyRelationship { .. } => "empty_relationship",
            ConfigurationError::DuplicateField { .. } => "duplicate_field",
            ConfigurationError::CircularDependency { .. } => "circular_dependency",
            ConfigurationError::InvalidDefinition { .. } => "invalid_definition",
        }
    }

    pub fn context(&self) -> ErrorContext {
        match self {
            ConfigurationError::InvalidCallback { field, reason }
            | ConfigurationError::InvalidDefinition { field, reason } => {
                context([("field", field.clone()), ("reason", reason.clone())])
            }
            ConfigurationError::InvalidOperator { field, mismatch } => context([
                ("field", field.clone()),
                ("operator", mismatch.operator.to_string()),
                ("type", mismatch.field_type.to_string()),
            ]),
            ConfigurationError::EmptyDependency { field }
            | ConfigurationError::EmptyRelationship { field } => context([("field", field.clone())]),
            ConfigurationError::DuplicateField { name } => context([("field", name.clone())]),
            ConfigurationError::CircularDependency { chain } => {
                context([("chain", chain.join(" -> "))])
            }
        }
    }
}

/// One offending request parameter, as reported to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterViolation {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl From<&FilterValidationError> for FilterViolation {
    fn from(err: &FilterValidationError) -> Self {
        FilterViolation {
            field: err.field().unwrap_or_default().to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Request-time validation failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterValidationError {
    #[error("Unknown field: {field}")]
    UnknownField { field: String },

    #[error("Field '{field}' cannot be filtered")]
    FieldBlocked { field: String },

    #[error("Invalid operator for field '{field}': {mismatch}")]
    IncompatibleOperator { field: String, mismatch: OperatorMismatch },

    #[error("Operator '{operator}' is not allowed for field '{field}'")]
    OperatorNotAllowed { field: String, operator: Operator },

    #[error("Malformed value '{value}' for field '{field}': expected {expected}")]
    MalformedValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Missing required filter: {field}")]
    MissingRequired { field: String },

    #[error("Too many values for field '{field}': {count} (max: {max})")]
    TooManyValues { field: String, count: usize, max: usize },

    #[error("Field '{field}' cannot be used for sorting")]
    SortNotAllowed { field: String },

    #[error("Sorting by '{field}' needs {count} records in memory (max: {max})")]
    SortLimitExceeded { field: String, count: usize, max: usize },

    #[error("Filtering on virtual fields needs {count} records in memory (max: {max})")]
    TooManyRecords { count: usize, max: usize },

    #[error("Unknown field in selection: {field}")]
    UnknownSelection { field: String },

    #[error("Request rejected: {}", .violations.iter().map(|v| v.field.as_str()).collect::<Vec<_>>().join(", "))]
    Rejected { violations: Vec<FilterViolation> },
}

impl FilterValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            FilterValidationError::UnknownField { .. } => "unknown_field",
            FilterValidationError::FieldBlocked { .. } => "field_blocked",
            FilterValidationError::IncompatibleOperator { .. } => "invalid_operator",
            FilterValidationError::OperatorNotAllowed { .. } => "operator_not_allowed",
            FilterValidationError::MalformedValue { .. } => "malformed_value",
            FilterValidationError::MissingRequired { .. } => "missing_required_filter",
            FilterValidationError::TooManyValues { .. } => "too_many_values",
            FilterValidationError::SortNotAllowed { .. } => "sort_not_allowed",
            FilterValidationError::SortLimitExceeded { .. } => "sort_limit_exceeded",
            FilterValidationError::TooManyRecords { .. } => "too_many_records",
            FilterValidationError::UnknownSelection { .. } => "unknown_selection",
            FilterValidationError::Rejected { .. } => "filter_validation_failed",
        }
    }

    /// The offending field, when the error concerns a single one
    pub fn field(&self) -> Option<&str> {
        match self {
            FilterValidationError::UnknownField { field }
            | FilterValidationError::FieldBlocked { field }
            | FilterValidationError::IncompatibleOperator { field, .. }
            | FilterValidationError::OperatorNotAllowed { field, .. }
            | FilterValidationError::MalformedValue { field, .. }
            | FilterValidationError::MissingRequired { field }
            | FilterValidationError::TooManyValues { field, .. }
            | FilterValidationError::SortNotAllowed { field }
            | FilterValidationError::SortLimitExceeded { field, .. }
            | FilterValidationError::UnknownSelection { field } => Some(field),
            FilterValidationError::TooManyRecords { .. } | FilterValidationError::Rejected { .. } => None,
        }
    }

    pub fn context(&self) -> ErrorContext {
        let mut ctx = ErrorContext::new();
        if let Some(field) = self.field() {
            ctx.insert("field".to_string(), field.to_string());
        }
        match self {
            FilterValidationError::MalformedValue { value, expected, .. } => {
                ctx.insert("value".to_string(), value.clone());
                ctx.insert("expected".to_string(), expected.clone());
            }
            FilterValidationError::IncompatibleOperator { mismatch, .. } => {
                ctx.insert("operator".to_string(), mismatch.operator.to_string());
                ctx.insert("type".to_string(), mismatch.field_type.to_string());
            }
            FilterValidationError::OperatorNotAllowed { operator, .. } => {
                ctx.insert("operator".to_string(), operator.to_string());
            }
            FilterValidationError::TooManyValues { count, max, .. }
            | FilterValidationError::SortLimitExceeded { count, max, .. }
            | FilterValidationError::TooManyRecords { count, max } => {
                ctx.insert("count".to_string(), count.to_string());
                ctx.insert("max".to_string(), max.to_string());
            }
            FilterValidationError::Rejected { violations } => {
                let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
                ctx.insert("fields".to_string(), fields.join(","));
            }
            _ => {}
        }
        ctx
    }
}

/// Failure while computing a virtual field
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputationError {
    #[error("Computation of '{field}' failed for {entity_type}#{entity_id}: {message}")]
    CallbackFailed {
        field: String,
        entity_type: String,
        entity_id: EntityId,
        message: String,
    },

    #[error("Missing dependency '{dependency}' of '{field}' on {entity_type}#{entity_id}")]
    MissingDependency {
        field: String,
        entity_type: String,
        entity_id: EntityId,
        dependency: String,
    },

    #[error("Relationship '{relationship}' of '{field}' not loaded on {entity_type}#{entity_id}")]
    MissingRelationship {
        field: String,
        entity_type: String,
        entity_id: EntityId,
        relationship: String,
    },

    #[error("Dependency '{dependency}' of '{field}' could not be computed for {entity_type}#{entity_id}")]
    DependencyFailed {
        field: String,
        entity_type: String,
        entity_id: EntityId,
        dependency: String,
    },

    #[error("Computation of '{field}' exceeded its time limit: {elapsed_ms}ms (limit: {limit_ms}ms)")]
    TimeoutExceeded {
        field: String,
        elapsed_ms: u64,
        limit_ms: u64,
    },

    #[error("Computation of '{field}' exceeded its memory limit: {used_bytes} bytes (limit: {limit_bytes} bytes)")]
    MemoryLimitExceeded {
        field: String,
        used_bytes: usize,
        limit_bytes: usize,
    },

    #[error("Batch computation of '{field}' aborted after {failed} failure(s)")]
    BatchFailed {
        field: String,
        failed: usize,
        source: Box<ComputationError>,
    },

    #[error("Computation of '{field}' was cancelled")]
    Cancelled { field: String },

    #[error("Unknown virtual field: {field}")]
    UnknownField { field: String },
}

impl ComputationError {
    pub fn code(&self) -> &'static str {
        match self {
            ComputationError::CallbackFailed { .. } => "callback_failed",
            ComputationError::MissingDependency { .. } => "missing_dependency",
            ComputationError::MissingRelationship { .. } => "missing_relationship",
            ComputationError::DependencyFailed { .. } => "dependency_failed",
            ComputationError::TimeoutExceeded { .. } => "timeout_exceeded",
            ComputationError::MemoryLimitExceeded { .. } => "memory_limit_exceeded",
            ComputationError::BatchFailed { .. } => "batch_failed",
            ComputationError::Cancelled { .. } => "cancelled",
            ComputationError::UnknownField { .. } => "unknown_virtual_field",
        }
    }

    pub fn field(&self) -> &str {
        match self {
            ComputationError::CallbackFailed { field, .. }
            | ComputationError::MissingDependency { field, .. }
            | ComputationError::MissingRelationship { field, .. }
            | ComputationError::DependencyFailed { field, .. }
            | ComputationError::TimeoutExceeded { field, .. }
            | ComputationError::MemoryLimitExceeded { field, .. }
            | ComputationError::BatchFailed { field, .. }
            | ComputationError::Cancelled { field }
            | ComputationError::UnknownField { field } => field,
        }
    }

    /// Entity the failure is attributed to, for per-record failures
    pub fn entity(&self) -> Option<(&str, &EntityId)> {
        match self {
            ComputationError::CallbackFailed { entity_type, entity_id, .. }
            | ComputationError::MissingDependency { entity_type, entity_id, .. }
            | ComputationError::MissingRelationship { entity_type, entity_id, .. }
            | ComputationError::DependencyFailed { entity_type, entity_id, .. } => {
                Some((entity_type, entity_id))
            }
            ComputationError::BatchFailed { source, .. } => source.entity(),
            _ => None,
        }
    }

    /// Resource ceilings and cancellation end the whole batch
    pub fn is_batch_level(&self) -> bool {
        matches!(
            self,
            ComputationError::TimeoutExceeded { .. }
                | ComputationError::MemoryLimitExceeded { .. }
                | ComputationError::BatchFailed { .. }
                | ComputationError::Cancelled { .. }
                | ComputationError::UnknownField { .. }
        )
    }

    pub fn context(&self) -> ErrorContext {
        let mut ctx = context([("field", self.field().to_string())]);
        if let Some((entity_type, entity_id)) = self.entity() {
            ctx.insert("entity_type".to_string(), entity_type.to_string());
            ctx.insert("entity_id".to_string(), entity_id.to_string());
        }
        match self {
            ComputationError::MissingDependency { dependency, .. }
            | ComputationError::DependencyFailed { dependency, .. } => {
                ctx.insert("dependency".to_string(), dependency.clone());
            }
            ComputationError::MissingRelationship { relationship, .. } => {
                ctx.insert("relationship".to_string(), relationship.clone());
            }
            ComputationError::TimeoutExceeded { elapsed_ms, limit_ms, .. } => {
                ctx.insert("elapsed_ms".to_string(), elapsed_ms.to_string());
                ctx.insert("limit_ms".to_string(), limit_ms.to_string());
            }
            ComputationError::MemoryLimitExceeded { used_bytes, limit_bytes, .. } => {
                ctx.insert("used_bytes".to_string(), used_bytes.to_string());
                ctx.insert("limit_bytes".to_string(), limit_bytes.to_string());
            }
            ComputationError::BatchFailed { failed, source, .. } => {
                ctx.insert("failed".to_string(), failed.to_string());
                ctx.insert("cause".to_string(), source.code().to_string());
            }
            _ => {}
        }
        ctx
    }
}

/// Cache store/retrieve failure. Never fatal: callers treat it as a miss.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache store failed for key '{key}': {message}")]
    Store { key: String, message: String },

    #[error("Cache retrieve failed for key '{key}': {message}")]
    Retrieve { key: String, message: String },

    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::Store { .. } => "cache_store_failed",
            CacheError::Retrieve { .. } => "cache_retrieve_failed",
            CacheError::Serialization(_) => "cache_serialization_failed",
        }
    }
}

/// Failure of the underlying entity store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Store query failed: {0}")]
    Query(String),
}

/// Failure to load or validate deployment configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    FilterValidation(#[from] FilterValidationError),

    #[error(transparent)]
    Computation(#[from] ComputationError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client-facing rendering of an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: ErrorContext,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<FilterViolation>,
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(e) => e.code(),
            Error::FilterValidation(e) => e.code(),
            Error::Computation(e) => e.code(),
            Error::Cache(e) => e.code(),
            Error::Store(_) => "store_failed",
            Error::Config(_) => "invalid_config",
        }
    }

    pub fn context(&self) -> ErrorContext {
        match self {
            Error::Configuration(e) => e.context(),
            Error::FilterValidation(e) => e.context(),
            Error::Computation(e) => e.context(),
            Error::Cache(_) | Error::Store(_) | Error::Config(_) => ErrorContext::new(),
        }
    }

    /// Client errors enumerate the offending fields; server errors name the
    /// field and entity without the underlying callback message.
    pub fn to_response(&self) -> ErrorResponse {
        match self {
            Error::FilterValidation(e) => ErrorResponse {
                status: 400,
                code: e.code().to_string(),
                message: e.to_string(),
                context: e.context(),
                violations: match e {
                    FilterValidationError::Rejected { violations } => violations.clone(),
                    other => vec![FilterViolation::from(other)],
                },
            },
            Error::Computation(e) => {
                let message = match e.entity() {
                    Some((entity_type, entity_id)) => format!(
                        "Failed to compute '{}' for {}#{}",
                        e.field(),
                        entity_type,
                        entity_id
                    ),
                    None => format!("Failed to compute '{}'", e.field()),
                };
                ErrorResponse {
                    status: 500,
                    code: e.code().to_string(),
                    message,
                    context: e.context(),
                    violations: Vec::new(),
                }
            }
            other => ErrorResponse {
                status: 500,
                code: other.code().to_string(),
                message: "Internal server error".to_string(),
                context: ErrorContext::new(),
                violations: Vec::new(),
            },
        }
    }
}
