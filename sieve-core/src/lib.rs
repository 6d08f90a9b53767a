//! sieve-core: shared vocabulary of the sieve filtering engine
//!
//! Typed values, field types and operators, entities with explicit attribute
//! tables, the error taxonomy, and deployment configuration.

pub mod cancel;
pub mod config;
pub mod entity;
pub mod error;
pub mod types;
pub mod value;

pub use cancel::CancellationToken;
pub use config::{
    CacheConfig, ComputationConfig, FailurePolicy, FilterConfig, LoggingConfig, PaginationConfig,
    SieveConfig, SortConfig,
};
pub use entity::Entity;
pub use error::{
    CacheError, ComputationError, ConfigError, ConfigurationError, Error, ErrorContext,
    ErrorResponse, FilterValidationError, FilterViolation, Result, StoreError,
};
pub use types::{EntityId, FieldType, Operator, OperatorMismatch, SortDirection, RESERVED_PARAMS};
pub use value::Value;
