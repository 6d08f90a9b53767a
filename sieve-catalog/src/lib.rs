//! sieve-catalog: registry of persisted and virtual fields
//!
//! Definitions are validated once at startup (operator/type compatibility,
//! duplicate names, acyclic virtual dependencies) and read-only afterwards.

pub mod catalog;
pub mod field;
pub mod loader;
pub mod virtual_field;

pub use catalog::{Definition, DependencyPlan, FieldCatalog, FieldRef};
pub use field::{FieldBuilder, FieldDefinition};
pub use loader::{CatalogSpec, ComputeFactory, ComputeTable, FieldSpec, VirtualFieldSpec};
pub use virtual_field::{
    ComputeError, ComputeResult, DependencyBag, VirtualCompute, VirtualFieldBuilder,
    VirtualFieldDefinition,
};
