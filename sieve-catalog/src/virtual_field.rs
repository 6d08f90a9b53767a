//! Virtual (computed) field definitions and the computation contract

use crate::field::{invalid, resolve_operators, validate_enum_values, validate_name};
use sieve_core::{CancellationToken, ConfigurationError, Entity, FieldType, Operator, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type ComputeError = Box<dyn std::error::Error + Send + Sync>;
pub type ComputeResult = Result<Value, ComputeError>;

/// A pure computation over an entity and its resolved dependencies
pub trait VirtualCompute: Send + Sync {
    fn compute(&self, entity: &Entity, deps: &DependencyBag<'_>) -> ComputeResult;
}

impl<F> VirtualCompute for F
where
    F: Fn(&Entity, &DependencyBag<'_>) -> ComputeResult + Send + Sync,
{
    fn compute(&self, entity: &Entity, deps: &DependencyBag<'_>) -> ComputeResult {
        self(entity, deps)
    }
}

/// Resolved dependency values handed to a computation, in declaration order.
///
/// Also carries the batch deadline and cancellation flag so long-running
/// computations can stop early on their own.
#[derive(Default)]
pub struct DependencyBag<'a> {
    columns: Vec<(String, Value)>,
    relations: Vec<(String, &'a [Entity])>,
    deadline: Option<Instant>,
    cancellation: Option<&'a CancellationToken>,
}

impl<'a> DependencyBag<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, value: Value) -> Self {
        self.columns.push((name.into(), value));
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>, related: &'a [Entity]) -> Self {
        self.relations.push((name.into(), related));
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Dependency values in declaration order
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &'a [Entity])> + '_ {
        self.relations.iter().map(|(n, r)| (n.as_str(), *r))
    }

    /// Related entities; empty when the relation holds no rows
    pub fn relation(&self, name: &str) -> &'a [Entity] {
        self.relations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| *r)
            .unwrap_or(&[])
    }

    /// First declared relationship
    pub fn primary_relation(&self) -> Option<(&str, &'a [Entity])> {
        self.relations.first().map(|(n, r)| (n.as_str(), *r))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn time_remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.map_or(false, CancellationToken::is_cancelled)
    }
}

/// A computed field exposed through the same filter/sort/select grammar as columns
#[derive(Clone)]
pub struct VirtualFieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub compute: Arc<dyn VirtualCompute>,
    /// Diagnostic name of the computation
    pub compute_name: String,
    /// Columns or other virtual fields
    pub dependencies: Vec<String>,
    pub relationships: Vec<String>,
    pub operators: BTreeSet<Operator>,
    pub enum_values: Option<Vec<String>>,
    pub cacheable: bool,
    pub cache_ttl: Option<Duration>,
    pub default_value: Value,
    pub nullable: bool,
    pub sortable: bool,
    pub timeout: Option<Duration>,
    pub memory_limit: Option<usize>,
}

impl fmt::Debug for VirtualFieldDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualFieldDefinition")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("compute", &self.compute_name)
            .field("dependencies", &self.dependencies)
            .field("relationships", &self.relationships)
            .field("operators", &self.operators)
            .field("enum_values", &self.enum_values)
            .field("cacheable", &self.cacheable)
            .field("cache_ttl", &self.cache_ttl)
            .field("default_value", &self.default_value)
            .field("nullable", &self.nullable)
            .field("sortable", &self.sortable)
            .finish()
    }
}

impl VirtualFieldDefinition {
    pub fn builder(name: impl Into<String>, field_type: FieldType) -> VirtualFieldBuilder {
        VirtualFieldBuilder {
            name: name.into(),
            field_type,
            compute: None,
            compute_name: None,
            dependencies: Vec::new(),
            relationships: Vec::new(),
            operators: None,
            enum_values: None,
            cache_ttl: None,
            cacheable: false,
            default_value: Value::Null,
            nullable: true,
            sortable: false,
            timeout: None,
            memory_limit: None,
        }
    }

    pub fn allows(&self, operator: Operator) -> bool {
        self.operators.contains(&operator)
    }
}

pub struct VirtualFieldBuilder {
    name: String,
    field_type: FieldType,
    compute: Option<Arc<dyn VirtualCompute>>,
    compute_name: Option<String>,
    dependencies: Vec<String>,
    relationships: Vec<String>,
    operators: Option<Vec<Operator>>,
    enum_values: Option<Vec<String>>,
    cacheable: bool,
    cache_ttl: Option<Duration>,
    default_value: Value,
    nullable: bool,
    sortable: bool,
    timeout: Option<Duration>,
    memory_limit: Option<usize>,
}

impl VirtualFieldBuilder {
    pub fn compute<C: VirtualCompute + 'static>(mut self, compute: C) -> Self {
        self.compute = Some(Arc::new(compute));
        self
    }

    /// Closure form of `compute`; the signature is inferred from the bound
    pub fn compute_fn<F>(self, compute: F) -> Self
    where
        F: Fn(&Entity, &DependencyBag<'_>) -> ComputeResult + Send + Sync + 'static,
    {
        self.compute(compute)
    }

    /// Use a computation from an explicit table under a diagnostic name
    pub fn compute_shared(mut self, name: impl Into<String>, compute: Arc<dyn VirtualCompute>) -> Self {
        self.compute_name = Some(name.into());
        self.compute = Some(compute);
        self
    }

    pub fn depends_on<S: Into<String>>(mut self, dependencies: impl IntoIterator<Item = S>) -> Self {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn relationships<S: Into<String>>(mut self, relationships: impl IntoIterator<Item = S>) -> Self {
        self.relationships.extend(relationships.into_iter().map(Into::into));
        self
    }

    pub fn operators(mut self, operators: impl IntoIterator<Item = Operator>) -> Self {
        self.operators = Some(operators.into_iter().collect());
        self
    }

    pub fn enum_values<S: Into<String>>(mut self, values: impl IntoIterator<Item = S>) -> Self {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Cache computed values for `ttl`
    pub fn cacheable(mut self, ttl: Duration) -> Self {
        self.cacheable = true;
        self.cache_ttl = Some(ttl);
        self
    }

    /// Cache computed values with the deployment's default TTL
    pub fn cacheable_default_ttl(mut self) -> Self {
        self.cacheable = true;
        self.cache_ttl = None;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = value.into();
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn build(self) -> Result<VirtualFieldDefinition, ConfigurationError> {
        validate_name(&self.name)?;

        let compute = self.compute.ok_or_else(|| ConfigurationError::InvalidCallback {
            field: self.name.clone(),
            reason: "no compute function registered".to_string(),
        })?;

        if self.dependencies.iter().any(|d| d.trim().is_empty()) {
            return Err(ConfigurationError::EmptyDependency { field: self.name });
        }
        if self.relationships.iter().any(|r| r.trim().is_empty()) {
            return Err(ConfigurationError::EmptyRelationship { field: self.name });
        }

        let unique: BTreeSet<&String> = self.dependencies.iter().collect();
        if unique.len() != self.dependencies.len() {
            return Err(invalid(&self.name, "dependencies contain duplicates"));
        }

        let operators = resolve_operators(&self.name, self.field_type, self.operators)?;
        validate_enum_values(&self.name, self.field_type, self.enum_values.as_deref())?;

        if !self.nullable && self.default_value.is_null() {
            return Err(invalid(&self.name, "non-nullable virtual fields need a default value"));
        }
        if !value_fits_type(&self.default_value, self.field_type) {
            return Err(invalid(
                &self.name,
                &format!("default value does not match type {}", self.field_type),
            ));
        }
        if let (Some(values), Value::Str(default)) = (&self.enum_values, &self.default_value) {
            if !values.contains(default) {
                return Err(invalid(&self.name, "default value is not one of enum_values"));
            }
        }
        if self.timeout.map_or(false, |t| t.is_zero()) || self.memory_limit == Some(0) {
            return Err(invalid(&self.name, "resource limits must be greater than zero"));
        }

        Ok(VirtualFieldDefinition {
            compute_name: self.compute_name.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            field_type: self.field_type,
            compute,
            dependencies: self.dependencies,
            relationships: self.relationships,
            operators,
            enum_values: self.enum_values,
            cacheable: self.cacheable,
            cache_ttl: self.cache_ttl,
            default_value: self.default_value,
            nullable: self.nullable,
            sortable: self.sortable,
            timeout: self.timeout,
            memory_limit: self.memory_limit,
        })
    }
}

fn value_fits_type(value: &Value, field_type: FieldType) -> bool {
    match (value, field_type) {
        (Value::Null, _) => true,
        (Value::Str(_), FieldType::String | FieldType::Text | FieldType::Enum) => true,
        (Value::Int(_), FieldType::Integer | FieldType::Decimal) => true,
        (Value::Decimal(_), FieldType::Decimal) => true,
        (Value::Bool(_), FieldType::Boolean) => true,
        (Value::DateTime(_), FieldType::Datetime) => true,
        _ => false,
    }
}
