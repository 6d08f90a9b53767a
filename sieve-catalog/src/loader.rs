//! Declarative catalog definitions and the table of named computations

use crate::catalog::FieldCatalog;
use crate::field::FieldDefinition;
use crate::virtual_field::{ComputeResult, DependencyBag, VirtualCompute, VirtualFieldDefinition};
use serde::{Deserialize, Serialize};
use sieve_core::{ConfigError, ConfigurationError, Entity, FieldType, Operator, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Builds a computation from the optional `compute_arg` of a virtual field spec
pub type ComputeFactory = fn(Option<&str>) -> Result<Arc<dyn VirtualCompute>, String>;

enum ComputeEntry {
    Fixed(Arc<dyn VirtualCompute>),
    Factory(ComputeFactory),
}

/// Explicit name -> computation table consulted when loading a `CatalogSpec`
pub struct ComputeTable {
    entries: BTreeMap<String, ComputeEntry>,
}

impl Default for ComputeTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ComputeTable {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// `concat`, `relation_count`, `relation_sum`, `coalesce`
    pub fn with_builtins() -> Self {
        let mut table = Self::empty();
        table.insert_factory("concat", |arg| {
            Ok(Arc::new(Concat {
                separator: arg.unwrap_or(" ").to_string(),
            }))
        });
        table.insert_factory("relation_count", |_| Ok(Arc::new(RelationCount)));
        table.insert_factory("relation_sum", |arg| {
            let column = arg.ok_or_else(|| "relation_sum needs compute_arg naming a column".to_string())?;
            Ok(Arc::new(RelationSum {
                column: column.to_string(),
            }))
        });
        table.insert_factory("coalesce", |_| Ok(Arc::new(Coalesce)));
        table
    }

    pub fn insert<C: VirtualCompute + 'static>(&mut self, name: impl Into<String>, compute: C) {
        self.entries
            .insert(name.into(), ComputeEntry::Fixed(Arc::new(compute)));
    }

    pub fn insert_factory(&mut self, name: impl Into<String>, factory: ComputeFactory) {
        self.entries.insert(name.into(), ComputeEntry::Factory(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn resolve(&self, field: &str, name: &str, arg: Option<&str>) -> Result<Arc<dyn VirtualCompute>, ConfigurationError> {
        match self.entries.get(name) {
            Some(ComputeEntry::Fixed(compute)) => Ok(Arc::clone(compute)),
            Some(ComputeEntry::Factory(factory)) => {
                factory(arg).map_err(|reason| ConfigurationError::InvalidCallback {
                    field: field.to_string(),
                    reason,
                })
            }
            None => Err(ConfigurationError::InvalidCallback {
                field: field.to_string(),
                reason: format!("unknown compute function '{}'", name),
            }),
        }
    }
}

/// Joins string dependency values, skipping nulls
struct Concat {
    separator: String,
}

impl VirtualCompute for Concat {
    fn compute(&self, _entity: &Entity, deps: &DependencyBag<'_>) -> ComputeResult {
        let parts: Vec<String> = deps
            .values()
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .collect();
        Ok(Value::Str(parts.join(&self.separator)))
    }
}

struct RelationCount;

impl VirtualCompute for RelationCount {
    fn compute(&self, _entity: &Entity, deps: &DependencyBag<'_>) -> ComputeResult {
        let count = deps.primary_relation().map_or(0, |(_, related)| related.len());
        Ok(Value::Int(count as i64))
    }
}

struct RelationSum {
    column: String,
}

impl VirtualCompute for RelationSum {
    fn compute(&self, _entity: &Entity, deps: &DependencyBag<'_>) -> ComputeResult {
        let Some((relation, related)) = deps.primary_relation() else {
            return Err("relation_sum needs a relationship".into());
        };
        let mut total = 0.0;
        for entity in related {
            match entity.attribute(&self.column) {
                Some(Value::Null) | None => {}
                Some(value) => {
                    total += value.as_f64().ok_or_else(|| {
                        format!("{}.{} is not numeric", relation, self.column)
                    })?;
                }
            }
        }
        Ok(Value::Decimal(total))
    }
}

/// First non-null dependency value
struct Coalesce;

impl VirtualCompute for Coalesce {
    fn compute(&self, _entity: &Entity, deps: &DependencyBag<'_>) -> ComputeResult {
        Ok(deps.values().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))
    }
}

/// Persisted field entry of a catalog file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub operators: Option<Vec<Operator>>,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub enum_values: Option<Vec<String>>,
}

/// Virtual field entry of a catalog file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VirtualFieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Name in the `ComputeTable`
    pub compute: String,
    #[serde(default)]
    pub compute_arg: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<String>,
    #[serde(default)]
    pub operators: Option<Vec<Operator>>,
    #[serde(default)]
    pub enum_values: Option<Vec<String>>,
    #[serde(default)]
    pub cacheable: bool,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub memory_limit_bytes: Option<usize>,
}

fn default_true() -> bool {
    true
}

/// Declarative catalog: fields, virtual fields and aliases
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogSpec {
    pub fields: Vec<FieldSpec>,
    pub virtual_fields: Vec<VirtualFieldSpec>,
    pub aliases: BTreeMap<String, String>,
}

impl CatalogSpec {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path, e)))?;
        Self::from_str(&content)
    }

    /// Parse a catalog, trying JSON, then TOML, then YAML
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(spec) = serde_json::from_str::<CatalogSpec>(content) {
            return Ok(spec);
        }
        if let Ok(spec) = toml::from_str::<CatalogSpec>(content) {
            return Ok(spec);
        }
        serde_yaml::from_str::<CatalogSpec>(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Build and validate a catalog; virtual fields are registered in file order
    pub fn into_catalog(self, table: &ComputeTable) -> Result<FieldCatalog, ConfigurationError> {
        let mut catalog = FieldCatalog::new();

        for spec in self.fields {
            let mut builder = FieldDefinition::builder(spec.name, spec.field_type)
                .searchable(spec.searchable)
                .sortable(spec.sortable)
                .required(spec.required);
            if let Some(operators) = spec.operators {
                builder = builder.operators(operators);
            }
            if let Some(values) = spec.enum_values {
                builder = builder.enum_values(values);
            }
            catalog.register_field(builder.build()?)?;
        }

        for spec in self.virtual_fields {
            let compute = table.resolve(&spec.name, &spec.compute, spec.compute_arg.as_deref())?;
            let mut builder = VirtualFieldDefinition::builder(spec.name.clone(), spec.field_type)
                .compute_shared(spec.compute.clone(), compute)
                .depends_on(spec.dependencies)
                .relationships(spec.relationships)
                .nullable(spec.nullable)
                .sortable(spec.sortable);
            if let Some(operators) = spec.operators {
                builder = builder.operators(operators);
            }
            if let Some(values) = spec.enum_values {
                builder = builder.enum_values(values);
            }
            if spec.cacheable {
                builder = match spec.cache_ttl_secs {
                    Some(secs) => builder.cacheable(Duration::from_secs(secs)),
                    None => builder.cacheable_default_ttl(),
                };
            }
            if let Some(default) = spec.default_value {
                let value = Value::from_json(&default).ok_or_else(|| ConfigurationError::InvalidDefinition {
                    field: spec.name.clone(),
                    reason: "default_value must be a scalar or list".to_string(),
                })?;
                builder = builder.default_value(value);
            }
            if let Some(ms) = spec.timeout_ms {
                builder = builder.timeout(Duration::from_millis(ms));
            }
            if let Some(bytes) = spec.memory_limit_bytes {
                builder = builder.memory_limit(bytes);
            }
            catalog.register_virtual_field(builder.build()?)?;
        }

        for (alias, target) in self.aliases {
            catalog.register_alias(alias, target)?;
        }

        info!(
            "Catalog loaded: {} fields, {} virtual fields, {} aliases",
            catalog.fields().count(),
            catalog.virtual_fields().count(),
            catalog.aliases().len()
        );
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
        [[fields]]
        name = "first_name"
        type = "string"
        searchable = true

        [[fields]]
        name = "last_name"
        type = "string"

        [[virtual_fields]]
        name = "full_name"
        type = "string"
        compute = "concat"
        dependencies = ["first_name", "last_name"]
        sortable = true
        cacheable = true
        cache_ttl_secs = 60

        [[virtual_fields]]
        name = "order_count"
        type = "integer"
        compute = "relation_count"
        relationships = ["orders"]
        default_value = 0

        [aliases]
        name = "full_name"
    "#;

    #[test]
    fn test_load_toml_catalog() {
        let catalog = CatalogSpec::from_str(CATALOG)
            .unwrap()
            .into_catalog(&ComputeTable::with_builtins())
            .unwrap();

        assert!(catalog.is_virtual_field("name"));
        let full_name = catalog.virtual_field("full_name").unwrap();
        assert_eq!(full_name.compute_name, "concat");
        assert_eq!(full_name.cache_ttl, Some(Duration::from_secs(60)));
        assert_eq!(
            catalog.virtual_field("order_count").unwrap().default_value,
            Value::Int(0)
        );
    }

    #[test]
    fn test_unknown_keys_fail_closed() {
        let err = CatalogSpec::from_str("[[fields]]\nname = \"a\"\ntype = \"string\"\nindexed = true\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_compute_is_invalid_callback() {
        let spec = CatalogSpec::from_str(
            r#"{"virtual_fields": [{"name": "score", "type": "integer", "compute": "magic"}]}"#,
        )
        .unwrap();
        let err = spec.into_catalog(&ComputeTable::with_builtins()).unwrap_err();
        assert_eq!(err.code(), "invalid_callback");
    }

    #[test]
    fn test_builtins_compute() {
        let table = ComputeTable::with_builtins();
        let entity = Entity::new("user", 1);

        let concat = table.resolve("f", "concat", Some("-")).unwrap();
        let deps = DependencyBag::new()
            .with_column("a", Value::from("x"))
            .with_column("b", Value::Null)
            .with_column("c", Value::from("y"));
        assert_eq!(concat.compute(&entity, &deps).unwrap(), Value::from("x-y"));

        let coalesce = table.resolve("f", "coalesce", None).unwrap();
        assert_eq!(coalesce.compute(&entity, &deps).unwrap(), Value::from("x"));

        let orders = vec![
            Entity::new("order", 1).with_attribute("total", 10.5),
            Entity::new("order", 2).with_attribute("total", 4i64),
        ];
        let deps = DependencyBag::new().with_relation("orders", &orders);
        let sum = table.resolve("f", "relation_sum", Some("total")).unwrap();
        assert_eq!(sum.compute(&entity, &deps).unwrap(), Value::Decimal(14.5));
        let count = table.resolve("f", "relation_count", None).unwrap();
        assert_eq!(count.compute(&entity, &deps).unwrap(), Value::Int(2));

        assert!(table.resolve("f", "relation_sum", None).is_err());
    }
}
