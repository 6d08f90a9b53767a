//! Field catalog for registration and lookup of filterable fields

use crate::field::{validate_name, FieldDefinition};
use crate::virtual_field::VirtualFieldDefinition;
use sieve_core::{ConfigurationError, FieldType, Operator};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Either kind of registered definition
#[derive(Debug, Clone)]
pub enum Definition {
    Persisted(FieldDefinition),
    Virtual(VirtualFieldDefinition),
}

/// Borrowed view of a registered field
#[derive(Debug, Clone, Copy)]
pub enum FieldRef<'a> {
    Persisted(&'a FieldDefinition),
    Virtual(&'a VirtualFieldDefinition),
}

impl<'a> FieldRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            FieldRef::Persisted(field) => &field.name,
            FieldRef::Virtual(field) => &field.name,
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            FieldRef::Persisted(field) => field.field_type,
            FieldRef::Virtual(field) => field.field_type,
        }
    }

    pub fn allows(&self, operator: Operator) -> bool {
        match self {
            FieldRef::Persisted(field) => field.allows(operator),
            FieldRef::Virtual(field) => field.allows(operator),
        }
    }

    pub fn is_sortable(&self) -> bool {
        match self {
            FieldRef::Persisted(field) => field.sortable,
            FieldRef::Virtual(field) => field.sortable,
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, FieldRef::Virtual(_))
    }

    pub fn enum_values(&self) -> Option<&'a [String]> {
        match self {
            FieldRef::Persisted(field) => field.enum_values.as_deref(),
            FieldRef::Virtual(field) => field.enum_values.as_deref(),
        }
    }
}

/// Columns and relations that must be loaded before a virtual field can be computed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyPlan {
    pub columns: BTreeSet<String>,
    pub relations: BTreeSet<String>,
}

impl DependencyPlan {
    pub fn merge(&mut self, other: DependencyPlan) {
        self.columns.extend(other.columns);
        self.relations.extend(other.relations);
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.relations.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

/// Registry of persisted fields, virtual fields and aliases.
///
/// Populated once at startup, then shared read-only (typically behind an `Arc`)
/// by the translator, engine and assembler.
#[derive(Debug, Default, Clone)]
pub struct FieldCatalog {
    fields: BTreeMap<String, FieldDefinition>,
    virtual_fields: BTreeMap<String, VirtualFieldDefinition>,
    aliases: BTreeMap<String, String>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: Definition) -> Result<(), ConfigurationError> {
        match definition {
            Definition::Persisted(field) => self.register_field(field),
            Definition::Virtual(field) => self.register_virtual_field(field),
        }
    }

    /// Register a persisted field
    pub fn register_field(&mut self, field: FieldDefinition) -> Result<(), ConfigurationError> {
        self.ensure_free(&field.name)?;
        info!(
            "Field registered: {} ({}, {} operators)",
            field.name,
            field.field_type,
            field.operators.len()
        );
        self.fields.insert(field.name.clone(), field);
        Ok(())
    }

    /// Register a virtual field, rejecting it if it closes a dependency cycle
    pub fn register_virtual_field(
        &mut self,
        field: VirtualFieldDefinition,
    ) -> Result<(), ConfigurationError> {
        self.ensure_free(&field.name)?;

        let name = field.name.clone();
        let dependencies = field.dependencies.len();
        let relationships = field.relationships.len();
        self.virtual_fields.insert(name.clone(), field);

        if let Err(err) = self.check_acyclic(&name) {
            self.virtual_fields.remove(&name);
            return Err(err);
        }

        info!(
            "Virtual field registered: {} ({} dependencies, {} relationships)",
            name, dependencies, relationships
        );
        Ok(())
    }

    /// Expose `target` under an additional request name
    pub fn register_alias(
        &mut self,
        alias: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<(), ConfigurationError> {
        let alias = alias.into();
        let target = target.into();
        validate_name(&alias)?;
        self.ensure_free(&alias)?;

        if !self.fields.contains_key(&target) && !self.virtual_fields.contains_key(&target) {
            return Err(ConfigurationError::InvalidDefinition {
                field: alias,
                reason: format!("alias target '{}' is not registered", target),
            });
        }

        debug!("Alias registered: {} -> {}", alias, target);
        self.aliases.insert(alias, target);
        Ok(())
    }

    fn ensure_free(&self, name: &str) -> Result<(), ConfigurationError> {
        if self.fields.contains_key(name)
            || self.virtual_fields.contains_key(name)
            || self.aliases.contains_key(name)
        {
            return Err(ConfigurationError::DuplicateField {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Depth-first walk over virtual-to-virtual references starting at `start`.
    /// The reported chain runs from the first repeated node back to itself.
    fn check_acyclic(&self, start: &str) -> Result<(), ConfigurationError> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        self.visit(start, &mut marks, &mut path)
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), ConfigurationError> {
        match marks.get(name) {
            Some(Mark::Visited) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut chain: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                chain.push(name.to_string());
                return Err(ConfigurationError::CircularDependency { chain });
            }
            None => {}
        }

        let Some(field) = self.virtual_fields.get(name) else {
            return Ok(());
        };

        marks.insert(name, Mark::Visiting);
        path.push(name);
        for dependency in &field.dependencies {
            if self.virtual_fields.contains_key(dependency.as_str()) {
                self.visit(dependency, marks, path)?;
            }
        }
        path.pop();
        marks.insert(name, Mark::Visited);
        Ok(())
    }

    /// Canonical name for a request key, following aliases
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn get(&self, name: &str) -> Option<FieldRef<'_>> {
        let name = self.resolve(name);
        if let Some(field) = self.fields.get(name) {
            return Some(FieldRef::Persisted(field));
        }
        self.virtual_fields.get(name).map(FieldRef::Virtual)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(self.resolve(name))
    }

    pub fn virtual_field(&self, name: &str) -> Option<&VirtualFieldDefinition> {
        self.virtual_fields.get(self.resolve(name))
    }

    pub fn is_virtual_field(&self, name: &str) -> bool {
        self.virtual_fields.contains_key(self.resolve(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Every operator legal for a type
    pub fn operators_for(&self, field_type: FieldType) -> &'static [Operator] {
        field_type.operators()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.values()
    }

    pub fn virtual_fields(&self) -> impl Iterator<Item = &VirtualFieldDefinition> {
        self.virtual_fields.values()
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    /// Names of every sortable field, persisted and virtual
    pub fn sortable(&self) -> BTreeSet<String> {
        self.fields
            .values()
            .filter(|f| f.sortable)
            .map(|f| f.name.clone())
            .chain(
                self.virtual_fields
                    .values()
                    .filter(|f| f.sortable)
                    .map(|f| f.name.clone()),
            )
            .collect()
    }

    /// Names of persisted fields covered by full-text search
    pub fn searchable(&self) -> BTreeSet<String> {
        self.fields
            .values()
            .filter(|f| f.searchable)
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn required_fields(&self) -> BTreeSet<String> {
        self.fields
            .values()
            .filter(|f| f.required)
            .map(|f| f.name.clone())
            .collect()
    }

    /// Transitive closure of the columns and relations a virtual field needs.
    /// Virtual dependencies are expanded, never loaded as columns.
    pub fn dependency_plan(&self, name: &str) -> DependencyPlan {
        let mut plan = DependencyPlan::default();
        let mut seen = BTreeSet::new();
        self.collect_plan(self.resolve(name), &mut plan, &mut seen);
        plan
    }

    fn collect_plan<'a>(&'a self, name: &'a str, plan: &mut DependencyPlan, seen: &mut BTreeSet<&'a str>) {
        if !seen.insert(name) {
            return;
        }
        let Some(field) = self.virtual_fields.get(name) else {
            return;
        };
        for dependency in &field.dependencies {
            if self.virtual_fields.contains_key(dependency.as_str()) {
                self.collect_plan(dependency, plan, seen);
            } else {
                plan.columns.insert(dependency.clone());
            }
        }
        plan.relations.extend(field.relationships.iter().cloned());
    }

    /// Virtual fields in dependency order: every field appears after the
    /// virtual fields it depends on
    pub fn computation_order(&self, name: &str) -> Vec<String> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        self.collect_order(self.resolve(name), &mut order, &mut seen);
        order
    }

    fn collect_order<'a>(&'a self, name: &'a str, order: &mut Vec<String>, seen: &mut BTreeSet<&'a str>) {
        if !seen.insert(name) {
            return;
        }
        let Some(field) = self.virtual_fields.get(name) else {
            return;
        };
        for dependency in &field.dependencies {
            if self.virtual_fields.contains_key(dependency.as_str()) {
                self.collect_order(dependency, order, seen);
            }
        }
        order.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_field::{ComputeResult, DependencyBag};
    use sieve_core::{Entity, Value};

    fn noop(_: &Entity, _: &DependencyBag<'_>) -> ComputeResult {
        Ok(Value::Null)
    }

    fn virtual_field(name: &str, deps: &[&str]) -> VirtualFieldDefinition {
        VirtualFieldDefinition::builder(name, FieldType::String)
            .depends_on(deps.iter().copied())
            .compute(noop)
            .build()
            .unwrap()
    }

    fn persisted(name: &str, field_type: FieldType) -> FieldDefinition {
        FieldDefinition::builder(name, field_type).sortable(true).build().unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut catalog = FieldCatalog::new();
        catalog.register_field(persisted("first_name", FieldType::String)).unwrap();
        catalog
            .register_virtual_field(virtual_field("full_name", &["first_name"]))
            .unwrap();

        assert!(catalog.is_virtual_field("full_name"));
        assert!(!catalog.is_virtual_field("first_name"));
        assert!(catalog.get("first_name").is_some());
        assert!(catalog.get("missing").is_none());
        assert_eq!(catalog.sortable().len(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected_across_kinds() {
        let mut catalog = FieldCatalog::new();
        catalog.register_field(persisted("name", FieldType::String)).unwrap();
        let err = catalog
            .register_virtual_field(virtual_field("name", &[]))
            .unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateField { name: "name".into() });
    }

    #[test]
    fn test_two_node_cycle_rejected() {
        let mut catalog = FieldCatalog::new();
        catalog.register_virtual_field(virtual_field("a", &["b"])).unwrap();
        let err = catalog
            .register_virtual_field(virtual_field("b", &["a"]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::CircularDependency {
                chain: vec!["b".into(), "a".into(), "b".into()]
            }
        );
        assert!(!catalog.is_virtual_field("b"));
    }

    #[test]
    fn test_cycle_chain_starts_at_repeated_node() {
        let mut catalog = FieldCatalog::new();
        catalog.register_virtual_field(virtual_field("x", &["y"])).unwrap();
        catalog.register_virtual_field(virtual_field("y", &["z"])).unwrap();
        let err = catalog
            .register_virtual_field(virtual_field("z", &["y"]))
            .unwrap_err();
        match err {
            ConfigurationError::CircularDependency { chain } => {
                assert_eq!(chain, vec!["z", "y", "z"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut catalog = FieldCatalog::new();
        let err = catalog
            .register_virtual_field(virtual_field("loop_field", &["loop_field"]))
            .unwrap_err();
        assert_eq!(err.code(), "circular_dependency");
    }

    #[test]
    fn test_transitive_plan_and_order() {
        let mut catalog = FieldCatalog::new();
        catalog.register_field(persisted("first_name", FieldType::String)).unwrap();
        catalog.register_field(persisted("last_name", FieldType::String)).unwrap();
        catalog
            .register_virtual_field(virtual_field("full_name", &["first_name", "last_name"]))
            .unwrap();
        let greeting = VirtualFieldDefinition::builder("greeting", FieldType::String)
            .depends_on(["full_name"])
            .relationships(["orders"])
            .compute(noop)
            .build()
            .unwrap();
        catalog.register_virtual_field(greeting).unwrap();

        let plan = catalog.dependency_plan("greeting");
        assert_eq!(
            plan.columns.into_iter().collect::<Vec<_>>(),
            vec!["first_name".to_string(), "last_name".to_string()]
        );
        assert!(plan.relations.contains("orders"));
        assert_eq!(catalog.computation_order("greeting"), vec!["full_name", "greeting"]);
    }

    #[test]
    fn test_aliases() {
        let mut catalog = FieldCatalog::new();
        catalog.register_field(persisted("created_at", FieldType::Datetime)).unwrap();
        catalog.register_alias("created", "created_at").unwrap();

        assert_eq!(catalog.resolve("created"), "created_at");
        assert_eq!(catalog.get("created").map(|f| f.name()), Some("created_at"));
        assert!(catalog.register_alias("created_at", "created_at").is_err());
        assert!(catalog.register_alias("ghost", "nowhere").is_err());
    }
}
