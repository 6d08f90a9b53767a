use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sieve_core::{Operator, SortDirection, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Coerced right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    None,
    Single(Value),
    List(Vec<Value>),
    Range(Value, Value),
}

impl Operand {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Operand::None => serde_json::Value::Null,
            Operand::Single(value) => value.to_json(),
            Operand::List(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            }
            Operand::Range(low, high) => serde_json::Value::Array(vec![low.to_json(), high.to_json()]),
        }
    }
}

/// Store-agnostic comparison pushed into the base query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare {
        field: String,
        operator: Operator,
        operand: Operand,
    },
    /// Disjunction; used for full-text search across searchable fields
    AnyOf(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(field: impl Into<String>, operator: Operator, operand: Operand) -> Self {
        Predicate::Compare {
            field: field.into(),
            operator,
            operand,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            ascending: direction == SortDirection::Asc,
        }
    }
}

/// Columns and nested relation columns to load. `columns: None` loads every column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub columns: Option<BTreeSet<String>>,
    /// Relation name -> nested columns (`None` loads every column)
    pub relations: BTreeMap<String, Option<BTreeSet<String>>>,
}

/// Base query handed to the entity store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseQuery {
    pub entity_type: String,
    pub predicates: Vec<Predicate>,
    /// Relations to eager-load alongside the rows
    pub eager_load: BTreeSet<String>,
    pub projection: Projection,
}

impl BaseQuery {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            predicates: Vec::new(),
            eager_load: BTreeSet::new(),
            projection: Projection::default(),
        }
    }

    pub fn with_predicates(mut self, predicates: Vec<Predicate>) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn with_eager_load<S: Into<String>>(mut self, relations: impl IntoIterator<Item = S>) -> Self {
        self.eager_load.extend(relations.into_iter().map(Into::into));
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Hash of the query shape plus sort field and direction. Projection and
    /// eager loading do not change which rows match, so they are left out.
    pub fn fingerprint(&self, sort_field: &str, direction: SortDirection) -> String {
        let shape = serde_json::json!({
            "entity_type": self.entity_type,
            "predicates": self.predicates,
            "sort_by": sort_field,
            "sort_direction": direction,
        });
        let mut hasher = Sha256::new();
        hasher.update(shape.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_depends_on_shape_and_sort() {
        let query = BaseQuery::new("user").with_predicates(vec![Predicate::compare(
            "age",
            Operator::Gte,
            Operand::Single(Value::Int(18)),
        )]);
        let a = query.fingerprint("total", SortDirection::Desc);
        let b = query.clone().with_eager_load(["orders"]).fingerprint("total", SortDirection::Desc);
        let c = query.fingerprint("total", SortDirection::Asc);
        let d = BaseQuery::new("user").fingerprint("total", SortDirection::Desc);

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
