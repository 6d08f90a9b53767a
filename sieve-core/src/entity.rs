use crate::types::EntityId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A loaded record with an explicit attribute table and eager-loaded relations.
///
/// An attribute or relation that is absent from the tables has not been loaded;
/// this is distinct from an attribute loaded as `Value::Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub id: EntityId,
    attributes: BTreeMap<String, Value>,
    relations: BTreeMap<String, Vec<Entity>>,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            attributes: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>, related: Vec<Entity>) -> Self {
        self.relations.insert(name.into(), related);
        self
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn relation(&self, name: &str) -> Option<&[Entity]> {
        self.relations.get(name).map(Vec::as_slice)
    }

    pub fn is_relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn relations(&self) -> &BTreeMap<String, Vec<Entity>> {
        &self.relations
    }

    /// Copy restricted to the given columns and relations; `None` keeps everything
    pub fn project(
        &self,
        columns: Option<&BTreeSet<String>>,
        relations: &BTreeMap<String, Option<BTreeSet<String>>>,
    ) -> Entity {
        let attributes = match columns {
            Some(columns) => self
                .attributes
                .iter()
                .filter(|(name, _)| columns.contains(*name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            None => self.attributes.clone(),
        };

        let relations = relations
            .iter()
            .filter_map(|(name, nested)| {
                self.relations.get(name).map(|related| {
                    let related = related
                        .iter()
                        .map(|entity| entity.project(nested.as_ref(), &BTreeMap::new()))
                        .collect();
                    (name.clone(), related)
                })
            })
            .collect();

        Entity {
            entity_type: self.entity_type.clone(),
            id: self.id.clone(),
            attributes,
            relations,
        }
    }

    /// Build an entity from a JSON object. Arrays of objects and nested objects
    /// become relations; the `id` key becomes the identity.
    pub fn from_json(entity_type: &str, json: &serde_json::Value) -> Result<Entity, String> {
        let object = json
            .as_object()
            .ok_or_else(|| format!("{} record is not a JSON object", entity_type))?;

        let id = match object.get("id") {
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .map(EntityId::Int)
                .ok_or_else(|| format!("{} id must be an integer or string", entity_type))?,
            Some(serde_json::Value::String(s)) => EntityId::Str(s.clone()),
            _ => return Err(format!("{} record is missing an id", entity_type)),
        };

        let mut entity = Entity::new(entity_type, id);
        for (key, value) in object {
            match value {
                serde_json::Value::Object(_) => {
                    entity.relations.insert(key.clone(), vec![Entity::from_json(key, value)?]);
                }
                serde_json::Value::Array(items) if items.iter().any(|v| v.is_object()) => {
                    let related = items
                        .iter()
                        .map(|item| Entity::from_json(key, item))
                        .collect::<Result<Vec<_>, _>>()?;
                    entity.relations.insert(key.clone(), related);
                }
                other => {
                    let converted = Value::from_json(other)
                        .ok_or_else(|| format!("unsupported value for {}.{}", entity_type, key))?;
                    entity.attributes.insert(key.clone(), converted);
                }
            }
        }
        Ok(entity)
    }

    /// JSON object with `id`, every loaded attribute and every loaded relation
    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut object = serde_json::Map::new();
        object.insert(
            "id".to_string(),
            serde_json::to_value(&self.id).unwrap_or(serde_json::Value::Null),
        );
        for (name, value) in &self.attributes {
            object.insert(name.clone(), value.to_json());
        }
        for (name, related) in &self.relations {
            let related = related
                .iter()
                .map(|entity| serde_json::Value::Object(entity.to_json()))
                .collect();
            object.insert(name.clone(), serde_json::Value::Array(related));
        }
        object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loaded_null_differs_from_missing() {
        let entity = Entity::new("user", 1).with_attribute("nickname", Value::Null);
        assert!(entity.has_attribute("nickname"));
        assert!(!entity.has_attribute("email"));
        assert!(!entity.is_relation_loaded("orders"));
    }

    #[test]
    fn test_from_json_with_relations() {
        let entity = Entity::from_json(
            "user",
            &json!({
                "id": 7,
                "name": "Ada",
                "orders": [{"id": 1, "total": 10.5}, {"id": 2, "total": 4}],
                "profile": {"id": "p1", "bio": "hi"}
            }),
        )
        .unwrap();

        assert_eq!(entity.id, EntityId::Int(7));
        assert_eq!(entity.attribute("name"), Some(&Value::from("Ada")));
        assert_eq!(entity.relation("orders").map(|o| o.len()), Some(2));
        assert_eq!(entity.relation("profile").map(|p| p[0].id.clone()), Some(EntityId::from("p1")));
    }

    #[test]
    fn test_from_json_requires_id() {
        assert!(Entity::from_json("user", &json!({"name": "x"})).is_err());
        assert!(Entity::from_json("user", &json!([1, 2])).is_err());
    }

    #[test]
    fn test_project_keeps_requested_parts() {
        let entity = Entity::new("user", 1)
            .with_attribute("name", "Ada")
            .with_attribute("email", "ada@example.com")
            .with_relation(
                "orders",
                vec![Entity::new("order", 1).with_attribute("total", 5i64).with_attribute("note", "x")],
            )
            .with_relation("tags", vec![]);

        let columns: BTreeSet<String> = ["name".to_string()].into_iter().collect();
        let mut relations = BTreeMap::new();
        relations.insert(
            "orders".to_string(),
            Some(["total".to_string()].into_iter().collect::<BTreeSet<_>>()),
        );

        let projected = entity.project(Some(&columns), &relations);
        assert!(projected.has_attribute("name"));
        assert!(!projected.has_attribute("email"));
        assert!(!projected.is_relation_loaded("tags"));
        let orders = projected.relation("orders").unwrap();
        assert!(orders[0].has_attribute("total"));
        assert!(!orders[0].has_attribute("note"));
    }
}
