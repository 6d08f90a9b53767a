use parking_lot::RwLock;
use sieve_core::{Entity, EntityId, StoreError, Value};
use sieve_query::{BaseQuery, OrderBy};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use tracing::debug;

/// The underlying data store that base queries are pushed down to
pub trait EntityStore: Send + Sync {
    /// Number of rows matching the query's predicates
    fn count(&self, query: &BaseQuery) -> Result<usize, StoreError>;

    /// Matching rows in `order` (store default order when `None`)
    fn fetch(
        &self,
        query: &BaseQuery,
        order: Option<&OrderBy>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Entity>, StoreError>;

    /// Rows with the given ids, in the order of `ids`; unknown ids are skipped
    fn fetch_by_ids(&self, query: &BaseQuery, ids: &[EntityId]) -> Result<Vec<Entity>, StoreError>;
}

/// Entity store over in-memory tables. Default order is insertion order.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<BTreeMap<String, Vec<Entity>>>,
    fetches: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: Entity) {
        self.tables
            .write()
            .entry(entity.entity_type.clone())
            .or_default()
            .push(entity);
    }

    pub fn extend(&self, entities: impl IntoIterator<Item = Entity>) {
        for entity in entities {
            self.insert(entity);
        }
    }

    /// Load a dataset shaped `{"<entity_type>": [ {record}, ... ], ...}`
    pub fn from_json(dataset: &serde_json::Value) -> Result<Self, StoreError> {
        let tables = dataset
            .as_object()
            .ok_or_else(|| StoreError::Query("dataset must be a JSON object".to_string()))?;
        let store = Self::new();
        for (entity_type, records) in tables {
            let records = records.as_array().ok_or_else(|| {
                StoreError::Query(format!("dataset entry '{}' must be an array", entity_type))
            })?;
            for record in records {
                store.insert(Entity::from_json(entity_type, record).map_err(StoreError::Query)?);
            }
        }
        Ok(store)
    }

    /// Number of `fetch`/`fetch_by_ids` calls served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(AtomicOrdering::Relaxed)
    }

    fn matching(&self, query: &BaseQuery) -> Result<Vec<Entity>, StoreError> {
        let tables = self.tables.read();
        let rows = tables
            .get(&query.entity_type)
            .ok_or_else(|| StoreError::UnknownEntityType(query.entity_type.clone()))?;
        Ok(rows
            .iter()
            .filter(|row| query.predicates.iter().all(|p| p.matches(row)))
            .cloned()
            .collect())
    }

    fn project(query: &BaseQuery, entity: &Entity) -> Entity {
        let mut relations: BTreeMap<String, Option<BTreeSet<String>>> = query
            .eager_load
            .iter()
            .map(|name| (name.clone(), None))
            .collect();
        for (name, columns) in &query.projection.relations {
            let merged = match (relations.get(name), columns) {
                (Some(None), _) | (_, None) => None,
                (_, Some(columns)) => Some(columns.clone()),
            };
            relations.insert(name.clone(), merged);
        }
        entity.project(query.projection.columns.as_ref(), &relations)
    }
}

/// Nulls and unloaded values sort after everything else in both directions
fn compare_column(a: &Entity, b: &Entity, order: &OrderBy) -> Ordering {
    let left = a.attribute(&order.column).filter(|v| !v.sorts_last());
    let right = b.attribute(&order.column).filter(|v| !v.sorts_last());
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(l), Some(r)) => {
            let ordering = Value::sort_cmp(l, r);
            if order.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        }
    }
}

impl EntityStore for InMemoryStore {
    fn count(&self, query: &BaseQuery) -> Result<usize, StoreError> {
        Ok(self.matching(query)?.len())
    }

    fn fetch(
        &self,
        query: &BaseQuery,
        order: Option<&OrderBy>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Entity>, StoreError> {
        self.fetches.fetch_add(1, AtomicOrdering::Relaxed);
        let mut rows = self.matching(query)?;
        if let Some(order) = order {
            rows.sort_by(|a, b| compare_column(a, b, order));
        }
        debug!(
            "Store fetch: {} (offset {}, limit {}, {} matching)",
            query.entity_type,
            offset,
            limit,
            rows.len()
        );
        Ok(rows
            .iter()
            .skip(offset)
            .take(limit)
            .map(|row| Self::project(query, row))
            .collect())
    }

    fn fetch_by_ids(&self, query: &BaseQuery, ids: &[EntityId]) -> Result<Vec<Entity>, StoreError> {
        self.fetches.fetch_add(1, AtomicOrdering::Relaxed);
        let rows = self.matching(query)?;
        let by_id: BTreeMap<&EntityId, &Entity> = rows.iter().map(|row| (&row.id, row)).collect();
        Ok(ids
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|row| Self::project(query, row))
            .collect())
    }
}
