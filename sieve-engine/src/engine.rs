//! Virtual field engine: dependency resolution, computation, caching and
//! failure policy for batches of entities

use crate::budget::Budget;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sieve_catalog::{DependencyBag, FieldCatalog, VirtualFieldDefinition};
use sieve_core::{
    CacheConfig, CancellationToken, ComputationConfig, ComputationError, Entity, EntityId,
    FailurePolicy, Value,
};
use sieve_storage::{get_json, put_json, CacheStore};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info_span, warn};

/// Counters for one batch, or cumulative for an engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub entities: usize,
    pub chunks: usize,
    /// Compute function invocations, dependencies included
    pub computed: usize,
    pub cache_hits: usize,
    pub cache_errors: usize,
    pub failed: usize,
    pub defaulted: usize,
    pub excluded: usize,
}

impl BatchStats {
    fn absorb(&mut self, other: &BatchStats) {
        self.entities += other.entities;
        self.chunks += other.chunks;
        self.computed += other.computed;
        self.cache_hits += other.cache_hits;
        self.cache_errors += other.cache_errors;
        self.failed += other.failed;
        self.defaulted += other.defaulted;
        self.excluded += other.excluded;
    }
}

/// Per-entity outcome of a batch. Under the `exclude` policy failed entities
/// keep their error here and the caller drops them.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: HashMap<EntityId, Result<Value, ComputationError>>,
    pub stats: BatchStats,
}

impl BatchOutcome {
    pub fn value(&self, id: &EntityId) -> Option<&Value> {
        self.results.get(id).and_then(|result| result.as_ref().ok())
    }

    pub fn is_excluded(&self, id: &EntityId) -> bool {
        matches!(self.results.get(id), Some(Err(_)))
    }
}

/// Cache key `field:entityType:entityId:depHash`, where the hash covers the
/// dependency values and related rows handed to the computation
pub fn cache_key(field: &str, entity: &Entity, deps: &DependencyBag<'_>) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in deps.columns() {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.to_json().to_string().as_bytes());
        hasher.update([0u8]);
    }
    for (name, related) in deps.relations() {
        hasher.update(name.as_bytes());
        hasher.update([1u8]);
        for row in related {
            hasher.update(serde_json::Value::Object(row.to_json()).to_string().as_bytes());
        }
    }
    format!(
        "{}:{}:{}:{}",
        field,
        entity.entity_type,
        entity.id,
        hex::encode(hasher.finalize())
    )
}

pub struct VirtualFieldEngine {
    catalog: Arc<FieldCatalog>,
    cache: Option<Arc<dyn CacheStore>>,
    computation: ComputationConfig,
    cache_config: CacheConfig,
    totals: Mutex<BatchStats>,
}

impl VirtualFieldEngine {
    /// Engine without a cache
    pub fn new(catalog: Arc<FieldCatalog>, computation: ComputationConfig) -> Self {
        Self {
            catalog,
            cache: None,
            computation,
            cache_config: CacheConfig::default(),
            totals: Mutex::new(BatchStats::default()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        self.cache = if config.enabled { Some(cache) } else { None };
        self.cache_config = config;
        self
    }

    pub fn catalog(&self) -> &Arc<FieldCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &ComputationConfig {
        &self.computation
    }

    /// Cumulative counters across every batch
    pub fn stats(&self) -> BatchStats {
        self.totals.lock().clone()
    }

    pub fn compute_batch<E>(&self, field: &str, entities: &[E]) -> Result<BatchOutcome, ComputationError>
    where
        E: Borrow<Entity> + Sync,
    {
        self.compute_batch_with(field, entities, &CancellationToken::new())
    }

    /// Compute `field` for every entity, chunk by chunk.
    ///
    /// Returns `Err` for batch-level failures (time or memory ceiling,
    /// cancellation, `throw` policy, aborted batch). Per-entity failures are
    /// resolved by the failure policy into the outcome map.
    pub fn compute_batch_with<E>(
        &self,
        field: &str,
        entities: &[E],
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, ComputationError>
    where
        E: Borrow<Entity> + Sync,
    {
        let definition = self
            .catalog
            .virtual_field(field)
            .ok_or_else(|| ComputationError::UnknownField {
                field: field.to_string(),
            })?;
        let order = self.catalog.computation_order(&definition.name);

        let span = info_span!("compute_batch", field = %definition.name, entities = entities.len());
        let _guard = span.enter();

        let budget = Budget::new(definition, &self.computation);
        let stats = Mutex::new(BatchStats {
            entities: entities.len(),
            ..BatchStats::default()
        });
        let mut results = HashMap::with_capacity(entities.len());

        for chunk in entities.chunks(self.computation.batch_size.max(1)) {
            if cancel.is_cancelled() {
                warn!("Computation of {} cancelled after {} entities", definition.name, results.len());
                return Err(ComputationError::Cancelled {
                    field: definition.name.clone(),
                });
            }
            budget.check_time()?;
            stats.lock().chunks += 1;

            let run = |entity: &E| {
                let entity: &Entity = entity.borrow();
                let result = self.compute_entity(definition, &order, entity, &budget, cancel, &stats);
                (entity.id.clone(), result)
            };
            let chunk_results: Vec<(EntityId, Result<Value, ComputationError>)> =
                if self.computation.parallel_chunks {
                    chunk.par_iter().map(run).collect()
                } else {
                    chunk.iter().map(run).collect()
                };

            for (id, result) in chunk_results {
                match result {
                    Ok(value) => {
                        results.insert(id, Ok(value));
                    }
                    Err(err) if err.is_batch_level() => return Err(err),
                    Err(err) => {
                        let resolved = self.apply_policy(definition, err, &stats)?;
                        results.insert(id, resolved);
                    }
                }
            }
        }

        let stats = stats.into_inner();
        self.totals.lock().absorb(&stats);
        debug!(
            "Computed {} for {} entities ({} invocations, {} cache hits, {} failed)",
            definition.name, stats.entities, stats.computed, stats.cache_hits, stats.failed
        );
        Ok(BatchOutcome { results, stats })
    }

    fn apply_policy(
        &self,
        definition: &VirtualFieldDefinition,
        err: ComputationError,
        stats: &Mutex<BatchStats>,
    ) -> Result<Result<Value, ComputationError>, ComputationError> {
        let mut stats = stats.lock();
        stats.failed += 1;

        if self.computation.failure_policy == FailurePolicy::Throw {
            return Err(err);
        }
        if self.computation.abort_batch_on_failure {
            return Err(ComputationError::BatchFailed {
                field: definition.name.clone(),
                failed: stats.failed,
                source: Box::new(err),
            });
        }

        match self.computation.failure_policy {
            FailurePolicy::Exclude => {
                warn!("Entity excluded: {}", err);
                stats.excluded += 1;
                Ok(Err(err))
            }
            _ => {
                warn!("Default value substituted: {}", err);
                stats.defaulted += 1;
                Ok(Ok(definition.default_value.clone()))
            }
        }
    }

    /// Compute the target and its virtual dependencies for one entity,
    /// dependencies first
    fn compute_entity(
        &self,
        target: &VirtualFieldDefinition,
        order: &[String],
        entity: &Entity,
        budget: &Budget,
        cancel: &CancellationToken,
        stats: &Mutex<BatchStats>,
    ) -> Result<Value, ComputationError> {
        budget.check_time()?;

        let mut computed: HashMap<&str, Value> = HashMap::new();
        for name in order {
            let Some(definition) = self.catalog.virtual_field(name) else {
                continue;
            };
            match self.compute_one(definition, entity, &computed, budget, cancel, stats) {
                Ok(value) => {
                    computed.insert(name.as_str(), value);
                }
                Err(err) if definition.name == target.name || err.is_batch_level() => {
                    return Err(err)
                }
                Err(err) if self.computation.failure_policy == FailurePolicy::Default => {
                    debug!("Dependency defaulted: {}", err);
                    computed.insert(name.as_str(), definition.default_value.clone());
                }
                Err(err) => {
                    debug!("Dependency failed: {}", err);
                    return Err(ComputationError::DependencyFailed {
                        field: target.name.clone(),
                        entity_type: entity.entity_type.clone(),
                        entity_id: entity.id.clone(),
                        dependency: definition.name.clone(),
                    });
                }
            }
        }

        computed
            .remove(target.name.as_str())
            .ok_or_else(|| ComputationError::UnknownField {
                field: target.name.clone(),
            })
    }

    fn compute_one(
        &self,
        definition: &VirtualFieldDefinition,
        entity: &Entity,
        computed: &HashMap<&str, Value>,
        budget: &Budget,
        cancel: &CancellationToken,
        stats: &Mutex<BatchStats>,
    ) -> Result<Value, ComputationError> {
        let deps = self.resolve_dependencies(definition, entity, computed, budget, cancel)?;

        let key = match (&self.cache, definition.cacheable) {
            (Some(_), true) => Some(cache_key(&definition.name, entity, &deps)),
            _ => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            match get_json::<Value>(cache.as_ref(), key) {
                Ok(Some(value)) => {
                    stats.lock().cache_hits += 1;
                    return Ok(value);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("Cache read failed, computing instead: {}", err);
                    stats.lock().cache_errors += 1;
                }
            }
        }

        let value = definition.compute.compute(entity, &deps).map_err(|err| {
            warn!(
                "Computation of {} failed for {}#{}: {}",
                definition.name, entity.entity_type, entity.id, err
            );
            ComputationError::CallbackFailed {
                field: definition.name.clone(),
                entity_type: entity.entity_type.clone(),
                entity_id: entity.id.clone(),
                message: err.to_string(),
            }
        })?;
        stats.lock().computed += 1;

        if value.is_null() && !definition.nullable {
            return Err(ComputationError::CallbackFailed {
                field: definition.name.clone(),
                entity_type: entity.entity_type.clone(),
                entity_id: entity.id.clone(),
                message: "returned null for a non-nullable field".to_string(),
            });
        }

        budget.check_time()?;
        budget.charge(value.estimated_size())?;

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            let ttl = definition
                .cache_ttl
                .unwrap_or_else(|| self.cache_config.default_ttl());
            if let Err(err) = put_json(cache.as_ref(), &key, &value, ttl) {
                warn!("Cache write failed: {}", err);
                stats.lock().cache_errors += 1;
            }
        }

        Ok(value)
    }

    fn resolve_dependencies<'a>(
        &self,
        definition: &VirtualFieldDefinition,
        entity: &'a Entity,
        computed: &HashMap<&str, Value>,
        budget: &Budget,
        cancel: &'a CancellationToken,
    ) -> Result<DependencyBag<'a>, ComputationError> {
        let mut deps = DependencyBag::new()
            .with_deadline(budget.deadline())
            .with_cancellation(cancel);

        for dependency in &definition.dependencies {
            let value = match computed.get(dependency.as_str()) {
                Some(value) => value.clone(),
                None => entity.attribute(dependency).cloned().ok_or_else(|| {
                    ComputationError::MissingDependency {
                        field: definition.name.clone(),
                        entity_type: entity.entity_type.clone(),
                        entity_id: entity.id.clone(),
                        dependency: dependency.clone(),
                    }
                })?,
            };
            deps = deps.with_column(dependency.clone(), value);
        }

        for relationship in &definition.relationships {
            let related = entity.relation(relationship).ok_or_else(|| {
                ComputationError::MissingRelationship {
                    field: definition.name.clone(),
                    entity_type: entity.entity_type.clone(),
                    entity_id: entity.id.clone(),
                    relationship: relationship.clone(),
                }
            })?;
            deps = deps.with_relation(relationship.clone(), related);
        }

        Ok(deps)
    }
}
