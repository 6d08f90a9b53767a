//! Drives one request end to end: translation, base query, sort strategy,
//! in-memory filtering and sorting, pagination and field selection.

use crate::engine::VirtualFieldEngine;
use crate::paginator::Paginator;
use crate::response::{QueryResponse, ResponseMeta, SortMeta, SortStrategy};
use sieve_catalog::FieldCatalog;
use sieve_core::{
    CancellationToken, ComputationError, Entity, EntityId, Error, FilterValidationError,
    FilterViolation, SieveConfig, SortDirection, Value,
};
use sieve_query::{
    matches_value, BaseQuery, FieldSelection, FilterClause, FilterTranslator, OrderBy, Projection,
    QueryOptions, RequestParams, Translation,
};
use sieve_storage::{get_json, put_json, CacheStore, EntityStore};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SortKey {
    Persisted(String),
    Virtual(String),
}

impl SortKey {
    fn name(&self) -> &str {
        match self {
            SortKey::Persisted(name) | SortKey::Virtual(name) => name,
        }
    }
}

/// A loaded entity plus the virtual values computed for it so far
#[derive(Debug, Clone)]
struct Row {
    entity: Entity,
    computed: BTreeMap<String, Value>,
}

impl Row {
    fn new(entity: Entity) -> Self {
        Self {
            entity,
            computed: BTreeMap::new(),
        }
    }
}

/// What happens to rows whose value the failure policy excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Excluded {
    /// Drop the row; used before counting, filtering and sorting
    Drop,
    /// Keep the row and render the field's default; used once the page is fixed
    UseDefault,
}

struct Page {
    total: usize,
    rows: Vec<Row>,
    strategy: SortStrategy,
}

pub struct ResultAssembler {
    catalog: Arc<FieldCatalog>,
    store: Arc<dyn EntityStore>,
    engine: Arc<VirtualFieldEngine>,
    sort_cache: Option<Arc<dyn CacheStore>>,
    translator: FilterTranslator,
    config: SieveConfig,
}

impl ResultAssembler {
    pub fn new(engine: Arc<VirtualFieldEngine>, store: Arc<dyn EntityStore>, config: SieveConfig) -> Self {
        Self {
            catalog: engine.catalog().clone(),
            store,
            engine,
            sort_cache: None,
            translator: FilterTranslator::new(config.filter.clone()),
            config,
        }
    }

    /// Cache for materialized virtual sort orders. Ignored unless
    /// `sort.cache_sorted_ids` is set.
    pub fn with_sort_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        if self.config.sort.cache_sorted_ids {
            self.sort_cache = Some(cache);
        }
        self
    }

    pub fn engine(&self) -> &Arc<VirtualFieldEngine> {
        &self.engine
    }

    pub fn execute(&self, entity_type: &str, params: &RequestParams) -> Result<QueryResponse, Error> {
        self.execute_with(entity_type, params, &CancellationToken::new())
    }

    pub fn execute_with(
        &self,
        entity_type: &str,
        params: &RequestParams,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse, Error> {
        let span = info_span!("execute", entity_type);
        let _guard = span.enter();

        let translation = self.translator.translate(params, &self.catalog)?;
        let mut warnings: Vec<FilterViolation> =
            translation.rejected.iter().map(FilterViolation::from).collect();
        let options = QueryOptions::from_params(params, &self.config.pagination);

        let selection = match &options.fields {
            Some(fields) => {
                let (selection, unknown) = FieldSelection::resolve(fields, &self.catalog);
                self.reject_or_warn(unknown, &mut warnings)?;
                Some(selection)
            }
            None => None,
        };
        let sort = self.resolve_sort(&options, &mut warnings)?;
        let query = self.base_query(entity_type, &translation, selection.as_ref(), sort.as_ref());
        let direction = options.sort_direction;

        let mut page = if translation.has_virtual_filters() {
            self.filtered_page(&query, &translation, sort.as_ref(), &options, cancel)?
        } else {
            match &sort {
                Some(SortKey::Virtual(field)) => {
                    self.virtual_sorted_page(&query, field, &options, cancel)?
                }
                Some(SortKey::Persisted(column)) => self.database_page(
                    &query,
                    Some(&OrderBy::new(column.as_str(), direction)),
                    &options,
                    SortStrategy::Database,
                )?,
                None => self.database_page(&query, None, &options, SortStrategy::None)?,
            }
        };

        // the page and its total are settled, so excluded rows keep their place
        if let Some(selection) = &selection {
            for field in &selection.virtual_fields {
                self.compute_into(&mut page.rows, field, Excluded::UseDefault, cancel)?;
            }
        }

        info!(
            "Query on {} returned {} of {} rows (sort: {:?})",
            entity_type,
            page.rows.len(),
            page.total,
            page.strategy
        );

        let pagination = Paginator::new(
            page.total,
            options.page,
            options.per_page,
            &self.config.pagination.base_path,
            params,
        );
        Ok(QueryResponse {
            data: page
                .rows
                .iter()
                .map(|row| render(row, selection.as_ref()))
                .collect(),
            meta: ResponseMeta {
                filters: translation.active.iter().map(FilterClause::summary).collect(),
                warnings,
                pagination,
                sort: SortMeta {
                    sort_by: sort.as_ref().map(|key| key.name().to_string()),
                    sort_direction: direction,
                    strategy: page.strategy,
                },
            },
        })
    }

    /// Strict mode fails on any error; lenient mode turns them into warnings
    fn reject_or_warn(
        &self,
        errors: Vec<FilterValidationError>,
        warnings: &mut Vec<FilterViolation>,
    ) -> Result<(), FilterValidationError> {
        if errors.is_empty() {
            return Ok(());
        }
        if self.config.filter.strict {
            if errors.len() > 1 {
                return Err(FilterValidationError::Rejected {
                    violations: errors.iter().map(FilterViolation::from).collect(),
                });
            }
            if let Some(err) = errors.into_iter().next() {
                return Err(err);
            }
            return Ok(());
        }
        for err in &errors {
            warn!("Request option ignored: {}", err);
            warnings.push(FilterViolation::from(err));
        }
        Ok(())
    }

    fn resolve_sort(
        &self,
        options: &QueryOptions,
        warnings: &mut Vec<FilterViolation>,
    ) -> Result<Option<SortKey>, FilterValidationError> {
        let Some(requested) = options.sort_by.as_deref() else {
            return Ok(None);
        };
        let canonical = self.catalog.resolve(requested);
        match self.catalog.get(canonical) {
            Some(field) if field.is_sortable() => Ok(Some(if field.is_virtual() {
                SortKey::Virtual(canonical.to_string())
            } else {
                SortKey::Persisted(canonical.to_string())
            })),
            _ => {
                let err = FilterValidationError::SortNotAllowed {
                    field: requested.to_string(),
                };
                self.reject_or_warn(vec![err], warnings)?;
                Ok(None)
            }
        }
    }

    fn base_query(
        &self,
        entity_type: &str,
        translation: &Translation,
        selection: Option<&FieldSelection>,
        sort: Option<&SortKey>,
    ) -> BaseQuery {
        let mut eager: BTreeSet<String> = translation.eager.relations.clone();
        let mut needed: BTreeSet<String> = translation.eager.columns.clone();
        match sort {
            Some(SortKey::Virtual(field)) => {
                let plan = self.catalog.dependency_plan(field);
                eager.extend(plan.relations);
                needed.extend(plan.columns);
            }
            Some(SortKey::Persisted(column)) => {
                needed.insert(column.clone());
            }
            None => {}
        }

        let projection = match selection {
            Some(selection) => {
                let mut projection = selection.projection(&self.catalog);
                if let Some(columns) = projection.columns.as_mut() {
                    columns.extend(needed);
                }
                projection
            }
            None => Projection::default(),
        };

        BaseQuery::new(entity_type)
            .with_predicates(translation.predicates.clone())
            .with_eager_load(eager)
            .with_projection(projection)
    }

    fn database_page(
        &self,
        query: &BaseQuery,
        order: Option<&OrderBy>,
        options: &QueryOptions,
        strategy: SortStrategy,
    ) -> Result<Page, Error> {
        let total = self.store.count(query)?;
        let rows = self
            .store
            .fetch(query, order, options.offset(), options.per_page)?
            .into_iter()
            .map(Row::new)
            .collect();
        Ok(Page { total, rows, strategy })
    }

    /// Virtual filters need the whole base result in memory
    fn filtered_page(
        &self,
        query: &BaseQuery,
        translation: &Translation,
        sort: Option<&SortKey>,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<Page, Error> {
        let count = self.store.count(query)?;
        let max = self.config.sort.max_sort_records;
        if count > max {
            return Err(FilterValidationError::TooManyRecords { count, max }.into());
        }

        let order = match sort {
            Some(SortKey::Persisted(column)) => Some(OrderBy::new(column.as_str(), options.sort_direction)),
            _ => None,
        };
        let mut rows = self.fetch_all(query, order.as_ref(), count)?;
        for clause in &translation.virtual_clauses {
            self.compute_into(&mut rows, &clause.field, Excluded::Drop, cancel)?;
            rows.retain(|row| {
                matches_value(row.computed.get(&clause.field), clause.operator, &clause.operand)
            });
        }
        debug!("{} of {} rows matched virtual filters", rows.len(), count);

        let strategy = match sort {
            None => SortStrategy::None,
            Some(SortKey::Persisted(_)) => SortStrategy::Database,
            Some(SortKey::Virtual(field)) => {
                match self.compute_into(&mut rows, field, Excluded::Drop, cancel) {
                    Ok(()) => {
                        sort_rows(&mut rows, field, options.sort_direction);
                        SortStrategy::Memory
                    }
                    Err(err) => {
                        let err = Error::from(err);
                        if !self.falls_back(&err) {
                            return Err(err);
                        }
                        warn!("Sorting by {} failed, keeping store order: {}", field, err);
                        SortStrategy::Fallback
                    }
                }
            }
        };

        Ok(Page {
            total: rows.len(),
            rows: paginate(rows, options),
            strategy,
        })
    }

    fn virtual_sorted_page(
        &self,
        query: &BaseQuery,
        field: &str,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<Page, Error> {
        let count = self.store.count(query)?;
        let max = self.config.sort.max_sort_records;
        if count > max {
            if !self.config.sort.fallback_enabled {
                return Err(FilterValidationError::SortLimitExceeded {
                    field: field.to_string(),
                    count,
                    max,
                }
                .into());
            }
            warn!(
                "Sorting by {} needs {} records (max {}), using store order",
                field, count, max
            );
            return self.database_page(query, None, options, SortStrategy::Fallback);
        }

        match self.memory_sorted_page(query, field, count, options, cancel) {
            Ok(page) => Ok(page),
            Err(err) if self.falls_back(&err) => {
                warn!("Sorting by {} failed, using store order: {}", field, err);
                self.database_page(query, None, options, SortStrategy::Fallback)
            }
            Err(err) => Err(err),
        }
    }

    fn memory_sorted_page(
        &self,
        query: &BaseQuery,
        field: &str,
        count: usize,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<Page, Error> {
        let key = format!("sort:{}", query.fingerprint(field, options.sort_direction));
        if let Some(ids) = self.cached_order(&key) {
            debug!("Sort order cache hit for {}", field);
            let page_ids: Vec<EntityId> = ids
                .iter()
                .skip(options.offset())
                .take(options.per_page)
                .cloned()
                .collect();
            let rows = self
                .store
                .fetch_by_ids(query, &page_ids)?
                .into_iter()
                .map(Row::new)
                .collect();
            return Ok(Page {
                total: ids.len(),
                rows,
                strategy: SortStrategy::Memory,
            });
        }

        let mut rows = self.fetch_all(query, None, count)?;
        self.compute_into(&mut rows, field, Excluded::Drop, cancel)?;
        sort_rows(&mut rows, field, options.sort_direction);

        let ids: Vec<EntityId> = rows.iter().map(|row| row.entity.id.clone()).collect();
        self.store_order(&key, &ids);

        Ok(Page {
            total: rows.len(),
            rows: paginate(rows, options),
            strategy: SortStrategy::Memory,
        })
    }

    /// Resource ceilings, aborted batches and store or cache trouble degrade
    /// to store order; cancellation and `throw` failures never do
    fn falls_back(&self, err: &Error) -> bool {
        if !self.config.sort.fallback_enabled {
            return false;
        }
        match err {
            Error::Computation(err) => matches!(
                err,
                ComputationError::TimeoutExceeded { .. }
                    | ComputationError::MemoryLimitExceeded { .. }
                    | ComputationError::BatchFailed { .. }
            ),
            Error::Store(_) | Error::Cache(_) => true,
            _ => false,
        }
    }

    fn cached_order(&self, key: &str) -> Option<Vec<EntityId>> {
        let cache = self.sort_cache.as_ref()?;
        match get_json::<Vec<EntityId>>(cache.as_ref(), key) {
            Ok(ids) => ids,
            Err(err) => {
                warn!("Sort order cache read failed: {}", err);
                None
            }
        }
    }

    fn store_order(&self, key: &str, ids: &[EntityId]) {
        if let Some(cache) = &self.sort_cache {
            if let Err(err) = put_json(cache.as_ref(), key, &ids, self.config.sort.sort_cache_ttl()) {
                warn!("Sort order cache write failed: {}", err);
            }
        }
    }

    /// Fetch every matching row in chunks of `batch_size`
    fn fetch_all(&self, query: &BaseQuery, order: Option<&OrderBy>, count: usize) -> Result<Vec<Row>, Error> {
        let chunk = self.config.computation.batch_size.max(1);
        let mut rows = Vec::with_capacity(count);
        loop {
            let batch = self.store.fetch(query, order, rows.len(), chunk)?;
            let fetched = batch.len();
            rows.extend(batch.into_iter().map(Row::new));
            if fetched < chunk {
                break;
            }
        }
        Ok(rows)
    }

    /// Compute `field` for rows that lack it
    fn compute_into(
        &self,
        rows: &mut Vec<Row>,
        field: &str,
        excluded: Excluded,
        cancel: &CancellationToken,
    ) -> Result<(), ComputationError> {
        let outcome = {
            let pending: Vec<&Entity> = rows
                .iter()
                .filter(|row| !row.computed.contains_key(field))
                .map(|row| &row.entity)
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            self.engine.compute_batch_with(field, &pending, cancel)?
        };

        let fallback = self
            .catalog
            .virtual_field(field)
            .map(|definition| definition.default_value.clone())
            .unwrap_or(Value::Null);
        rows.retain_mut(|row| {
            if row.computed.contains_key(field) {
                return true;
            }
            let value = match (outcome.value(&row.entity.id), excluded) {
                (Some(value), _) => value.clone(),
                (None, Excluded::UseDefault) => fallback.clone(),
                (None, Excluded::Drop) => return false,
            };
            row.computed.insert(field.to_string(), value);
            true
        });
        Ok(())
    }
}

/// Stable; null and NaN computed values sort last in both directions
fn sort_rows(rows: &mut [Row], field: &str, direction: SortDirection) {
    rows.sort_by(|a, b| {
        let left = a.computed.get(field).filter(|v| !v.sorts_last());
        let right = b.computed.get(field).filter(|v| !v.sorts_last());
        match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(l), Some(r)) => match direction {
                SortDirection::Asc => l.sort_cmp(r),
                SortDirection::Desc => r.sort_cmp(l),
            },
        }
    });
}

fn paginate(rows: Vec<Row>, options: &QueryOptions) -> Vec<Row> {
    rows.into_iter()
        .skip(options.offset())
        .take(options.per_page)
        .collect()
}

/// Without a selection: id plus every loaded attribute. With one: the
/// selected columns, relations and virtual values.
fn render(row: &Row, selection: Option<&FieldSelection>) -> serde_json::Value {
    let object = match selection {
        Some(selection) => {
            let mut object = row
                .entity
                .project(Some(&selection.columns), &selection.relations)
                .to_json();
            for field in &selection.virtual_fields {
                if let Some(value) = row.computed.get(field) {
                    object.insert(field.clone(), value.to_json());
                }
            }
            object
        }
        None => row.entity.project(None, &BTreeMap::new()).to_json(),
    };
    serde_json::Value::Object(object)
}
