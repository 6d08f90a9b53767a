// Shared fixtures: a user catalog with two virtual fields and small datasets
#![allow(dead_code)]

use sieve_catalog::{
    ComputeResult, DependencyBag, FieldCatalog, FieldDefinition, VirtualFieldDefinition,
};
use sieve_core::{Entity, FieldType, SieveConfig, Value};
use sieve_engine::{ResultAssembler, VirtualFieldEngine};
use sieve_storage::{CacheStore, InMemoryStore, MemoryCacheStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct Fixture {
    pub catalog: Arc<FieldCatalog>,
    pub full_name_calls: Arc<AtomicUsize>,
    pub order_value_calls: Arc<AtomicUsize>,
}

impl Fixture {
    pub fn full_name_calls(&self) -> usize {
        self.full_name_calls.load(Ordering::SeqCst)
    }

    pub fn order_value_calls(&self) -> usize {
        self.order_value_calls.load(Ordering::SeqCst)
    }
}

/// `full_name` (cacheable concatenation) and `total_orders_value` (sum of
/// `orders.total`), both sortable, each counting its invocations
pub fn user_fixture() -> Fixture {
    let full_name_calls = Arc::new(AtomicUsize::new(0));
    let order_value_calls = Arc::new(AtomicUsize::new(0));
    let mut catalog = FieldCatalog::new();

    for (name, field_type, sortable) in [
        ("first_name", FieldType::String, true),
        ("last_name", FieldType::String, true),
        ("age", FieldType::Integer, true),
    ] {
        catalog
            .register_field(
                FieldDefinition::builder(name, field_type)
                    .searchable(field_type == FieldType::String)
                    .sortable(sortable)
                    .build()
                    .unwrap(),
            )
            .unwrap();
    }

    let calls = full_name_calls.clone();
    catalog
        .register_virtual_field(
            VirtualFieldDefinition::builder("full_name", FieldType::String)
                .depends_on(["first_name", "last_name"])
                .cacheable(std::time::Duration::from_secs(600))
                .sortable(true)
                .compute_fn(move |_: &Entity, deps: &DependencyBag<'_>| -> ComputeResult {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::from(format!(
                        "{} {}",
                        deps.str("first_name").unwrap_or_default(),
                        deps.str("last_name").unwrap_or_default()
                    )))
                })
                .build()
                .unwrap(),
        )
        .unwrap();

    let calls = order_value_calls.clone();
    catalog
        .register_virtual_field(
            VirtualFieldDefinition::builder("total_orders_value", FieldType::Decimal)
                .relationships(["orders"])
                .sortable(true)
                .default_value(0.0)
                .compute_fn(move |_: &Entity, deps: &DependencyBag<'_>| -> ComputeResult {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let total: f64 = deps
                        .relation("orders")
                        .iter()
                        .filter_map(|order| order.attribute("total").and_then(Value::as_f64))
                        .sum();
                    Ok(Value::Decimal(total))
                })
                .build()
                .unwrap(),
        )
        .unwrap();

    Fixture {
        catalog: Arc::new(catalog),
        full_name_calls,
        order_value_calls,
    }
}

/// John Doe, Joan Smith, Amy Li, Bob Jo, Joe King
pub fn five_users() -> InMemoryStore {
    let names = [
        ("John", "Doe"),
        ("Joan", "Smith"),
        ("Amy", "Li"),
        ("Bob", "Jo"),
        ("Joe", "King"),
    ];
    let store = InMemoryStore::new();
    for (i, (first, last)) in names.iter().enumerate() {
        store.insert(
            Entity::new("user", i as i64 + 1)
                .with_attribute("first_name", *first)
                .with_attribute("last_name", *last)
                .with_attribute("age", 20 + i as i64),
        );
    }
    store
}

/// Order totals per user id 1..=10
pub const ORDER_TOTALS: [i64; 10] = [120, 45, 300, 80, 15, 210, 95, 160, 60, 250];

/// Ten users, each with two orders summing to `ORDER_TOTALS[id - 1]`
pub fn ten_users_with_orders() -> InMemoryStore {
    let store = InMemoryStore::new();
    for (i, total) in ORDER_TOTALS.iter().enumerate() {
        let id = i as i64 + 1;
        let orders = vec![
            Entity::new("orders", id * 100 + 1).with_attribute("total", total - 10),
            Entity::new("orders", id * 100 + 2).with_attribute("total", 10i64),
        ];
        store.insert(
            Entity::new("user", id)
                .with_attribute("first_name", format!("User{}", id))
                .with_attribute("last_name", "Test")
                .with_attribute("age", 30 + id)
                .with_relation("orders", orders),
        );
    }
    store
}

pub fn assembler(fixture: &Fixture, store: InMemoryStore, config: SieveConfig) -> ResultAssembler {
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new(config.cache.max_entries));
    let engine = VirtualFieldEngine::new(fixture.catalog.clone(), config.computation.clone())
        .with_cache(cache.clone(), config.cache.clone());
    ResultAssembler::new(Arc::new(engine), Arc::new(store), config).with_sort_cache(cache)
}

pub fn response_ids(response: &sieve_engine::QueryResponse) -> Vec<i64> {
    response.ids().iter().filter_map(|id| id.as_i64()).collect()
}
