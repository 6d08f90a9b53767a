//! sieve-storage: external collaborators of the engine
//!
//! A shared cache for computed values and sort orders, and the entity store
//! base queries are pushed down to. Both come with in-memory implementations.

pub mod cache;
pub mod store;

pub use cache::{get_json, put_json, CacheStore, MemoryCacheStore};
pub use store::{EntityStore, InMemoryStore};
