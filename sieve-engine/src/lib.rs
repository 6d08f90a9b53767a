//! sieve-engine: virtual field computation and request assembly
//!
//! `VirtualFieldEngine` computes virtual fields in bounded chunks with caching
//! and a per-deployment failure policy. `ResultAssembler` drives a request
//! from raw parameters to a paginated `QueryResponse`.

pub mod assembler;
pub mod budget;
pub mod engine;
pub mod paginator;
pub mod response;

pub use assembler::ResultAssembler;
pub use budget::Budget;
pub use engine::{cache_key, BatchOutcome, BatchStats, VirtualFieldEngine};
pub use paginator::{PaginationLinks, Paginator};
pub use response::{QueryResponse, ResponseMeta, SortMeta, SortStrategy};
pub use sieve_core::CancellationToken;
