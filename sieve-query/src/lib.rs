//! sieve-query: request grammar, coercion and filter translation

pub mod clause;
pub mod coerce;
pub mod eval;
pub mod params;
pub mod plan;
pub mod selection;
pub mod translator;

pub use clause::{parse_expression, render_expression, FilterClause, RawOperand};
pub use coerce::Coercer;
pub use eval::{like_matches, matches_value};
pub use params::{QueryOptions, RequestParams};
pub use plan::{BaseQuery, Operand, OrderBy, Predicate, Projection};
pub use selection::FieldSelection;
pub use translator::{FilterTranslator, Translation};
