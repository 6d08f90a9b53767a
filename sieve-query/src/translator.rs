//! Turns request parameters into predicates and deferred virtual clauses

use crate::clause::{parse_expression, FilterClause, RawOperand, WILDCARD};
use crate::coerce::Coercer;
use crate::params::RequestParams;
use crate::plan::{Operand, Predicate};
use sieve_catalog::{DependencyPlan, FieldCatalog, FieldRef};
use sieve_core::{FilterConfig, FilterValidationError, FilterViolation, Operator, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Outcome of translating one request
#[derive(Debug, Clone, Default)]
pub struct Translation {
    /// Pushed down to the store
    pub predicates: Vec<Predicate>,
    /// Evaluated in memory after computing the virtual field
    pub virtual_clauses: Vec<FilterClause>,
    /// Every accepted clause, persisted and virtual, in request order
    pub active: Vec<FilterClause>,
    /// Clauses dropped in lenient mode
    pub rejected: Vec<FilterValidationError>,
    /// Columns and relations the virtual clauses need loaded
    pub eager: DependencyPlan,
}

impl Translation {
    pub fn has_virtual_filters(&self) -> bool {
        !self.virtual_clauses.is_empty()
    }

    /// Virtual clauses as matchable predicates over computed attributes
    pub fn virtual_predicates(&self) -> Vec<Predicate> {
        self.virtual_clauses.iter().map(FilterClause::to_predicate).collect()
    }
}

pub struct FilterTranslator {
    config: FilterConfig,
}

impl FilterTranslator {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Translate every filter parameter plus `search`.
    ///
    /// Lenient mode drops invalid clauses into `rejected`; strict mode fails
    /// with every offending field at once. A missing required filter is
    /// always fatal.
    pub fn translate(
        &self,
        params: &RequestParams,
        catalog: &FieldCatalog,
    ) -> Result<Translation, FilterValidationError> {
        let mut translation = Translation::default();

        for (key, raw) in params.filters() {
            match self.parse_clause(key, raw, catalog) {
                Ok(clause) => {
                    debug!(
                        "Filter accepted: {} {} (virtual: {})",
                        clause.field, clause.operator, clause.is_virtual
                    );
                    if clause.is_virtual {
                        translation.eager.merge(catalog.dependency_plan(&clause.field));
                        translation.virtual_clauses.push(clause.clone());
                    } else {
                        translation.predicates.push(clause.to_predicate());
                    }
                    translation.active.push(clause);
                }
                Err(err) => translation.rejected.push(err),
            }
        }

        if let Some(term) = params.get("search").map(str::trim).filter(|t| !t.is_empty()) {
            match self.search_predicate(term, catalog) {
                Some(predicate) => translation.predicates.push(predicate),
                None => warn!("Search term ignored: no searchable fields registered"),
            }
        }

        let filtered: BTreeSet<&str> = translation.active.iter().map(|c| c.field.as_str()).collect();
        let missing: Vec<FilterValidationError> = catalog
            .required_fields()
            .into_iter()
            .filter(|field| !filtered.contains(field.as_str()))
            .map(|field| FilterValidationError::MissingRequired { field })
            .collect();

        if self.config.strict && !translation.rejected.is_empty() {
            let violations = translation
                .rejected
                .iter()
                .chain(missing.iter())
                .map(FilterViolation::from)
                .collect();
            return Err(FilterValidationError::Rejected { violations });
        }

        if missing.len() > 1 {
            return Err(FilterValidationError::Rejected {
                violations: missing.iter().map(FilterViolation::from).collect(),
            });
        }
        if let Some(err) = missing.into_iter().next() {
            return Err(err);
        }

        for err in &translation.rejected {
            warn!("Filter dropped: {}", err);
        }
        Ok(translation)
    }

    /// Validate and coerce a single `key=raw` filter
    pub fn parse_clause(
        &self,
        key: &str,
        raw: &str,
        catalog: &FieldCatalog,
    ) -> Result<FilterClause, FilterValidationError> {
        let name = catalog.resolve(key);
        if self.is_blocked(key) || self.is_blocked(name) {
            return Err(FilterValidationError::FieldBlocked {
                field: key.to_string(),
            });
        }

        let field = catalog.get(name).ok_or_else(|| FilterValidationError::UnknownField {
            field: key.to_string(),
        })?;
        let field_type = field.field_type();

        let (operator, raw_operand) =
            parse_expression(raw).map_err(|expected| FilterValidationError::MalformedValue {
                field: name.to_string(),
                value: raw.to_string(),
                expected,
            })?;

        field_type
            .check_operator(operator)
            .map_err(|mismatch| FilterValidationError::IncompatibleOperator {
                field: name.to_string(),
                mismatch,
            })?;
        if !field.allows(operator) {
            return Err(FilterValidationError::OperatorNotAllowed {
                field: name.to_string(),
                operator,
            });
        }

        if operator == Operator::In && raw_operand.len() > self.config.max_in_values {
            return Err(FilterValidationError::TooManyValues {
                field: name.to_string(),
                count: raw_operand.len(),
                max: self.config.max_in_values,
            });
        }

        let index_friendly = match (&raw_operand, operator) {
            (RawOperand::Single(pattern), Operator::Like | Operator::NotLike) => {
                !pattern.starts_with(WILDCARD)
            }
            _ => true,
        };
        let operand = self.coerce_operand(&field, operator, raw_operand)?;

        Ok(FilterClause {
            field: name.to_string(),
            operator,
            operand,
            field_type,
            is_virtual: field.is_virtual(),
            raw: raw.to_string(),
            index_friendly,
        })
    }

    fn coerce_operand(
        &self,
        field: &FieldRef<'_>,
        operator: Operator,
        raw: RawOperand,
    ) -> Result<Operand, FilterValidationError> {
        let coercer = Coercer::new(&self.config);
        let coerce = |value: &str| {
            coercer.coerce(field.name(), field.field_type(), value, field.enum_values())
        };

        Ok(match raw {
            RawOperand::None => Operand::None,
            RawOperand::Single(pattern) if matches!(operator, Operator::Like | Operator::NotLike) => {
                Operand::Single(Value::Str(pattern))
            }
            RawOperand::Single(value) => Operand::Single(coerce(value.as_str())?),
            RawOperand::List(values) => Operand::List(
                values
                    .iter()
                    .map(|v| coerce(v.as_str()))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            RawOperand::Range(low, high) => {
                Operand::Range(coerce(low.as_str())?, coerce(high.as_str())?)
            }
        })
    }

    /// `like *term*` over every searchable field, OR-ed together
    fn search_predicate(&self, term: &str, catalog: &FieldCatalog) -> Option<Predicate> {
        let pattern = format!("{}{}{}", WILDCARD, term.trim_matches(WILDCARD), WILDCARD);
        let predicates: Vec<Predicate> = catalog
            .searchable()
            .into_iter()
            .filter(|field| !self.is_blocked(field))
            .map(|field| Predicate::compare(field, Operator::Like, Operand::Single(Value::Str(pattern.clone()))))
            .collect();
        if predicates.is_empty() {
            None
        } else {
            Some(Predicate::AnyOf(predicates))
        }
    }

    fn is_blocked(&self, field: &str) -> bool {
        self.config.blocked_fields.iter().any(|b| b == field)
    }
}
