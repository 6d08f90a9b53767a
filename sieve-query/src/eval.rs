//! In-memory evaluation of predicates and deferred clauses

use crate::clause::WILDCARD;
use crate::plan::{Operand, Predicate};
use sieve_core::{Entity, Operator, Value};
use std::cmp::Ordering;

/// Case-insensitive glob match where `*` matches any run of characters
pub fn like_matches(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == WILDCARD {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == WILDCARD)
}

fn equals(value: &Value, operand: &Value) -> bool {
    value.compare(operand) == Some(Ordering::Equal)
}

/// Apply one comparison to a (possibly unloaded) value.
/// Nulls only satisfy `null`; every other operator rejects them.
pub fn matches_value(value: Option<&Value>, operator: Operator, operand: &Operand) -> bool {
    let value = match value {
        None | Some(Value::Null) => return operator == Operator::Null,
        Some(value) => value,
    };

    match (operator, operand) {
        (Operator::Null, _) => false,
        (Operator::NotNull, _) => true,
        (Operator::Eq, Operand::Single(expected)) => equals(value, expected),
        (Operator::Ne, Operand::Single(expected)) => !equals(value, expected),
        (Operator::Like, Operand::Single(Value::Str(pattern))) => {
            like_matches(&value.to_string(), pattern)
        }
        (Operator::NotLike, Operand::Single(Value::Str(pattern))) => {
            !like_matches(&value.to_string(), pattern)
        }
        (Operator::Gt, Operand::Single(bound)) => value.compare(bound) == Some(Ordering::Greater),
        (Operator::Gte, Operand::Single(bound)) => {
            matches!(value.compare(bound), Some(Ordering::Greater | Ordering::Equal))
        }
        (Operator::Lt, Operand::Single(bound)) => value.compare(bound) == Some(Ordering::Less),
        (Operator::Lte, Operand::Single(bound)) => {
            matches!(value.compare(bound), Some(Ordering::Less | Ordering::Equal))
        }
        (Operator::In, Operand::List(candidates)) => candidates.iter().any(|c| equals(value, c)),
        (Operator::Between, Operand::Range(low, high)) => {
            matches!(value.compare(low), Some(Ordering::Greater | Ordering::Equal))
                && matches!(value.compare(high), Some(Ordering::Less | Ordering::Equal))
        }
        _ => false,
    }
}

impl Predicate {
    /// Evaluate against an entity's loaded attributes
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Predicate::Compare {
                field,
                operator,
                operand,
            } => matches_value(entity.attribute(field), *operator, operand),
            Predicate::AnyOf(predicates) => predicates.iter().any(|p| p.matches(entity)),
        }
    }
}
