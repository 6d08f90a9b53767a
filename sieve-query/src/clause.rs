//! Filter expression grammar
//!
//! | form                       | operator            |
//! |----------------------------|---------------------|
//! | `v`                        | eq                  |
//! | `!=v`                      | ne (not_like if `v` contains `*`) |
//! | `v*`, `*v`, `*v*`          | like                |
//! | `>=v`, `<=v`, `>v`, `<v`   | gte, lte, gt, lt    |
//! | `v1,v2,...`                | in                  |
//! | `v1\|v2`                   | between             |
//! | `null`, `!null`            | null, not_null      |

use crate::plan::{Operand, Predicate};
use serde_json::json;
use sieve_core::{FieldType, Operator};

pub const WILDCARD: char = '*';

/// Operand as written in the request, before coercion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOperand {
    None,
    Single(String),
    List(Vec<String>),
    Range(String, String),
}

impl RawOperand {
    pub fn len(&self) -> usize {
        match self {
            RawOperand::None => 0,
            RawOperand::Single(_) => 1,
            RawOperand::List(values) => values.len(),
            RawOperand::Range(..) => 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split a raw expression into operator and operand. The error names what was expected.
pub fn parse_expression(raw: &str) -> Result<(Operator, RawOperand), String> {
    let trimmed = raw.trim();

    if trimmed.eq_ignore_ascii_case("null") {
        return Ok((Operator::Null, RawOperand::None));
    }
    if trimmed.eq_ignore_ascii_case("!null") {
        return Ok((Operator::NotNull, RawOperand::None));
    }

    if let Some(rest) = trimmed.strip_prefix("!=") {
        let operator = if rest.contains(WILDCARD) {
            Operator::NotLike
        } else {
            Operator::Ne
        };
        return single(operator, rest);
    }

    for (prefix, operator) in [
        (">=", Operator::Gte),
        ("<=", Operator::Lte),
        (">", Operator::Gt),
        ("<", Operator::Lt),
    ] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return single(operator, rest);
        }
    }

    if trimmed.contains('|') {
        let bounds: Vec<&str> = trimmed.split('|').map(str::trim).collect();
        return match bounds.as_slice() {
            [low, high] if !low.is_empty() && !high.is_empty() => Ok((
                Operator::Between,
                RawOperand::Range(low.to_string(), high.to_string()),
            )),
            _ => Err("exactly two bounds separated by '|'".to_string()),
        };
    }

    if trimmed.contains(',') {
        let values: Vec<String> = trimmed
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        if values.is_empty() {
            return Err("a comma-separated list of values".to_string());
        }
        return Ok((Operator::In, RawOperand::List(values)));
    }

    if trimmed.contains(WILDCARD) {
        return Ok((Operator::Like, RawOperand::Single(trimmed.to_string())));
    }

    single(Operator::Eq, trimmed)
}

fn single(operator: Operator, value: &str) -> Result<(Operator, RawOperand), String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("a value after '{}'", operator));
    }
    Ok((operator, RawOperand::Single(value.to_string())))
}

/// Render an operator and raw operand back into its query-string form
pub fn render_expression(operator: Operator, operand: &RawOperand) -> String {
    let value = match operand {
        RawOperand::None => String::new(),
        RawOperand::Single(v) => v.clone(),
        RawOperand::List(values) => values.join(","),
        RawOperand::Range(low, high) => format!("{}|{}", low, high),
    };
    match operator {
        Operator::Null => "null".to_string(),
        Operator::NotNull => "!null".to_string(),
        Operator::Ne | Operator::NotLike => format!("!={}", value),
        Operator::Gte => format!(">={}", value),
        Operator::Lte => format!("<={}", value),
        Operator::Gt => format!(">{}", value),
        Operator::Lt => format!("<{}", value),
        Operator::Eq | Operator::Like | Operator::In | Operator::Between => value,
    }
}

/// One typed, validated filter from the request
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    /// Canonical field name (aliases resolved)
    pub field: String,
    pub operator: Operator,
    pub operand: Operand,
    pub field_type: FieldType,
    pub is_virtual: bool,
    /// Expression as received
    pub raw: String,
    /// False for a leading-wildcard pattern that cannot use an index
    pub index_friendly: bool,
}

impl FilterClause {
    pub fn to_predicate(&self) -> Predicate {
        Predicate::compare(self.field.clone(), self.operator, self.operand.clone())
    }

    /// Entry of the response's active filter list
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "field": self.field,
            "operator": self.operator.as_str(),
            "value": self.operand.to_json(),
            "virtual": self.is_virtual,
        })
    }
}
