use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Typed scalar carried by entity attributes, filter operands and computed fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(f64),
    Str(String),
    DateTime(DateTime<Utc>),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Partial comparison across compatible variants; `None` when incomparable
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::Str(b)) => {
                let b = DateTime::parse_from_rfc3339(b).ok()?.with_timezone(&Utc);
                Some(a.cmp(&b))
            }
            (Value::Str(_), Value::DateTime(_)) => other.compare(self).map(Ordering::reverse),
            _ => None,
        }
    }

    /// True for keys placed after every other value when sorting, in either direction
    pub fn sorts_last(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Decimal(d) => d.is_nan(),
            _ => false,
        }
    }

    /// Total order used by in-memory sorting. Variants of different kinds are
    /// ranked bool < number < string < datetime < list; NaN and null rank last.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) if !a.is_nan() && !b.is_nan() => a.total_cmp(b),
            (Value::Int(a), Value::Decimal(b)) if !b.is_nan() => (*a as f64).total_cmp(b),
            (Value::Decimal(a), Value::Int(b)) if !a.is_nan() => a.total_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a
                .iter()
                .zip(b)
                .map(|(x, y)| x.sort_cmp(y))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => self.sort_rank().cmp(&other.sort_rank()),
        }
    }

    fn sort_rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Decimal(d) if d.is_nan() => 5,
            Value::Int(_) | Value::Decimal(_) => 1,
            Value::Str(_) => 2,
            Value::DateTime(_) => 3,
            Value::List(_) => 4,
            Value::Null => 6,
        }
    }

    /// Rough heap footprint, used for cooperative memory ceilings
    pub fn estimated_size(&self) -> usize {
        let inline = std::mem::size_of::<Value>();
        match self {
            Value::Str(s) => inline + s.len(),
            Value::List(items) => inline + items.iter().map(Value::estimated_size).sum::<usize>(),
            _ => inline,
        }
    }

    /// Natural JSON rendering for API responses
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// Inverse of `to_json` for plain datasets; objects are not representable
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::Null => Some(Value::Null),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Value::Int(i)),
                None => n.as_f64().map(Value::Decimal),
            },
            serde_json::Value::String(s) => Some(Value::Str(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            serde_json::Value::Object(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Str(s) => f.write_str(s),
            Value::DateTime(dt) => f.write_str(&dt.to_rfc3339()),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(","))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Decimal(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_numeric_comparison_across_variants() {
        assert_eq!(Value::Int(2).compare(&Value::Decimal(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Decimal(3.0).compare(&Value::Int(3)), Some(Ordering::Equal));
    }

    #[test]
    fn test_incomparable_values() {
        assert_eq!(Value::Int(1).compare(&Value::Str("1".into())), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn test_sort_cmp_is_total_across_variants_and_nan() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut values = vec![
            Value::Decimal(f64::NAN),
            Value::from("b"),
            Value::Decimal(2.5),
            Value::Null,
            Value::DateTime(dt),
            Value::Int(3),
            Value::Bool(true),
            Value::Decimal(f64::NAN),
            Value::Int(-1),
            Value::from("a"),
        ];
        values.sort_by(Value::sort_cmp);

        let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
        let stamp = dt.to_rfc3339();
        assert_eq!(
            rendered,
            vec!["true", "-1", "2.5", "3", "a", "b", stamp.as_str(), "NaN", "NaN", "null"]
        );
        for pair in values.windows(2) {
            assert_ne!(pair[0].sort_cmp(&pair[1]), Ordering::Greater);
            assert_ne!(pair[1].sort_cmp(&pair[0]), Ordering::Less);
        }
        assert!(Value::Decimal(f64::NAN).sorts_last());
        assert!(Value::Null.sorts_last());
        assert!(!Value::Int(0).sorts_last());
    }

    #[test]
    fn test_datetime_against_rfc3339_string() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let later = Value::Str("2024-02-01T00:00:00Z".to_string());
        assert_eq!(Value::DateTime(dt).compare(&later), Some(Ordering::Less));
        assert_eq!(later.compare(&Value::DateTime(dt)), Some(Ordering::Greater));
    }

    #[test]
    fn test_tagged_serialization_keeps_variant() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let encoded = serde_json::to_string(&Value::DateTime(dt)).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, Value::DateTime(dt));
    }

    #[test]
    fn test_json_rendering() {
        assert_eq!(Value::Int(7).to_json(), serde_json::json!(7));
        assert_eq!(Value::Decimal(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(
            Value::from_json(&serde_json::json!([1, "a", null])),
            Some(Value::List(vec![Value::Int(1), Value::from("a"), Value::Null]))
        );
        assert_eq!(Value::from_json(&serde_json::json!({"a": 1})), None);
    }
}
