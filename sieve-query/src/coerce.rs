//! Typed coercion of raw request values

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sieve_core::{FieldType, FilterConfig, FilterValidationError, Value};

/// Reserved name for RFC 3339 in `filter.datetime_formats`
pub const RFC3339: &str = "rfc3339";

pub struct Coercer<'a> {
    config: &'a FilterConfig,
}

impl<'a> Coercer<'a> {
    pub fn new(config: &'a FilterConfig) -> Self {
        Self { config }
    }

    pub fn coerce(
        &self,
        field: &str,
        field_type: FieldType,
        raw: &str,
        enum_values: Option<&[String]>,
    ) -> Result<Value, FilterValidationError> {
        let malformed = || FilterValidationError::MalformedValue {
            field: field.to_string(),
            value: raw.to_string(),
            expected: field_type.to_string(),
        };
        let trimmed = raw.trim();

        match field_type {
            FieldType::String | FieldType::Text => Ok(Value::Str(raw.to_string())),
            FieldType::Integer => trimmed.parse::<i64>().map(Value::Int).map_err(|_| malformed()),
            FieldType::Decimal => match trimmed.parse::<f64>() {
                Ok(d) if d.is_finite() => Ok(Value::Decimal(d)),
                _ => Err(malformed()),
            },
            FieldType::Boolean => self.boolean(trimmed).map(Value::Bool).ok_or_else(malformed),
            FieldType::Datetime => self.datetime(trimmed).map(Value::DateTime).ok_or_else(malformed),
            FieldType::Enum => {
                let allowed = enum_values.unwrap_or(&[]);
                if allowed.iter().any(|v| v == trimmed) {
                    Ok(Value::Str(trimmed.to_string()))
                } else {
                    Err(FilterValidationError::MalformedValue {
                        field: field.to_string(),
                        value: raw.to_string(),
                        expected: format!("one of {}", allowed.join(", ")),
                    })
                }
            }
        }
    }

    fn boolean(&self, raw: &str) -> Option<bool> {
        let matches = |tokens: &[String]| tokens.iter().any(|t| t.eq_ignore_ascii_case(raw));
        if matches(&self.config.true_tokens) {
            Some(true)
        } else if matches(&self.config.false_tokens) {
            Some(false)
        } else {
            None
        }
    }

    /// First configured format that parses wins
    fn datetime(&self, raw: &str) -> Option<DateTime<Utc>> {
        self.config
            .datetime_formats
            .iter()
            .find_map(|format| parse_datetime(raw, format))
    }
}

fn parse_datetime(raw: &str, format: &str) -> Option<DateTime<Utc>> {
    if format.eq_ignore_ascii_case(RFC3339) {
        return DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn coerce(field_type: FieldType, raw: &str) -> Result<Value, FilterValidationError> {
        let config = FilterConfig::default();
        Coercer::new(&config).coerce("f", field_type, raw, None)
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(coerce(FieldType::Integer, " 18 ").unwrap(), Value::Int(18));
        assert_eq!(coerce(FieldType::Decimal, "2.5").unwrap(), Value::Decimal(2.5));
        assert!(coerce(FieldType::Integer, "18.5").is_err());
        assert!(coerce(FieldType::Decimal, "NaN").is_err());
        assert_eq!(coerce(FieldType::Integer, "abc").unwrap_err().code(), "malformed_value");
    }

    #[test]
    fn test_boolean_tokens() {
        assert_eq!(coerce(FieldType::Boolean, "YES").unwrap(), Value::Bool(true));
        assert_eq!(coerce(FieldType::Boolean, "0").unwrap(), Value::Bool(false));
        assert!(coerce(FieldType::Boolean, "maybe").is_err());
    }

    #[test]
    fn test_datetime_formats_in_order() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(coerce(FieldType::Datetime, "2024-03-01").unwrap(), Value::DateTime(expected));
        assert_eq!(
            coerce(FieldType::Datetime, "2024-03-01T00:00:00Z").unwrap(),
            Value::DateTime(expected)
        );
        assert_eq!(
            coerce(FieldType::Datetime, "2024-03-01 00:00:00").unwrap(),
            Value::DateTime(expected)
        );
        assert!(coerce(FieldType::Datetime, "01/03/2024").is_err());

        let config = FilterConfig {
            datetime_formats: vec!["%d/%m/%Y".to_string()],
            ..FilterConfig::default()
        };
        let value = Coercer::new(&config)
            .coerce("f", FieldType::Datetime, "01/03/2024", None)
            .unwrap();
        assert_eq!(value, Value::DateTime(expected));
    }

    #[test]
    fn test_enum_membership() {
        let config = FilterConfig::default();
        let allowed = vec!["active".to_string(), "banned".to_string()];
        let coercer = Coercer::new(&config);
        assert_eq!(
            coercer.coerce("status", FieldType::Enum, "active", Some(&allowed)).unwrap(),
            Value::from("active")
        );
        assert!(coercer.coerce("status", FieldType::Enum, "gone", Some(&allowed)).is_err());
    }
}
