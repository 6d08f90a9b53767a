//! Persisted field definitions

use serde::Serialize;
use sieve_core::{ConfigurationError, FieldType, Operator, RESERVED_PARAMS};
use std::collections::BTreeSet;

/// A filterable/sortable column of the underlying store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub operators: BTreeSet<Operator>,
    pub searchable: bool,
    pub sortable: bool,
    pub required: bool,
    pub enum_values: Option<Vec<String>>,
}

impl FieldDefinition {
    pub fn builder(name: impl Into<String>, field_type: FieldType) -> FieldBuilder {
        FieldBuilder {
            name: name.into(),
            field_type,
            operators: None,
            searchable: false,
            sortable: false,
            required: false,
            enum_values: None,
        }
    }

    pub fn allows(&self, operator: Operator) -> bool {
        self.operators.contains(&operator)
    }
}

/// Builder enumerating every valid key of a persisted field definition
#[derive(Debug, Clone)]
pub struct FieldBuilder {
    name: String,
    field_type: FieldType,
    operators: Option<Vec<Operator>>,
    searchable: bool,
    sortable: bool,
    required: bool,
    enum_values: Option<Vec<String>>,
}

impl FieldBuilder {
    /// Restrict the operators; defaults to every operator legal for the type
    pub fn operators(mut self, operators: impl IntoIterator<Item = Operator>) -> Self {
        self.operators = Some(operators.into_iter().collect());
        self
    }

    pub fn searchable(mut self, searchable: bool) -> Self {
        self.searchable = searchable;
        self
    }

    pub fn sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn enum_values<S: Into<String>>(mut self, values: impl IntoIterator<Item = S>) -> Self {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> Result<FieldDefinition, ConfigurationError> {
        validate_name(&self.name)?;

        let operators = resolve_operators(&self.name, self.field_type, self.operators)?;

        validate_enum_values(&self.name, self.field_type, self.enum_values.as_deref())?;

        if self.searchable && !self.field_type.is_textual() {
            return Err(invalid(&self.name, "only string and text fields can be searchable"));
        }

        Ok(FieldDefinition {
            name: self.name,
            field_type: self.field_type,
            operators,
            searchable: self.searchable,
            sortable: self.sortable,
            required: self.required,
            enum_values: self.enum_values,
        })
    }
}

/// Enum fields need a non-empty value set; other types must not carry one
pub(crate) fn validate_enum_values(
    field: &str,
    field_type: FieldType,
    values: Option<&[String]>,
) -> Result<(), ConfigurationError> {
    match (values, field_type) {
        (Some([]), FieldType::Enum) => Err(invalid(field, "enum fields need at least one value")),
        (None, FieldType::Enum) => Err(invalid(field, "enum fields need enum_values")),
        (Some(_), other) if other != FieldType::Enum => {
            Err(invalid(field, "enum_values are only valid for enum fields"))
        }
        _ => Ok(()),
    }
}

/// Operators given explicitly must all be legal for the type
pub(crate) fn resolve_operators(
    field: &str,
    field_type: FieldType,
    requested: Option<Vec<Operator>>,
) -> Result<BTreeSet<Operator>, ConfigurationError> {
    match requested {
        None => Ok(field_type.operators().iter().copied().collect()),
        Some(requested) => {
            if requested.is_empty() {
                return Err(invalid(field, "operator list cannot be empty"));
            }
            requested
                .into_iter()
                .map(|op| {
                    field_type
                        .check_operator(op)
                        .map(|_| op)
                        .map_err(|mismatch| ConfigurationError::InvalidOperator {
                            field: field.to_string(),
                            mismatch,
                        })
                })
                .collect()
        }
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), ConfigurationError> {
    if name.is_empty() {
        return Err(invalid(name, "name cannot be empty"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid(name, "name may only contain letters, digits and underscores"));
    }
    if RESERVED_PARAMS.contains(&name) {
        return Err(invalid(name, "name is a reserved request parameter"));
    }
    Ok(())
}

pub(crate) fn invalid(field: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidDefinition {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
