use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Request parameter keys that never name a filter
pub const RESERVED_PARAMS: [&str; 6] = ["page", "per_page", "sort_by", "sort_direction", "search", "fields"];

/// Semantic type of a persisted or virtual field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Text,
    Integer,
    Decimal,
    Boolean,
    Datetime,
    Enum,
}

/// Comparison operator of a filter clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Like,
    NotLike,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Between,
    Null,
    NotNull,
}

const TEXT_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::Like,
    Operator::NotLike,
    Operator::In,
    Operator::Null,
    Operator::NotNull,
];

const NUMERIC_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::Gt,
    Operator::Gte,
    Operator::Lt,
    Operator::Lte,
    Operator::In,
    Operator::Between,
    Operator::Null,
    Operator::NotNull,
];

const BOOLEAN_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::Null,
    Operator::NotNull,
];

const ENUM_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::In,
    Operator::Null,
    Operator::NotNull,
];

impl FieldType {
    pub const ALL: [FieldType; 7] = [
        FieldType::String,
        FieldType::Text,
        FieldType::Integer,
        FieldType::Decimal,
        FieldType::Boolean,
        FieldType::Datetime,
        FieldType::Enum,
    ];

    /// Every operator that is legal for this type
    pub fn operators(&self) -> &'static [Operator] {
        match self {
            FieldType::String | FieldType::Text => TEXT_OPERATORS,
            FieldType::Integer | FieldType::Decimal | FieldType::Datetime => NUMERIC_OPERATORS,
            FieldType::Boolean => BOOLEAN_OPERATORS,
            FieldType::Enum => ENUM_OPERATORS,
        }
    }

    pub fn supports(&self, operator: Operator) -> bool {
        self.operators().contains(&operator)
    }

    /// Shared by registration-time and request-time validation
    pub fn check_operator(&self, operator: Operator) -> Result<(), OperatorMismatch> {
        if self.supports(operator) {
            Ok(())
        } else {
            Err(OperatorMismatch {
                field_type: *self,
                operator,
            })
        }
    }

    /// Types with a total order usable by range operators
    pub fn is_ordered(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Decimal | FieldType::Datetime)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Text)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "boolean",
            FieldType::Datetime => "datetime",
            FieldType::Enum => "enum",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Like => "like",
            Operator::NotLike => "not_like",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::Between => "between",
            Operator::Null => "null",
            Operator::NotNull => "not_null",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eq" => Ok(Operator::Eq),
            "ne" => Ok(Operator::Ne),
            "like" => Ok(Operator::Like),
            "not_like" => Ok(Operator::NotLike),
            "gt" => Ok(Operator::Gt),
            "gte" => Ok(Operator::Gte),
            "lt" => Ok(Operator::Lt),
            "lte" => Ok(Operator::Lte),
            "in" => Ok(Operator::In),
            "between" => Ok(Operator::Between),
            "null" => Ok(Operator::Null),
            "not_null" => Ok(Operator::NotNull),
            other => Err(format!("unknown operator '{}'", other)),
        }
    }
}

/// An operator that is not legal for a field type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorMismatch {
    pub field_type: FieldType,
    pub operator: Operator,
}

impl fmt::Display for OperatorMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operator '{}' is not valid for {} fields",
            self.operator, self.field_type
        )
    }
}

/// Sort direction of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(SortDirection::Asc),
            "desc" | "descending" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an entity within its entity type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Str(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(id) => write!(f, "{}", id),
            EntityId::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        EntityId::Int(id)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::Str(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId::Str(id)
    }
}
