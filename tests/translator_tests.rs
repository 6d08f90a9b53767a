// Request-time filter translation

mod common;

use sieve_catalog::{FieldCatalog, FieldDefinition, VirtualFieldDefinition};
use sieve_core::{
    ConfigurationError, FieldType, FilterConfig, FilterValidationError, Operator, Value,
};
use sieve_query::{FilterTranslator, Operand, Predicate, RequestParams};

fn translator() -> FilterTranslator {
    FilterTranslator::new(FilterConfig::default())
}

fn strict() -> FilterTranslator {
    FilterTranslator::new(FilterConfig {
        strict: true,
        ..FilterConfig::default()
    })
}

#[test]
fn test_gte_clause_from_query_string() {
    let fixture = common::user_fixture();
    let params = RequestParams::parse_query("age=%3E%3D18");
    let translation = translator().translate(&params, &fixture.catalog).unwrap();

    assert_eq!(
        translation.predicates,
        vec![Predicate::compare("age", Operator::Gte, Operand::Single(Value::Int(18)))]
    );
    let summary = translation.active[0].summary();
    assert_eq!(summary["field"], "age");
    assert_eq!(summary["operator"], "gte");
    assert_eq!(summary["value"], 18);
}

#[test]
fn test_like_on_integer_rejected_identically() {
    let registration = FieldDefinition::builder("age", FieldType::Integer)
        .operators([Operator::Like])
        .build()
        .unwrap_err();

    let mut catalog = FieldCatalog::new();
    catalog
        .register_field(FieldDefinition::builder("age", FieldType::Integer).build().unwrap())
        .unwrap();
    let request = translator()
        .parse_clause("age", "1*", &catalog)
        .unwrap_err();

    let (ConfigurationError::InvalidOperator { mismatch: at_registration, .. },
         FilterValidationError::IncompatibleOperator { mismatch: at_request, .. }) = (&registration, &request)
    else {
        panic!("unexpected errors: {:?} / {:?}", registration, request);
    };
    assert_eq!(at_registration, at_request);
    assert_eq!(registration.to_string(), request.to_string());
    assert_eq!(registration.code(), request.code());
}

#[test]
fn test_virtual_clause_is_deferred_with_eager_plan() {
    let fixture = common::user_fixture();
    let params = RequestParams::new()
        .with("full_name", "Jo*")
        .with("total_orders_value", ">100");
    let translation = translator().translate(&params, &fixture.catalog).unwrap();

    assert!(translation.predicates.is_empty());
    assert_eq!(translation.virtual_clauses.len(), 2);
    assert!(translation.eager.columns.contains("first_name"));
    assert!(translation.eager.relations.contains("orders"));
}

#[test]
fn test_virtual_enum_field_filters_on_its_values() {
    let mut catalog = FieldCatalog::new();
    catalog
        .register_field(FieldDefinition::builder("age", FieldType::Integer).build().unwrap())
        .unwrap();
    catalog
        .register_virtual_field(
            VirtualFieldDefinition::builder("bracket", FieldType::Enum)
                .depends_on(["age"])
                .enum_values(["junior", "senior"])
                .compute_fn(|_, deps| {
                    let age = deps.get("age").and_then(Value::as_i64).unwrap_or(0);
                    Ok(Value::from(if age >= 40 { "senior" } else { "junior" }))
                })
                .build()
                .unwrap(),
        )
        .unwrap();

    let clause = translator().parse_clause("bracket", "senior", &catalog).unwrap();
    assert!(clause.is_virtual);
    assert_eq!(clause.operand, Operand::Single(Value::from("senior")));

    let clause = translator().parse_clause("bracket", "junior,senior", &catalog).unwrap();
    assert_eq!(clause.operator, Operator::In);

    let err = translator().parse_clause("bracket", "retired", &catalog).unwrap_err();
    assert_eq!(err.code(), "malformed_value");
}

#[test]
fn test_lenient_mode_drops_bad_clauses() {
    let fixture = common::user_fixture();
    let params = RequestParams::new()
        .with("age", "abc")
        .with("shoe_size", "42")
        .with("first_name", "Ada");
    let translation = translator().translate(&params, &fixture.catalog).unwrap();

    assert_eq!(translation.active.len(), 1);
    let codes: Vec<&str> = translation.rejected.iter().map(|e| e.code()).collect();
    assert_eq!(codes, vec!["malformed_value", "unknown_field"]);
}

#[test]
fn test_strict_mode_enumerates_every_offender() {
    let fixture = common::user_fixture();
    let params = RequestParams::new()
        .with("age", "abc")
        .with("shoe_size", "42")
        .with("first_name", "Ada");
    let err = strict().translate(&params, &fixture.catalog).unwrap_err();

    match err {
        FilterValidationError::Rejected { violations } => {
            let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
            assert_eq!(fields, vec!["age", "shoe_size"]);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn test_search_spans_searchable_fields() {
    let fixture = common::user_fixture();
    let params = RequestParams::new().with("search", "jo");
    let translation = translator().translate(&params, &fixture.catalog).unwrap();

    match translation.predicates.as_slice() {
        [Predicate::AnyOf(alternatives)] => assert_eq!(alternatives.len(), 2),
        other => panic!("expected one OR group, got {:?}", other),
    }
}

#[test]
fn test_missing_required_filter_is_fatal_even_when_lenient() {
    let mut catalog = FieldCatalog::new();
    catalog
        .register_field(
            FieldDefinition::builder("tenant_id", FieldType::Integer)
                .required(true)
                .build()
                .unwrap(),
        )
        .unwrap();

    let err = translator()
        .translate(&RequestParams::new(), &catalog)
        .unwrap_err();
    assert_eq!(
        err,
        FilterValidationError::MissingRequired {
            field: "tenant_id".to_string()
        }
    );
}
