mod common;

use proptest::prelude::*;
use sieve_catalog::{FieldCatalog, FieldDefinition};
use sieve_core::{Entity, FieldType, FilterConfig, Operator, SieveConfig};
use sieve_engine::Paginator;
use sieve_query::{like_matches, parse_expression, render_expression, FilterTranslator, RawOperand, RequestParams};
use sieve_storage::InMemoryStore;

fn field_name(field_type: FieldType) -> String {
    format!("f_{}", field_type.as_str())
}

fn typed_catalog() -> FieldCatalog {
    let mut catalog = FieldCatalog::new();
    for field_type in FieldType::ALL {
        let mut builder = FieldDefinition::builder(field_name(field_type), field_type);
        if field_type == FieldType::Enum {
            builder = builder.enum_values(["active", "inactive"]);
        }
        catalog.register_field(builder.build().unwrap()).unwrap();
    }
    catalog
}

fn scalar(field_type: FieldType, n: i64, word: &str) -> String {
    match field_type {
        FieldType::String | FieldType::Text => format!("w{}", word),
        FieldType::Integer => n.to_string(),
        FieldType::Decimal => format!("{}.5", n),
        FieldType::Boolean => if n % 2 == 0 { "true" } else { "false" }.to_string(),
        FieldType::Datetime => format!("2024-01-{:02}", n % 28 + 1),
        FieldType::Enum => if n % 2 == 0 { "active" } else { "inactive" }.to_string(),
    }
}

fn sample(field_type: FieldType, operator: Operator, n: i64, word: &str) -> RawOperand {
    match operator {
        Operator::Null | Operator::NotNull => RawOperand::None,
        Operator::In => RawOperand::List(vec![
            scalar(field_type, n, word),
            scalar(field_type, n + 1, &format!("{}x", word)),
        ]),
        Operator::Between => {
            RawOperand::Range(scalar(field_type, n, word), scalar(field_type, n + 1, word))
        }
        Operator::Like | Operator::NotLike => {
            RawOperand::Single(format!("{}*", scalar(field_type, n, word)))
        }
        _ => RawOperand::Single(scalar(field_type, n, word)),
    }
}

proptest! {
    #[test]
    fn test_every_accepted_operator_round_trips(n in 0i64..10_000, word in "[a-z]{1,8}") {
        let catalog = typed_catalog();
        let translator = FilterTranslator::new(FilterConfig::default());

        for field_type in FieldType::ALL {
            for &operator in field_type.operators() {
                let operand = sample(field_type, operator, n, &word);
                let raw = render_expression(operator, &operand);

                prop_assert_eq!(parse_expression(&raw), Ok((operator, operand.clone())));
                let clause = translator
                    .parse_clause(&field_name(field_type), &raw, &catalog)
                    .map_err(|e| TestCaseError::fail(format!("{} '{}': {}", field_type, raw, e)))?;
                prop_assert_eq!(clause.operator, operator);
                prop_assert_eq!(clause.field_type, field_type);
            }
        }
    }

    #[test]
    fn test_prefix_pattern_matches_case_insensitively(prefix in "[a-z]{1,6}", rest in "[a-z ]{0,10}") {
        let text = format!("{}{}", prefix, rest);
        let upper_prefix = format!("{}*", prefix.to_uppercase());
        let wrapped = format!("*{}*", rest.trim());
        prop_assert!(like_matches(&text, &upper_prefix));
        prop_assert!(like_matches(&text, &wrapped));
        let prefixed = format!("#{}", text);
        prop_assert!(!like_matches(&prefixed, &upper_prefix));
    }

    #[test]
    fn test_paginator_bounds(total in 0usize..500, per_page in 1usize..50, page in 1usize..30) {
        let paginator = Paginator::new(total, page, per_page, "/", &RequestParams::new());
        prop_assert!(paginator.last_page >= 1);
        prop_assert!(paginator.last_page * per_page >= total);
        if let (Some(from), Some(to)) = (paginator.from, paginator.to) {
            prop_assert!(from <= to);
            prop_assert!(to <= total);
            prop_assert!(to - from < per_page);
        } else {
            prop_assert!(paginator.offset() >= total);
        }
        prop_assert_eq!(paginator.links.next.is_some(), page < paginator.last_page);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_virtual_sort_is_ordered_and_stable(totals in prop::collection::vec(0i64..50, 1..25)) {
        let store = InMemoryStore::new();
        for (i, total) in totals.iter().enumerate() {
            let id = i as i64 + 1;
            store.insert(
                Entity::new("user", id)
                    .with_attribute("first_name", "U")
                    .with_attribute("last_name", "V")
                    .with_relation("orders", vec![Entity::new("orders", id).with_attribute("total", *total)]),
            );
        }
        let fixture = common::user_fixture();
        let assembler = common::assembler(&fixture, store, SieveConfig::default());

        let response = assembler
            .execute(
                "user",
                &RequestParams::parse_query("sort_by=total_orders_value&sort_direction=desc&per_page=100"),
            )
            .unwrap();
        let ids = common::response_ids(&response);
        prop_assert_eq!(ids.len(), totals.len());

        let value = |id: i64| totals[(id - 1) as usize];
        for pair in ids.windows(2) {
            let (a, b) = (value(pair[0]), value(pair[1]));
            prop_assert!(a >= b);
            if a == b {
                prop_assert!(pair[0] < pair[1], "ties keep store order");
            }
        }
    }
}
