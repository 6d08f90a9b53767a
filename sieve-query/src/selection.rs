//! `fields=` parameter: column projections, nested relation projections and
//! virtual fields to compute for the current page

use crate::plan::Projection;
use sieve_catalog::FieldCatalog;
use sieve_core::FilterValidationError;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection {
    pub columns: BTreeSet<String>,
    /// Relation -> nested columns; `None` selects every column (`orders.*`)
    pub relations: BTreeMap<String, Option<BTreeSet<String>>>,
    /// Requested virtual fields, in request order
    pub virtual_fields: Vec<String>,
}

impl FieldSelection {
    /// Resolve requested names against the catalog. Unknown names are
    /// returned separately so the caller can apply its strictness.
    pub fn resolve(
        requested: &[String],
        catalog: &FieldCatalog,
    ) -> (FieldSelection, Vec<FilterValidationError>) {
        let mut selection = FieldSelection::default();
        let mut unknown = Vec::new();

        for name in requested {
            if name == "id" {
                continue;
            }
            if let Some((relation, column)) = name.split_once('.') {
                if relation.is_empty() || column.is_empty() {
                    unknown.push(FilterValidationError::UnknownSelection { field: name.clone() });
                    continue;
                }
                let entry = selection
                    .relations
                    .entry(relation.to_string())
                    .or_insert_with(|| Some(BTreeSet::new()));
                if column == "*" {
                    *entry = None;
                } else if let Some(columns) = entry {
                    columns.insert(column.to_string());
                }
                continue;
            }

            let canonical = catalog.resolve(name);
            if catalog.is_virtual_field(canonical) {
                if !selection.virtual_fields.iter().any(|f| f == canonical) {
                    selection.virtual_fields.push(canonical.to_string());
                }
            } else if catalog.field(canonical).is_some() {
                selection.columns.insert(canonical.to_string());
            } else {
                unknown.push(FilterValidationError::UnknownSelection { field: name.clone() });
            }
        }

        (selection, unknown)
    }

    /// Store projection covering the selection plus the dependencies of the
    /// selected virtual fields
    pub fn projection(&self, catalog: &FieldCatalog) -> Projection {
        let mut columns = self.columns.clone();
        let mut relations = self.relations.clone();
        for field in &self.virtual_fields {
            let plan = catalog.dependency_plan(field);
            columns.extend(plan.columns);
            for relation in plan.relations {
                relations.insert(relation, None);
            }
        }
        Projection {
            columns: Some(columns),
            relations,
        }
    }
}
