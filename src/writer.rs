//! Row Writer — projects each element's attributes onto its table's
//! reconciled column set and inserts it.
//!
//! A row is modeled as a map from column identifier to nullable text (the
//! "dynamic type erasure" resolution from SPEC_FULL.md §9): every dynamic
//! table is all-TEXT, so there is no per-column type dispatch to do, only a
//! column list and a matching positional bind vector computed at call time.

use std::collections::{BTreeMap, HashSet};

use tokio_postgres::types::ToSql;
use tokio_postgres::Transaction;

use crate::error::IngestError;
use crate::fk::FkPair;
use crate::reconciler;
use crate::sanitize::sanitize_bounded;
use crate::schema_cache::SchemaCache;
use crate::xml::Element;

/// A single row about to be inserted: column name -> nullable text value.
/// Keyed by `BTreeMap` so insertion order (and therefore generated SQL) is
/// deterministic, which keeps tests and audit logs reproducible.
pub type Row = BTreeMap<String, Option<String>>;

/// Build the row for `element`: the five common columns plus one entry per
/// sanitized attribute. Attributes that sanitize to the same identifier
/// collide into one entry; iteration order of `element.attributes` decides
/// which value wins (last write wins, per SPEC_FULL.md §4.3).
fn build_row(element: &Element) -> Row {
    let mut row = Row::new();
    row.insert("element_id".to_string(), Some(element.element_id.clone()));
    row.insert(
        "parent_element_id".to_string(),
        element.parent_element_id.clone(),
    );
    row.insert(
        "pcr_uuid_context".to_string(),
        element.pcr_uuid_context.clone(),
    );
    row.insert(
        "original_tag_name".to_string(),
        Some(element.element_tag.clone()),
    );
    row.insert("text_content".to_string(), element.text_content.clone());

    for (attr_name, value) in &element.attributes {
        let col = sanitize_bounded(attr_name);
        if col.is_empty() {
            continue;
        }
        row.insert(col, Some(value.clone()));
    }

    row
}

/// Reconcile `element`'s table, insert its row, and — if it has a parent —
/// record the `(child, parent)` table pair into `fk_pairs` for the FK
/// Planner to act on once all elements are written.
pub async fn write_element(
    txn: &Transaction<'_>,
    cache: &mut SchemaCache,
    schema: &str,
    element: &Element,
    fk_pairs: &mut HashSet<FkPair>,
) -> Result<(), IngestError> {
    let (table, columns) = reconciler::ensure(txn, cache, schema, element).await?;

    if let (Some(_), Some(parent_suggestion)) =
        (&element.parent_element_id, &element.parent_table_suggestion)
    {
        let parent_table = sanitize_bounded(parent_suggestion);
        if !parent_table.is_empty() {
            fk_pairs.insert(FkPair {
                child_table: table.clone(),
                parent_table,
            });
        }
    }

    let row = build_row(element);
    let projected = project_onto(&row, &columns)?;
    insert_row(txn, schema, &table, &projected).await
}

/// Keep only the row entries present in `columns`. Every common column and
/// every attribute-derived column must already be present after
/// reconciliation; a key missing from `columns` at this point is a bug in
/// the Reconciler, not recoverable input data.
fn project_onto(row: &Row, columns: &HashSet<String>) -> Result<Row, IngestError> {
    let mut projected = Row::new();
    for (k, v) in row {
        if columns.contains(k) {
            projected.insert(k.clone(), v.clone());
        } else {
            return Err(IngestError::Internal(format!(
                "column {k} missing from reconciled set {columns:?}"
            )));
        }
    }
    Ok(projected)
}

async fn insert_row(
    txn: &Transaction<'_>,
    schema: &str,
    table: &str,
    row: &Row,
) -> Result<(), IngestError> {
    let columns: Vec<&String> = row.keys().collect();
    let quoted_cols: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();

    let sql = format!(
        "INSERT INTO \"{schema}\".\"{table}\" ({cols}) VALUES ({vals})",
        schema = schema,
        table = table,
        cols = quoted_cols.join(", "),
        vals = placeholders.join(", "),
    );

    let values: Vec<&(dyn ToSql + Sync)> = columns
        .iter()
        .map(|c| &row[c.as_str()] as &(dyn ToSql + Sync))
        .collect();

    let element_id = row
        .get("element_id")
        .and_then(|v| v.clone())
        .unwrap_or_default();

    txn.execute(&sql, &values)
        .await
        .map_err(|source| IngestError::Insert {
            table: table.to_string(),
            element_id,
            source,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn element(attrs: &[(&str, &str)]) -> Element {
        Element {
            element_id: "e1".to_string(),
            parent_element_id: Some("p1".to_string()),
            pcr_uuid_context: Some("pcr-1".to_string()),
            element_tag: "ePatient.01".to_string(),
            table_suggestion: "ePatient_01".to_string(),
            parent_table_suggestion: Some("eCase".to_string()),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Map<_, _>>(),
            text_content: Some("Smith".to_string()),
        }
    }

    #[test]
    fn build_row_includes_common_and_attribute_columns() {
        let el = element(&[("CorrelationID", "c1")]);
        let row = build_row(&el);
        assert_eq!(row.get("element_id").unwrap().as_deref(), Some("e1"));
        assert_eq!(
            row.get("text_content").unwrap().as_deref(),
            Some("Smith")
        );
        assert_eq!(row.get("correlationid").unwrap().as_deref(), Some("c1"));
    }

    #[test]
    fn project_onto_rejects_missing_columns() {
        let el = element(&[("CorrelationID", "c1")]);
        let row = build_row(&el);
        let columns: HashSet<String> = reconciler::COMMON_COLUMNS
            .iter()
            .map(|s| s.to_string())
            .collect(); // missing "correlationid" on purpose
        assert!(project_onto(&row, &columns).is_err());
    }

    #[test]
    fn project_onto_succeeds_when_all_columns_present() {
        let el = element(&[("CorrelationID", "c1")]);
        let row = build_row(&el);
        let mut columns: HashSet<String> = reconciler::COMMON_COLUMNS
            .iter()
            .map(|s| s.to_string())
            .collect();
        columns.insert("correlationid".to_string());
        let projected = project_onto(&row, &columns).unwrap();
        assert_eq!(projected.len(), row.len());
    }

    #[test]
    fn attribute_collision_keeps_one_entry_last_write_wins() {
        // BTreeMap attribute input is itself ordered by key, so "Foo-Bar"
        // sorts before "Foo_Bar" ('-' < '_' in ASCII); both sanitize to
        // foo_bar, and the later-inserted value (Foo_Bar's) wins.
        let el = element(&[("Foo-Bar", "1"), ("Foo_Bar", "2")]);
        let row = build_row(&el);
        assert_eq!(row.get("foo_bar").unwrap().as_deref(), Some("2"));
    }
}
