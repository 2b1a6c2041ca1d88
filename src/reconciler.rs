//! Schema Reconciler — creates missing dynamic tables and adds missing
//! attribute columns ahead of each row insert.

use std::collections::HashSet;

use tokio_postgres::Transaction;

use crate::error::IngestError;
use crate::sanitize::sanitize_bounded;
use crate::schema_cache::SchemaCache;
use crate::xml::Element;

/// The five columns every dynamic table must have, regardless of what
/// attributes are observed.
pub const COMMON_COLUMNS: [&str; 5] = [
    "element_id",
    "parent_element_id",
    "pcr_uuid_context",
    "original_tag_name",
    "text_content",
];

/// Ensure a table named after `element.table_suggestion` exists with columns
/// for every common column plus every attribute on `element`, adding
/// whatever is missing. Returns the sanitized table name and its full
/// (post-reconciliation) column set.
pub async fn ensure(
    txn: &Transaction<'_>,
    cache: &mut SchemaCache,
    schema: &str,
    element: &Element,
) -> Result<(String, HashSet<String>), IngestError> {
    let table = sanitize_bounded(&element.table_suggestion);
    if table.is_empty() {
        return Err(IngestError::EmptyIdentifier(element.table_suggestion.clone()));
    }

    let mut existing = cache.columns_of(txn, schema, &table).await?;

    if existing.is_empty() {
        create_table(txn, schema, &table, element).await?;
        let created = columns_for_new_table(element);
        cache.set_columns(&table, created.clone());
        existing = created;
    }

    for attr_name in element.attributes.keys() {
        let col = sanitize_bounded(attr_name);
        if col.is_empty() || existing.contains(&col) {
            continue;
        }
        add_column(txn, schema, &table, &col).await?;
        cache.add_column(&table, &col);
        existing.insert(col);
    }

    Ok((table, existing))
}

fn columns_for_new_table(element: &Element) -> HashSet<String> {
    let mut cols: HashSet<String> = COMMON_COLUMNS.iter().map(|s| s.to_string()).collect();
    for attr_name in element.attributes.keys() {
        let col = sanitize_bounded(attr_name);
        if !col.is_empty() {
            cols.insert(col);
        }
    }
    cols
}

async fn create_table(
    txn: &Transaction<'_>,
    schema: &str,
    table: &str,
    element: &Element,
) -> Result<(), IngestError> {
    let common_common: HashSet<&str> = COMMON_COLUMNS.iter().copied().collect();

    let mut attr_cols: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for attr_name in element.attributes.keys() {
        let col = sanitize_bounded(attr_name);
        if col.is_empty() || common_common.contains(col.as_str()) || seen.contains(&col) {
            continue;
        }
        seen.insert(col.clone());
        attr_cols.push(col);
    }

    let mut column_defs: Vec<String> = vec![
        "\"element_id\" TEXT PRIMARY KEY".to_string(),
        "\"parent_element_id\" TEXT".to_string(),
        "\"pcr_uuid_context\" TEXT".to_string(),
        "\"original_tag_name\" TEXT".to_string(),
        "\"text_content\" TEXT".to_string(),
    ];
    for col in &attr_cols {
        column_defs.push(format!("\"{col}\" TEXT"));
    }

    let sql = format!(
        "CREATE TABLE IF NOT EXISTS \"{schema}\".\"{table}\" ({columns})",
        schema = schema,
        table = table,
        columns = column_defs.join(", "),
    );
    txn.batch_execute(&sql)
        .await
        .map_err(|source| IngestError::SchemaReconciliation {
            table: table.to_string(),
            source,
        })?;

    if let Some(path) = element.attributes.get("element_path") {
        let comment_sql = format!("COMMENT ON TABLE \"{schema}\".\"{table}\" IS $1");
        txn.execute(&comment_sql, &[path])
            .await
            .map_err(|source| IngestError::SchemaReconciliation {
                table: table.to_string(),
                source,
            })?;
    }

    Ok(())
}

async fn add_column(
    txn: &Transaction<'_>,
    schema: &str,
    table: &str,
    column: &str,
) -> Result<(), IngestError> {
    let sql = format!("ALTER TABLE \"{schema}\".\"{table}\" ADD COLUMN \"{column}\" TEXT");
    txn.batch_execute(&sql)
        .await
        .map_err(|source| IngestError::SchemaReconciliation {
            table: table.to_string(),
            source,
        })
}
