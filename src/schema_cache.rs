//! Per-file memo of `table → {column set}`.
//!
//! The Reconciler issues many per-element column lookups; without a cache,
//! each would be a round trip to `information_schema.columns`. The cache is
//! an explicit, owned value threaded through the pipeline for one file —
//! never a process-global — so two pipelines in the same process (e.g. two
//! workers each ingesting a different, non-overlapping-PCR file) never alias
//! state. See Design Notes in SPEC_FULL.md §9.

use std::collections::{HashMap, HashSet};

use tokio_postgres::Transaction;

use crate::error::IngestError;

/// Owns the `table_name -> column set` memo for a single file's transaction.
#[derive(Debug, Default)]
pub struct SchemaCache {
    tables: HashMap<String, HashSet<String>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached column set for `table` (already-sanitized, lowercase
    /// name), querying `information_schema.columns` and memoizing on first
    /// access. A table that does not exist yields an empty set, not an error.
    pub async fn columns_of(
        &mut self,
        txn: &Transaction<'_>,
        schema: &str,
        table: &str,
    ) -> Result<HashSet<String>, IngestError> {
        if let Some(cols) = self.tables.get(table) {
            return Ok(cols.clone());
        }

        let rows = txn
            .query(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2",
                &[&schema, &table],
            )
            .await?;

        let cols: HashSet<String> = rows.iter().map(|r| r.get::<_, String>(0)).collect();
        self.tables.insert(table.to_string(), cols.clone());
        Ok(cols)
    }

    /// Overwrite the cached set for `table` — used right after the
    /// Reconciler issues DDL, so the cache reflects reality without another
    /// round trip.
    pub fn set_columns(&mut self, table: &str, columns: HashSet<String>) {
        self.tables.insert(table.to_string(), columns);
    }

    /// Record that `column` now exists on `table` (after an `ADD COLUMN`).
    pub fn add_column(&mut self, table: &str, column: &str) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string());
    }

    /// Drop all cached entries. Called once per file, success or failure.
    pub fn invalidate_all(&mut self) {
        self.tables.clear();
    }
}
