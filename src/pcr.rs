//! PCR Overwriter — enforces "one PCR version wins" by deleting any existing
//! rows for the PCR UUIDs a file introduces, before that file's rows are
//! inserted, all inside the same transaction.

use tokio_postgres::Transaction;
use tracing::info;

use crate::error::IngestError;
use crate::schema_cache::SchemaCache;

/// Rows deleted from one table for one PCR UUID, for logging/reporting.
#[derive(Debug, Clone)]
pub struct DeleteReport {
    pub table: String,
    pub rows_deleted: u64,
}

/// Enumerate every dynamic table in `schema` (excluding the fixed audit
/// tables and anything PostgreSQL-internal) and delete rows whose
/// `pcr_uuid_context` matches one of `pcr_uuids`, for every table that has
/// that column.
pub async fn delete_for_pcrs(
    txn: &Transaction<'_>,
    cache: &mut SchemaCache,
    schema: &str,
    pcr_uuids: &[String],
) -> Result<Vec<DeleteReport>, IngestError> {
    let mut reports = Vec::new();
    if pcr_uuids.is_empty() {
        return Ok(reports);
    }

    let tables = dynamic_tables(txn, schema).await?;

    for table in tables {
        let columns = cache.columns_of(txn, schema, &table).await?;
        if !columns.contains("pcr_uuid_context") {
            continue;
        }

        let sql = format!("DELETE FROM \"{schema}\".\"{table}\" WHERE \"pcr_uuid_context\" = $1");
        let mut total_for_table: u64 = 0;
        for uuid in pcr_uuids {
            let affected =
                txn.execute(&sql, &[uuid])
                    .await
                    .map_err(|source| IngestError::PcrOverwrite {
                        table: table.clone(),
                        source,
                    })?;
            total_for_table += affected;
        }

        if total_for_table > 0 {
            info!(table = %table, rows_deleted = total_for_table, "overwrote existing PCR rows");
        }
        reports.push(DeleteReport {
            table,
            rows_deleted: total_for_table,
        });
    }

    Ok(reports)
}

/// Base tables in `schema` that are candidates for dynamic ingestion data —
/// i.e. everything except the fixed audit tables and Postgres-internal tables.
async fn dynamic_tables(
    txn: &Transaction<'_>,
    schema: &str,
) -> Result<Vec<String>, IngestError> {
    let rows = txn
        .query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
             AND table_name NOT LIKE 'pg\\_%' \
             AND table_name NOT IN ('schemaversions', 'xmlfilesprocessed')",
            &[&schema],
        )
        .await?;
    Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
}
