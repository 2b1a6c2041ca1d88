//! Bootstrap (C8) — creates the target schema and the two fixed audit
//! tables (`SchemaVersions`, `XMLFilesProcessed`) the first time a schema is
//! used, and seeds the initial schema version row.
//!
//! Unlike dynamic tables, these two tables have a fixed shape decided once,
//! up front, rather than being reconciled element-by-element.

use tokio_postgres::Client;

use crate::error::IngestError;

/// Schema identifier grammar: letters/digits/underscore, not digit-led.
/// Same grammar [`crate::sanitize::sanitize`] produces, enforced here too
/// since the schema name is supplied directly by the operator (CLI/env),
/// not derived from untrusted XML content.
fn validate_schema_name(schema: &str) -> Result<(), IngestError> {
    let mut chars = schema.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(IngestError::ConfigError(format!(
            "invalid schema name: {schema:?}"
        )))
    }
}

/// Ensure `schema` exists, create the two audit tables if missing, and seed
/// one `SchemaVersions` row if the table is currently empty. Idempotent:
/// safe to call on every process startup.
pub async fn ensure_database(client: &Client, schema: &str) -> Result<(), IngestError> {
    validate_schema_name(schema)?;

    if schema != "public" {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\"");
        client
            .batch_execute(&sql)
            .await
            .map_err(IngestError::Database)?;
    }

    let schema_versions = format!(
        "CREATE TABLE IF NOT EXISTS \"{schema}\".\"schemaversions\" (
            schemaversionid SERIAL PRIMARY KEY,
            versionnumber TEXT NOT NULL UNIQUE,
            creationdate TIMESTAMPTZ NOT NULL,
            updatedate TIMESTAMPTZ,
            description TEXT,
            demographicgroup TEXT
        )"
    );
    client
        .batch_execute(&schema_versions)
        .await
        .map_err(IngestError::Database)?;

    let xml_files_processed = format!(
        "CREATE TABLE IF NOT EXISTS \"{schema}\".\"xmlfilesprocessed\" (
            processedfileid TEXT PRIMARY KEY,
            originalfilename TEXT NOT NULL,
            md5hash TEXT,
            processingtimestamp TIMESTAMPTZ NOT NULL,
            status TEXT NOT NULL,
            schemaversionid INTEGER REFERENCES \"{schema}\".\"schemaversions\"(schemaversionid),
            demographicgroup TEXT
        )"
    );
    client
        .batch_execute(&xml_files_processed)
        .await
        .map_err(IngestError::Database)?;

    seed_initial_schema_version(client, schema).await
}

const INITIAL_VERSION_NUMBER: &str = "1.0.0-dynamic-ingestor-v4";
const INITIAL_VERSION_DESCRIPTION: &str = "Dynamic table logic (PCR UUID based overwrite).";

async fn seed_initial_schema_version(client: &Client, schema: &str) -> Result<(), IngestError> {
    let count_sql = format!("SELECT COUNT(*) FROM \"{schema}\".\"schemaversions\"");
    let row = client
        .query_one(&count_sql, &[])
        .await
        .map_err(IngestError::Database)?;
    let count: i64 = row.get(0);
    if count > 0 {
        return Ok(());
    }

    let insert_sql = format!(
        "INSERT INTO \"{schema}\".\"schemaversions\" (versionnumber, creationdate, description) \
         VALUES ($1, now(), $2) ON CONFLICT (versionnumber) DO NOTHING"
    );
    client
        .execute(&insert_sql, &[&INITIAL_VERSION_NUMBER, &INITIAL_VERSION_DESCRIPTION])
        .await
        .map_err(IngestError::Database)?;
    Ok(())
}

/// Resolve the `SchemaVersionID` of this build's own ingestion-logic version
/// (seeded by [`ensure_database`]), so the Pipeline can stamp every
/// `XMLFilesProcessed` row with the FK described in SPEC_FULL.md §3.
///
/// The original script (`main_ingest.py:53-65,665-678`) resolves this id at
/// startup and refuses to process any file if its version string isn't
/// registered; a missing row here is surfaced the same way, as a fatal
/// [`IngestError::ConfigError`] before any file is touched.
pub async fn resolve_schema_version_id(client: &Client, schema: &str) -> Result<i32, IngestError> {
    let sql = format!(
        "SELECT schemaversionid FROM \"{schema}\".\"schemaversions\" WHERE versionnumber = $1"
    );
    let row = client
        .query_opt(&sql, &[&INITIAL_VERSION_NUMBER])
        .await
        .map_err(IngestError::Database)?;
    row.map(|r| r.get(0)).ok_or_else(|| {
        IngestError::ConfigError(format!(
            "ingestion logic version {INITIAL_VERSION_NUMBER:?} is not registered in {schema}.schemaversions"
        ))
    })
}
