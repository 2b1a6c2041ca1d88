//! File Pipeline (C7) — the per-file orchestration: hash, parse, collect PCR
//! UUIDs, open one transaction, overwrite, reconcile + insert + plan FKs,
//! commit, audit, and archive or quarantine the file.
//!
//! Every element belonging to one file is processed inside exactly one
//! `tokio_postgres::Transaction`, matching the original script's single
//! `psycopg2` connection-level commit/rollback per file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use md5::{Digest, Md5};
use tokio_postgres::Client;
use tracing::{error, info, warn};

use crate::error::IngestError;
use crate::fk::{self, FkPair};
use crate::pcr;
use crate::schema_cache::SchemaCache;
use crate::writer;
use crate::xml::{self, ParseConfig};

/// Outcome of one file's ingestion attempt, for the caller to log/exit on.
#[derive(Debug)]
pub struct IngestOutcome {
    pub processed_file_id: String,
    pub status: &'static str,
    pub element_count: usize,
    pub fk_count: usize,
}

/// Process one XML file end to end against `schema`.
///
/// `schema_version_id` is the `SchemaVersionID` of this build's own
/// ingestion-logic version, resolved once at startup via
/// [`crate::bootstrap::resolve_schema_version_id`] and stamped onto every
/// `XMLFilesProcessed` row this call writes, matching the FK relationship
/// SPEC_FULL.md §3 describes between the two audit tables.
///
/// Filesystem errors (missing file, unreadable file) are detected before any
/// transaction is opened and are reported directly, matching the original's
/// ordering: MD5 failure and file-not-found are both audited under their own
/// status strings without ever starting a `BEGIN`.
pub async fn process_file(
    client: &mut Client,
    schema: &str,
    xml_file_path: &Path,
    parse_config: &ParseConfig,
    archive_dir: &Path,
    error_dir: &Path,
    schema_version_id: i32,
) -> Result<IngestOutcome, IngestError> {
    let processed_file_id = uuid::Uuid::new_v4().to_string();
    let original_file_name = xml_file_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| xml_file_path.to_string_lossy().into_owned());

    if !xml_file_path.exists() {
        let err = IngestError::FileNotFound(xml_file_path.to_path_buf());
        audit(client, schema, &processed_file_id, &original_file_name, None, schema_version_id, &err).await;
        return Err(err);
    }

    let md5_hash = match file_md5(xml_file_path).await {
        Ok(h) => h,
        Err(err) => {
            audit(client, schema, &processed_file_id, &original_file_name, None, schema_version_id, &err).await;
            quarantine(xml_file_path, error_dir);
            return Err(err);
        }
    };

    let elements = match xml::parse_file(xml_file_path, parse_config).await {
        Ok(els) if !els.is_empty() => els,
        Ok(_) => {
            let err = IngestError::ParsingEmpty(xml_file_path.to_path_buf());
            audit(client, schema, &processed_file_id, &original_file_name, Some(&md5_hash), schema_version_id, &err).await;
            quarantine(xml_file_path, error_dir);
            return Err(err);
        }
        Err(err) => {
            audit(client, schema, &processed_file_id, &original_file_name, Some(&md5_hash), schema_version_id, &err).await;
            quarantine(xml_file_path, error_dir);
            return Err(err);
        }
    };

    let pcr_uuids: Vec<String> = {
        let mut set = HashSet::new();
        for el in &elements {
            if let Some(uuid) = &el.pcr_uuid_context {
                set.insert(uuid.clone());
            }
        }
        set.into_iter().collect()
    };
    if pcr_uuids.is_empty() {
        info!(file = %original_file_name, "no PCR UUIDs found in file; no pre-deletion will occur");
    } else {
        info!(file = %original_file_name, count = pcr_uuids.len(), "found PCR UUID(s) for potential overwrite");
    }

    let element_count = elements.len();
    let result = ingest_in_transaction(client, schema, &elements, &pcr_uuids).await;

    match result {
        Ok(fk_count) => {
            let status = "Staged_Dynamic_PG_V4";
            log_processed_file(
                client,
                schema,
                &processed_file_id,
                &original_file_name,
                Some(&md5_hash),
                schema_version_id,
                status,
            )
            .await?;
            if !archive(xml_file_path, archive_dir) {
                warn!(file = %original_file_name, "data staged but failed to archive");
            }
            Ok(IngestOutcome {
                processed_file_id,
                status,
                element_count,
                fk_count,
            })
        }
        Err(err) => {
            audit(client, schema, &processed_file_id, &original_file_name, Some(&md5_hash), schema_version_id, &err).await;
            quarantine(xml_file_path, error_dir);
            Err(err)
        }
    }
}

/// Everything from "delete existing PCR rows" through "create FKs", inside
/// one transaction. Returns the number of FK constraints created; any error
/// means the transaction was never committed (dropping it rolls back).
async fn ingest_in_transaction(
    client: &mut Client,
    schema: &str,
    elements: &[xml::Element],
    pcr_uuids: &[String],
) -> Result<usize, IngestError> {
    let txn = client.transaction().await?;
    let mut cache = SchemaCache::new();

    let reports = pcr::delete_for_pcrs(&txn, &mut cache, schema, pcr_uuids).await?;
    for r in &reports {
        if r.rows_deleted > 0 {
            info!(table = %r.table, rows = r.rows_deleted, "overwrote prior PCR rows");
        }
    }

    let mut fk_pairs: HashSet<FkPair> = HashSet::new();
    for element in elements {
        writer::write_element(&txn, &mut cache, schema, element, &mut fk_pairs).await?;
    }

    info!("insertion loop complete, proceeding to foreign key creation");
    let fk_count = fk::create_missing_fks(&txn, schema, &fk_pairs).await?;

    txn.commit().await?;
    cache.invalidate_all();
    Ok(fk_count)
}

async fn file_md5(path: &Path) -> Result<String, IngestError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let mut hasher = Md5::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Write one `XMLFilesProcessed` row. Uses a fresh, ordinary (non-transactional)
/// statement: by the time this runs, the file's own transaction has either
/// committed or been dropped (rolled back), so the audit row is always
/// recorded outside that transaction's fate, matching the original script's
/// separate `log_processed_file` call and commit.
async fn log_processed_file(
    client: &Client,
    schema: &str,
    processed_file_id: &str,
    original_file_name: &str,
    md5_hash: Option<&str>,
    schema_version_id: i32,
    status: &str,
) -> Result<(), IngestError> {
    let sql = format!(
        "INSERT INTO \"{schema}\".\"xmlfilesprocessed\" \
         (processedfileid, originalfilename, md5hash, processingtimestamp, status, schemaversionid) \
         VALUES ($1, $2, $3, $4, $5, $6)"
    );
    client
        .execute(
            &sql,
            &[
                &processed_file_id,
                &original_file_name,
                &md5_hash,
                &Utc::now(),
                &status,
                &schema_version_id,
            ],
        )
        .await
        .map_err(IngestError::Database)?;
    info!(file = %original_file_name, id = %processed_file_id, %status, "logged processed file");
    Ok(())
}

async fn audit(
    client: &Client,
    schema: &str,
    processed_file_id: &str,
    original_file_name: &str,
    md5_hash: Option<&str>,
    schema_version_id: i32,
    err: &IngestError,
) {
    error!(file = %original_file_name, error = %err, "file ingestion failed");
    let status = err.audit_status();
    if let Err(log_err) = log_processed_file(
        client,
        schema,
        processed_file_id,
        original_file_name,
        md5_hash,
        schema_version_id,
        status,
    )
    .await
    {
        error!(file = %original_file_name, error = %log_err, "failed to write audit row");
    }
}

/// Archive a successfully-ingested file. Per SPEC_FULL.md §4.7 step 9,
/// "archive-rename collisions overwrite" — matching `shutil.move`'s
/// replace-on-collision behavior on POSIX in the original script — so a
/// same-named file already in `archive_dir` is clobbered, never suffixed.
fn archive(file_path: &Path, archive_dir: &Path) -> bool {
    move_overwriting(file_path, archive_dir).is_some()
}

fn quarantine(file_path: &Path, error_dir: &Path) {
    if move_with_collision_suffix(file_path, error_dir, "_error").is_none() {
        warn!(file = %file_path.display(), "failed to move file to error directory");
    }
}

/// Move `file_path` into `dest_dir`, creating it if necessary, overwriting
/// any file already at the destination.
fn move_overwriting(file_path: &Path, dest_dir: &Path) -> Option<PathBuf> {
    if !file_path.exists() {
        return None;
    }
    if !dest_dir.exists() && std::fs::create_dir_all(dest_dir).is_err() {
        return None;
    }

    let base_name = file_path.file_name()?.to_os_string();
    let dest_path = dest_dir.join(&base_name);

    std::fs::rename(file_path, &dest_path).ok()?;
    Some(dest_path)
}

/// Move `file_path` into `dest_dir`, creating it if necessary. If a file of
/// the same name already exists there, insert a `YYYYMMDD_HHMMSS` timestamp
/// (plus `suffix`, e.g. `_error`) before the extension so the move never
/// silently clobbers a prior file. Used for quarantine only — archiving
/// overwrites instead, see [`move_overwriting`].
fn move_with_collision_suffix(file_path: &Path, dest_dir: &Path, suffix: &str) -> Option<PathBuf> {
    if !file_path.exists() {
        return None;
    }
    if !dest_dir.exists() && std::fs::create_dir_all(dest_dir).is_err() {
        return None;
    }

    let base_name = file_path.file_name()?.to_os_string();
    let mut dest_path = dest_dir.join(&base_name);

    if dest_path.exists() {
        let stem = file_path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let ext = file_path.extension().map(|s| s.to_string_lossy().into_owned());
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let renamed = match ext {
            Some(ext) => format!("{stem}{suffix}_{timestamp}.{ext}"),
            None => format!("{stem}{suffix}_{timestamp}"),
        };
        dest_path = dest_dir.join(renamed);
    }

    std::fs::rename(file_path, &dest_path).ok()?;
    Some(dest_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn move_with_collision_suffix_renames_on_existing_destination() {
        let src_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();

        let src = src_dir.path().join("file.xml");
        std::fs::write(&src, b"one").unwrap();
        let first_move = move_with_collision_suffix(&src, dest_dir.path(), "_error").unwrap();
        assert_eq!(first_move, dest_dir.path().join("file.xml"));

        let src2 = src_dir.path().join("file.xml");
        std::fs::write(&src2, b"two").unwrap();
        let second_move = move_with_collision_suffix(&src2, dest_dir.path(), "_error").unwrap();
        assert_ne!(second_move, dest_dir.path().join("file.xml"));
        assert!(second_move.file_name().unwrap().to_string_lossy().contains("_error_"));
    }

    #[test]
    fn move_overwriting_replaces_existing_destination_file() {
        let src_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();

        let src = src_dir.path().join("file.xml");
        std::fs::write(&src, b"one").unwrap();
        let first_move = move_overwriting(&src, dest_dir.path()).unwrap();
        assert_eq!(first_move, dest_dir.path().join("file.xml"));

        let src2 = src_dir.path().join("file.xml");
        std::fs::write(&src2, b"two").unwrap();
        let second_move = move_overwriting(&src2, dest_dir.path()).unwrap();
        assert_eq!(second_move, dest_dir.path().join("file.xml"));
        assert_eq!(std::fs::read(&second_move).unwrap(), b"two");
    }

    #[test]
    fn move_of_nonexistent_file_returns_none() {
        let dest_dir = tempdir().unwrap();
        let missing = PathBuf::from("/no/such/file.xml");
        assert!(move_with_collision_suffix(&missing, dest_dir.path(), "").is_none());
    }
}
