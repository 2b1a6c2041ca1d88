//! Error types for the NEMSIS dynamic ingester.
//!
//! All errors that can occur while ingesting one file are represented by
//! [`IngestError`]. Errors are propagated via `Result<T, IngestError>` from
//! the Reconciler, Overwriter, Writer, and FK Planner up to the Pipeline,
//! which is the only layer that decides what to do about them: roll back,
//! write an audit row, and quarantine the file.
//!
//! # Error Classification
//!
//! Every variant maps to exactly one `XMLFilesProcessed.Status` string via
//! [`IngestError::audit_status`]. A handful of variants ([`ConfigError`] in
//! particular) are fatal before any file or transaction is touched at all;
//! [`IngestError::is_fatal_startup`] identifies those.

use std::path::PathBuf;

/// Primary error type for one file-ingestion attempt.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Required configuration (DB credentials, schema name) is missing or invalid.
    /// Fatal at startup; no file is touched.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The input file could not be found on disk.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// The input file could not be read (for MD5 hashing or parsing).
    #[error("failed to read file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The XML document failed to parse, or parsed to zero elements.
    #[error("parsing produced no elements for {0}")]
    ParsingEmpty(PathBuf),

    /// Underlying XML parser error.
    #[error("XML parse error in {path}: {source}")]
    XmlParse {
        path: PathBuf,
        #[source]
        source: quick_xml::Error,
    },

    /// A name sanitized to the empty string (caller must treat the element as skippable).
    #[error("name sanitizes to an empty identifier: {0:?}")]
    EmptyIdentifier(String),

    /// DDL (CREATE TABLE / ADD COLUMN) failed during schema reconciliation.
    #[error("schema reconciliation failed for table {table}: {source}")]
    SchemaReconciliation {
        table: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// DELETE for PCR overwrite failed.
    #[error("PCR overwrite delete failed on table {table}: {source}")]
    PcrOverwrite {
        table: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// Row insertion failed (duplicate element_id, NOT NULL violation, etc.).
    #[error("insert failed for element {element_id} into table {table}: {source}")]
    Insert {
        table: String,
        element_id: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// Foreign-key creation failed (dangling parent, naming collision, etc.).
    #[error("foreign key creation failed ({child} -> {parent}): {source}")]
    ForeignKey {
        child: String,
        parent: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// A bug: a required column was missing after reconciliation claimed to add it.
    #[error("internal error: {0}")]
    Internal(String),

    /// Any other database error not classified above.
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Any other unexpected error.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl IngestError {
    /// The `XMLFilesProcessed.Status` value this error should be audited under.
    ///
    /// `ConfigError` has no audit status: configuration errors are fatal
    /// before a `ProcessedFileID` is even minted.
    pub fn audit_status(&self) -> &'static str {
        match self {
            IngestError::ConfigError(_) => "Error_Unexpected_PG_V4",
            IngestError::FileNotFound(_) => "Error_FileNotFound",
            IngestError::Io { .. } => "Error_MD5",
            IngestError::ParsingEmpty(_) | IngestError::XmlParse { .. } => "Error_Parsing_Empty",
            IngestError::EmptyIdentifier(_) => "Error_Staging_Tx_PG_V4",
            IngestError::SchemaReconciliation { .. } => "Error_Staging_Tx_PG_V4",
            IngestError::PcrOverwrite { .. } => "Error_Staging_Tx_PG_V4",
            IngestError::Insert { .. } => "Error_Staging_Tx_PG_V4",
            IngestError::ForeignKey { .. } => "Error_Staging_Tx_PG_V4",
            IngestError::Internal(_) => "Error_Unexpected_PG_V4",
            IngestError::Database(_) => "Error_Staging_Tx_PG_V4",
            IngestError::Unexpected(_) => "Error_Unexpected_PG_V4",
        }
    }

    /// Whether this error must abort the process before any file is processed,
    /// as opposed to being scoped to one file's ingestion attempt.
    pub fn is_fatal_startup(&self) -> bool {
        matches!(self, IngestError::ConfigError(_))
    }

    /// Whether a DB transaction was open when this error occurred, and therefore
    /// needs to be rolled back rather than simply reported.
    pub fn requires_rollback(&self) -> bool {
        !matches!(
            self,
            IngestError::ConfigError(_) | IngestError::FileNotFound(_) | IngestError::Io { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_status_covers_documented_vocabulary() {
        let cases: Vec<(IngestError, &str)> = vec![
            (
                IngestError::FileNotFound(PathBuf::from("x.xml")),
                "Error_FileNotFound",
            ),
            (
                IngestError::ParsingEmpty(PathBuf::from("x.xml")),
                "Error_Parsing_Empty",
            ),
            (
                IngestError::Internal("bug".into()),
                "Error_Unexpected_PG_V4",
            ),
            (
                IngestError::Unexpected("boom".into()),
                "Error_Unexpected_PG_V4",
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.audit_status(), expected);
        }
    }

    #[test]
    fn only_config_error_is_fatal_at_startup() {
        assert!(IngestError::ConfigError("missing PG_DATABASE".into()).is_fatal_startup());
        assert!(!IngestError::FileNotFound(PathBuf::from("x.xml")).is_fatal_startup());
        assert!(!IngestError::Internal("bug".into()).is_fatal_startup());
    }

    #[test]
    fn filesystem_errors_precede_any_transaction() {
        assert!(!IngestError::FileNotFound(PathBuf::from("x.xml")).requires_rollback());
        assert!(
            !IngestError::Io {
                path: PathBuf::from("x.xml"),
                source: std::io::Error::other("denied"),
            }
            .requires_rollback()
        );
        assert!(IngestError::ParsingEmpty(PathBuf::from("x.xml")).requires_rollback());
    }
}
