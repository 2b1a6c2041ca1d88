//! Configuration (C9) — connection parameters and CLI flags, loaded from
//! environment variables with CLI overrides via `clap`'s `env` feature, the
//! same pattern used for the original script's `config.py` environment
//! lookups plus its `argparse` positional/optional arguments.

use std::path::PathBuf;

use clap::Parser;

use crate::error::IngestError;

const DEFAULT_ARCHIVE_DIR: &str = "processed_xml_archive";
const DEFAULT_ERROR_DIR: &str = "error_files";

/// NEMSIS XML dynamic-schema ingestion tool.
#[derive(Debug, Parser)]
#[command(name = "nemsis-ingest", version, about)]
pub struct Args {
    /// Path to the NEMSIS XML file to process.
    pub xml_file: PathBuf,

    /// PostgreSQL host.
    #[arg(long, env = "PG_HOST", default_value = "localhost")]
    pub pg_host: String,

    /// PostgreSQL port.
    #[arg(long, env = "PG_PORT", default_value_t = 5432)]
    pub pg_port: u16,

    /// Database name.
    #[arg(long, env = "PG_DATABASE", default_value = "")]
    pub pg_database: String,

    /// Database user.
    #[arg(long, env = "PG_USER", default_value = "")]
    pub pg_user: String,

    /// Database password.
    #[arg(long, env = "PG_PASSWORD", default_value = "")]
    pub pg_password: String,

    /// Schema to ingest into.
    #[arg(long, env = "PG_SCHEMA", default_value = "public")]
    pub pg_schema: String,

    /// Directory successfully-processed files are moved to.
    #[arg(long, env = "ARCHIVE_DIR", default_value = DEFAULT_ARCHIVE_DIR)]
    pub archive_dir: PathBuf,

    /// Directory failed files are moved to.
    #[arg(long, env = "ERROR_DIR", default_value = DEFAULT_ERROR_DIR)]
    pub error_dir: PathBuf,

    /// Sanitized tag name that opens a PCR context.
    #[arg(long, env = "PCR_ROOT_TAG", default_value = "patientcarereport")]
    pub pcr_root_tag: String,

    /// Sanitized tag/attribute name holding a PCR's UUID.
    #[arg(long, env = "UUID_TAG", default_value = "uuid")]
    pub uuid_tag: String,
}

impl Args {
    /// Build the `tokio_postgres` connection string from the parsed
    /// parameters. Missing a required field surfaces as
    /// [`IngestError::ConfigError`] before any connection is attempted,
    /// matching the original script's startup validation of
    /// `PG_DATABASE`/`PG_USER`/`PG_PASSWORD`.
    pub fn connection_string(&self) -> Result<String, IngestError> {
        if self.pg_database.trim().is_empty() {
            return Err(IngestError::ConfigError("PG_DATABASE is required".into()));
        }
        if self.pg_user.trim().is_empty() {
            return Err(IngestError::ConfigError("PG_USER is required".into()));
        }
        if self.pg_password.trim().is_empty() {
            return Err(IngestError::ConfigError("PG_PASSWORD is required".into()));
        }

        Ok(format!(
            "host={} port={} dbname={} user={} password={}",
            self.pg_host, self.pg_port, self.pg_database, self.pg_user, self.pg_password
        ))
    }

    pub fn parse_config(&self) -> crate::xml::ParseConfig {
        crate::xml::ParseConfig {
            pcr_root_tag: self.pcr_root_tag.clone(),
            uuid_tag: self.uuid_tag.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            xml_file: PathBuf::from("/tmp/foo.xml"),
            pg_host: "localhost".into(),
            pg_port: 5432,
            pg_database: "nemsis".into(),
            pg_user: "nemsis".into(),
            pg_password: "secret".into(),
            pg_schema: "public".into(),
            archive_dir: PathBuf::from(DEFAULT_ARCHIVE_DIR),
            error_dir: PathBuf::from(DEFAULT_ERROR_DIR),
            pcr_root_tag: "patientcarereport".into(),
            uuid_tag: "uuid".into(),
        }
    }

    #[test]
    fn connection_string_includes_all_fields() {
        let conn = args().connection_string().unwrap();
        assert!(conn.contains("dbname=nemsis"));
        assert!(conn.contains("user=nemsis"));
        assert!(conn.contains("password=secret"));
    }

    #[test]
    fn missing_database_is_a_config_error() {
        let mut a = args();
        a.pg_database.clear();
        assert!(matches!(
            a.connection_string(),
            Err(IngestError::ConfigError(_))
        ));
    }
}
