//! CLI entry point (C11): parses configuration, connects to PostgreSQL,
//! bootstraps the target schema, and ingests one XML file.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use nemsis_ingest::config::Args;
use nemsis_ingest::{bootstrap, pipeline};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = format!("{err:#}"), "ingestion failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let conn_string = args.connection_string().context("invalid configuration")?;

    info!(
        schema = %args.pg_schema,
        archive_dir = %args.archive_dir.display(),
        error_dir = %args.error_dir.display(),
        "starting NEMSIS dynamic ingestion"
    );

    let (mut client, connection) = tokio_postgres::connect(&conn_string, tokio_postgres::NoTls)
        .await
        .context("failed to connect to PostgreSQL")?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "PostgreSQL connection task exited with error");
        }
    });

    bootstrap::ensure_database(&client, &args.pg_schema)
        .await
        .context("failed to bootstrap database")?;
    let schema_version_id = bootstrap::resolve_schema_version_id(&client, &args.pg_schema)
        .await
        .context("ingestion logic version is not registered")?;

    let parse_config = args.parse_config();
    let outcome = pipeline::process_file(
        &mut client,
        &args.pg_schema,
        &args.xml_file,
        &parse_config,
        &args.archive_dir,
        &args.error_dir,
        schema_version_id,
    )
    .await;

    match outcome {
        Ok(result) => {
            info!(
                processed_file_id = %result.processed_file_id,
                status = result.status,
                elements = result.element_count,
                foreign_keys = result.fk_count,
                "ingestion completed successfully"
            );
            Ok(())
        }
        Err(err) => {
            anyhow::bail!("ingestion of {} failed: {err}", args.xml_file.display());
        }
    }
}
