//! nemsis-dynamic-ingest — loads NEMSIS XML patient care reports into a
//! PostgreSQL schema whose tables and columns are created and extended on
//! the fly as new element shapes are observed, with "one PCR version wins"
//! overwrite semantics on re-ingestion.
//!
//! # Pipeline
//!
//! One file moves through: [`xml::parse_file`] → [`pcr::delete_for_pcrs`] →
//! (per element) [`reconciler::ensure`] + [`writer::write_element`] →
//! [`fk::create_missing_fks`], all inside a single transaction orchestrated
//! by [`pipeline::process_file`]. [`bootstrap::ensure_database`] prepares the
//! fixed audit tables once at startup.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod fk;
pub mod pcr;
pub mod pipeline;
pub mod reconciler;
pub mod sanitize;
pub mod schema_cache;
pub mod writer;
pub mod xml;
