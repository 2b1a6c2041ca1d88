//! FK Planner — deterministic naming and creation of parent→child foreign
//! keys between dynamic tables.
//!
//! During row writing the caller accumulates the set of unique
//! `(child_table, parent_table)` pairs seen in a file. After all inserts
//! commit their SQL (but still inside the same transaction), [`create_missing_fks`]
//! walks that set and creates any constraint that doesn't already exist.

use std::collections::HashSet;

use md5::{Digest, Md5};
use tokio_postgres::Transaction;

use crate::error::IngestError;

const MAX_IDENTIFIER_LEN: usize = 63;

/// Compute the deterministic constraint name for a `(child, parent)` pair.
///
/// Pure and total: never panics, never returns an empty string, always
/// returns a string of at most 63 bytes. The ideal name `fk_<child>_<parent>`
/// is used verbatim when it fits; otherwise both parts are truncated and a
/// 6-hex-character MD5 suffix is appended so distinct long pairs don't
/// collide on the same truncated name.
pub fn fk_name(child: &str, parent: &str) -> String {
    let ideal = format!("fk_{child}_{parent}");
    if ideal.len() <= MAX_IDENTIFIER_LEN {
        return ideal;
    }

    let mut hasher = Md5::new();
    hasher.update(ideal.as_bytes());
    let digest = hasher.finalize();
    let hash_suffix: String = digest.iter().take(3).map(|b| format!("{b:02x}")).collect();
    debug_assert_eq!(hash_suffix.len(), 6);

    let prefix = "fk_";
    // Budget for "<child'>_<parent'>" (names plus their joining underscore).
    let budget = MAX_IDENTIFIER_LEN - prefix.len() - hash_suffix.len() - 1;
    // One more underscore separates child' from parent' within that budget.
    let names_budget = budget.saturating_sub(1);
    let child_budget = names_budget / 2;
    let parent_budget = names_budget - child_budget;

    let child_part = truncate_chars(child, child_budget);
    let parent_part = truncate_chars(parent, parent_budget);

    let name = format!("{prefix}{child_part}_{parent_part}_{hash_suffix}");
    truncate_chars(&name, MAX_IDENTIFIER_LEN)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// One observed parent-child relationship between two dynamic tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FkPair {
    pub child_table: String,
    pub parent_table: String,
}

/// For each pair not already constrained, add
/// `child.parent_element_id -> parent.element_id ON DELETE CASCADE`.
///
/// Existence is checked via `information_schema.table_constraints` using the
/// same deterministic name computed by [`fk_name`], which is what makes the
/// existence check correct across repeated runs.
pub async fn create_missing_fks(
    txn: &Transaction<'_>,
    schema: &str,
    pairs: &HashSet<FkPair>,
) -> Result<usize, IngestError> {
    let mut created = 0;
    for pair in pairs {
        let name = fk_name(&pair.child_table, &pair.parent_table);

        let existing = txn
            .query_opt(
                "SELECT constraint_name FROM information_schema.table_constraints \
                 WHERE table_schema = $1 AND table_name = $2 AND constraint_name = $3",
                &[&schema, &pair.child_table, &name],
            )
            .await
            .map_err(|source| IngestError::ForeignKey {
                child: pair.child_table.clone(),
                parent: pair.parent_table.clone(),
                source,
            })?;

        if existing.is_some() {
            continue;
        }

        let alter_sql = format!(
            "ALTER TABLE \"{schema}\".\"{child}\" \
             ADD CONSTRAINT \"{name}\" \
             FOREIGN KEY (\"parent_element_id\") \
             REFERENCES \"{schema}\".\"{parent}\" (\"element_id\") \
             ON DELETE CASCADE",
            schema = schema,
            child = pair.child_table,
            name = name,
            parent = pair.parent_table,
        );

        txn.batch_execute(&alter_sql)
            .await
            .map_err(|source| IngestError::ForeignKey {
                child: pair.child_table.clone(),
                parent: pair.parent_table.clone(),
                source,
            })?;
        created += 1;
    }
    Ok(created)
}
