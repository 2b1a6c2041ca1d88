//! Name sanitizer — maps raw XML tag/attribute names to safe SQL identifiers.
//!
//! Reused for table names, column names, and attribute names. The result
//! always matches `[a-z_][a-z0-9_]*` when non-empty, and is idempotent:
//! `sanitize(sanitize(x)) == sanitize(x)`.

/// Sanitize a raw name into a safe, lowercase SQL identifier.
///
/// Trims whitespace, replaces any byte outside `[A-Za-z0-9_]` with `_`,
/// collapses runs of `_`, and prefixes `_` if the result would start with a
/// digit. Callers are responsible for length-truncating the result before
/// it reaches SQL (64-byte Postgres identifier cap minus any suffix a
/// caller appends, see `fk::fk_name`).
///
/// Returns an empty string if nothing survives sanitization (e.g. the input
/// was only punctuation); callers must treat that as a structured error.
pub fn sanitize(name: &str) -> String {
    let trimmed = name.trim();

    let mut collapsed = String::with_capacity(trimmed.len());
    let mut last_was_underscore = false;
    for c in trimmed.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '_' {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        collapsed.push(mapped);
    }

    if collapsed.is_empty() {
        return collapsed;
    }

    if collapsed.as_bytes()[0].is_ascii_digit() {
        collapsed.insert(0, '_');
    }

    collapsed.to_ascii_lowercase()
}

/// Postgres's identifier length cap, in bytes. Applied by every call site
/// that turns a sanitized name into a table or column identifier headed for
/// SQL (tag/attribute names can be arbitrarily long; the database cannot).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// [`sanitize`] followed by truncation to [`MAX_IDENTIFIER_LEN`] bytes,
/// applied at a character boundary so the result stays valid UTF-8 (in
/// practice always ASCII, since `sanitize` only emits `[a-z0-9_]`).
///
/// Per SPEC_FULL.md §4.1, truncation is "the caller's concern", always
/// applied before a sanitized name reaches SQL as a table or column
/// identifier. FK constraint names are the one identifier kind with their
/// own truncate-and-hash scheme (see `fk::fk_name`) and do not go through
/// this helper.
pub fn sanitize_bounded(name: &str) -> String {
    let s = sanitize(name);
    if s.len() <= MAX_IDENTIFIER_LEN {
        return s;
    }
    s.chars().take(MAX_IDENTIFIER_LEN).collect()
}
