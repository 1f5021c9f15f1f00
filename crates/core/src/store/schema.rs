//! Table definitions and key encoding.
//!
//! One redb table per entity plus one per secondary index, named after the
//! key prefixes in the persisted-state-layout section of the design: each
//! index is a "parallel key-value pair whose key encodes (index-name,
//! index-key[, primary-key]) and whose value is the primary key" — an index
//! row's value is always the owning entity's primary id, never the entity
//! itself, so a lookup is always index-get-then-primary-get.

use redb::TableDefinition;

pub const AUTHORS: TableDefinition<&str, &str> = TableDefinition::new("author");
pub const AUTHOR_BY_NAME: TableDefinition<&str, &str> = TableDefinition::new("author_name");

pub const SERIES: TableDefinition<&str, &str> = TableDefinition::new("series");
/// Key: `<author_id or "_">:<normalized name>`, scoped per author since two
/// different authors may have same-named series.
pub const SERIES_BY_NAME: TableDefinition<&str, &str> = TableDefinition::new("series_name");

pub const WORKS: TableDefinition<&str, &str> = TableDefinition::new("work");
/// Key: `<author_id or "_">:<normalized title>`.
pub const WORK_BY_TITLE: TableDefinition<&str, &str> = TableDefinition::new("work_title");

pub const BOOKS: TableDefinition<&str, &str> = TableDefinition::new("book");
pub const BOOK_BY_PATH: TableDefinition<&str, &str> = TableDefinition::new("book_path");
/// Key: `<hash>:<book_id>` (non-unique: one row per VersionGroup member).
pub const BOOK_BY_HASH: TableDefinition<&str, &str> = TableDefinition::new("book_hash");
/// Key: `<organized_hash>:<book_id>`.
pub const BOOK_BY_ORGANIZED_HASH: TableDefinition<&str, &str> =
    TableDefinition::new("book_organized_hash");
/// Key: `<series_id>:<book_id>`.
pub const BOOK_BY_SERIES: TableDefinition<&str, &str> = TableDefinition::new("book_series");
/// Key: `<author_id>:<book_id>`.
pub const BOOK_BY_AUTHOR: TableDefinition<&str, &str> = TableDefinition::new("book_author");
/// Key: `<state>:<book_id>`.
pub const BOOK_BY_STATE: TableDefinition<&str, &str> = TableDefinition::new("book_state");

pub fn book_hash_key(hash: &str, book_id: &str) -> String {
    composite_key(&[hash, book_id])
}

pub fn book_series_key(series_id: &str, book_id: &str) -> String {
    composite_key(&[series_id, book_id])
}

pub fn book_author_key(author_id: &str, book_id: &str) -> String {
    composite_key(&[author_id, book_id])
}

pub fn book_state_key(state: &str, book_id: &str) -> String {
    composite_key(&[state, book_id])
}

pub const FIELD_STATES: TableDefinition<&str, &str> = TableDefinition::new("field_state");

pub const VERSION_GROUPS: TableDefinition<&str, &str> = TableDefinition::new("version_group");

pub const IMPORT_PATHS: TableDefinition<&str, &str> = TableDefinition::new("import_path");

pub const BLOCKED_HASHES: TableDefinition<&str, &str> = TableDefinition::new("blocked_hash");

pub const OPERATIONS: TableDefinition<&str, &str> = TableDefinition::new("operation");
/// Key: `<state>:<operation_id>`.
pub const OPERATION_BY_STATE: TableDefinition<&str, &str> =
    TableDefinition::new("operation_state");

pub const PREFERENCES: TableDefinition<&str, &str> = TableDefinition::new("pref");

pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counter");

/// All tables a fresh database must have opened at least once so that an
/// empty database still reports a consistent schema. Used by the migration
/// runner's version-0 baseline migration.
pub fn ensure_all_tables_exist(txn: &redb::WriteTransaction) -> Result<(), redb::TableError> {
    txn.open_table(AUTHORS)?;
    txn.open_table(AUTHOR_BY_NAME)?;
    txn.open_table(SERIES)?;
    txn.open_table(SERIES_BY_NAME)?;
    txn.open_table(WORKS)?;
    txn.open_table(WORK_BY_TITLE)?;
    txn.open_table(BOOKS)?;
    txn.open_table(BOOK_BY_PATH)?;
    txn.open_table(BOOK_BY_HASH)?;
    txn.open_table(BOOK_BY_ORGANIZED_HASH)?;
    txn.open_table(BOOK_BY_SERIES)?;
    txn.open_table(BOOK_BY_AUTHOR)?;
    txn.open_table(BOOK_BY_STATE)?;
    txn.open_table(FIELD_STATES)?;
    txn.open_table(VERSION_GROUPS)?;
    txn.open_table(IMPORT_PATHS)?;
    txn.open_table(BLOCKED_HASHES)?;
    txn.open_table(OPERATIONS)?;
    txn.open_table(OPERATION_BY_STATE)?;
    txn.open_table(PREFERENCES)?;
    txn.open_table(COUNTERS)?;
    Ok(())
}

/// Build an exclusive upper bound for a prefix range scan over string keys.
/// `&str` ordering is byte-wise UTF-8 order, which agrees with code point
/// order, so appending the maximum scalar value guarantees every key that
/// starts with `prefix` sorts strictly below the bound.
pub fn prefix_upper_bound(prefix: &str) -> String {
    format!("{prefix}\u{10FFFF}")
}

pub fn composite_key(parts: &[&str]) -> String {
    parts.join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_upper_bound_is_strictly_greater_than_every_member() {
        let prefix = "book_hash:abc123:";
        let upper = prefix_upper_bound(prefix);
        assert!(upper.as_str() > prefix);
        assert!(format!("{prefix}zzzz").as_str() < upper.as_str());
    }
}
