//! Atomic, monotonic numeric counters, keyed by entity type name.
//!
//! Entity ids themselves are time-ordered UUIDs (see `shelfkeeper_common::ids`);
//! this counter table backs the schema-version record and any other
//! caller that needs a plain monotonic sequence rather than a sortable id.

use super::schema::COUNTERS;
use super::Store;
use shelfkeeper_common::Result;

impl Store {
    /// Atomically increment and return the counter for `entity_type`,
    /// starting from 1 on first use.
    pub fn next_id(&self, entity_type: &str) -> Result<u64> {
        let txn = self.write_txn()?;
        let next = {
            let mut table = txn.open_table(COUNTERS)?;
            let current = table.get(entity_type)?.map(|v| v.value()).unwrap_or(0);
            let next = current + 1;
            table.insert(entity_type, next)?;
            next
        };
        txn.commit()?;
        Ok(next)
    }

    /// Read the counter without incrementing it (0 if never touched).
    pub fn peek_counter(&self, entity_type: &str) -> Result<u64> {
        let txn = self.read_txn()?;
        let table = txn.open_table(COUNTERS)?;
        Ok(table.get(entity_type)?.map(|v| v.value()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn counter_increments_monotonically() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        assert_eq!(store.next_id("schema_version").unwrap(), 1);
        assert_eq!(store.next_id("schema_version").unwrap(), 2);
        assert_eq!(store.peek_counter("schema_version").unwrap(), 2);
    }

    #[test]
    fn distinct_entity_types_have_independent_counters() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        store.next_id("author").unwrap();
        store.next_id("author").unwrap();
        assert_eq!(store.next_id("series").unwrap(), 1);
    }
}
