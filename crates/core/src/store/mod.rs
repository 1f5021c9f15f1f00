//! Typed persistence over an embedded, single-writer key-value engine.
//!
//! The store is the only component allowed to touch the underlying byte
//! format (redb tables + the key encoding in `schema`). Every other
//! component reaches the catalog only through the methods on `Store`.

mod authors;
mod blocked_hashes;
mod books;
mod counters;
mod field_states;
mod import_paths;
mod operations;
mod preferences;
pub mod schema;
mod series;
mod version_groups;
mod works;

use redb::{Database, WriteTransaction};
use shelfkeeper_common::{Error, Result};
use std::path::Path;
use std::sync::Arc;

/// How a paged `List` query should be ordered. The contract limits sorting
/// to an enumerated set of fields per entity; callers pass the field name
/// as a string and each entity module validates it against its own set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub limit: usize,
    pub offset: usize,
    pub sort_field: Option<String>,
    pub sort_direction: SortDirection,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            sort_field: None,
            sort_direction: SortDirection::Ascending,
        }
    }
}

/// Handle to the on-disk catalog. Cheaply `Clone`-able; every clone shares
/// the same underlying `redb::Database` (internally single-writer, with
/// non-blocking snapshot reads).
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (creating if absent) the database at `path`, then bring it to
    /// the latest schema version via the migration runner.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        // Every table must exist before the migration runner can read the
        // schema-version preference off a brand new database file.
        store.ensure_schema()?;
        crate::migrations::run(&store)?;
        Ok(store)
    }

    /// In-memory database for tests: redb has no first-class in-memory
    /// backend, so tests use a temp file instead (see each module's tests).
    pub(crate) fn write_txn(&self) -> Result<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    pub(crate) fn read_txn(&self) -> Result<redb::ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    /// Every table, opened once, so a brand new database file has a
    /// consistent schema before any entity-specific code runs.
    pub(crate) fn ensure_schema(&self) -> Result<()> {
        let txn = self.write_txn()?;
        schema::ensure_all_tables_exist(&txn).map_err(Error::from)?;
        txn.commit()?;
        Ok(())
    }
}

/// Serialize a value to the JSON string every table stores as its value.
pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Deserialize a value previously written by `encode`.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

pub use authors::*;
pub use blocked_hashes::*;
pub use books::*;
pub use field_states::*;
pub use import_paths::*;
pub use operations::*;
pub use preferences::*;
pub use series::*;
pub use version_groups::*;
pub use works::*;
