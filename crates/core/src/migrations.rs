//! Ordered, idempotent schema upgrades, tracked by a single integer version
//! record in UserPreference (`schema_version`, default 0).
//!
//! A failure here is fatal to startup; no rollback beyond what redb gives a
//! single failed write transaction is attempted. Recovering from a failed
//! migration is an operator task (restore from backup), not a runtime one.

use crate::store::Store;
use shelfkeeper_common::Result;
use tracing::info;

pub struct Migration {
    pub version: u64,
    pub description: &'static str,
    pub up: fn(&Store) -> Result<()>,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "create baseline tables",
    up: migration_001_baseline,
}];

/// Apply every migration numbered higher than the database's current
/// recorded version, in order, recording the new version after each one
/// succeeds.
pub fn run(store: &Store) -> Result<()> {
    let current = store.get_preference_u64("schema_version", 0)?;
    for migration in MIGRATIONS {
        if migration.version > current {
            info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            (migration.up)(store)?;
            store.set_preference("schema_version", &migration.version.to_string())?;
        }
    }
    Ok(())
}

fn migration_001_baseline(store: &Store) -> Result<()> {
    store.ensure_schema()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn opening_a_fresh_database_records_the_latest_version() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        let latest = MIGRATIONS.last().unwrap().version;
        assert_eq!(store.get_preference_u64("schema_version", 0).unwrap(), latest);
    }

    #[test]
    fn reopening_does_not_reapply_migrations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.redb");
        {
            let _store = Store::open(&path).unwrap();
        }
        let store = Store::open(&path).unwrap();
        let latest = MIGRATIONS.last().unwrap().version;
        assert_eq!(store.get_preference_u64("schema_version", 0).unwrap(), latest);
    }
}
