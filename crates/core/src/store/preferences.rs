use super::schema::PREFERENCES;
use super::Store;
use shelfkeeper_common::Result;

impl Store {
    pub fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(PREFERENCES)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(PREFERENCES)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_preference_u64(&self, key: &str, default: u64) -> Result<u64> {
        Ok(self
            .get_preference(key)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn preference_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        assert_eq!(store.get_preference("schema_version").unwrap(), None);
        store.set_preference("schema_version", "3").unwrap();
        assert_eq!(store.get_preference_u64("schema_version", 0).unwrap(), 3);
    }
}
