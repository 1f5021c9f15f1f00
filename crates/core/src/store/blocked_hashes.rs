use super::schema::BLOCKED_HASHES;
use super::{decode, encode, Store};
use crate::models::BlockedHash;
use chrono::Utc;
use shelfkeeper_common::{Error, Result};

impl Store {
    pub fn is_hash_blocked(&self, hash: &str) -> Result<bool> {
        let txn = self.read_txn()?;
        let table = txn.open_table(BLOCKED_HASHES)?;
        Ok(table.get(hash)?.is_some())
    }

    pub fn get_blocked_hash(&self, hash: &str) -> Result<Option<BlockedHash>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(BLOCKED_HASHES)?;
        match table.get(hash)? {
            Some(raw) => Ok(Some(decode(raw.value())?)),
            None => Ok(None),
        }
    }

    pub fn block_hash(&self, hash: &str, reason: &str) -> Result<()> {
        let entry = BlockedHash {
            hash: hash.to_string(),
            reason: reason.to_string(),
            created_at: Utc::now(),
        };
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(BLOCKED_HASHES)?;
            table.insert(hash, encode(&entry)?.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn unblock_hash(&self, hash: &str) -> Result<()> {
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(BLOCKED_HASHES)?;
            if table.remove(hash)?.is_none() {
                return Err(Error::NotFound(format!("blocked hash {hash}")));
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn list_blocked_hashes(&self) -> Result<Vec<BlockedHash>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(BLOCKED_HASHES)?;
        let mut out = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn blocked_hash_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        assert!(!store.is_hash_blocked("deadbeef").unwrap());
        store.block_hash("deadbeef", "user deleted and blocked").unwrap();
        assert!(store.is_hash_blocked("deadbeef").unwrap());
        store.unblock_hash("deadbeef").unwrap();
        assert!(!store.is_hash_blocked("deadbeef").unwrap());
    }
}
