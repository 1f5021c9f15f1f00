use super::schema::IMPORT_PATHS;
use super::{decode, encode, Store};
use crate::models::ImportPath;
use shelfkeeper_common::{ids::new_id, Error, Result};

impl Store {
    pub fn get_import_path(&self, id: &str) -> Result<Option<ImportPath>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(IMPORT_PATHS)?;
        match table.get(id)? {
            Some(raw) => Ok(Some(decode(raw.value())?)),
            None => Ok(None),
        }
    }

    pub fn create_import_path(&self, path: &str, display_name: Option<&str>) -> Result<ImportPath> {
        let mut entry = ImportPath::new(new_id(), path);
        if let Some(name) = display_name {
            entry.display_name = name.to_string();
        }
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(IMPORT_PATHS)?;
            table.insert(entry.id.as_str(), encode(&entry)?.as_str())?;
        }
        txn.commit()?;
        Ok(entry)
    }

    pub fn update_import_path(&self, entry: ImportPath) -> Result<()> {
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(IMPORT_PATHS)?;
            if table.get(entry.id.as_str())?.is_none() {
                return Err(Error::NotFound(format!("import path {}", entry.id)));
            }
            table.insert(entry.id.as_str(), encode(&entry)?.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Deleting an import path does not delete the Books it produced.
    pub fn delete_import_path(&self, id: &str) -> Result<()> {
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(IMPORT_PATHS)?;
            if table.remove(id)?.is_none() {
                return Err(Error::NotFound(format!("import path {id}")));
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn list_import_paths(&self) -> Result<Vec<ImportPath>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(IMPORT_PATHS)?;
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
    fn create_then_delete_import_path() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        let entry = store.create_import_path("/in", None).unwrap();
        assert_eq!(store.list_import_paths().unwrap().len(), 1);
        store.delete_import_path(&entry.id).unwrap();
        assert!(store.list_import_paths().unwrap().is_empty());
    }
}
