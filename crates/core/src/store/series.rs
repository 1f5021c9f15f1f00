use super::authors::canonicalize_name;
use super::schema::{SERIES_BY_NAME, SERIES};
use super::{decode, encode, Store};
use crate::models::Series;
use chrono::Utc;
use shelfkeeper_common::{ids::new_id, Error, Result};

fn name_key(author_id: Option<&str>, name: &str) -> String {
    format!("{}:{}", author_id.unwrap_or("_"), canonicalize_name(name))
}

impl Store {
    pub fn get_series(&self, id: &str) -> Result<Option<Series>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(SERIES)?;
        match table.get(id)? {
            Some(raw) => Ok(Some(decode(raw.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_or_create_series(&self, name: &str, author_id: Option<&str>) -> Result<Series> {
        let key = name_key(author_id, name);
        {
            let txn = self.read_txn()?;
            let index = txn.open_table(SERIES_BY_NAME)?;
            if let Some(id) = index.get(key.as_str())? {
                let series = txn.open_table(SERIES)?;
                if let Some(raw) = series.get(id.value())? {
                    return Ok(decode(raw.value())?);
                }
            }
        }
        let now = Utc::now();
        let series = Series {
            id: new_id(),
            name: name.to_string(),
            author_id: author_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        let txn = self.write_txn()?;
        {
            let mut index = txn.open_table(SERIES_BY_NAME)?;
            if index.get(key.as_str())?.is_some() {
                return Err(Error::Conflict(format!("series already exists: {name}")));
            }
            index.insert(key.as_str(), series.id.as_str())?;
            let mut table = txn.open_table(SERIES)?;
            table.insert(series.id.as_str(), encode(&series)?.as_str())?;
        }
        txn.commit()?;
        Ok(series)
    }

    pub fn update_series(&self, series: Series) -> Result<()> {
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(SERIES)?;
            if table.get(series.id.as_str())?.is_none() {
                return Err(Error::NotFound(format!("series {}", series.id)));
            }
            table.insert(series.id.as_str(), encode(&series)?.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn list_series(&self, limit: usize, offset: usize) -> Result<Vec<Series>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(SERIES)?;
        let mut out = Vec::new();
        for (i, row) in table.iter()?.enumerate() {
            if i < offset {
                continue;
            }
            if out.len() >= limit {
                break;
            }
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
    fn get_or_create_deduplicates_per_author() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        let a = store.get_or_create_series("Foundation", Some("author-1")).unwrap();
        let b = store.get_or_create_series("foundation", Some("author-1")).unwrap();
        assert_eq!(a.id, b.id);
        let c = store.get_or_create_series("Foundation", Some("author-2")).unwrap();
        assert_ne!(a.id, c.id);
    }
}
