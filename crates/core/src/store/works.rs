use super::authors::canonicalize_name;
use super::schema::{WORK_BY_TITLE, WORKS};
use super::{decode, encode, Store};
use crate::models::Work;
use chrono::Utc;
use shelfkeeper_common::{ids::new_id, Error, Result};

fn title_key(author_id: Option<&str>, title: &str) -> String {
    format!("{}:{}", author_id.unwrap_or("_"), canonicalize_name(title))
}

impl Store {
    pub fn get_work(&self, id: &str) -> Result<Option<Work>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(WORKS)?;
        match table.get(id)? {
            Some(raw) => Ok(Some(decode(raw.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_or_create_work(&self, title: &str, author_id: Option<&str>) -> Result<Work> {
        let key = title_key(author_id, title);
        {
            let txn = self.read_txn()?;
            let index = txn.open_table(WORK_BY_TITLE)?;
            if let Some(id) = index.get(key.as_str())? {
                let works = txn.open_table(WORKS)?;
                if let Some(raw) = works.get(id.value())? {
                    return Ok(decode(raw.value())?);
                }
            }
        }
        let now = Utc::now();
        let work = Work {
            id: new_id(),
            title: title.to_string(),
            author_id: author_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        let txn = self.write_txn()?;
        {
            let mut index = txn.open_table(WORK_BY_TITLE)?;
            if index.get(key.as_str())?.is_some() {
                return Err(Error::Conflict(format!("work already exists: {title}")));
            }
            index.insert(key.as_str(), work.id.as_str())?;
            let mut table = txn.open_table(WORKS)?;
            table.insert(work.id.as_str(), encode(&work)?.as_str())?;
        }
        txn.commit()?;
        Ok(work)
    }

    pub fn list_works(&self, limit: usize, offset: usize) -> Result<Vec<Work>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(WORKS)?;
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
    fn get_or_create_deduplicates_by_title_and_author() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        let a = store.get_or_create_work("Foundation", Some("asimov-1")).unwrap();
        let b = store.get_or_create_work("FOUNDATION", Some("asimov-1")).unwrap();
        assert_eq!(a.id, b.id);
    }
}
