use super::schema::{AUTHOR_BY_NAME, AUTHORS};
use super::{decode, encode, Store};
use crate::models::Author;
use chrono::Utc;
use shelfkeeper_common::{ids::new_id, Error, Result};
use unicode_normalization::UnicodeNormalization;

/// NFC-normalize, lowercase, whitespace-collapse a display name into the
/// canonical form used for case-insensitive name matching.
pub fn canonicalize_name(name: &str) -> String {
    let nfc: String = name.nfc().collect();
    nfc.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl Store {
    pub fn get_author(&self, id: &str) -> Result<Option<Author>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(AUTHORS)?;
        match table.get(id)? {
            Some(raw) => Ok(Some(decode(raw.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_author_by_name(&self, display_name: &str) -> Result<Option<Author>> {
        let canonical = canonicalize_name(display_name);
        let txn = self.read_txn()?;
        let index = txn.open_table(AUTHOR_BY_NAME)?;
        let Some(id) = index.get(canonical.as_str())? else {
            return Ok(None);
        };
        let authors = txn.open_table(AUTHORS)?;
        match authors.get(id.value())? {
            Some(raw) => Ok(Some(decode(raw.value())?)),
            None => Ok(None),
        }
    }

    /// Create a new Author, or return the existing one if a
    /// case-insensitive, whitespace/Unicode-normalized name match exists.
    pub fn get_or_create_author(&self, display_name: &str) -> Result<Author> {
        if let Some(existing) = self.get_author_by_name(display_name)? {
            return Ok(existing);
        }
        let now = Utc::now();
        let author = Author {
            id: new_id(),
            display_name: display_name.to_string(),
            canonical_name: canonicalize_name(display_name),
            created_at: now,
            updated_at: now,
        };
        self.create_author(author.clone())?;
        Ok(author)
    }

    pub fn create_author(&self, author: Author) -> Result<()> {
        let txn = self.write_txn()?;
        {
            let mut index = txn.open_table(AUTHOR_BY_NAME)?;
            if index.get(author.canonical_name.as_str())?.is_some() {
                return Err(Error::Conflict(format!(
                    "author name already exists: {}",
                    author.display_name
                )));
            }
            index.insert(author.canonical_name.as_str(), author.id.as_str())?;
            let mut authors = txn.open_table(AUTHORS)?;
            authors.insert(author.id.as_str(), encode(&author)?.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn update_author(&self, author: Author) -> Result<()> {
        let txn = self.write_txn()?;
        {
            let mut authors = txn.open_table(AUTHORS)?;
            if authors.get(author.id.as_str())?.is_none() {
                return Err(Error::NotFound(format!("author {}", author.id)));
            }
            authors.insert(author.id.as_str(), encode(&author)?.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn list_authors(&self, limit: usize, offset: usize) -> Result<Vec<Author>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(AUTHORS)?;
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
    fn get_or_create_deduplicates_by_canonical_name() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        let a = store.get_or_create_author("J.R.R. Tolkien").unwrap();
        let b = store.get_or_create_author("  j.r.r.   tolkien ").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn creating_duplicate_name_directly_conflicts() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        let a = store.get_or_create_author("Isaac Asimov").unwrap();
        let mut dup = a.clone();
        dup.id = shelfkeeper_common::ids::new_id();
        let err = store.create_author(dup).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
