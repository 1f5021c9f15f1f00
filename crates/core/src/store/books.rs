//! Book CRUD, the dual-identity upsert, and secondary index maintenance.

use super::schema::{
    book_author_key, book_hash_key, book_series_key, book_state_key, prefix_upper_bound,
    BOOK_BY_AUTHOR, BOOK_BY_HASH, BOOK_BY_ORGANIZED_HASH, BOOK_BY_PATH, BOOK_BY_SERIES,
    BOOK_BY_STATE, BOOKS,
};
use super::{decode, encode, ListOptions, Store};
use crate::models::{Book, LibraryState};
use chrono::Utc;
use redb::WriteTransaction;
use shelfkeeper_common::{ids::new_id, Error, Result};

/// Which identifying key an upsert should be looked up by. A scanner picks
/// `Hash` first, falling back to `Path`, per the scanner's dual-key
/// algorithm (the Store only needs to check the *other* key for agreement).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertBookBy {
    Path,
    Hash,
}

#[derive(Debug, Clone, Default)]
pub struct BookFilter {
    pub library_state: Option<LibraryState>,
    pub author_id: Option<String>,
    pub series_id: Option<String>,
    pub include_soft_deleted: bool,
}

fn remove_book_indexes(txn: &WriteTransaction, book: &Book) -> Result<()> {
    if let Some(path) = &book.file_path {
        txn.open_table(BOOK_BY_PATH)?.remove(path.as_str())?;
    }
    if let Some(hash) = &book.original_hash {
        txn.open_table(BOOK_BY_HASH)?
            .remove(book_hash_key(hash, &book.id).as_str())?;
    }
    if let Some(hash) = &book.organized_hash {
        txn.open_table(BOOK_BY_ORGANIZED_HASH)?
            .remove(book_hash_key(hash, &book.id).as_str())?;
    }
    if let Some(author_id) = &book.author_id {
        txn.open_table(BOOK_BY_AUTHOR)?
            .remove(book_author_key(author_id, &book.id).as_str())?;
    }
    if let Some(series_id) = &book.series_id {
        txn.open_table(BOOK_BY_SERIES)?
            .remove(book_series_key(series_id, &book.id).as_str())?;
    }
    txn.open_table(BOOK_BY_STATE)?
        .remove(book_state_key(book.library_state.to_string().as_str(), &book.id).as_str())?;
    Ok(())
}

fn insert_book_indexes(txn: &WriteTransaction, book: &Book) -> Result<()> {
    if let Some(path) = &book.file_path {
        txn.open_table(BOOK_BY_PATH)?
            .insert(path.as_str(), book.id.as_str())?;
    }
    if let Some(hash) = &book.original_hash {
        txn.open_table(BOOK_BY_HASH)?
            .insert(book_hash_key(hash, &book.id).as_str(), book.id.as_str())?;
    }
    if let Some(hash) = &book.organized_hash {
        txn.open_table(BOOK_BY_ORGANIZED_HASH)?
            .insert(book_hash_key(hash, &book.id).as_str(), book.id.as_str())?;
    }
    if let Some(author_id) = &book.author_id {
        txn.open_table(BOOK_BY_AUTHOR)?.insert(
            book_author_key(author_id, &book.id).as_str(),
            book.id.as_str(),
        )?;
    }
    if let Some(series_id) = &book.series_id {
        txn.open_table(BOOK_BY_SERIES)?.insert(
            book_series_key(series_id, &book.id).as_str(),
            book.id.as_str(),
        )?;
    }
    txn.open_table(BOOK_BY_STATE)?.insert(
        book_state_key(book.library_state.to_string().as_str(), &book.id).as_str(),
        book.id.as_str(),
    )?;
    Ok(())
}

impl Store {
    pub fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(BOOKS)?;
        match table.get(id)? {
            Some(raw) => Ok(Some(decode(raw.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_book_by_path(&self, path: &str) -> Result<Option<Book>> {
        let txn = self.read_txn()?;
        let index = txn.open_table(BOOK_BY_PATH)?;
        let Some(id) = index.get(path)? else {
            return Ok(None);
        };
        let books = txn.open_table(BOOKS)?;
        match books.get(id.value())? {
            Some(raw) => Ok(Some(decode(raw.value())?)),
            None => Ok(None),
        }
    }

    /// All Books sharing `hash` as their original content hash — normally
    /// zero or one, more than one only for linked VersionGroup members.
    pub fn get_books_by_hash(&self, hash: &str) -> Result<Vec<Book>> {
        let txn = self.read_txn()?;
        let index = txn.open_table(BOOK_BY_HASH)?;
        let prefix = format!("{hash}:");
        let upper = prefix_upper_bound(&prefix);
        let books = txn.open_table(BOOKS)?;
        let mut out = Vec::new();
        for row in index.range(prefix.as_str()..upper.as_str())? {
            let (_, id) = row?;
            if let Some(raw) = books.get(id.value())? {
                out.push(decode(raw.value())?);
            }
        }
        Ok(out)
    }

    pub fn create_book(&self, book: Book) -> Result<()> {
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(BOOKS)?;
            if table.get(book.id.as_str())?.is_some() {
                return Err(Error::Conflict(format!("book {} already exists", book.id)));
            }
            if let Some(path) = &book.file_path {
                let path_index = txn.open_table(BOOK_BY_PATH)?;
                if path_index.get(path.as_str())?.is_some() {
                    return Err(Error::Conflict(format!("path already in use: {path}")));
                }
            }
            table.insert(book.id.as_str(), encode(&book)?.as_str())?;
        }
        insert_book_indexes(&txn, &book)?;
        txn.commit()?;
        Ok(())
    }

    pub fn update_book(&self, book: Book) -> Result<()> {
        let txn = self.write_txn()?;
        let previous: Book = {
            let table = txn.open_table(BOOKS)?;
            match table.get(book.id.as_str())? {
                Some(raw) => decode(raw.value())?,
                None => return Err(Error::NotFound(format!("book {}", book.id))),
            }
        };
        remove_book_indexes(&txn, &previous)?;
        {
            let mut table = txn.open_table(BOOKS)?;
            table.insert(book.id.as_str(), encode(&book)?.as_str())?;
        }
        insert_book_indexes(&txn, &book)?;
        txn.commit()?;
        Ok(())
    }

    /// The only path by which a Book is created from a scan: look the Book
    /// up by `by`'s key, and if found, require the *other* identifying key
    /// to agree (unless the incoming value specifies a version group).
    pub fn upsert_book(&self, by: UpsertBookBy, mut value: Book) -> Result<Book> {
        let existing = match by {
            UpsertBookBy::Path => {
                let path = value
                    .file_path
                    .clone()
                    .ok_or_else(|| Error::InvalidInput("upsert by path requires file_path".into()))?;
                self.get_book_by_path(&path)?
            }
            UpsertBookBy::Hash => {
                let hash = value.original_hash.clone().ok_or_else(|| {
                    Error::InvalidInput("upsert by hash requires original_hash".into())
                })?;
                self.get_books_by_hash(&hash)?.into_iter().next()
            }
        };

        match existing {
            None => {
                if value.id.is_empty() {
                    value.id = new_id();
                }
                self.create_book(value.clone())?;
                Ok(value)
            }
            Some(existing_book) => {
                let disagrees = match by {
                    UpsertBookBy::Path => existing_book.original_hash != value.original_hash,
                    UpsertBookBy::Hash => existing_book.file_path != value.file_path,
                };
                if disagrees
                    && value.version_group_id.is_none()
                    && existing_book.version_group_id.is_none()
                {
                    return Err(Error::Conflict(format!(
                        "upsert disagreement for book {}: existing path={:?} hash={:?}, incoming path={:?} hash={:?}",
                        existing_book.id,
                        existing_book.file_path,
                        existing_book.original_hash,
                        value.file_path,
                        value.original_hash,
                    )));
                }
                value.id = existing_book.id.clone();
                value.created_at = existing_book.created_at;
                value.updated_at = Utc::now();
                self.update_book(value.clone())?;
                Ok(value)
            }
        }
    }

    pub fn list_books(&self, filter: &BookFilter, options: &ListOptions) -> Result<Vec<Book>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(BOOKS)?;
        let mut matched = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            let book: Book = decode(value.value())?;
            if book.soft_deleted && !filter.include_soft_deleted {
                continue;
            }
            if let Some(state) = filter.library_state {
                if book.library_state != state {
                    continue;
                }
            }
            if let Some(author_id) = &filter.author_id {
                if book.author_id.as_deref() != Some(author_id.as_str()) {
                    continue;
                }
            }
            if let Some(series_id) = &filter.series_id {
                if book.series_id.as_deref() != Some(series_id.as_str()) {
                    continue;
                }
            }
            matched.push(book);
        }
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        let page = matched
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .collect();
        Ok(page)
    }

    /// `soft_delete=false, block_hash=false`: hard delete, removing the row
    /// and every secondary index entry. `soft_delete=true`: flag and
    /// timestamp only, retaining the row. `block_hash=true` additionally
    /// inserts the content hash into BlockedHash.
    pub fn delete_book(&self, id: &str, soft_delete: bool, block_hash: bool) -> Result<()> {
        let book = self.get_book(id)?.ok_or_else(|| Error::NotFound(format!("book {id}")))?;
        if block_hash {
            if let Some(hash) = &book.original_hash {
                self.block_hash(hash, "deleted via soft-delete")?;
            }
        }
        if soft_delete {
            let mut updated = book;
            updated.soft_deleted = true;
            updated.soft_deleted_at = Some(Utc::now());
            self.update_book(updated)
        } else {
            let txn = self.write_txn()?;
            remove_book_indexes(&txn, &book)?;
            txn.open_table(BOOKS)?.remove(id)?;
            txn.commit()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    fn sample_book(path: &str, hash: &str) -> Book {
        let mut b = Book::new(new_id());
        b.file_path = Some(path.to_string());
        b.original_hash = Some(hash.to_string());
        b.library_state = LibraryState::Import;
        b
    }

    #[test]
    fn upsert_by_hash_creates_new_book() {
        let (_d, store) = open_store();
        let book = sample_book("/in/a.m4b", "hash-a");
        let created = store.upsert_book(UpsertBookBy::Hash, book).unwrap();
        assert_eq!(store.get_book(&created.id).unwrap().unwrap().id, created.id);
    }

    #[test]
    fn upsert_same_path_same_hash_updates_not_duplicates() {
        let (_d, store) = open_store();
        let book = sample_book("/in/a.m4b", "hash-a");
        let first = store.upsert_book(UpsertBookBy::Path, book.clone()).unwrap();
        let second = store.upsert_book(UpsertBookBy::Path, book).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn upsert_same_path_different_hash_is_replace_not_conflict() {
        let (_d, store) = open_store();
        let book = sample_book("/in/a.m4b", "hash-a");
        let first = store.upsert_book(UpsertBookBy::Path, book).unwrap();
        let replaced_file = sample_book("/in/a.m4b", "hash-b");
        let second = store.upsert_book(UpsertBookBy::Path, replaced_file).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.original_hash.as_deref(), Some("hash-b"));
    }

    #[test]
    fn upsert_same_hash_different_path_without_version_group_conflicts() {
        let (_d, store) = open_store();
        let book = sample_book("/lib/x.m4b", "hash-dup");
        store.upsert_book(UpsertBookBy::Hash, book).unwrap();
        let moved = sample_book("/in/x-copy.m4b", "hash-dup");
        let err = store.upsert_book(UpsertBookBy::Hash, moved).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn path_unique_across_non_deleted_books() {
        let (_d, store) = open_store();
        let mut book = sample_book("/in/a.m4b", "hash-1");
        store.create_book(book.clone()).unwrap();
        book.id = new_id();
        book.original_hash = Some("hash-2".into());
        let err = store.create_book(book).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn soft_delete_excludes_from_default_listing() {
        let (_d, store) = open_store();
        let book = sample_book("/in/a.m4b", "hash-1");
        store.create_book(book.clone()).unwrap();
        store.delete_book(&book.id, true, false).unwrap();
        let listed = store.list_books(&BookFilter::default(), &ListOptions::default()).unwrap();
        assert!(listed.is_empty());
        let with_deleted = store
            .list_books(
                &BookFilter {
                    include_soft_deleted: true,
                    ..Default::default()
                },
                &ListOptions::default(),
            )
            .unwrap();
        assert_eq!(with_deleted.len(), 1);
    }
}
