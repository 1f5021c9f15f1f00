use super::schema::VERSION_GROUPS;
use super::{decode, encode, Store};
use crate::models::VersionGroup;
use shelfkeeper_common::{ids::new_id, Error, Result};

impl Store {
    pub fn get_version_group(&self, id: &str) -> Result<Option<VersionGroup>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(VERSION_GROUPS)?;
        match table.get(id)? {
            Some(raw) => Ok(Some(decode(raw.value())?)),
            None => Ok(None),
        }
    }

    /// Link two books as editions of the same work. If neither book already
    /// belongs to a group, a new one is created with `primary` as its
    /// primary book.
    pub fn link_version_group(&self, primary_book_id: &str, member_book_id: &str) -> Result<VersionGroup> {
        let existing_group = self
            .get_book(primary_book_id)?
            .and_then(|b| b.version_group_id);
        let group = match existing_group {
            Some(group_id) => {
                let mut group = self
                    .get_version_group(&group_id)?
                    .ok_or_else(|| Error::NotFound(format!("version group {group_id}")))?;
                if !group.member_book_ids.contains(&member_book_id.to_string()) {
                    group.member_book_ids.push(member_book_id.to_string());
                }
                group
            }
            None => VersionGroup {
                id: new_id(),
                primary_book_id: primary_book_id.to_string(),
                member_book_ids: vec![primary_book_id.to_string(), member_book_id.to_string()],
            },
        };
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(VERSION_GROUPS)?;
            table.insert(group.id.as_str(), encode(&group)?.as_str())?;
        }
        txn.commit()?;

        for book_id in [primary_book_id, member_book_id] {
            if let Some(mut book) = self.get_book(book_id)? {
                book.version_group_id = Some(group.id.clone());
                self.update_book(book)?;
            }
        }
        Ok(group)
    }

    /// Remove a book from its version group, dissolving the group entirely
    /// if membership would drop below two.
    pub fn unlink_from_version_group(&self, book_id: &str) -> Result<()> {
        let Some(mut book) = self.get_book(book_id)? else {
            return Err(Error::NotFound(format!("book {book_id}")));
        };
        let Some(group_id) = book.version_group_id.take() else {
            return Ok(());
        };
        self.update_book(book)?;

        let Some(mut group) = self.get_version_group(&group_id)? else {
            return Ok(());
        };
        group.member_book_ids.retain(|id| id != book_id);

        let txn = self.write_txn()?;
        if group.member_book_ids.len() < 2 {
            let mut table = txn.open_table(VERSION_GROUPS)?;
            table.remove(group_id.as_str())?;
            txn.commit()?;
            for remaining_id in &group.member_book_ids {
                if let Some(mut remaining) = self.get_book(remaining_id)? {
                    remaining.version_group_id = None;
                    self.update_book(remaining)?;
                }
            }
        } else {
            let mut table = txn.open_table(VERSION_GROUPS)?;
            table.insert(group_id.as_str(), encode(&group)?.as_str())?;
            txn.commit()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Book;
    use tempfile::tempdir;

    #[test]
    fn linking_two_books_creates_a_shared_group() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        let a = Book::new(new_id());
        let b = Book::new(new_id());
        store.create_book(a.clone()).unwrap();
        store.create_book(b.clone()).unwrap();
        let group = store.link_version_group(&a.id, &b.id).unwrap();
        assert_eq!(group.member_book_ids.len(), 2);
        assert_eq!(
            store.get_book(&a.id).unwrap().unwrap().version_group_id,
            Some(group.id)
        );
    }

    #[test]
    fn unlinking_below_two_dissolves_group() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        let a = Book::new(new_id());
        let b = Book::new(new_id());
        store.create_book(a.clone()).unwrap();
        store.create_book(b.clone()).unwrap();
        let group = store.link_version_group(&a.id, &b.id).unwrap();
        store.unlink_from_version_group(&b.id).unwrap();
        assert!(store.get_version_group(&group.id).unwrap().is_none());
        assert_eq!(store.get_book(&a.id).unwrap().unwrap().version_group_id, None);
    }
}
