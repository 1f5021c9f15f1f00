use super::schema::{prefix_upper_bound, FIELD_STATES};
use super::{decode, encode, Store};
use crate::models::{MetadataFieldState, TrackedField};
use shelfkeeper_common::Result;

fn key(book_id: &str, field: TrackedField) -> String {
    format!("{book_id}:{}", field.as_str())
}

impl Store {
    pub fn get_field_state(
        &self,
        book_id: &str,
        field: TrackedField,
    ) -> Result<Option<MetadataFieldState>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(FIELD_STATES)?;
        match table.get(key(book_id, field).as_str())? {
            Some(raw) => Ok(Some(decode(raw.value())?)),
            None => Ok(None),
        }
    }

    pub fn put_field_state(&self, state: &MetadataFieldState) -> Result<()> {
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(FIELD_STATES)?;
            table.insert(
                key(&state.book_id, state.field).as_str(),
                encode(state)?.as_str(),
            )?;
        }
        txn.commit()?;
        Ok(())
    }

    /// All tracked-field rows for a book, in `TrackedField::ALL` order.
    pub fn list_field_states(&self, book_id: &str) -> Result<Vec<MetadataFieldState>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(FIELD_STATES)?;
        let prefix = format!("{book_id}:");
        let upper = prefix_upper_bound(&prefix);
        let mut out = Vec::new();
        for row in table.range(prefix.as_str()..upper.as_str())? {
            let (_, value) = row?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }

    /// Delete every field-state row belonging to a book, used when a book
    /// is hard-deleted.
    pub fn delete_field_states(&self, book_id: &str) -> Result<()> {
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(FIELD_STATES)?;
            let prefix = format!("{book_id}:");
            let upper = prefix_upper_bound(&prefix);
            let keys: Vec<String> = table
                .range(prefix.as_str()..upper.as_str())?
                .map(|row| row.map(|(k, _)| k.value().to_string()))
                .collect::<std::result::Result<_, _>>()?;
            for k in keys {
                table.remove(k.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn field_state_round_trips_and_lists_by_book() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        let mut title = MetadataFieldState::new("book-1", TrackedField::Title);
        title.value_from_file = Some("The Hobbit".into());
        store.put_field_state(&title).unwrap();
        let mut narrator = MetadataFieldState::new("book-1", TrackedField::Narrator);
        narrator.value_from_file = Some("Rob Inglis".into());
        store.put_field_state(&narrator).unwrap();

        let fetched = store
            .get_field_state("book-1", TrackedField::Title)
            .unwrap()
            .unwrap();
        assert_eq!(fetched.value_from_file.as_deref(), Some("The Hobbit"));

        let all = store.list_field_states("book-1").unwrap();
        assert_eq!(all.len(), 2);
    }
}
