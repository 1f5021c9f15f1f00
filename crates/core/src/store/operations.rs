use super::schema::{prefix_upper_bound, OPERATIONS, OPERATION_BY_STATE};
use super::{decode, encode, Store};
use crate::models::{Operation, OperationState};
use redb::WriteTransaction;
use shelfkeeper_common::Result;

fn state_key(state: OperationState, id: &str) -> String {
    format!("{}:{id}", state.as_str())
}

fn remove_state_index(txn: &WriteTransaction, op: &Operation) -> Result<()> {
    txn.open_table(OPERATION_BY_STATE)?
        .remove(state_key(op.state, &op.id).as_str())?;
    Ok(())
}

fn insert_state_index(txn: &WriteTransaction, op: &Operation) -> Result<()> {
    txn.open_table(OPERATION_BY_STATE)?
        .insert(state_key(op.state, &op.id).as_str(), op.id.as_str())?;
    Ok(())
}

impl Store {
    pub fn get_operation(&self, id: &str) -> Result<Option<Operation>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(OPERATIONS)?;
        match table.get(id)? {
            Some(raw) => Ok(Some(decode(raw.value())?)),
            None => Ok(None),
        }
    }

    pub fn create_operation(&self, op: Operation) -> Result<()> {
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(OPERATIONS)?;
            table.insert(op.id.as_str(), encode(&op)?.as_str())?;
        }
        insert_state_index(&txn, &op)?;
        txn.commit()?;
        Ok(())
    }

    /// Persist a full Operation snapshot, moving its state-index entry if
    /// the state changed. Called on every progress/log/status mutation, so
    /// this always commits — at-least-once broadcast is fine, but losing a
    /// persisted state transition is not.
    pub fn put_operation(&self, op: Operation) -> Result<()> {
        let txn = self.write_txn()?;
        let previous: Option<Operation> = {
            let table = txn.open_table(OPERATIONS)?;
            match table.get(op.id.as_str())? {
                Some(raw) => Some(decode(raw.value())?),
                None => None,
            }
        };
        if let Some(previous) = &previous {
            if previous.state != op.state {
                remove_state_index(&txn, previous)?;
            }
        }
        {
            let mut table = txn.open_table(OPERATIONS)?;
            table.insert(op.id.as_str(), encode(&op)?.as_str())?;
        }
        if previous.as_ref().map(|p| p.state) != Some(op.state) {
            insert_state_index(&txn, &op)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn list_operations_by_state(&self, state: OperationState) -> Result<Vec<Operation>> {
        let txn = self.read_txn()?;
        let index = txn.open_table(OPERATION_BY_STATE)?;
        let prefix = format!("{}:", state.as_str());
        let upper = prefix_upper_bound(&prefix);
        let ops = txn.open_table(OPERATIONS)?;
        let mut out = Vec::new();
        for row in index.range(prefix.as_str()..upper.as_str())? {
            let (_, id) = row?;
            if let Some(raw) = ops.get(id.value())? {
                out.push(decode(raw.value())?);
            }
        }
        Ok(out)
    }

    pub fn list_active_operations(&self) -> Result<Vec<Operation>> {
        let mut out = self.list_operations_by_state(OperationState::Queued)?;
        out.extend(self.list_operations_by_state(OperationState::Running)?);
        out.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        Ok(out)
    }

    pub fn list_all_operations(&self, limit: usize, offset: usize) -> Result<Vec<Operation>> {
        let txn = self.read_txn()?;
        let table = txn.open_table(OPERATIONS)?;
        let mut all = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            all.push(decode::<Operation>(value.value())?);
        }
        all.sort_by(|a, b| b.enqueued_at.cmp(&a.enqueued_at));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OperationKind, Priority};
    use shelfkeeper_common::ids::new_id;
    use tempfile::tempdir;

    #[test]
    fn state_transition_moves_the_index_entry() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        let mut op = Operation::new(new_id(), OperationKind::Scan, Priority::Normal);
        store.create_operation(op.clone()).unwrap();
        assert_eq!(store.list_active_operations().unwrap().len(), 1);

        op.state = OperationState::Running;
        store.put_operation(op.clone()).unwrap();
        assert_eq!(
            store.list_operations_by_state(OperationState::Queued).unwrap().len(),
            0
        );
        assert_eq!(
            store.list_operations_by_state(OperationState::Running).unwrap().len(),
            1
        );

        op.state = OperationState::Completed;
        store.put_operation(op).unwrap();
        assert!(store.list_active_operations().unwrap().is_empty());
    }
}
