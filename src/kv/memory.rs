use super::wal::{WalOp, WalWriter, replay};
use super::{CellValue, KvStore, Row, Table};
use crate::errors::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// In-memory table storage backed by an append-only WAL for durability
/// across process restarts. One `MemoryStore` serves every table the
/// engine uses; rows are namespaced by `(Table, key)`.
pub struct MemoryStore {
    tables: RwLock<HashMap<(Table, String), Row>>,
    wal: Option<RwLock<WalWriter>>,
}

impl MemoryStore {
    /// An ephemeral store with no WAL, useful for tests.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self { tables: RwLock::new(HashMap::new()), wal: None }
    }

    /// Open (or create) a store backed by a WAL file at `wal_path`,
    /// replaying any existing log to rebuild in-memory state.
    pub fn open(wal_path: &Path) -> Result<Self> {
        let mut tables: HashMap<(Table, String), Row> = HashMap::new();
        replay(wal_path, |op| match op {
            WalOp::PutCell { table, row, column, value } => {
                tables.entry((table, row)).or_default().insert(column, value);
            }
            WalOp::RemoveCell { table, row, column } => {
                if let Some(r) = tables.get_mut(&(table, row)) {
                    r.remove(&column);
                }
            }
            WalOp::DropRow { table, row } => {
                tables.remove(&(table, row));
            }
        })?;
        let wal = WalWriter::open(wal_path)?;
        Ok(Self { tables: RwLock::new(tables), wal: Some(RwLock::new(wal)) })
    }

    fn log(&self, op: WalOp) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.write().append(&op)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn wal_path_hint() -> PathBuf {
        PathBuf::from("content.wal")
    }
}

impl KvStore for MemoryStore {
    fn put_cell(
        &self,
        table: Table,
        row: &str,
        column: &str,
        value: CellValue,
        _consistency: super::Consistency,
    ) -> Result<()> {
        self.log(WalOp::PutCell {
            table,
            row: row.to_string(),
            column: column.to_string(),
            value: value.clone(),
        })?;
        self.tables
            .write()
            .entry((table, row.to_string()))
            .or_default()
            .insert(column.to_string(), value);
        Ok(())
    }

    fn get_cell(
        &self,
        table: Table,
        row: &str,
        column: &str,
        _consistency: super::Consistency,
    ) -> Result<Option<CellValue>> {
        Ok(self.tables.read().get(&(table, row.to_string())).and_then(|r| r.get(column).cloned()))
    }

    fn remove_cell(&self, table: Table, row: &str, column: &str) -> Result<()> {
        self.log(WalOp::RemoveCell {
            table,
            row: row.to_string(),
            column: column.to_string(),
        })?;
        if let Some(r) = self.tables.write().get_mut(&(table, row.to_string())) {
            r.remove(column);
        }
        Ok(())
    }

    fn get_row(&self, table: Table, row: &str) -> Result<Option<Row>> {
        Ok(self.tables.read().get(&(table, row.to_string())).cloned())
    }

    fn row_exists(&self, table: Table, row: &str) -> Result<bool> {
        Ok(self.tables.read().contains_key(&(table, row.to_string())))
    }

    fn drop_row(&self, table: Table, row: &str) -> Result<()> {
        self.log(WalOp::DropRow { table, row: row.to_string() })?;
        self.tables.write().remove(&(table, row.to_string()));
        Ok(())
    }

    fn scan_prefix(&self, table: Table, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .read()
            .keys()
            .filter(|(t, k)| *t == table && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    fn all_rows(&self, table: Table) -> Result<Vec<String>> {
        Ok(self.tables.read().keys().filter(|(t, _)| *t == table).map(|(_, k)| k.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Consistency;

    #[test]
    fn put_then_get_round_trips() {
        let store = MemoryStore::ephemeral();
        store
            .put_cell(Table::Content, "example.com/foo", "status", CellValue::I8(2), Consistency::Quorum)
            .unwrap();
        let v = store.get_cell(Table::Content, "example.com/foo", "status", Consistency::Quorum).unwrap();
        assert_eq!(v, Some(CellValue::I8(2)));
    }

    #[test]
    fn drop_row_removes_all_cells() {
        let store = MemoryStore::ephemeral();
        store
            .put_cell(Table::Journal, "u1", "timestamp", CellValue::I64(1), Consistency::Any)
            .unwrap();
        store.drop_row(Table::Journal, "u1").unwrap();
        assert!(!store.row_exists(Table::Journal, "u1").unwrap());
    }

    #[test]
    fn wal_replay_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let wal_path = dir.path().join("content.wal");
        {
            let store = MemoryStore::open(&wal_path).unwrap();
            store
                .put_cell(Table::Content, "a/b", "status", CellValue::I8(2), Consistency::Quorum)
                .unwrap();
            store.put_cell(Table::Content, "a/b", "created", CellValue::I64(42), Consistency::Any).unwrap();
            store.remove_cell(Table::Content, "a/b", "created").unwrap();
        }
        let reopened = MemoryStore::open(&wal_path).unwrap();
        assert_eq!(
            reopened.get_cell(Table::Content, "a/b", "status", Consistency::Quorum).unwrap(),
            Some(CellValue::I8(2))
        );
        assert_eq!(
            reopened.get_cell(Table::Content, "a/b", "created", Consistency::Any).unwrap(),
            None
        );
    }

    #[test]
    fn scan_prefix_finds_site_rows() {
        let store = MemoryStore::ephemeral();
        store.put_cell(Table::Content, "example.com/a", "status", CellValue::I8(2), Consistency::Quorum).unwrap();
        store.put_cell(Table::Content, "example.com/b", "status", CellValue::I8(2), Consistency::Quorum).unwrap();
        store.put_cell(Table::Content, "other.com/a", "status", CellValue::I8(2), Consistency::Quorum).unwrap();
        let mut rows = store.scan_prefix(Table::Content, "example.com/").unwrap();
        rows.sort();
        assert_eq!(rows, vec!["example.com/a".to_string(), "example.com/b".to_string()]);
    }
}
