//! A small wide-column key-value store standing in for the out-of-scope
//! Cassandra-backed `libdbproxy` layer the original content plugin sits on.
//!
//! Tables hold rows, rows hold named cells. Callers address a cell as
//! `(table, row key, column name)`. `Consistency::Quorum` marks call sites
//! that the original relies on cross-process agreement for (status cells);
//! in this single-process store it is a documentation marker rather than a
//! behavioral switch, so a future networked backend can add real quorum
//! semantics without touching callers.

mod memory;
mod wal;

pub use memory::MemoryStore;

use crate::errors::{ContentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Table {
    Content,
    Branch,
    Revision,
    Files,
    Processing,
    Journal,
    Secret,
    Cache,
}

impl Table {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Table::Content => "content",
            Table::Branch => "branch",
            Table::Revision => "revision",
            Table::Files => "files",
            Table::Processing => "processing",
            Table::Journal => "journal",
            Table::Secret => "secret",
            Table::Cache => "cache",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Any,
    Quorum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    U32(u32),
    I64(i64),
    I8(i8),
    Bool(bool),
    Bytes16([u8; 16]),
    Bytes(Vec<u8>),
    Text(String),
}

impl CellValue {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            CellValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i8(&self) -> Option<i8> {
        match self {
            CellValue::I8(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CellValue::Bytes(b) => Some(b.as_slice()),
            CellValue::Bytes16(b) => Some(b.as_slice()),
            _ => None,
        }
    }
}

pub type Row = BTreeMap<String, CellValue>;

/// The wide-column store contract. A single in-process implementation
/// (`MemoryStore`) backs every table; the trait boundary exists so the
/// engine and component modules never see the WAL/append-log details.
pub trait KvStore: Send + Sync {
    fn put_cell(
        &self,
        table: Table,
        row: &str,
        column: &str,
        value: CellValue,
        consistency: Consistency,
    ) -> Result<()>;

    fn get_cell(
        &self,
        table: Table,
        row: &str,
        column: &str,
        consistency: Consistency,
    ) -> Result<Option<CellValue>>;

    fn remove_cell(&self, table: Table, row: &str, column: &str) -> Result<()>;

    fn get_row(&self, table: Table, row: &str) -> Result<Option<Row>>;

    fn row_exists(&self, table: Table, row: &str) -> Result<bool>;

    fn drop_row(&self, table: Table, row: &str) -> Result<()>;

    /// Rows in `table` whose key starts with `prefix`, for the scans the
    /// background worker and index rebuild need (Cassandra-style wide rows
    /// don't support this natively, but the original worker always scans
    /// table-wide, so this is the one place the in-memory model is honest
    /// about being simpler than the real backend).
    fn scan_prefix(&self, table: Table, prefix: &str) -> Result<Vec<String>>;

    fn all_rows(&self, table: Table) -> Result<Vec<String>>;
}

fn require_row<'a>(row: &'a Option<Row>, table: Table, key: &str) -> Result<&'a Row> {
    row.as_ref().ok_or_else(|| ContentError::not_found(format!("{}/{}", table.name(), key)))
}

/// Convenience for components that need "the row or NotFound" rather than
/// the raw `Option`.
pub fn get_row_required(store: &dyn KvStore, table: Table, row: &str) -> Result<Row> {
    let got = store.get_row(table, row)?;
    Ok(require_row(&got, table, row)?.clone())
}
