//! Append-only log of cell mutations, replayed on open to rebuild the
//! in-memory tables. Mirrors the length-prefixed bincode framing the
//! teacher's original WAL used for document operations, generalized to
//! cell-level puts/removes against an arbitrary table.

use super::{CellValue, Table};
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalOp {
    PutCell { table: Table, row: String, column: String, value: CellValue },
    RemoveCell { table: Table, row: String, column: String },
    DropRow { table: Table, row: String },
}

pub struct WalWriter {
    file: File,
}

impl WalWriter {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    pub fn append(&mut self, op: &WalOp) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(op, bincode::config::standard())?;
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Replay every recorded operation in order. Errors on a record are
/// tolerated as end-of-log: a torn write at the tail (process killed
/// mid-append) should not prevent the rest of the log from loading.
pub fn replay(path: &Path, mut apply: impl FnMut(WalOp)) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(_) => break,
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        if reader.read_exact(&mut buf).is_err() {
            break;
        }
        match bincode::serde::decode_from_slice::<WalOp, _>(&buf, bincode::config::standard()) {
            Ok((op, _)) => apply(op),
            Err(_) => break,
        }
    }
    Ok(())
}
