//! Page state machine (§4.2): one 32-bit `content::status` cell plus a
//! `content::status_changed` timestamp, both accessed at `Quorum`.

use crate::errors::{ContentError, Result};
use crate::kv::{CellValue, Consistency, KvStore, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Synthesized at read time: `primary_owner` exists but `content::status`
    /// does not. Never persisted.
    Unknown,
    Create,
    Normal,
    Hidden,
    Moved,
    Deleted,
}

impl Status {
    fn code(self) -> Option<i8> {
        match self {
            Status::Normal => Some(2),
            Status::Hidden => Some(3),
            Status::Moved => Some(4),
            Status::Deleted => Some(5),
            Status::Create | Status::Unknown => None,
        }
    }

    fn from_code(code: i8) -> Result<Self> {
        match code {
            2 => Ok(Status::Normal),
            3 => Ok(Status::Hidden),
            4 => Ok(Status::Moved),
            5 => Ok(Status::Deleted),
            other => Err(ContentError::integrity(format!("unrecognized status code {other}"))),
        }
    }

    /// Whether `self -> next` is one of the transitions §4.2 allows.
    #[must_use]
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::{Create, Deleted, Hidden, Moved, Normal, Unknown};
        match self {
            Normal => matches!(next, Normal | Hidden | Moved | Deleted),
            Hidden => matches!(next, Hidden | Normal | Deleted),
            Moved => matches!(next, Moved | Normal | Hidden),
            Deleted => matches!(next, Deleted | Normal),
            Create => matches!(next, Create | Normal | Hidden),
            Unknown => matches!(next, Create),
        }
    }
}

/// Reads the current status of `content_key`, synthesizing `Create` when
/// `primary_owner` exists without a `content::status` cell, and `Unknown`
/// when the row has neither.
pub fn get_status(store: &dyn KvStore, content_key: &str) -> Result<Status> {
    let status_cell =
        store.get_cell(Table::Content, content_key, "content::status", Consistency::Quorum)?;
    if let Some(cell) = status_cell {
        let code =
            cell.as_i8().ok_or_else(|| ContentError::integrity("content::status not an i8"))?;
        return Status::from_code(code);
    }
    let has_owner =
        store.get_cell(Table::Content, content_key, "content::primary_owner", Consistency::Any)?.is_some();
    Ok(if has_owner { Status::Create } else { Status::Unknown })
}

/// Attempts `current -> next`, failing with `ContentError::Invalid` if the
/// transition is not in the table, and with `ContentError::Invalid` if
/// `next` cannot be persisted (`Create`/`Unknown`).
pub fn set_status(store: &dyn KvStore, content_key: &str, next: Status, now: i64) -> Result<()> {
    let current = get_status(store, content_key)?;
    if !current.can_transition_to(next) {
        return Err(ContentError::invalid(format!(
            "status transition not allowed: {current:?} -> {next:?}"
        )));
    }
    let code = next
        .code()
        .ok_or_else(|| ContentError::invalid(format!("cannot persist status {next:?}")))?;
    store.put_cell(
        Table::Content,
        content_key,
        "content::status",
        CellValue::I8(code),
        Consistency::Quorum,
    )?;
    store.put_cell(
        Table::Content,
        content_key,
        "content::status_changed",
        CellValue::I64(now),
        Consistency::Quorum,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[test]
    fn create_is_synthesized_from_owner_without_status() {
        let store = MemoryStore::ephemeral();
        store
            .put_cell(
                Table::Content,
                "x/a",
                "content::primary_owner",
                CellValue::Text("output".into()),
                Consistency::Any,
            )
            .unwrap();
        assert_eq!(get_status(&store, "x/a").unwrap(), Status::Create);
    }

    #[test]
    fn unknown_when_no_owner_and_no_status() {
        let store = MemoryStore::ephemeral();
        assert_eq!(get_status(&store, "x/missing").unwrap(), Status::Unknown);
    }

    #[test]
    fn full_transition_table() {
        use Status::{Create, Deleted, Hidden, Moved, Normal, Unknown};
        let allowed: &[(Status, &[Status])] = &[
            (Normal, &[Normal, Hidden, Moved, Deleted]),
            (Hidden, &[Hidden, Normal, Deleted]),
            (Moved, &[Moved, Normal, Hidden]),
            (Deleted, &[Deleted, Normal]),
            (Create, &[Create, Normal, Hidden]),
            (Unknown, &[Create]),
        ];
        let all = [Create, Normal, Hidden, Moved, Deleted, Unknown];
        for (from, allowed_targets) in allowed {
            for to in all {
                let expect = allowed_targets.contains(&to);
                assert_eq!(
                    from.can_transition_to(to),
                    expect,
                    "{from:?} -> {to:?} expected {expect}"
                );
            }
        }
    }

    fn with_owner(store: &dyn KvStore, key: &str) {
        store
            .put_cell(
                Table::Content,
                key,
                "content::primary_owner",
                CellValue::Text("output".into()),
                Consistency::Any,
            )
            .unwrap();
    }

    #[test]
    fn set_status_rejects_disallowed_transition() {
        let store = MemoryStore::ephemeral();
        with_owner(&store, "x/a");
        // CREATE -> NORMAL is allowed (first real publish).
        set_status(&store, "x/a", Status::Normal, 1).unwrap();
        // NORMAL -> CREATE is not allowed.
        let err = set_status(&store, "x/a", Status::Create, 2);
        assert!(err.is_err());
    }

    #[test]
    fn quorum_write_then_read_returns_latest() {
        let store = MemoryStore::ephemeral();
        with_owner(&store, "x/a");
        set_status(&store, "x/a", Status::Normal, 10).unwrap();
        set_status(&store, "x/a", Status::Hidden, 11).unwrap();
        set_status(&store, "x/a", Status::Deleted, 12).unwrap();
        assert_eq!(get_status(&store, "x/a").unwrap(), Status::Deleted);
        let ts =
            store.get_cell(Table::Content, "x/a", "content::status_changed", Consistency::Quorum).unwrap();
        assert_eq!(ts, Some(CellValue::I64(12)));
    }
}
