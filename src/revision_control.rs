//! Branch/revision allocation (§4.3). `last_branch` and
//! `last_revision::<branch>[::<locale>]` are monotonic counters stored on
//! the content row; allocating a new branch or revision is a
//! lock-then-read-modify-write under the page's own mutex, since the store
//! itself has no compare-and-swap primitive.

use crate::errors::{ContentError, Result};
use crate::kv::{CellValue, Consistency, KvStore, Table};
use crate::keying::{branch_key, revision_key};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Hands out a per-page lock so branch/revision allocation on one page
/// never blocks allocation on another.
#[derive(Default)]
pub struct PageLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl PageLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lock_for(&self, content_key: &str) -> Arc<Mutex<()>> {
        if let Some(l) = self.locks.read().get(content_key) {
            return l.clone();
        }
        self.locks.write().entry(content_key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

fn last_branch_key() -> &'static str {
    "content::revision_control::last_branch"
}

fn last_revision_column(branch: u32, locale: Option<&str>) -> String {
    match locale {
        Some(l) => format!("content::revision_control::last_revision::{branch}::{l}"),
        None => format!("content::revision_control::last_revision::{branch}"),
    }
}

/// Allocates and returns the next *user* branch number for `content_key`,
/// persisting the new `last_branch` counter. Branch 0 is reserved for
/// declarative imports (see `system_branch`); the first branch this
/// function ever hands out is branch 1.
pub fn new_branch(locks: &PageLocks, store: &dyn KvStore, content_key: &str) -> Result<u32> {
    let lock = locks.lock_for(content_key);
    let _guard = lock.lock();
    let current = store
        .get_cell(Table::Content, content_key, last_branch_key(), Consistency::Any)?
        .map(|c| c.as_u32().ok_or_else(|| ContentError::integrity("last_branch not a u32")))
        .transpose()?;
    let next = match current {
        Some(n) => n.checked_add(1).ok_or_else(|| ContentError::integrity("branch counter overflow"))?,
        None => 1,
    };
    store.put_cell(
        Table::Content,
        content_key,
        last_branch_key(),
        CellValue::U32(next),
        Consistency::Any,
    )?;
    Ok(next)
}

/// Allocates the reserved system branch (0), used only by declarative
/// imports (§3.2, §4.6 create step 4). Idempotent: calling it again on a
/// page that already has branch 0 as its only branch just returns 0. Fails
/// if a user branch (`new_branch`, always ≥ 1) has already been allocated,
/// since branch 0 must always be the first branch a page ever receives.
pub fn system_branch(locks: &PageLocks, store: &dyn KvStore, content_key: &str) -> Result<u32> {
    let lock = locks.lock_for(content_key);
    let _guard = lock.lock();
    let current = store
        .get_cell(Table::Content, content_key, last_branch_key(), Consistency::Any)?
        .map(|c| c.as_u32().ok_or_else(|| ContentError::integrity("last_branch not a u32")))
        .transpose()?;
    match current {
        None => {
            store.put_cell(
                Table::Content,
                content_key,
                last_branch_key(),
                CellValue::U32(0),
                Consistency::Any,
            )?;
            Ok(0)
        }
        Some(0) => Ok(0),
        Some(_) => Err(ContentError::invalid(format!(
            "{content_key} already has a user branch; system branch 0 must be allocated first"
        ))),
    }
}

/// Allocates and returns the next revision number for `(content_key,
/// branch[, locale])`.
pub fn new_revision(
    locks: &PageLocks,
    store: &dyn KvStore,
    content_key: &str,
    branch: u32,
    locale: Option<&str>,
) -> Result<u32> {
    let lock = locks.lock_for(content_key);
    let _guard = lock.lock();
    let column = last_revision_column(branch, locale);
    let current = store
        .get_cell(Table::Content, content_key, &column, Consistency::Any)?
        .map(|c| c.as_u32().ok_or_else(|| ContentError::integrity("last_revision not a u32")))
        .transpose()?;
    let next = match current {
        Some(n) => {
            n.checked_add(1).ok_or_else(|| ContentError::integrity("revision counter overflow"))?
        }
        None => 0,
    };
    store.put_cell(Table::Content, content_key, &column, CellValue::U32(next), Consistency::Any)?;
    Ok(next)
}

/// Current/working pointers on the content row: which branch/revision is
/// live versus what an editor has open.
pub struct Pointers;

impl Pointers {
    pub fn set_current(
        store: &dyn KvStore,
        content_key: &str,
        locale: &str,
        branch: u32,
        revision: u32,
    ) -> Result<()> {
        store.put_cell(
            Table::Content,
            content_key,
            &format!("content::revision_control::current_branch::{locale}"),
            CellValue::U32(branch),
            Consistency::Any,
        )?;
        store.put_cell(
            Table::Content,
            content_key,
            &format!("content::revision_control::current_revision::{locale}"),
            CellValue::U32(revision),
            Consistency::Any,
        )
    }

    pub fn current(
        store: &dyn KvStore,
        content_key: &str,
        locale: &str,
    ) -> Result<Option<(u32, u32)>> {
        let branch = store.get_cell(
            Table::Content,
            content_key,
            &format!("content::revision_control::current_branch::{locale}"),
            Consistency::Any,
        )?;
        let revision = store.get_cell(
            Table::Content,
            content_key,
            &format!("content::revision_control::current_revision::{locale}"),
            Consistency::Any,
        )?;
        match (branch, revision) {
            (Some(b), Some(r)) => Ok(Some((
                b.as_u32().ok_or_else(|| ContentError::integrity("current_branch not a u32"))?,
                r.as_u32().ok_or_else(|| ContentError::integrity("current_revision not a u32"))?,
            ))),
            _ => Ok(None),
        }
    }
}

/// Copies every cell of one revision row onto a newly allocated revision
/// row in the same (or a different) branch, as `clone_page`/`repeat`
/// editing flows use to seed a new draft from the current one.
pub fn copy_branch(
    store: &dyn KvStore,
    content_key: &str,
    locale: &str,
    src_branch: u32,
    src_revision: u32,
    dst_branch: u32,
    dst_revision: u32,
) -> Result<()> {
    let src_key = revision_key(content_key, locale, src_branch, src_revision);
    let row = crate::kv::get_row_required(store, Table::Revision, &src_key)?;
    let dst_key = revision_key(content_key, locale, dst_branch, dst_revision);
    for (column, value) in row {
        store.put_cell(Table::Revision, &dst_key, &column, value, Consistency::Any)?;
    }
    // The branch row itself (owner/type links etc.) is shared per-branch,
    // not per-revision; ensure it exists so callers can attach branch-level
    // cells immediately after.
    let branch_row_key = branch_key(content_key, dst_branch);
    if !store.row_exists(Table::Branch, &branch_row_key)? {
        store.put_cell(
            Table::Branch,
            &branch_row_key,
            "content::branch::created",
            CellValue::Bool(true),
            Consistency::Any,
        )?;
    }
    Ok(())
}
