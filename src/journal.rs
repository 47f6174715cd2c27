//! Crash-safety journal for multi-step page operations (§4.9), grounded in
//! the original content plugin's `journal.cpp`.
//!
//! The journal is deliberately NOT RAII: `JournalList` pushes a marker when
//! a multi-step operation starts and pops it in `done()`, but only flushes
//! the accumulated journal rows once the stack empties back to zero. A
//! `JournalList` dropped with a non-empty stack logs a warning and leaves
//! the journal rows in place for the background reaper to find; it must
//! never clean up in `Drop`, since a panic mid-operation is exactly the
//! case the journal exists to survive.

use crate::kv::{CellValue, Consistency, KvStore, Table};
use crate::observer::ObserverList;
use crate::revision_control::PageLocks;
use log::warn;

fn journal_key(content_key: &str) -> String {
    format!("journal/{content_key}")
}

/// One pending step recorded against a page while a multi-step operation
/// (e.g. `move_page`, which touches both the old and new content rows) is
/// in flight.
pub struct JournalList<'a> {
    store: &'a dyn KvStore,
    content_key: String,
    depth: u32,
    entries_written: u32,
}

impl<'a> JournalList<'a> {
    #[must_use]
    pub fn start(store: &'a dyn KvStore, content_key: &str) -> Self {
        Self { store, content_key: content_key.to_string(), depth: 1, entries_written: 0 }
    }

    /// Records that a nested operation on the same page has also started;
    /// `done()` must be called an equal number of times before the journal
    /// actually flushes.
    pub fn enter(&mut self) {
        self.depth += 1;
    }

    /// Appends one `{timestamp, url}` entry to the page's pending journal
    /// row without touching the depth counter.
    pub fn add_page_url(&mut self, url: &str, now: i64) -> crate::errors::Result<()> {
        let key = journal_key(&self.content_key);
        let index = self.entries_written;
        self.store.put_cell(
            Table::Journal,
            &key,
            &format!("journal::timestamp::{index}"),
            CellValue::I64(now),
            Consistency::Any,
        )?;
        self.store.put_cell(
            Table::Journal,
            &key,
            &format!("journal::url::{index}"),
            CellValue::Text(url.to_string()),
            Consistency::Any,
        )?;
        self.entries_written += 1;
        Ok(())
    }

    /// Pops one level of nesting. Only when the stack unwinds to zero does
    /// this actually drop the journal row; a caller nested inside another
    /// caller's `JournalList` for the same page leaves the row in place.
    pub fn done(mut self) -> crate::errors::Result<()> {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 && self.entries_written > 0 {
            self.store.drop_row(Table::Journal, &journal_key(&self.content_key))?;
        }
        std::mem::forget(self);
        Ok(())
    }
}

impl Drop for JournalList<'_> {
    fn drop(&mut self) {
        if self.depth > 0 && self.entries_written > 0 {
            warn!(
                "journal for {} dropped without done() at depth {} ({} pending entries left for reaper)",
                self.content_key, self.depth, self.entries_written
            );
        }
    }
}

/// Background sweep (§4.9): any journal row older than `max_age_secs` is
/// assumed to belong to a crashed operation. For each one, `destroy_page`
/// is run against the page URL the journal recorded, and the journal row
/// is dropped unconditionally afterward — even if `destroy_page` itself
/// fails — so a permanently-broken page can never wedge the reaper into
/// retrying it forever. Returns the content keys that were reaped.
pub fn reap_stale(
    locks: &PageLocks,
    store: &dyn KvStore,
    observers: &ObserverList,
    now: i64,
    max_age_secs: i64,
) -> crate::errors::Result<Vec<String>> {
    let mut reaped = Vec::new();
    for key in store.all_rows(Table::Journal)? {
        let row = store.get_row(Table::Journal, &key)?.unwrap_or_default();
        let oldest = row
            .iter()
            .filter_map(|(col, v)| col.starts_with("journal::timestamp::").then(|| v.as_i64()).flatten())
            .min();
        if let Some(ts) = oldest
            && now - ts > max_age_secs
        {
            let content_key = row
                .get("journal::url::0")
                .and_then(CellValue::as_text)
                .map(str::to_string)
                .unwrap_or_else(|| key.trim_start_matches("journal/").to_string());
            warn!("stale journal entry for {content_key}, oldest timestamp {ts}, destroying");
            if let Err(e) = crate::page_ops::destroy_page(locks, store, observers, &content_key) {
                warn!("destroy_page({content_key}) failed during journal reap: {e}");
            }
            store.drop_row(Table::Journal, &key)?;
            reaped.push(content_key);
        }
    }
    Ok(reaped)
}
