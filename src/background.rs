//! Periodic maintenance (§4.8): reaping stuck `processing` rows left behind
//! by a crashed `create_content`, and rebuilding the `*index*` rows that let
//! lookups avoid a full content-table scan.
//!
//! Modeled as plain functions invoked on a fixed cadence by a `tokio`
//! interval task (`spawn_worker`), rather than a dedicated actor: the
//! original content plugin's backend worker is a single timer-driven sweep
//! too, not a queue consumer.

use crate::config::Config;
use crate::errors::Result;
use crate::kv::{CellValue, Consistency, KvStore, Table};
use crate::status::{self, Status};
use log::info;
use std::sync::Arc;
use std::time::Duration;

/// Scans the `processing` table (§4.8 step 1): a row there marks a page
/// mid-transition, written by `create_content` before it starts touching
/// branch/revision rows and dropped once the page reaches NORMAL. A row
/// still present here means the writer that created it either crashed or
/// is still working.
///
/// For each row whose content page still exists with a
/// `content::status_changed` older than `max_age_secs`, the processing row
/// is dropped and, if its recorded state is CREATE, the page is reset to
/// NORMAL. For a row whose content page no longer exists at all, the
/// processing row is simply dropped as an orphan. A row for a page that is
/// still within the age window is left alone: a writer may genuinely still
/// be in the middle of it. Returns the content keys that were reaped.
pub fn reap_expired_status(store: &dyn KvStore, now: i64, max_age_secs: i64) -> Result<Vec<String>> {
    let mut reaped = Vec::new();
    for content_key in store.all_rows(Table::Processing)? {
        if !store.row_exists(Table::Content, &content_key)? {
            store.drop_row(Table::Processing, &content_key)?;
            reaped.push(content_key);
            continue;
        }
        let changed = store
            .get_cell(Table::Content, &content_key, "content::status_changed", Consistency::Quorum)?
            .and_then(|c| c.as_i64());
        let Some(ts) = changed else { continue };
        if now - ts <= max_age_secs {
            continue;
        }
        let state = store
            .get_cell(Table::Processing, &content_key, "processing::state", Consistency::Any)?
            .and_then(|c| c.as_text().map(str::to_string));
        if state.as_deref() == Some("CREATE") && status::get_status(store, &content_key)? != Status::Normal {
            status::set_status(store, &content_key, Status::Normal, now)?;
        }
        store.drop_row(Table::Processing, &content_key)?;
        reaped.push(content_key);
    }
    Ok(reaped)
}

/// Rebuilds the `*index*` row (§4.8 step 2) in a forward pass (adding pages
/// that have `content::created` but are missing from the index) followed by
/// a reverse pass (dropping index entries whose page no longer has
/// `content::created`, e.g. after an out-of-band row deletion). Returns the
/// number of entries the forward pass wrote.
pub fn rebuild_index(store: &dyn KvStore) -> Result<u32> {
    let mut written = 0u32;
    for key in store.all_rows(Table::Content)? {
        if key.is_empty() || key.starts_with('*') {
            continue;
        }
        let has_created =
            store.get_cell(Table::Content, &key, "content::created", Consistency::Any)?.is_some();
        if has_created {
            store.put_cell(Table::Content, "*index*", &key, CellValue::I8(1), Consistency::Any)?;
            written += 1;
        }
    }
    let index_row = store.get_row(Table::Content, "*index*")?.unwrap_or_default();
    for name in index_row.keys() {
        let still_live =
            store.get_cell(Table::Content, name, "content::created", Consistency::Any)?.is_some();
        if !still_live {
            store.remove_cell(Table::Content, "*index*", name)?;
        }
    }
    Ok(written)
}

/// Spawns the periodic maintenance loop: processing reap on
/// `status_reap_cadence_secs`, index rebuild on `journal_reap_cadence_secs`
/// (reusing the journal cadence, since both are cheap full-table scans in
/// this in-memory store and the original worker runs them off one timer).
pub fn spawn_worker(store: Arc<dyn KvStore>, config: Config, now_fn: impl Fn() -> i64 + Send + 'static) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut status_tick = tokio::time::interval(Duration::from_secs(config.status_reap_cadence_secs));
        let mut index_tick = tokio::time::interval(Duration::from_secs(config.journal_reap_cadence_secs));
        loop {
            tokio::select! {
                _ = status_tick.tick() => {
                    let now = now_fn();
                    match reap_expired_status(store.as_ref(), now, config.status_reap_age_secs as i64) {
                        Ok(reaped) if !reaped.is_empty() => {
                            info!("{} processing rows reaped", reaped.len());
                        }
                        Ok(_) => {}
                        Err(e) => log::error!("status reap failed: {e}"),
                    }
                }
                _ = index_tick.tick() => {
                    match rebuild_index(store.as_ref()) {
                        Ok(n) => info!("rebuilt index for {n} pages"),
                        Err(e) => log::error!("index rebuild failed: {e}"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::observer::ObserverList;
    use crate::revision_control::PageLocks;

    #[test]
    fn reap_resets_stale_create_row_to_normal() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        crate::page_ops::create_content(&locks, &store, &observers, "x/a", "output", "en", "page", 0, false).unwrap();
        // create_content already cleaned up its own processing row on
        // success; simulate a crash mid-creation by reinstating one against
        // the page it left in NORMAL with an old status_changed timestamp.
        store
            .put_cell(Table::Processing, "x/a", "processing::state", CellValue::Text("CREATE".into()), Consistency::Any)
            .unwrap();
        store
            .put_cell(Table::Content, "x/a", "content::status_changed", CellValue::I64(0), Consistency::Quorum)
            .unwrap();
        store.put_cell(Table::Content, "x/a", "content::status", CellValue::I8(5), Consistency::Quorum).unwrap();

        let reaped = reap_expired_status(&store, 10_000, 600).unwrap();
        assert_eq!(reaped, vec!["x/a".to_string()]);
        assert!(!store.row_exists(Table::Processing, "x/a").unwrap());
        assert_eq!(status::get_status(&store, "x/a").unwrap(), Status::Normal);
    }

    #[test]
    fn reap_drops_orphaned_processing_row_for_missing_page() {
        let store = MemoryStore::ephemeral();
        store
            .put_cell(Table::Processing, "x/gone", "processing::state", CellValue::Text("CREATE".into()), Consistency::Any)
            .unwrap();
        let reaped = reap_expired_status(&store, 1000, 100).unwrap();
        assert_eq!(reaped, vec!["x/gone".to_string()]);
        assert!(!store.row_exists(Table::Processing, "x/gone").unwrap());
    }

    #[test]
    fn reap_leaves_fresh_processing_row_alone() {
        let store = MemoryStore::ephemeral();
        store
            .put_cell(Table::Content, "x/a", "content::status_changed", CellValue::I64(950), Consistency::Quorum)
            .unwrap();
        store
            .put_cell(Table::Processing, "x/a", "processing::state", CellValue::Text("CREATE".into()), Consistency::Any)
            .unwrap();
        let reaped = reap_expired_status(&store, 1000, 100).unwrap();
        assert!(reaped.is_empty());
        assert!(store.row_exists(Table::Processing, "x/a").unwrap());
    }

    #[test]
    fn rebuild_index_adds_missing_entries_and_drops_stale_ones() {
        let store = MemoryStore::ephemeral();
        store.put_cell(Table::Content, "x/a", "content::created", CellValue::I64(1), Consistency::Any).unwrap();
        // A stale entry for a page that no longer has a content row.
        store.put_cell(Table::Content, "*index*", "x/gone", CellValue::I8(1), Consistency::Any).unwrap();

        let written = rebuild_index(&store).unwrap();
        assert_eq!(written, 1);
        let index_row = store.get_row(Table::Content, "*index*").unwrap().unwrap();
        assert!(index_row.contains_key("x/a"));
        assert!(!index_row.contains_key("x/gone"));
    }
}
