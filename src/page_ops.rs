//! Page lifecycle operations (§4.6): creating, cloning, moving, trashing
//! and destroying pages, plus the `modified_content` bookkeeping every
//! write-path operation calls through.

use crate::errors::{ContentError, Result};
use crate::keying::{branch_key, revision_key};
use crate::kv::{CellValue, Consistency, KvStore, Table};
use crate::observer::{DestroyKind, ObserverList};
use crate::revision_control::{self, PageLocks, Pointers};
use crate::status::{self, Status};

fn children_of(store: &dyn KvStore, content_key: &str) -> Result<Vec<String>> {
    let Some(row) = store.get_row(Table::Content, content_key)? else { return Ok(Vec::new()) };
    Ok(row
        .into_iter()
        .filter_map(|(col, val)| {
            col.starts_with("content::children::").then(|| val.as_text().map(str::to_string)).flatten()
        })
        .collect())
}

fn add_child(store: &dyn KvStore, parent_key: &str, child_key: &str) -> Result<()> {
    let existing = children_of(store, parent_key)?;
    let index = existing.len();
    store.put_cell(
        Table::Content,
        parent_key,
        &format!("content::children::{index}"),
        CellValue::Text(child_key.to_string()),
        Consistency::Any,
    )
}

/// Creates a brand new page: a content row with a `primary_owner` (putting
/// it in synthesized `Create` status), its first branch/revision, and the
/// current pointer for `locale`.
/// `page_type` defaults to `"page"` when the caller has no more specific
/// taxonomy entry; stored verbatim rather than resolved through a
/// taxonomy tree, which this port does not model.
///
/// `declarative` selects the branch this page's first revision lands on
/// (§4.6 create step 4): `true` allocates the reserved system branch 0,
/// for XML/declarative imports; `false` allocates the next user branch
/// via `new_branch`, for pages created through ordinary editing.
pub fn create_content(
    locks: &PageLocks,
    store: &dyn KvStore,
    observers: &ObserverList,
    content_key: &str,
    owner: &str,
    locale: &str,
    page_type: &str,
    now: i64,
    declarative: bool,
) -> Result<(u32, u32)> {
    if let Some(parent_key) = content_key.rsplit_once('/').map(|(p, _)| p.to_string())
        && store
            .get_cell(Table::Content, &parent_key, "content::final", Consistency::Any)?
            .and_then(|c| c.as_i8())
            == Some(1)
    {
        return Err(ContentError::invalid(format!("parent {parent_key} is final, cannot create {content_key}")));
    }
    if store.row_exists(Table::Content, content_key)? {
        // A page trashed via `trash_page` leaves its original row behind
        // as a DELETED tombstone; re-creating it resurrects that row to
        // NORMAL rather than erroring, since the branch/revision history
        // is still intact underneath it.
        if status::get_status(store, content_key)? == Status::Deleted {
            let from = Status::Deleted;
            status::set_status(store, content_key, Status::Normal, now)?;
            observers.status_changed(content_key, from, Status::Normal);
            let (branch, revision) = Pointers::current(store, content_key, locale)?
                .ok_or_else(|| ContentError::integrity(format!("resurrected page {content_key} has no current pointer")))?;
            return Ok((branch, revision));
        }
        return Err(ContentError::invalid(format!("page already exists: {content_key}")));
    }
    store.put_cell(
        Table::Content,
        content_key,
        "content::primary_owner",
        CellValue::Text(owner.to_string()),
        Consistency::Any,
    )?;
    store.put_cell(Table::Content, content_key, "content::created", CellValue::I64(now), Consistency::Any)?;
    store.put_cell(Table::Content, content_key, "content::modified", CellValue::I64(now), Consistency::Any)?;
    store.put_cell(
        Table::Content,
        content_key,
        "content::page_type",
        CellValue::Text(page_type.to_string()),
        Consistency::Any,
    )?;
    // Crash-recovery marker for §4.8: if the process dies before this
    // function reaches the status flip below, the background reaper finds
    // this row still present and either resets the page to NORMAL or drops
    // it, depending on whether `content::status_changed` looks live.
    store.put_cell(
        Table::Processing,
        content_key,
        "processing::state",
        CellValue::Text("CREATE".to_string()),
        Consistency::Any,
    )?;

    let branch = if declarative {
        revision_control::system_branch(locks, store, content_key)?
    } else {
        revision_control::new_branch(locks, store, content_key)?
    };
    let revision = revision_control::new_revision(locks, store, content_key, branch, Some(locale))?;
    Pointers::set_current(store, content_key, locale, branch, revision)?;

    let branch_row_key = branch_key(content_key, branch);
    store.put_cell(Table::Branch, &branch_row_key, "content::created", CellValue::I64(now), Consistency::Any)?;
    store.put_cell(Table::Branch, &branch_row_key, "content::modified", CellValue::I64(now), Consistency::Any)?;

    if let Some(parent_key) = content_key.rsplit_once('/').map(|(p, _)| p.to_string())
        && store.row_exists(Table::Content, &parent_key)?
    {
        add_child(store, &parent_key, content_key)?;
        store.put_cell(
            Table::Content,
            content_key,
            "content::parent",
            CellValue::Text(parent_key),
            Consistency::Any,
        )?;
    }

    status::set_status(store, content_key, Status::Normal, now)?;
    store.put_cell(Table::Content, "*index*", content_key, CellValue::I8(1), Consistency::Any)?;
    store.drop_row(Table::Processing, content_key)?;
    observers.create(content_key);
    Ok((branch, revision))
}

/// Records that `content_key`'s `(branch, revision)` was edited, updating
/// the modification timestamp on both the content row and its branch row.
/// A nonexistent page is not an error: the original logs a warning and
/// returns, since `modified_content` fires from event handlers that cannot
/// always know whether the page still exists.
pub fn modified_content(
    store: &dyn KvStore,
    observers: &ObserverList,
    content_key: &str,
    branch: u32,
    revision: u32,
    now: i64,
) -> Result<()> {
    if !store.row_exists(Table::Content, content_key)? {
        log::warn!("modified_content called on nonexistent page {content_key}");
        return Ok(());
    }
    store.put_cell(
        Table::Content,
        content_key,
        "content::modified",
        CellValue::I64(now),
        Consistency::Any,
    )?;
    store.put_cell(
        Table::Branch,
        &branch_key(content_key, branch),
        "content::modified",
        CellValue::I64(now),
        Consistency::Any,
    )?;
    observers.modified(content_key, branch, revision);
    Ok(())
}

/// Duplicates `src_key`'s current revision onto a freshly allocated branch
/// under `dst_key`, giving the new page its own `primary_owner` while
/// sharing the copied revision content.
pub fn clone_page(
    locks: &PageLocks,
    store: &dyn KvStore,
    observers: &ObserverList,
    src_key: &str,
    dst_key: &str,
    owner: &str,
    locale: &str,
) -> Result<(u32, u32)> {
    let (src_branch, src_revision) = Pointers::current(store, src_key, locale)?
        .ok_or_else(|| ContentError::not_found(format!("no current revision for {src_key}")))?;
    if store.row_exists(Table::Content, dst_key)? {
        return Err(ContentError::invalid(format!("page already exists: {dst_key}")));
    }
    store.put_cell(
        Table::Content,
        dst_key,
        "content::primary_owner",
        CellValue::Text(owner.to_string()),
        Consistency::Any,
    )?;
    let dst_branch = revision_control::new_branch(locks, store, dst_key)?;
    let dst_revision = revision_control::new_revision(locks, store, dst_key, dst_branch, Some(locale))?;
    revision_control::copy_branch(
        store, src_key, locale, src_branch, src_revision, dst_branch, dst_revision,
    )?;
    Pointers::set_current(store, dst_key, locale, dst_branch, dst_revision)?;
    observers.create(dst_key);
    Ok((dst_branch, dst_revision))
}

/// Renames a page's content key, moving its status to `Moved` and leaving a
/// `content::moved_to` pointer behind for old URLs to redirect from.
pub fn move_page(
    store: &dyn KvStore,
    observers: &ObserverList,
    content_key: &str,
    new_key: &str,
    now: i64,
) -> Result<()> {
    if !store.row_exists(Table::Content, content_key)? {
        return Err(ContentError::not_found(content_key.to_string()));
    }
    if store.row_exists(Table::Content, new_key)? {
        return Err(ContentError::invalid(format!("target already exists: {new_key}")));
    }
    let row = crate::kv::get_row_required(store, Table::Content, content_key)?;
    for (column, value) in row {
        store.put_cell(Table::Content, new_key, &column, value, Consistency::Any)?;
    }
    let from = status::get_status(store, content_key)?;
    status::set_status(store, content_key, Status::Moved, now)?;
    store.put_cell(
        Table::Content,
        content_key,
        "content::moved_to",
        CellValue::Text(new_key.to_string()),
        Consistency::Any,
    )?;
    observers.status_changed(content_key, from, Status::Moved);
    observers.moved(content_key, new_key);
    Ok(())
}

/// Moves a page's content into a new `trashcan/<id>` page (status
/// `HIDDEN`) and leaves the original row behind as a `DELETED` tombstone,
/// so `create_content` on the same key later can resurrect it instead of
/// erroring. Unlike `destroy_page`, no row is ever removed.
///
/// Returns the trashcan key the page's content now lives under.
pub fn trash_page(store: &dyn KvStore, observers: &ObserverList, content_key: &str, now: i64) -> Result<String> {
    if !store.row_exists(Table::Content, "trashcan")? {
        store.put_cell(
            Table::Content,
            "trashcan",
            "content::primary_owner",
            CellValue::Text("content".to_string()),
            Consistency::Any,
        )?;
        status::set_status(store, "trashcan", Status::Normal, now)?;
    }

    let trash_key = format!("trashcan/{}", uuid::Uuid::new_v4());
    let row = crate::kv::get_row_required(store, Table::Content, content_key)?;
    for (column, value) in &row {
        if matches!(column.as_str(), "content::status" | "content::status_changed") {
            continue;
        }
        store.put_cell(Table::Content, &trash_key, column, value.clone(), Consistency::Any)?;
    }
    status::set_status(store, &trash_key, Status::Hidden, now)?;
    observers.create(&trash_key);

    let from = status::get_status(store, content_key)?;
    status::set_status(store, content_key, Status::Deleted, now)?;
    store.put_cell(
        Table::Content,
        content_key,
        "content::trashed_to",
        CellValue::Text(trash_key.clone()),
        Consistency::Any,
    )?;
    observers.status_changed(content_key, from, Status::Deleted);
    Ok(trash_key)
}

/// Permanently removes a single revision row. Does not touch the branch row
/// or the content row, even if it was the last revision on the branch.
///
/// If the revision carries an attachment (§4.6 destroy step), the file's
/// back-reference to this page and the branch row's reference cell are
/// removed first, dropping the file row entirely once nothing references
/// it anymore.
pub fn destroy_revision(
    store: &dyn KvStore,
    observers: &ObserverList,
    content_key: &str,
    locale: &str,
    branch: u32,
    revision: u32,
) -> Result<()> {
    let key = revision_key(content_key, locale, branch, revision);
    if let Some(row) = store.get_row(Table::Revision, &key)?
        && let Some(CellValue::Bytes16(digest_bytes)) = row.get("content::attachment")
    {
        let digest = hex::encode(digest_bytes);
        crate::attachment::release_attachment(store, &digest, content_key)?;
        store.remove_cell(
            Table::Branch,
            &branch_key(content_key, branch),
            &format!("content::attachment::reference::{digest}"),
        )?;
    }
    store.drop_row(Table::Revision, &key)?;
    observers.destroy(content_key, DestroyKind::Revision);
    Ok(())
}

/// Permanently removes a page: every branch row, every revision row under
/// every branch this page has ever allocated, and the content row itself.
///
/// When the `recursive-destroy` feature flag is enabled (the corrected
/// default; see the REDESIGN FLAGS), children are destroyed first so no
/// page is left with a dangling `content::parent`. When disabled, children
/// are reparented to nothing and the caller is responsible for cleanup,
/// matching the original behavior this flag exists to let operators opt
/// back into.
pub fn destroy_page(_locks: &PageLocks, store: &dyn KvStore, observers: &ObserverList, content_key: &str) -> Result<()> {
    if crate::feature_flags::is_enabled("recursive-destroy") {
        // Explicit work-queue rather than direct recursion, so a deep page
        // tree cannot overflow the call stack (REDESIGN FLAGS).
        let mut queue: Vec<String> = children_of(store, content_key)?;
        while let Some(next) = queue.pop() {
            queue.extend(children_of(store, &next)?);
            destroy_page_single(store, observers, &next)?;
        }
    }

    destroy_page_single(store, observers, content_key)
}

fn destroy_page_single(store: &dyn KvStore, observers: &ObserverList, content_key: &str) -> Result<()> {
    let row = store.get_row(Table::Content, content_key)?;
    let last_branch = row.as_ref().and_then(|r| r.get("content::revision_control::last_branch")).and_then(CellValue::as_u32);
    if let (Some(row), Some(last)) = (row.as_ref(), last_branch) {
        for branch in 0..=last {
            // Discover every locale this branch actually has revisions under
            // (plus the locale-less form, if any) by reading back the
            // `last_revision` counters `new_revision` wrote, rather than
            // assuming a fixed locale set.
            let no_locale_column = format!("content::revision_control::last_revision::{branch}");
            let locale_prefix = format!("{no_locale_column}::");
            let mut scopes: Vec<(&str, u32)> = Vec::new();
            if let Some(last_revision) = row.get(&no_locale_column).and_then(CellValue::as_u32) {
                scopes.push(("", last_revision));
            }
            for (column, value) in row {
                if let Some(locale) = column.strip_prefix(&locale_prefix)
                    && let Some(last_revision) = value.as_u32()
                {
                    scopes.push((locale, last_revision));
                }
            }
            for (locale, last_revision) in scopes {
                for revision in 0..=last_revision {
                    let key = revision_key(content_key, locale, branch, revision);
                    store.drop_row(Table::Revision, &key)?;
                }
            }
            store.drop_row(Table::Branch, &branch_key(content_key, branch))?;
        }
    }

    store.drop_row(Table::Content, content_key)?;
    store.remove_cell(Table::Content, "*index*", content_key)?;
    crate::path_context::invalidate(store, content_key)?;
    observers.destroy(content_key, DestroyKind::Page);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    fn create(store: &dyn KvStore, locks: &PageLocks, observers: &ObserverList, key: &str) -> (u32, u32) {
        create_content(locks, store, observers, key, "output", "en", "page", 0, false).unwrap()
    }

    #[test]
    fn create_content_sets_owner_status_and_pointer() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        let (branch, revision) = create(&store, &locks, &observers, "x/a");
        assert_eq!((branch, revision), (1, 0));
        assert_eq!(status::get_status(&store, "x/a").unwrap(), Status::Normal);
        assert_eq!(Pointers::current(&store, "x/a", "en").unwrap(), Some((1, 0)));
        let branch_created =
            store.get_cell(Table::Branch, &branch_key("x/a", 1), "content::created", Consistency::Any).unwrap();
        assert_eq!(branch_created, Some(CellValue::I64(0)));
        let indexed = store.get_cell(Table::Content, "*index*", "x/a", Consistency::Any).unwrap();
        assert_eq!(indexed, Some(CellValue::I8(1)));
    }

    #[test]
    fn create_content_declarative_uses_system_branch_zero() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        let (branch, revision) =
            create_content(&locks, &store, &observers, "x/a", "output", "xx", "page", 0, true).unwrap();
        assert_eq!((branch, revision), (0, 0));
    }

    #[test]
    fn create_content_refuses_under_final_parent() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        create(&store, &locks, &observers, "x");
        store.put_cell(Table::Content, "x", "content::final", CellValue::I8(1), Consistency::Any).unwrap();
        assert!(create_content(&locks, &store, &observers, "x/a", "output", "en", "page", 0, false).is_err());
    }

    #[test]
    fn create_content_rejects_duplicate() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        create(&store, &locks, &observers, "x/a");
        assert!(create_content(&locks, &store, &observers, "x/a", "output", "en", "page", 0, false).is_err());
    }

    #[test]
    fn create_content_resurrects_deleted_tombstone() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        create(&store, &locks, &observers, "x/a");
        trash_page(&store, &observers, "x/a", 1).unwrap();
        assert_eq!(status::get_status(&store, "x/a").unwrap(), Status::Deleted);
        create_content(&locks, &store, &observers, "x/a", "output", "en", "page", 2, false).unwrap();
        assert_eq!(status::get_status(&store, "x/a").unwrap(), Status::Normal);
        assert!(store.row_exists(Table::Content, "x/a").unwrap());
    }

    #[test]
    fn create_content_links_parent_child() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        create(&store, &locks, &observers, "x");
        create(&store, &locks, &observers, "x/a");
        assert_eq!(children_of(&store, "x").unwrap(), vec!["x/a".to_string()]);
    }

    #[test]
    fn clone_page_duplicates_revision_content() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        create(&store, &locks, &observers, "x/a");
        store
            .put_cell(
                Table::Revision,
                &revision_key("x/a", "en", 1, 0),
                "content::body",
                CellValue::Text("hello".into()),
                Consistency::Any,
            )
            .unwrap();
        clone_page(&locks, &store, &observers, "x/a", "x/b", "output", "en").unwrap();
        let body = store
            .get_cell(Table::Revision, &revision_key("x/b", "en", 1, 0), "content::body", Consistency::Any)
            .unwrap();
        assert_eq!(body, Some(CellValue::Text("hello".into())));
    }

    #[test]
    fn move_page_sets_moved_status_and_redirect() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        create(&store, &locks, &observers, "x/a");
        move_page(&store, &observers, "x/a", "x/b", 2).unwrap();
        assert_eq!(status::get_status(&store, "x/a").unwrap(), Status::Moved);
        let redirect =
            store.get_cell(Table::Content, "x/a", "content::moved_to", Consistency::Any).unwrap();
        assert_eq!(redirect, Some(CellValue::Text("x/b".into())));
    }

    #[test]
    fn trash_page_deletes_source_and_hides_trashcan_copy() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        create(&store, &locks, &observers, "x/a");
        let trash_key = trash_page(&store, &observers, "x/a", 2).unwrap();
        assert_eq!(status::get_status(&store, "x/a").unwrap(), Status::Deleted);
        assert_eq!(status::get_status(&store, &trash_key).unwrap(), Status::Hidden);
        assert!(store.row_exists(Table::Content, "trashcan").unwrap());
    }

    #[test]
    fn destroy_page_removes_all_revision_rows() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        create(&store, &locks, &observers, "x/a");
        destroy_page(&locks, &store, &observers, "x/a").unwrap();
        assert!(!store.row_exists(Table::Content, "x/a").unwrap());
        assert!(!store.row_exists(Table::Revision, &revision_key("x/a", "en", 1, 0)).unwrap());
        assert!(
            store.get_cell(Table::Content, "*index*", "x/a", Consistency::Any).unwrap().is_none()
        );
    }

    #[test]
    fn destroy_page_recurses_into_children_by_default() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        create(&store, &locks, &observers, "x");
        create(&store, &locks, &observers, "x/a");
        destroy_page(&locks, &store, &observers, "x").unwrap();
        assert!(!store.row_exists(Table::Content, "x/a").unwrap());
    }

    #[test]
    fn destroy_revision_leaves_branch_row_intact() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        create(&store, &locks, &observers, "x/a");
        destroy_revision(&store, &observers, "x/a", "en", 1, 0).unwrap();
        assert!(!store.row_exists(Table::Revision, &revision_key("x/a", "en", 1, 0)).unwrap());
        assert!(store.row_exists(Table::Content, "x/a").unwrap());
    }

    #[test]
    fn destroy_revision_dereferences_attachment_and_drops_file_row() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        create(&store, &locks, &observers, "x/a");
        let digest = crate::attachment::store_attachment(&store, b"payload", false).unwrap();
        crate::attachment::add_reference(&store, &digest, "x/a").unwrap();
        let mut digest_bytes = [0u8; 16];
        let raw = hex::decode(&digest).unwrap();
        digest_bytes.copy_from_slice(&raw);
        let rev_key = revision_key("x/a", "en", 1, 0);
        store
            .put_cell(Table::Revision, &rev_key, "content::attachment", CellValue::Bytes16(digest_bytes), Consistency::Any)
            .unwrap();
        store
            .put_cell(
                Table::Branch,
                &branch_key("x/a", 1),
                &format!("content::attachment::reference::{digest}"),
                CellValue::I64(0),
                Consistency::Any,
            )
            .unwrap();
        destroy_revision(&store, &observers, "x/a", "en", 1, 0).unwrap();
        assert_eq!(crate::attachment::reference_count(&store, &digest).unwrap(), 0);
        let branch_cell = store
            .get_cell(Table::Branch, &branch_key("x/a", 1), &format!("content::attachment::reference::{digest}"), Consistency::Any)
            .unwrap();
        assert_eq!(branch_cell, None);
    }
}
