//! End-to-end scenarios (S1-S6), exercised through `ContentEngine` the way
//! a caller outside the crate would use it, rather than reaching into
//! individual modules directly.

use contentd::engine::ContentEngine;
use contentd::kv::{CellValue, Consistency, KvStore, Table};
use contentd::status::Status;

#[test]
fn s1_create_then_mark_modified() {
    let engine = ContentEngine::ephemeral();
    let (branch, revision) = engine.create_content("x/a", "output", "en", "page", 0).unwrap();
    engine.modified_content("x/a", branch, revision, 1).unwrap();

    assert_eq!(
        engine.store.get_cell(Table::Content, "x/a", "content::primary_owner", Consistency::Any).unwrap(),
        Some(CellValue::Text("output".to_string()))
    );
    assert_eq!(engine.status("x/a").unwrap(), Status::Normal);
    assert_eq!(
        engine.store.get_cell(Table::Content, "x/a", "content::created", Consistency::Any).unwrap(),
        Some(CellValue::I64(0))
    );
    assert_eq!(
        engine.store.get_cell(Table::Content, "x/a", "content::modified", Consistency::Any).unwrap(),
        Some(CellValue::I64(1))
    );
    // Ordinary (non-declarative) creation lands on the first user branch, 1,
    // not the reserved system branch 0.
    let branch_key = "x/a#1";
    assert_eq!(
        engine.store.get_cell(Table::Branch, branch_key, "content::created", Consistency::Any).unwrap(),
        Some(CellValue::I64(0))
    );
    assert_eq!(
        engine.store.get_cell(Table::Branch, branch_key, "content::modified", Consistency::Any).unwrap(),
        Some(CellValue::I64(1))
    );
    assert_eq!(
        engine.store.get_cell(Table::Content, "*index*", "x/a", Consistency::Any).unwrap(),
        Some(CellValue::I8(1))
    );
}

#[test]
fn s2_attachment_dedup_across_pages() {
    let engine = ContentEngine::ephemeral();
    engine.create_content("x/page1", "output", "en", "page", 0).unwrap();
    engine.create_content("x/page2", "output", "en", "page", 0).unwrap();

    let bytes = vec![7u8; 100];
    let input1 = contentd::attachment::AttachmentInput {
        parent_path: "x/page1",
        filename: "photo.png",
        bytes: &bytes,
        mime_type: "image/png",
        original_mime_type: "image/png",
        owner: "output",
        revision_limit: 0,
    };
    let result1 = engine.ingest_attachment(&input1, 0).unwrap();
    let input2 = contentd::attachment::AttachmentInput {
        parent_path: "x/page2",
        filename: "photo.png",
        bytes: &bytes,
        mime_type: "image/png",
        original_mime_type: "image/png",
        owner: "output",
        revision_limit: 0,
    };
    let result2 = engine.ingest_attachment(&input2, 0).unwrap();
    assert_eq!(result1.digest, result2.digest);

    let key = format!("files/{}", result1.digest);
    let size = engine.store.get_cell(Table::Files, &key, "content::files::size", Consistency::Any).unwrap();
    assert_eq!(size, Some(CellValue::U32(100)));
    assert_eq!(contentd::attachment::reference_count(engine.store.as_ref(), &result1.digest).unwrap(), 2);

    // Releasing one page's reference keeps the shared blob alive; releasing
    // the other drops it.
    contentd::attachment::release_attachment(engine.store.as_ref(), &result1.digest, &result1.attachment_key).unwrap();
    assert!(engine.store.row_exists(Table::Files, &key).unwrap());
    contentd::attachment::release_attachment(engine.store.as_ref(), &result1.digest, &result2.attachment_key).unwrap();
    assert!(!engine.store.row_exists(Table::Files, &key).unwrap());
}

#[test]
fn s3_status_transitions() {
    let engine = ContentEngine::ephemeral();
    engine.create_content("x/a", "output", "en", "page", 0).unwrap();

    // NORMAL -> HIDDEN -> DELETED succeeds.
    engine.set_status("x/a", Status::Hidden, 1).unwrap();
    engine.set_status("x/a", Status::Deleted, 2).unwrap();
    assert_eq!(engine.status("x/a").unwrap(), Status::Deleted);

    // NORMAL -> CREATE fails: resurrect to NORMAL first, Create can never
    // be persisted via set_status (it is synthesized, not stored).
    engine.set_status("x/a", Status::Normal, 3).unwrap();
    assert!(engine.set_status("x/a", Status::Create, 4).is_err());

    // Undefined (no row at all) -> NORMAL fails.
    assert!(engine.set_status("x/unknown", Status::Normal, 0).is_err());

    // Undefined -> CREATE: Create is synthesized the moment a primary_owner
    // cell exists without a status cell, not reached through set_status.
    engine
        .store
        .put_cell(Table::Content, "x/fresh", "content::primary_owner", CellValue::Text("output".into()), Consistency::Any)
        .unwrap();
    assert_eq!(engine.status("x/fresh").unwrap(), Status::Create);
}

#[test]
fn s4_journal_reap_surfaces_crashed_operation() {
    let engine = ContentEngine::ephemeral();
    engine.create_content("x/new", "output", "en", "page", 0).unwrap();
    let mut journal = contentd::journal::JournalList::start(engine.store.as_ref(), "x/new");
    journal.add_page_url("x/new", 0).unwrap();
    drop(journal); // simulates a crash: no done() call, row stays behind

    let stale = contentd::journal::reap_stale(&engine.locks, engine.store.as_ref(), &engine.observers, 6 * 60, 5 * 60).unwrap();
    assert_eq!(stale, vec!["x/new".to_string()]);
    // destroy_page actually ran against the crashed page's URL...
    assert!(!engine.store.row_exists(Table::Content, "x/new").unwrap());
    // ...and the journal row was dropped regardless.
    assert!(!engine.store.row_exists(Table::Journal, "journal/x/new").unwrap());
}

#[test]
fn s5_js_versioning_indexes_by_name_browser_and_packed_version() {
    let engine = ContentEngine::ephemeral();
    engine.create_content("js", "output", "xx", "page", 0).unwrap();
    let src = b"// Name: editor\n// Version: 1.2.3\n// Browsers: all\nconsole.log(1);".to_vec();
    let input = contentd::attachment::AttachmentInput {
        parent_path: "js",
        filename: "editor_1.2.3.js",
        bytes: &src,
        mime_type: "text/javascript",
        original_mime_type: "text/javascript",
        owner: "output",
        revision_limit: 0,
    };
    let result = engine.ingest_attachment(&input, 0).unwrap();
    // The version's leading component becomes the attachment page's branch.
    assert_eq!(result.branch, 1);
    assert_eq!(result.attachment_key, "js/editor.js");

    let row = engine.store.get_row(Table::Files, "files::javascripts").unwrap().unwrap();
    let column = "editor.js\0all\01.2.3.0";
    assert_eq!(row.get(column), Some(&CellValue::Text(result.digest.clone())));
}

#[test]
fn s6_trash_then_undelete() {
    let engine = ContentEngine::ephemeral();
    engine.create_content("x/a", "output", "en", "page", 0).unwrap();

    let trash_key = engine.trash_page("x/a", 1).unwrap();
    assert!(engine.store.row_exists(Table::Content, "trashcan").unwrap());
    assert_eq!(engine.status("x/a").unwrap(), Status::Deleted);
    assert_eq!(engine.status(&trash_key).unwrap(), Status::Hidden);

    engine.create_content("x/a", "output", "en", "page", 2).unwrap();
    assert_eq!(engine.status("x/a").unwrap(), Status::Normal);
    assert!(engine.store.row_exists(Table::Content, "x/a").unwrap());
}
