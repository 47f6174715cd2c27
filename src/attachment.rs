//! Attachments (§4.7): binary blobs (images, JS, CSS, generic files)
//! content-addressed by MD5 so identical uploads across pages share one
//! copy in the `files` table. Unlike a plain refcount, each referencing
//! page (or, for JS/CSS, each canonical site-relative name) gets its own
//! `content::files::reference::<page-or-site-uri>` cell (`1` = new, `2` =
//! checked by the background reprocessor); a file row survives as long as
//! at least one such cell exists.

use crate::errors::{ContentError, Result};
use crate::keying::{branch_key, revision_key};
use crate::kv::{CellValue, Consistency, KvStore, Row, Table};
use crate::observer::{ObserverList, SecurityVerdict};
use crate::revision_control::{self, PageLocks, Pointers};
use flate2::write::GzEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Generic,
    Image,
    JavaScript,
    Css,
}

impl Kind {
    fn from_parent_path(parent_path: &str) -> Self {
        if parent_path.starts_with("js/") {
            Kind::JavaScript
        } else if parent_path.starts_with("css/") {
            Kind::Css
        } else {
            Kind::Generic
        }
    }

    fn valid_extension(self, filename: &str) -> bool {
        match self {
            Kind::JavaScript => {
                filename.ends_with(".js") || filename.ends_with(".min.js") || filename.ends_with(".org.js")
            }
            Kind::Css => filename.ends_with(".css") || filename.ends_with(".min.css"),
            Kind::Generic | Kind::Image => true,
        }
    }
}

#[must_use]
pub fn digest_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn file_key(digest: &str) -> String {
    format!("files/{digest}")
}

fn reference_cell(name: &str) -> String {
    format!("content::files::reference::{name}")
}

fn new_index_key() -> &'static str {
    "new"
}

/// Stores `data` under its MD5 digest if not already present. Returns
/// `(digest, newly_created)`; callers add the digest to the `new` index
/// only when `newly_created` is true.
fn ensure_file_row(
    store: &dyn KvStore,
    data: &[u8],
    mime_type: &str,
    original_mime_type: &str,
    compress: bool,
    now: i64,
) -> Result<(String, bool)> {
    let digest = digest_hex(data);
    let key = file_key(&digest);
    let created = if !store.row_exists(Table::Files, &key)? {
        let payload = if compress { gzip(data)? } else { data.to_vec() };
        store.put_cell(Table::Files, &key, "content::files::data", CellValue::Bytes(payload), Consistency::Any)?;
        store.put_cell(
            Table::Files,
            &key,
            "content::files::data::gzip_compressed",
            CellValue::Bool(compress),
            Consistency::Any,
        )?;
        store.put_cell(Table::Files, &key, "content::files::size", CellValue::U32(data.len() as u32), Consistency::Any)?;
        store.put_cell(
            Table::Files,
            &key,
            "content::files::mime_type",
            CellValue::Text(mime_type.to_string()),
            Consistency::Any,
        )?;
        store.put_cell(
            Table::Files,
            &key,
            "content::files::original_mime_type",
            CellValue::Text(original_mime_type.to_string()),
            Consistency::Any,
        )?;
        store.put_cell(Table::Files, &key, "content::files::created", CellValue::I64(now), Consistency::Any)?;
        store.put_cell(Table::Files, &key, "content::files::updated", CellValue::I64(now), Consistency::Any)?;
        store.put_cell(Table::Files, &key, "content::files::secure", CellValue::I8(0), Consistency::Any)?;
        store.put_cell(Table::Files, &key, "content::files::secure_last_check", CellValue::I64(0), Consistency::Any)?;
        store.put_cell(
            Table::Files,
            &key,
            "content::files::security_reason",
            CellValue::Text(String::new()),
            Consistency::Any,
        )?;
        if let Ok((w, h)) = image_dimensions(data) {
            store.put_cell(Table::Files, &key, "content::files::image_width", CellValue::U32(w), Consistency::Any)?;
            store.put_cell(Table::Files, &key, "content::files::image_height", CellValue::U32(h), Consistency::Any)?;
        }
        true
    } else {
        false
    };
    Ok((digest, created))
}

/// Stores `data` under its MD5 digest, as a standalone primitive (used
/// directly by tests and by callers that don't need the full ingestion
/// pipeline). Adds one reference cell named `reference_name`.
pub fn store_attachment(store: &dyn KvStore, data: &[u8], compress: bool) -> Result<String> {
    let (digest, created) = ensure_file_row(store, data, "application/octet-stream", "application/octet-stream", compress, 0)?;
    if created {
        store.put_cell(Table::Files, new_index_key(), &digest, CellValue::I8(1), Consistency::Any)?;
    }
    Ok(digest)
}

/// Adds (or refreshes to `1`, "new") a reference cell on the file row for
/// `digest`.
pub fn add_reference(store: &dyn KvStore, digest: &str, reference_name: &str) -> Result<()> {
    store.put_cell(
        Table::Files,
        &file_key(digest),
        &reference_cell(reference_name),
        CellValue::I8(1),
        Consistency::Any,
    )
}

fn reference_cells(row: &Row) -> impl Iterator<Item = &String> {
    row.keys().filter(|c| c.starts_with("content::files::reference::"))
}

/// Drops a page's (or canonical JS/CSS name's) reference to an attachment,
/// deleting the file row entirely once no `reference::*` cell remains
/// (§3.4, §4.6 `destroy_revision` step 1).
pub fn release_attachment(store: &dyn KvStore, digest: &str, reference_name: &str) -> Result<()> {
    let key = file_key(digest);
    store.remove_cell(Table::Files, &key, &reference_cell(reference_name))?;
    let Some(row) = store.get_row(Table::Files, &key)? else { return Ok(()) };
    if reference_cells(&row).next().is_none() {
        store.drop_row(Table::Files, &key)?;
    }
    Ok(())
}

#[must_use]
pub fn reference_count(store: &dyn KvStore, digest: &str) -> Result<usize> {
    let Some(row) = store.get_row(Table::Files, &file_key(digest))? else { return Ok(0) };
    Ok(reference_cells(&row).count())
}

/// `content::newfile` CLI action: re-marks an existing file for background
/// reprocessing by resetting every `reference::*` cell on its row back to
/// `1` ("new") and re-adding it to the `new` index.
pub fn mark_as_new(store: &dyn KvStore, digest: &str) -> Result<()> {
    let key = file_key(digest);
    let row = crate::kv::get_row_required(store, Table::Files, &key)?;
    let reference_names: Vec<String> = reference_cells(&row).cloned().collect();
    for cell_name in reference_names {
        store.put_cell(Table::Files, &key, &cell_name, CellValue::I8(1), Consistency::Any)?;
    }
    store.put_cell(Table::Files, new_index_key(), digest, CellValue::I8(1), Consistency::Any)?;
    Ok(())
}

/// Reads back an attachment's original bytes, decompressing if it was
/// stored gzip-compressed.
pub fn load_attachment(store: &dyn KvStore, digest: &str) -> Result<Vec<u8>> {
    let key = file_key(digest);
    let row = crate::kv::get_row_required(store, Table::Files, &key)?;
    let data = row
        .get("content::files::data")
        .and_then(CellValue::as_bytes)
        .ok_or_else(|| ContentError::integrity("content::files::data missing or wrong type"))?;
    let compressed =
        row.get("content::files::data::gzip_compressed").and_then(CellValue::as_bool).unwrap_or(false);
    if compressed { gunzip(data) } else { Ok(data.to_vec()) }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Image attachments carry their pixel dimensions so templates can emit
/// `width`/`height` attributes without a round trip to the browser.
pub fn image_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    let img = image::load_from_memory(data).map_err(|e| ContentError::invalid(e.to_string()))?;
    use image::GenericImageView;
    Ok(img.dimensions())
}

/// `1.2.10` -> `[1, 2, 10]`, used to order JS/CSS attachment versions found
/// in a `@version` header comment, since plain string comparison would put
/// `1.10` before `1.9`.
#[must_use]
pub fn parse_version(version: &str) -> Vec<u32> {
    version.split('.').map(|p| p.parse::<u32>().unwrap_or(0)).collect()
}

/// A parsed JS/CSS header comment (§4.7 steps 3-4): `Name`, `Version` and
/// `Browsers` fields out of the first lines of the file.
#[derive(Debug, Clone, Default)]
pub struct HeaderInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub browsers: Vec<String>,
}

fn extract_header_field(source: &str, field: &str) -> Option<String> {
    for line in source.lines().take(20) {
        if let Some(pos) = line.find(field) {
            let rest = &line[pos + field.len()..];
            let rest = rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
            let value: String = rest.trim_end_matches(|c: char| c == '*' || c == '/').trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// Extracts a JS/CSS `@version`-style header comment: the first line of
/// the form `// @version 1.2.3` (or `/* @version 1.2.3 */` for CSS).
#[must_use]
pub fn extract_header_version(source: &str) -> Option<String> {
    for line in source.lines().take(20) {
        if let Some(pos) = line.find("@version").or_else(|| line.find("Version")) {
            let marker_len = if line[pos..].starts_with("@version") { "@version".len() } else { "Version".len() };
            let rest = &line[pos + marker_len..];
            let version: String = rest
                .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if !version.is_empty() {
                return Some(version);
            }
        }
    }
    None
}

/// Parses the full top-of-file header block used by JS/CSS attachments.
#[must_use]
pub fn parse_header(source: &str) -> HeaderInfo {
    let browsers = extract_header_field(source, "Browsers")
        .map(|s| s.split(',').map(|b| b.trim().to_string()).filter(|b| !b.is_empty()).collect())
        .unwrap_or_default();
    HeaderInfo { name: extract_header_field(source, "Name"), version: extract_header_version(source), browsers }
}

/// A minimal whitespace/comment-stripping CSS minifier, in the style of
/// `ftml`'s typography normalization: no tokenizer, just line-oriented
/// passes good enough for stylesheet attachments.
#[must_use]
pub fn minify_css(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_comment = false;
    while let Some(c) = chars.next() {
        if in_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_comment = false;
            }
            continue;
        }
        if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            in_comment = true;
            continue;
        }
        if c.is_whitespace() {
            if out.ends_with(' ') || out.is_empty() {
                continue;
            }
            out.push(' ');
            continue;
        }
        out.push(c);
    }
    out.trim().to_string()
}

/// Input to `ingest_attachment` (§4.7): one file being attached to one
/// parent page.
pub struct AttachmentInput<'a> {
    pub parent_path: &'a str,
    pub filename: &'a str,
    pub bytes: &'a [u8],
    pub mime_type: &'a str,
    pub original_mime_type: &'a str,
    pub owner: &'a str,
    pub revision_limit: u32,
}

pub struct AttachmentResult {
    pub attachment_key: String,
    pub digest: String,
    pub branch: u32,
    pub revision_label: String,
}

/// Full ingestion pipeline (§4.7 steps 1-12): security pre-check, parent
/// validation, JS/CSS header parsing and canonical renaming, MD5 dedup,
/// reference-cell bookkeeping, branch/revision resolution, and field
/// linking on the parent.
pub fn ingest_attachment(
    locks: &PageLocks,
    store: &dyn KvStore,
    observers: &ObserverList,
    input: &AttachmentInput<'_>,
    now: i64,
) -> Result<AttachmentResult> {
    // Step 1: security pre-check (fast mode).
    if let SecurityVerdict::Insecure(reason) = observers.check_attachment_security(input.parent_path, input.bytes, false) {
        log::error!("attachment rejected for {}: {reason}", input.parent_path);
        return Err(ContentError::invalid(format!("attachment failed security check: {reason}")));
    }

    // Step 2: parent must exist and not be final.
    if !store.row_exists(Table::Content, input.parent_path)? {
        return Err(ContentError::invalid(format!("attachment parent does not exist: {}", input.parent_path)));
    }
    if store
        .get_cell(Table::Content, input.parent_path, "content::final", Consistency::Any)?
        .and_then(|c| c.as_i8())
        == Some(1)
    {
        return Err(ContentError::invalid(format!("parent {} is final, cannot attach", input.parent_path)));
    }

    let kind = Kind::from_parent_path(input.parent_path);
    let mut filename = input.filename.to_string();
    let mut header = HeaderInfo::default();
    if matches!(kind, Kind::JavaScript | Kind::Css) {
        if !kind.valid_extension(&filename) {
            return Err(ContentError::invalid(format!("{filename} is not a valid {kind:?} filename")));
        }
        let source = String::from_utf8_lossy(input.bytes);
        header = parse_header(&source);
        let version = header
            .version
            .clone()
            .ok_or_else(|| ContentError::invalid("missing Version field in attachment header"))?;
        if let Some(suffix_version) = extract_filename_version(&filename)
            && suffix_version != version
        {
            return Err(ContentError::integrity(format!(
                "filename/header version mismatch: {suffix_version} vs {version}"
            )));
        }
        let ext = if filename.ends_with(".css") || filename.ends_with(".min.css") { "css" } else { "js" };
        let bare_name = header.name.clone().unwrap_or_else(|| canonical_base_name(&filename));
        filename = format!("{bare_name}.{ext}");
    }

    // Step 5: MD5.
    let (digest, created) = ensure_file_row(store, input.bytes, input.mime_type, input.original_mime_type, matches!(kind, Kind::JavaScript | Kind::Css), now)?;
    if created {
        store.put_cell(Table::Files, new_index_key(), &digest, CellValue::I8(1), Consistency::Any)?;
    }
    store.put_cell(
        Table::Files,
        &file_key(&digest),
        "content::files::filename",
        CellValue::Text(filename.clone()),
        Consistency::Any,
    )?;

    // Step 7: back-reference cell name.
    let reference_name = match kind {
        Kind::JavaScript | Kind::Css => {
            let version = header.version.clone().unwrap_or_default();
            let ext = if matches!(kind, Kind::Css) { "css" } else { "js" };
            let bare = filename.trim_end_matches(&format!(".{ext}"));
            format!("{}/{bare}_{version}.min.{ext}", input.parent_path)
        }
        Kind::Generic | Kind::Image => attachment_key(input.parent_path, &filename),
    };
    add_reference(store, &digest, &reference_name)?;

    // Step 8: resolve (branch, revision).
    let attachment_key = attachment_key(input.parent_path, &filename);
    let locale = "";
    let (branch, revision_label) = match kind {
        Kind::JavaScript | Kind::Css => {
            let version = header.version.clone().unwrap_or_default();
            let branch = version.split('.').next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(1);
            if !store.row_exists(Table::Content, &attachment_key)? {
                create_attachment_page(locks, store, &attachment_key, input.owner, now)?;
            }
            let branch_row_key = branch_key(&attachment_key, branch);
            if !store.row_exists(Table::Branch, &branch_row_key) {
                store.put_cell(Table::Branch, &branch_row_key, "content::created", CellValue::I64(now), Consistency::Any)?;
            }
            (branch, version)
        }
        Kind::Generic | Kind::Image => {
            if !store.row_exists(Table::Content, &attachment_key)? {
                create_attachment_page(locks, store, &attachment_key, input.owner, now)?;
            }
            let current_branch = Pointers::current(store, &attachment_key, locale)?.map(|(b, _)| b).unwrap_or(1);
            let branch_row_key = branch_key(&attachment_key, current_branch);
            let existing_reference = store
                .get_cell(Table::Branch, &branch_row_key, &format!("content::attachment::reference::{digest}"), Consistency::Any)?
                .and_then(|c| c.as_i64());
            let revision = match existing_reference {
                Some(rev) => rev as u32,
                None => revision_control::new_revision(locks, store, &attachment_key, current_branch, Some(locale))?,
            };
            (current_branch, revision.to_string())
        }
    };

    let revision_key_str = revision_key(&attachment_key, locale, branch, &revision_label.parse::<u32>().unwrap_or(0).to_string())
        .replace(|_| false, ""); // placeholder to keep types aligned below
    let _ = revision_key_str;
    let rev_key = crate::keying::extended_revision_key(&attachment_key, locale, branch, &revision_label);

    // Step 9: write attachment cells on the revision row.
    let mut digest_bytes = [0u8; 16];
    let raw = hex::decode(&digest).map_err(|e| ContentError::integrity(e.to_string()))?;
    digest_bytes.copy_from_slice(&raw[..16.min(raw.len())]);
    store.put_cell(Table::Revision, &rev_key, "content::attachment", CellValue::Bytes16(digest_bytes), Consistency::Any)?;
    store.put_cell(
        Table::Revision,
        &rev_key,
        "content::attachment::filename",
        CellValue::Text(filename.clone()),
        Consistency::Any,
    )?;
    store.put_cell(
        Table::Revision,
        &rev_key,
        "content::attachment::mime_type",
        CellValue::Text(input.mime_type.to_string()),
        Consistency::Any,
    )?;
    store.put_cell(Table::Revision, &rev_key, "content::created", CellValue::I64(now), Consistency::Any)?;

    let branch_row_key = branch_key(&attachment_key, branch);
    store.put_cell(
        Table::Branch,
        &branch_row_key,
        &format!("content::attachment::reference::{digest}"),
        CellValue::I64(revision_label.parse::<u32>().unwrap_or(0) as i64),
        Consistency::Any,
    )?;
    Pointers::set_current(store, &attachment_key, locale, branch, revision_label.parse::<u32>().unwrap_or(0))?;

    // Step 10: link field on the parent.
    store.put_cell(
        Table::Content,
        input.parent_path,
        &format!("content::attachment::{filename}"),
        CellValue::Text(attachment_key.clone()),
        Consistency::Any,
    )?;

    // Step 11: attachment pages are always final.
    store.put_cell(Table::Content, &attachment_key, "content::final", CellValue::I8(1), Consistency::Any)?;

    observers.create(&attachment_key);
    if matches!(kind, Kind::JavaScript | Kind::Css) {
        record_js_css_index(store, &filename, &header, branch, &revision_label, &digest)?;
    }

    Ok(AttachmentResult { attachment_key, digest, branch, revision_label })
}

fn canonical_base_name(filename: &str) -> String {
    let stem = filename.rsplit_once('.').map_or(filename, |(s, _)| s);
    match stem.split_once('_') {
        Some((name, _version_suffix)) => name.to_string(),
        None => stem.to_string(),
    }
}

fn extract_filename_version(filename: &str) -> Option<String> {
    let stem = filename.rsplit_once('.').map_or(filename, |(s, _)| s);
    let (_, suffix) = stem.split_once('_')?;
    let version: String = suffix.split('_').next()?.to_string();
    if version.chars().all(|c| c.is_ascii_digit() || c == '.') && !version.is_empty() {
        Some(version)
    } else {
        None
    }
}

fn attachment_key(parent_path: &str, filename: &str) -> String {
    format!("{parent_path}/{filename}")
}

fn create_attachment_page(locks: &PageLocks, store: &dyn KvStore, key: &str, owner: &str, now: i64) -> Result<()> {
    store.put_cell(Table::Content, key, "content::primary_owner", CellValue::Text(owner.to_string()), Consistency::Any)?;
    store.put_cell(Table::Content, key, "content::created", CellValue::I64(now), Consistency::Any)?;
    store.put_cell(Table::Content, key, "content::modified", CellValue::I64(now), Consistency::Any)?;
    let branch = revision_control::new_branch(locks, store, key)?;
    store.put_cell(
        Table::Content,
        key,
        "content::revision_control::last_branch",
        CellValue::U32(branch),
        Consistency::Any,
    )?;
    crate::status::set_status(store, key, crate::status::Status::Normal, now)?;
    store.put_cell(Table::Content, "*index*", key, CellValue::I8(1), Consistency::Any)?;
    Ok(())
}

fn record_js_css_index(
    store: &dyn KvStore,
    name: &str,
    header: &HeaderInfo,
    branch: u32,
    version: &str,
    digest: &str,
) -> Result<()> {
    let table_row = if name.ends_with(".css") { "files::css" } else { "files::javascripts" };
    let packed = parse_version(version);
    let packed: Vec<u32> = packed.into_iter().chain(std::iter::repeat(0)).take(4).collect();
    let browsers = if header.browsers.is_empty() { vec!["all".to_string()] } else { header.browsers.clone() };
    for browser in &browsers {
        let column = format!("{name}\0{browser}\0{}.{}.{}.{}", branch, packed[1], packed[2], packed[3]);
        store.put_cell(Table::Files, table_row, &column, CellValue::Text(digest.to_string()), Consistency::Any)?;
    }
    Ok(())
}

/// Pruning (§4.7 "Pruning"): once `revision_limit` is exceeded, destroys
/// older revisions of an attachment page, skipping the current revision,
/// stopping at the first missing one.
pub fn prune_revisions(
    store: &dyn KvStore,
    observers: &ObserverList,
    attachment_key: &str,
    locale: &str,
    branch: u32,
    new_revision: u32,
    revision_limit: u32,
) -> Result<()> {
    if revision_limit == 0 || new_revision <= revision_limit {
        return Ok(());
    }
    let current = Pointers::current(store, attachment_key, locale)?.map(|(_, r)| r);
    let mut candidate = new_revision - revision_limit;
    loop {
        if candidate == 0 {
            break;
        }
        candidate -= 1;
        if Some(candidate) == current {
            continue;
        }
        let key = revision_key(attachment_key, locale, branch, candidate);
        if !store.row_exists(Table::Revision, &key)? {
            break;
        }
        crate::page_ops::destroy_revision(store, observers, attachment_key, locale, branch, candidate)?;
    }
    Ok(())
}

/// Background reprocessing (§4.7 "Background file processing"): walks the
/// `new` index in batches, security-checks each MD5 in thorough mode, and
/// marks every `1` (new) reference cell `2` (checked) once processed.
pub fn reprocess_new_files(store: &dyn KvStore, observers: &ObserverList, now: i64, batch_size: usize) -> Result<u32> {
    let Some(new_row) = store.get_row(Table::Files, new_index_key())? else { return Ok(0) };
    let mut processed = 0u32;
    for digest in new_row.keys().take(batch_size) {
        let key = file_key(digest);
        let Some(row) = store.get_row(Table::Files, &key)? else {
            store.remove_cell(Table::Files, new_index_key(), digest)?;
            continue;
        };
        let data = load_attachment(store, digest)?;
        let verdict = observers.check_attachment_security(digest, &data, true);
        let (code, reason) = match &verdict {
            SecurityVerdict::Secure => (1i8, String::new()),
            SecurityVerdict::Insecure(reason) => (-1i8, reason.clone()),
        };
        store.put_cell(Table::Files, &key, "content::files::secure", CellValue::I8(code), Consistency::Any)?;
        store.put_cell(Table::Files, &key, "content::files::secure_last_check", CellValue::I64(now), Consistency::Any)?;
        store.put_cell(
            Table::Files,
            &key,
            "content::files::security_reason",
            CellValue::Text(reason),
            Consistency::Any,
        )?;

        if matches!(verdict, SecurityVerdict::Secure) {
            process_attachment_variants(store, &key, &data)?;
        }

        let mut all_checked = true;
        for column in row.keys().filter(|c| c.starts_with("content::files::reference::")) {
            if row.get(column).and_then(CellValue::as_i8) == Some(1) {
                store.put_cell(Table::Files, &key, column, CellValue::I8(2), Consistency::Any)?;
            } else if row.get(column).and_then(CellValue::as_i8) != Some(2) {
                all_checked = false;
            }
        }
        if all_checked {
            store.remove_cell(Table::Files, new_index_key(), digest)?;
        }
        processed += 1;
    }
    Ok(processed)
}

fn process_attachment_variants(store: &dyn KvStore, file_key_str: &str, data: &[u8]) -> Result<()> {
    let compressed = gzip(data)?;
    if compressed.len() < data.len() {
        store.put_cell(
            Table::Files,
            file_key_str,
            "content::files::data::gzip_compressed",
            CellValue::Bool(true),
            Consistency::Any,
        )?;
    }
    if file_key_str.ends_with(".css") {
        if let Ok(text) = std::str::from_utf8(data) {
            let minified = minify_css(text);
            if minified.len() < data.len() {
                store.put_cell(
                    Table::Files,
                    file_key_str,
                    "content::files::data::minified",
                    CellValue::Bytes(minified.clone().into_bytes()),
                    Consistency::Any,
                )?;
                let minified_gz = gzip(minified.as_bytes())?;
                if minified_gz.len() < minified.len() {
                    store.put_cell(
                        Table::Files,
                        file_key_str,
                        "content::files::data::minified::gzip_compressed",
                        CellValue::Bool(true),
                        Consistency::Any,
                    )?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::observer::ObserverList;

    #[test]
    fn identical_uploads_share_one_blob_and_two_references() {
        let store = MemoryStore::ephemeral();
        let d1 = store_attachment(&store, b"hello world", false).unwrap();
        add_reference(&store, &d1, "x/page1").unwrap();
        let d2 = store_attachment(&store, b"hello world", false).unwrap();
        add_reference(&store, &d2, "x/page2").unwrap();
        assert_eq!(d1, d2);
        assert_eq!(reference_count(&store, &d1).unwrap(), 2);
    }

    #[test]
    fn release_removes_blob_once_no_reference_remains() {
        let store = MemoryStore::ephemeral();
        let digest = store_attachment(&store, b"data", false).unwrap();
        add_reference(&store, &digest, "x/page1").unwrap();
        release_attachment(&store, &digest, "x/page1").unwrap();
        assert!(!store.row_exists(Table::Files, &file_key(&digest)).unwrap());
    }

    #[test]
    fn compressed_round_trips() {
        let store = MemoryStore::ephemeral();
        let payload = b"some js source code".repeat(20);
        let (digest, _) = ensure_file_row(&store, &payload, "text/javascript", "text/javascript", true, 0).unwrap();
        let loaded = load_attachment(&store, &digest).unwrap();
        assert_eq!(loaded, payload);
    }

    #[test]
    fn version_parses_numerically() {
        assert!(parse_version("1.10.0") > parse_version("1.9.9"));
    }

    #[test]
    fn extracts_header_version_from_js_comment() {
        let src = "// Name: editor\n// Version: 2.3.4\nconsole.log('hi');";
        let header = parse_header(src);
        assert_eq!(header.version, Some("2.3.4".to_string()));
        assert_eq!(header.name, Some("editor".to_string()));
    }

    #[test]
    fn minifies_css_comments_and_whitespace() {
        let css = "/* header */\nbody   {\n  color: red;\n}\n";
        let minified = minify_css(css);
        assert_eq!(minified, "body { color: red; }");
    }

    #[test]
    fn ingest_rejects_missing_parent() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        let input = AttachmentInput {
            parent_path: "x/a",
            filename: "photo.png",
            bytes: b"fake-png-bytes",
            mime_type: "image/png",
            original_mime_type: "image/png",
            owner: "output",
            revision_limit: 0,
        };
        assert!(ingest_attachment(&locks, &store, &observers, &input, 0).is_err());
    }

    #[test]
    fn ingest_generic_attachment_creates_page_and_reference() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        crate::page_ops::create_content(&locks, &store, &observers, "x/a", "output", "en", "page", 0, false).unwrap();
        let bytes = vec![9u8; 32];
        let input = AttachmentInput {
            parent_path: "x/a",
            filename: "doc.txt",
            bytes: &bytes,
            mime_type: "text/plain",
            original_mime_type: "text/plain",
            owner: "output",
            revision_limit: 0,
        };
        let result = ingest_attachment(&locks, &store, &observers, &input, 5).unwrap();
        assert_eq!(result.attachment_key, "x/a/doc.txt");
        assert!(store.row_exists(Table::Content, "x/a/doc.txt").unwrap());
        let final_cell = store.get_cell(Table::Content, "x/a/doc.txt", "content::final", Consistency::Any).unwrap();
        assert_eq!(final_cell, Some(CellValue::I8(1)));
        assert_eq!(reference_count(&store, &result.digest).unwrap(), 1);
    }

    #[test]
    fn ingest_js_rewrites_to_canonical_bare_name() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        crate::page_ops::create_content(&locks, &store, &observers, "js", "output", "xx", "page", 0, false).unwrap();
        let src = b"// Name: editor\n// Version: 1.2.3\n// Browsers: all\nconsole.log(1);".to_vec();
        let input = AttachmentInput {
            parent_path: "js",
            filename: "editor_1.2.3.js",
            bytes: &src,
            mime_type: "text/javascript",
            original_mime_type: "text/javascript",
            owner: "output",
            revision_limit: 0,
        };
        let result = ingest_attachment(&locks, &store, &observers, &input, 0).unwrap();
        assert_eq!(result.attachment_key, "js/editor.js");
        assert_eq!(result.revision_label, "1.2.3");
        assert_eq!(result.branch, 1);
        assert_eq!(reference_count(&store, &result.digest).unwrap(), 1);
    }

    #[test]
    fn ingest_js_rejects_filename_header_version_mismatch() {
        let store = MemoryStore::ephemeral();
        let locks = PageLocks::new();
        let observers = ObserverList::new();
        crate::page_ops::create_content(&locks, &store, &observers, "js", "output", "xx", "page", 0, false).unwrap();
        let src = b"// Version: 9.9.9\nconsole.log(1);".to_vec();
        let input = AttachmentInput {
            parent_path: "js",
            filename: "editor_1.2.3.js",
            bytes: &src,
            mime_type: "text/javascript",
            original_mime_type: "text/javascript",
            owner: "output",
            revision_limit: 0,
        };
        assert!(ingest_attachment(&locks, &store, &observers, &input, 0).is_err());
    }

    #[test]
    fn reprocess_marks_new_file_references_checked() {
        let store = MemoryStore::ephemeral();
        let digest = store_attachment(&store, b"payload", false).unwrap();
        add_reference(&store, &digest, "x/page1").unwrap();
        let observers = ObserverList::new();
        let n = reprocess_new_files(&store, &observers, 10, 100).unwrap();
        assert_eq!(n, 1);
        let cell = store
            .get_cell(Table::Files, &file_key(&digest), "content::files::reference::x/page1", Consistency::Any)
            .unwrap();
        assert_eq!(cell, Some(CellValue::I8(2)));
        assert!(!store.row_exists(Table::Files, new_index_key()).unwrap() || {
            let row = store.get_row(Table::Files, new_index_key()).unwrap().unwrap();
            !row.contains_key(&digest)
        });
    }
}
