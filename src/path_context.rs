//! Resolves a request path into the `(branch, revision, locale)` triple
//! the rest of the engine needs to fetch content, caching the result on
//! the `cache` table so repeated lookups for the same path skip the
//! branch/revision-control reads (§4.4).

use crate::errors::Result;
use crate::kv::{CellValue, Consistency, KvStore, Table};
use crate::revision_control::Pointers;

/// Supplies caller-specified overrides (URL query params, admin UI
/// selection, etc). The engine has no HTTP dependency, so this trait keeps
/// path resolution testable without one.
pub trait RequestContext {
    fn requested_branch(&self) -> Option<u32> {
        None
    }
    fn requested_revision(&self) -> Option<u32> {
        None
    }
    fn requested_locales(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A context with no overrides: always resolves to the page's current
/// pointers and the site's default locale fallback.
pub struct DefaultContext;
impl RequestContext for DefaultContext {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub content_key: String,
    pub branch: u32,
    pub revision: u32,
    pub locale: String,
}

fn cache_key(content_key: &str) -> String {
    format!("path_context::{content_key}")
}

/// Resolves `content_key` to branch/revision/locale, preferring (in order):
/// 1. an explicit branch/revision from `ctx`,
/// 2. a cached resolution,
/// 3. the page's current branch/revision pointer for the first locale in
///    `ctx.requested_locales()` that has one, falling back to `"xx"`
///    (neutral/multilingual) when nothing else matches.
pub fn resolve(
    store: &dyn KvStore,
    content_key: &str,
    ctx: &dyn RequestContext,
) -> Result<ResolvedPath> {
    let locales = {
        let mut v = ctx.requested_locales();
        v.push("xx".to_string());
        v
    };

    if let (Some(branch), Some(revision)) = (ctx.requested_branch(), ctx.requested_revision()) {
        let locale = locales.first().cloned().unwrap_or_else(|| "xx".to_string());
        let resolved = ResolvedPath { content_key: content_key.to_string(), branch, revision, locale };
        cache_put(store, content_key, &resolved)?;
        return Ok(resolved);
    }

    if ctx.requested_branch().is_none() && ctx.requested_revision().is_none()
        && let Some(cached) = cache_get(store, content_key)?
    {
        return Ok(cached);
    }

    for locale in &locales {
        if let Some((branch, revision)) = Pointers::current(store, content_key, locale)? {
            let resolved =
                ResolvedPath { content_key: content_key.to_string(), branch, revision, locale: locale.clone() };
            cache_put(store, content_key, &resolved)?;
            return Ok(resolved);
        }
    }

    Err(crate::errors::ContentError::not_found(format!(
        "no branch/revision pointer for {content_key}"
    )))
}

fn cache_put(store: &dyn KvStore, content_key: &str, resolved: &ResolvedPath) -> Result<()> {
    let key = cache_key(content_key);
    store.put_cell(
        Table::Cache,
        &key,
        "branch",
        CellValue::U32(resolved.branch),
        Consistency::Any,
    )?;
    store.put_cell(
        Table::Cache,
        &key,
        "revision",
        CellValue::U32(resolved.revision),
        Consistency::Any,
    )?;
    store.put_cell(
        Table::Cache,
        &key,
        "locale",
        CellValue::Text(resolved.locale.clone()),
        Consistency::Any,
    )
}

fn cache_get(store: &dyn KvStore, content_key: &str) -> Result<Option<ResolvedPath>> {
    let key = cache_key(content_key);
    let Some(row) = store.get_row(Table::Cache, &key)? else { return Ok(None) };
    let (Some(branch), Some(revision), Some(locale)) =
        (row.get("branch"), row.get("revision"), row.get("locale"))
    else {
        return Ok(None);
    };
    Ok(Some(ResolvedPath {
        content_key: content_key.to_string(),
        branch: branch.as_u32().unwrap_or(0),
        revision: revision.as_u32().unwrap_or(0),
        locale: locale.as_text().unwrap_or("xx").to_string(),
    }))
}

/// Invalidates a cached resolution, used whenever `revision_control`
/// changes the current pointer for a page.
pub fn invalidate(store: &dyn KvStore, content_key: &str) -> Result<()> {
    store.drop_row(Table::Cache, &cache_key(content_key))
}
