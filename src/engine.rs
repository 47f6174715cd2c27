//! `ContentEngine`: the facade tying the kv store, page locks, config,
//! feature flags and observers together, mirroring the teacher's
//! `Database`/engine pattern of one top-level handle callers hang
//! everything off of.

use crate::config::Config;
use crate::errors::Result;
use crate::kv::{KvStore, MemoryStore};
use crate::observer::ObserverList;
use crate::path_context::{RequestContext, ResolvedPath};
use crate::revision_control::PageLocks;
use std::path::Path;
use std::sync::Arc;

pub struct ContentEngine {
    pub store: Arc<dyn KvStore>,
    pub locks: PageLocks,
    pub config: Config,
    pub observers: ObserverList,
}

impl ContentEngine {
    /// Opens (or creates) a durable engine rooted at `data_dir`: a WAL-backed
    /// `MemoryStore` under `data_dir/content.wal` and config loaded from
    /// `data_dir/content.toml` if present.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let store = MemoryStore::open(&data_dir.join("content.wal"))?;
        let config = Config::load(&data_dir.join("content.toml"))
            .map_err(|e| crate::errors::ContentError::Storage(e.to_string()))?;
        Ok(Self { store: Arc::new(store), locks: PageLocks::new(), config, observers: ObserverList::new() })
    }

    /// An in-memory-only engine with no durability, for tests and
    /// short-lived embedding scenarios.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            store: Arc::new(MemoryStore::ephemeral()),
            locks: PageLocks::new(),
            config: Config::default(),
            observers: ObserverList::new(),
        }
    }

    pub fn register_observer(&mut self, observer: Box<dyn crate::observer::ContentObserver>) {
        self.observers.register(observer);
    }

    pub fn create_content(
        &self,
        content_key: &str,
        owner: &str,
        locale: &str,
        page_type: &str,
        now: i64,
    ) -> Result<(u32, u32)> {
        crate::page_ops::create_content(
            &self.locks,
            self.store.as_ref(),
            &self.observers,
            content_key,
            owner,
            locale,
            page_type,
            now,
            false,
        )
    }

    /// Creates a page on the reserved system branch (0), for declarative
    /// imports rather than ordinary editing (§4.6).
    pub fn create_content_declarative(
        &self,
        content_key: &str,
        owner: &str,
        locale: &str,
        page_type: &str,
        now: i64,
    ) -> Result<(u32, u32)> {
        crate::page_ops::create_content(
            &self.locks,
            self.store.as_ref(),
            &self.observers,
            content_key,
            owner,
            locale,
            page_type,
            now,
            true,
        )
    }

    pub fn modified_content(&self, content_key: &str, branch: u32, revision: u32, now: i64) -> Result<()> {
        crate::page_ops::modified_content(self.store.as_ref(), &self.observers, content_key, branch, revision, now)
    }

    pub fn clone_page(&self, src_key: &str, dst_key: &str, owner: &str, locale: &str) -> Result<(u32, u32)> {
        crate::page_ops::clone_page(&self.locks, self.store.as_ref(), &self.observers, src_key, dst_key, owner, locale)
    }

    pub fn move_page(&self, content_key: &str, new_key: &str, now: i64) -> Result<()> {
        crate::page_ops::move_page(self.store.as_ref(), &self.observers, content_key, new_key, now)
    }

    pub fn trash_page(&self, content_key: &str, now: i64) -> Result<String> {
        crate::page_ops::trash_page(self.store.as_ref(), &self.observers, content_key, now)
    }

    pub fn destroy_page(&self, content_key: &str) -> Result<()> {
        crate::page_ops::destroy_page(&self.locks, self.store.as_ref(), &self.observers, content_key)
    }

    pub fn destroy_revision(&self, content_key: &str, locale: &str, branch: u32, revision: u32) -> Result<()> {
        crate::page_ops::destroy_revision(self.store.as_ref(), &self.observers, content_key, locale, branch, revision)
    }

    pub fn resolve_path(&self, content_key: &str, ctx: &dyn RequestContext) -> Result<ResolvedPath> {
        crate::path_context::resolve(self.store.as_ref(), content_key, ctx)
    }

    pub fn status(&self, content_key: &str) -> Result<crate::status::Status> {
        crate::status::get_status(self.store.as_ref(), content_key)
    }

    pub fn set_status(&self, content_key: &str, next: crate::status::Status, now: i64) -> Result<()> {
        crate::status::set_status(self.store.as_ref(), content_key, next, now)
    }

    pub fn search(
        &self,
        program: &crate::field_search::Program,
        page: &str,
        ctx: Option<&ResolvedPath>,
    ) -> Result<Vec<(String, crate::kv::CellValue)>> {
        crate::field_search::execute(self.store.as_ref(), program, page, ctx)
    }

    pub fn ingest_xml(&self, xml: &str, owner: &str, now: i64) -> Result<()> {
        let nodes = crate::xml_ingest::parse(xml)?;
        crate::xml_ingest::apply(&self.locks, self.store.as_ref(), &self.observers, owner, nodes, now)
    }

    /// Runs an attachment through the full ingestion pipeline (§4.7).
    pub fn ingest_attachment(
        &self,
        input: &crate::attachment::AttachmentInput<'_>,
        now: i64,
    ) -> Result<crate::attachment::AttachmentResult> {
        crate::attachment::ingest_attachment(&self.locks, self.store.as_ref(), &self.observers, input, now)
    }

    pub fn reprocess_new_attachments(&self, now: i64, batch_size: usize) -> Result<u32> {
        crate::attachment::reprocess_new_files(self.store.as_ref(), &self.observers, now, batch_size)
    }
}
