//! Declarative `content.xml` ingestion (§4.10): plugins and site packages
//! ship a manifest of pages to create or update, parsed with `quick-xml`
//! since the pack has no other reason to need a hand-rolled XML parser.
//!
//! Nodes are applied parent-before-child through `page_ops::create_content`
//! on the reserved system branch, so a manifest can never create a page
//! whose parent doesn't exist yet, doesn't get its own user branch, or
//! skips the normal create bookkeeping (`*index*`, status). Two nodes
//! targeting the same key with an equal `priority` is treated as a
//! conflict (`ContentError::Integrity`) rather than resolved by insertion
//! order, since insertion order in a multi-file ingest is not something an
//! operator can predict or control (§9 Open Question).

use crate::attachment::{self, AttachmentInput};
use crate::errors::{ContentError, Result};
use crate::kv::{CellValue, Consistency, KvStore, Table};
use crate::observer::ObserverList;
use crate::revision_control::PageLocks;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashMap;

/// A file attachment embedded in a manifest, hex-encoded since it has to
/// travel through XML text content (§4.10). Real site packages keep these
/// small (icons, default stylesheets); large media ships separately.
#[derive(Debug, Clone)]
pub struct AttachmentNode {
    pub filename: String,
    pub data_hex: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct PageNode {
    pub path: String,
    pub priority: i32,
    pub fields: HashMap<String, String>,
    pub links: Vec<(String, String)>,
    pub removed_params: Vec<String>,
    pub removed_links: Vec<String>,
    pub attachments: Vec<AttachmentNode>,
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes().flatten().find(|a| a.key.as_ref() == name).map(|a| String::from_utf8_lossy(&a.value).to_string())
}

/// Parses a `<content>` document of `<page path="..." priority="...">`
/// elements, each containing `<param>`, `<link>`, `<remove-param>`,
/// `<remove-link>` and `<attachment>` children.
pub fn parse(xml: &str) -> Result<Vec<PageNode>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut pages = Vec::new();
    let mut current: Option<PageNode> = None;
    let mut current_param: Option<String> = None;
    let mut current_link: Option<String> = None;
    let mut current_attachment: Option<(String, String)> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) if e.name().as_ref() == b"page" => {
                let path = attr_value(&e, b"path").unwrap_or_default();
                let priority = attr_value(&e, b"priority").and_then(|v| v.parse().ok()).unwrap_or(0);
                if path.is_empty() {
                    return Err(ContentError::invalid("page element missing path attribute"));
                }
                current = Some(PageNode { path, priority, ..Default::default() });
            }
            Event::End(e) if e.name().as_ref() == b"page" => {
                if let Some(node) = current.take() {
                    pages.push(node);
                }
            }
            Event::Start(e) if e.name().as_ref() == b"param" => {
                current_param = attr_value(&e, b"name");
            }
            Event::End(e) if e.name().as_ref() == b"param" => {
                current_param = None;
            }
            Event::Start(e) if e.name().as_ref() == b"link" => {
                current_link = attr_value(&e, b"name");
            }
            Event::End(e) if e.name().as_ref() == b"link" => {
                current_link = None;
            }
            Event::Empty(e) if e.name().as_ref() == b"remove-param" => {
                if let (Some(node), Some(name)) = (current.as_mut(), attr_value(&e, b"name")) {
                    node.removed_params.push(name);
                }
            }
            Event::Empty(e) if e.name().as_ref() == b"remove-link" => {
                if let (Some(node), Some(name)) = (current.as_mut(), attr_value(&e, b"name")) {
                    node.removed_links.push(name);
                }
            }
            Event::Start(e) if e.name().as_ref() == b"attachment" => {
                let filename = attr_value(&e, b"filename").unwrap_or_default();
                let mime_type = attr_value(&e, b"mime_type").unwrap_or_else(|| "application/octet-stream".to_string());
                current_attachment = Some((filename, mime_type));
            }
            Event::End(e) if e.name().as_ref() == b"attachment" => {
                current_attachment = None;
            }
            Event::Text(t) => {
                let text = t.unescape()?.to_string();
                if let (Some(node), Some(name)) = (current.as_mut(), current_param.as_ref()) {
                    node.fields.insert(name.clone(), text.clone());
                } else if let (Some(node), Some(name)) = (current.as_mut(), current_link.as_ref()) {
                    node.links.push((name.clone(), text.clone()));
                } else if let (Some(node), Some((filename, mime_type))) = (current.as_mut(), current_attachment.as_ref()) {
                    node.attachments.push(AttachmentNode {
                        filename: filename.clone(),
                        mime_type: mime_type.clone(),
                        data_hex: text,
                    });
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(pages)
}

/// Applies parsed nodes to the store, parent-before-child, resolving
/// conflicts by `priority` (higher wins). Equal-priority conflicts on the
/// same path across two applied documents are a hard
/// `ContentError::Integrity`. Every new page goes through
/// `page_ops::create_content` on the system branch; an existing page is
/// updated in place.
pub fn apply(
    locks: &PageLocks,
    store: &dyn KvStore,
    observers: &ObserverList,
    owner: &str,
    mut nodes: Vec<PageNode>,
    now: i64,
) -> Result<()> {
    nodes.sort_by(|a, b| a.path.matches('/').count().cmp(&b.path.matches('/').count()));

    let mut by_path: HashMap<String, PageNode> = HashMap::new();
    for node in nodes {
        match by_path.get(&node.path) {
            Some(existing) if existing.priority == node.priority => {
                return Err(ContentError::integrity(format!(
                    "conflicting priority {} for path {}",
                    node.priority, node.path
                )));
            }
            Some(existing) if existing.priority > node.priority => continue,
            _ => {
                by_path.insert(node.path.clone(), node);
            }
        }
    }

    let mut paths: Vec<_> = by_path.into_values().collect();
    paths.sort_by(|a, b| a.path.matches('/').count().cmp(&b.path.matches('/').count()));

    for node in paths {
        if !store.row_exists(Table::Content, &node.path)? {
            if let Some(parent) = node.path.rsplit_once('/').map(|(p, _)| p.to_string())
                && !store.row_exists(Table::Content, &parent)?
            {
                return Err(ContentError::invalid(format!(
                    "cannot create {}: parent {parent} does not exist",
                    node.path
                )));
            }
            crate::page_ops::create_content(locks, store, observers, &node.path, owner, "xx", "page", now, true)?;
        }
        for (name, value) in &node.fields {
            store.put_cell(Table::Content, &node.path, name, CellValue::Text(value.clone()), Consistency::Any)?;
        }
        for name in &node.removed_params {
            store.remove_cell(Table::Content, &node.path, name)?;
        }
        for (name, target) in &node.links {
            store.put_cell(Table::Content, &node.path, name, CellValue::Text(target.clone()), Consistency::Any)?;
        }
        for name in &node.removed_links {
            store.remove_cell(Table::Content, &node.path, name)?;
        }
        for attachment_node in &node.attachments {
            let bytes = hex::decode(&attachment_node.data_hex)
                .map_err(|e| ContentError::invalid(format!("bad attachment hex for {}: {e}", attachment_node.filename)))?;
            let input = AttachmentInput {
                parent_path: &node.path,
                filename: &attachment_node.filename,
                bytes: &bytes,
                mime_type: &attachment_node.mime_type,
                original_mime_type: &attachment_node.mime_type,
                owner,
                revision_limit: 0,
            };
            attachment::ingest_attachment(locks, store, observers, &input, now)?;
        }
    }
    Ok(())
}
