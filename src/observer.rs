//! The signal/observer idiom the original content plugin implements with
//! Qt-style signals (`content::create_content`, `content::modified_content`,
//! ...). Rust has nothing built-in equivalent, so `page_ops` aggregates an
//! explicit list of `ContentObserver` trait objects and calls each in turn,
//! rather than reintroducing a signal bus (§9 Open Question).

use crate::status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyKind {
    Revision,
    Branch,
    Page,
}

/// Result of an attachment security check (§4.7 step 1). `Secure` is the
/// default when no observer gates attachments at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityVerdict {
    Secure,
    Insecure(String),
}

/// Implemented by anything that wants to react to page lifecycle events:
/// search indexers, sitemap generators, cache invalidators. The engine
/// itself never assumes a particular observer exists.
pub trait ContentObserver: Send + Sync {
    fn on_create(&self, _content_key: &str) {}
    fn on_modified(&self, _content_key: &str, _branch: u32, _revision: u32) {}
    fn on_status_changed(&self, _content_key: &str, _from: Status, _to: Status) {}
    fn on_moved(&self, _old_key: &str, _new_key: &str) {}
    fn on_destroy(&self, _content_key: &str, _kind: DestroyKind) {}
    /// Fired when a JS/CSS reference is rewritten from a deprecated bare
    /// filename form to a canonical versioned one, so operators can track
    /// which sites still carry outdated references (§9 Open Question).
    fn on_js_reference_canonicalized(&self, _content_key: &str, _old_ref: &str, _new_ref: &str) {}

    /// Gates an attachment upload before it is stored (§4.7 step 1, and
    /// again in `thorough` mode by the background reprocessor). Observers
    /// that don't care about attachment security can ignore this; the
    /// default always passes.
    fn check_attachment_security(&self, _content_key: &str, _data: &[u8], _thorough: bool) -> SecurityVerdict {
        SecurityVerdict::Secure
    }
}

/// Calls every registered observer for an event, swallowing nothing:
/// observers are expected to log their own errors rather than propagate
/// them, since a broken observer must never abort the page operation that
/// triggered it.
#[derive(Default)]
pub struct ObserverList {
    observers: Vec<Box<dyn ContentObserver>>,
}

impl ObserverList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Box<dyn ContentObserver>) {
        self.observers.push(observer);
    }

    pub fn create(&self, content_key: &str) {
        for o in &self.observers {
            o.on_create(content_key);
        }
    }

    pub fn modified(&self, content_key: &str, branch: u32, revision: u32) {
        for o in &self.observers {
            o.on_modified(content_key, branch, revision);
        }
    }

    pub fn status_changed(&self, content_key: &str, from: Status, to: Status) {
        for o in &self.observers {
            o.on_status_changed(content_key, from, to);
        }
    }

    pub fn moved(&self, old_key: &str, new_key: &str) {
        for o in &self.observers {
            o.on_moved(old_key, new_key);
        }
    }

    pub fn destroy(&self, content_key: &str, kind: DestroyKind) {
        for o in &self.observers {
            o.on_destroy(content_key, kind);
        }
    }

    pub fn js_reference_canonicalized(&self, content_key: &str, old_ref: &str, new_ref: &str) {
        for o in &self.observers {
            o.on_js_reference_canonicalized(content_key, old_ref, new_ref);
        }
    }

    /// First observer to veto wins; an empty list (or one with no opinion)
    /// is always secure.
    #[must_use]
    pub fn check_attachment_security(&self, content_key: &str, data: &[u8], thorough: bool) -> SecurityVerdict {
        for o in &self.observers {
            let verdict = o.check_attachment_security(content_key, data, thorough);
            if matches!(verdict, SecurityVerdict::Insecure(_)) {
                return verdict;
            }
        }
        SecurityVerdict::Secure
    }
}
