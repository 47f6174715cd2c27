//! Runtime feature flags registry.
//!
//! Independent of Cargo compile-time features; toggled at runtime via the
//! CLI or embedding application.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Clone, Debug)]
pub struct FeatureFlag {
    pub name: String,
    pub enabled: bool,
    pub description: String,
}

static FLAGS: LazyLock<RwLock<HashMap<String, FeatureFlag>>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    map.insert(
        "recursive-destroy".to_string(),
        FeatureFlag {
            name: "recursive-destroy".to_string(),
            enabled: true,
            description:
                "destroy_page recurses into children instead of leaving them parentless"
                    .to_string(),
        },
    );
    map.insert(
        "js-css-versioning".to_string(),
        FeatureFlag {
            name: "js-css-versioning".to_string(),
            enabled: true,
            description: "parse JS/CSS header comments for version/browser/dependency metadata"
                .to_string(),
        },
    );
    map.insert(
        "xml-ingest".to_string(),
        FeatureFlag {
            name: "xml-ingest".to_string(),
            enabled: true,
            description: "accept declarative content.xml ingestion".to_string(),
        },
    );
    RwLock::new(map)
});

/// Enable or disable a feature flag. Returns true if the flag existed.
pub fn set(name: &str, enabled: bool) -> bool {
    let mut g = FLAGS.write();
    if let Some(f) = g.get_mut(name) {
        f.enabled = enabled;
        true
    } else {
        false
    }
}

/// Ensure a feature exists (register if missing) with the provided default.
pub fn ensure(name: &str, default_enabled: bool, description: &str) {
    let mut g = FLAGS.write();
    g.entry(name.to_string()).or_insert_with(|| FeatureFlag {
        name: name.to_string(),
        enabled: default_enabled,
        description: description.to_string(),
    });
}

/// Returns whether a feature is enabled (false if unknown).
pub fn is_enabled(name: &str) -> bool {
    FLAGS.read().get(name).is_some_and(|f| f.enabled)
}

pub fn get(name: &str) -> Option<FeatureFlag> {
    FLAGS.read().get(name).cloned()
}

pub fn list() -> Vec<FeatureFlag> {
    FLAGS.read().values().cloned().collect()
}
