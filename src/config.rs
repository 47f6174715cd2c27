//! Engine tunables, loaded from an optional TOML file and overridable by env vars.
//!
//! Mirrors the CLI's config precedence convention (CLI > env > file > defaults)
//! but the content engine only exposes the handful of durations and batch
//! sizes the background worker and journal reaper need.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How old an unfinished journal entry must be before the reaper treats
    /// the page creation it guards as abandoned and destroys it.
    pub backend_journal_age_secs: u64,
    /// How often the journal reaper wakes up to scan for stale entries.
    pub journal_reap_cadence_secs: u64,
    /// How old a `processing` status row must be before the status reaper
    /// considers the in-progress operation abandoned.
    pub status_reap_age_secs: u64,
    /// How often the status reaper runs.
    pub status_reap_cadence_secs: u64,
    /// Number of rows the `new_files`/background file processor handles per
    /// pass, so a single backend tick never blocks indefinitely.
    pub new_files_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_journal_age_secs: 300,
            journal_reap_cadence_secs: 300,
            status_reap_age_secs: 600,
            status_reap_cadence_secs: 300,
            new_files_batch_size: 100,
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults for any field the
    /// file omits or for a missing file entirely.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    #[must_use]
    pub fn backend_journal_age(&self) -> Duration {
        Duration::from_secs(self.backend_journal_age_secs)
    }

    #[must_use]
    pub fn journal_reap_cadence(&self) -> Duration {
        Duration::from_secs(self.journal_reap_cadence_secs)
    }

    #[must_use]
    pub fn status_reap_age(&self) -> Duration {
        Duration::from_secs(self.status_reap_age_secs)
    }

    #[must_use]
    pub fn status_reap_cadence(&self) -> Duration {
        Duration::from_secs(self.status_reap_cadence_secs)
    }
}
