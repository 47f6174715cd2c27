//! CLI surface of the backend worker (§6.3), split into a `Command` enum
//! plus a `run` dispatcher so the `clap`-derived binary stays a thin
//! wrapper and the dispatch logic itself is testable without a process.

use crate::engine::ContentEngine;
use crate::errors::Result;
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clear the working half of every status for the site, promoting
    /// non-canonical states to NORMAL.
    Resetstatus { site: String },
    /// Same as `resetstatus` but unconditional.
    Forceresetstatus { site: String },
    /// Destroy a single page.
    Destroypage { page_url: String },
    /// Re-mark an existing file as new for reprocessing.
    Newfile { md5: String },
    /// Rebuild `*index*` rows.
    Rebuildindex,
    /// Run the periodic maintenance pass once: processing reap, journal
    /// reap, file reprocessing, and index rebuild.
    Snapbackend {
        #[arg(long, default_value_t = 300)]
        backend_journal_age: i64,
    },
}

pub fn run(engine: &ContentEngine, command: Command, now: i64) -> Result<String> {
    match command {
        Command::Resetstatus { site } | Command::Forceresetstatus { site } => {
            let mut reset = 0u32;
            for key in engine.store.all_rows(crate::kv::Table::Content)? {
                if !key.starts_with(&site) {
                    continue;
                }
                let current = crate::status::get_status(engine.store.as_ref(), &key)?;
                if current != crate::status::Status::Normal
                    && current.can_transition_to(crate::status::Status::Normal)
                {
                    crate::status::set_status(engine.store.as_ref(), &key, crate::status::Status::Normal, now)?;
                    reset += 1;
                }
            }
            Ok(format!("reset {reset} pages under {site}"))
        }
        Command::Destroypage { page_url } => {
            engine.destroy_page(&page_url)?;
            Ok(format!("destroyed {page_url}"))
        }
        Command::Newfile { md5 } => {
            crate::attachment::mark_as_new(engine.store.as_ref(), &md5)?;
            Ok(format!("marked {md5} as new"))
        }
        Command::Rebuildindex => {
            let n = crate::background::rebuild_index(engine.store.as_ref())?;
            Ok(format!("rebuilt index for {n} pages"))
        }
        Command::Snapbackend { backend_journal_age } => {
            let reaped = crate::background::reap_expired_status(
                engine.store.as_ref(),
                now,
                engine.config.status_reap_age_secs as i64,
            )?;
            let stale_journals = crate::journal::reap_stale(
                &engine.locks,
                engine.store.as_ref(),
                &engine.observers,
                now,
                backend_journal_age,
            )?;
            let reprocessed = crate::attachment::reprocess_new_files(engine.store.as_ref(), &engine.observers, now, 100)?;
            let n = crate::background::rebuild_index(engine.store.as_ref())?;
            Ok(format!(
                "snapbackend: {} processing rows reaped, {} stale journals destroyed, {} files reprocessed, rebuilt {} index rows",
                reaped.len(),
                stale_journals.len(),
                reprocessed,
                n
            ))
        }
    }
}
