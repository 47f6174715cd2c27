//! Row-key composition and parsing for the `branch` and `revision` tables.
//!
//! Keys are built from an already-resolved `content` row key (`<site>/<path>`)
//! plus the branch/revision/locale numbers the caller has chosen. Parsing
//! the other direction is used by the background worker's index rebuild,
//! which only has the row key to start from.

use crate::errors::{ContentError, Result};

/// `<site>/<path>#<branch>`
#[must_use]
pub fn branch_key(content_key: &str, branch: u32) -> String {
    format!("{content_key}#{branch}")
}

/// `<site>/<path>#<locale>/<branch>.<revision>`, or, when `locale` is
/// empty, the locale-less form `<site>/<path>#<branch>.<revision>` (no `/`
/// at all): §3.2 defines both as distinct wire shapes, not one shape with
/// an empty path segment.
#[must_use]
pub fn revision_key(content_key: &str, locale: &str, branch: u32, revision: u32) -> String {
    if locale.is_empty() {
        format!("{content_key}#{branch}.{revision}")
    } else {
        format!("{content_key}#{locale}/{branch}.{revision}")
    }
}

/// Extended JS/CSS revision key: the revision component may itself be a
/// dotted version string of arbitrary length (`1.2.3`), not just a single
/// integer, to match versioned JS/CSS attachment references. Same
/// locale-empty rule as `revision_key`.
#[must_use]
pub fn extended_revision_key(content_key: &str, locale: &str, branch: u32, version: &str) -> String {
    if locale.is_empty() {
        format!("{content_key}#{branch}.{version}")
    } else {
        format!("{content_key}#{locale}/{branch}.{version}")
    }
}

pub struct ParsedBranchKey<'a> {
    pub content_key: &'a str,
    pub branch: u32,
}

/// Parses `<site>/<path>#<branch>` back into its parts.
///
/// # Errors
/// Returns `ContentError::Invalid` if the key has no `#` separator or the
/// branch component is not a valid `u32`.
pub fn parse_branch_key(key: &str) -> Result<ParsedBranchKey<'_>> {
    let (content_key, rest) =
        key.rsplit_once('#').ok_or_else(|| ContentError::invalid(format!("not a branch key: {key}")))?;
    let branch = rest
        .parse::<u32>()
        .map_err(|_| ContentError::invalid(format!("invalid branch number in key: {key}")))?;
    Ok(ParsedBranchKey { content_key, branch })
}

pub struct ParsedRevisionKey<'a> {
    pub content_key: &'a str,
    pub locale: &'a str,
    pub branch: u32,
    pub revision: &'a str,
}

/// Parses `<site>/<path>#<locale>/<branch>.<revision>` or, when the key
/// has no locale segment, `<site>/<path>#<branch>.<revision>` — both are
/// valid wire shapes per §3.2, the latter meaning "language-agnostic"
/// (`locale` comes back as `""`, the same sentinel `revision_key` treats
/// as "omit the segment").
///
/// `revision` is returned as a string slice rather than a `u32` because
/// JS/CSS attachment revisions are dotted version strings, not plain
/// integers; callers that need a simple numeric revision parse it further.
///
/// # Errors
/// Returns `ContentError::Invalid` if the key does not have a
/// `#[<locale>/]<branch>.<revision>` shape.
pub fn parse_revision_key(key: &str) -> Result<ParsedRevisionKey<'_>> {
    let (content_key, rest) = key
        .rsplit_once('#')
        .ok_or_else(|| ContentError::invalid(format!("not a revision key: {key}")))?;
    let (locale, branch_rev) = match rest.split_once('/') {
        Some((locale, branch_rev)) => (locale, branch_rev),
        None => ("", rest),
    };
    let (branch_str, revision) = branch_rev
        .split_once('.')
        .ok_or_else(|| ContentError::invalid(format!("missing branch.revision in key: {key}")))?;
    let branch = branch_str
        .parse::<u32>()
        .map_err(|_| ContentError::invalid(format!("invalid branch number in key: {key}")))?;
    Ok(ParsedRevisionKey { content_key, locale, branch, revision })
}

#[must_use]
pub fn site_prefixed(site: &str, path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() { site.to_string() } else { format!("{site}/{trimmed}") }
}
