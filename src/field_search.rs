//! A small bytecode VM for locating a field's value by walking a page and
//! its parents/children/links (§4.5), grounded in the original content
//! plugin's `field_search.cpp` instruction set.
//!
//! Programs are built with `ProgramBuilder` rather than hand-assembled, so
//! callers never construct `Instr` values directly.

use crate::errors::Result;
use crate::keying::{branch_key, revision_key};
use crate::kv::{CellValue, Consistency, KvStore, Table};
use crate::path_context::ResolvedPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stop as soon as one candidate location yields a value.
    First,
    /// Visit every candidate location and collect every value found.
    Each,
}

/// Which table a `Self_` lookup reads from. Defaults to `Content`; a
/// `SwitchTable` instruction changes this for every `Self_`/prefix lookup
/// that follows, until the next `Parents`/`Children`/`Link` hop resets it
/// (those always land on a fresh page's content row).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableTarget {
    Content,
    Branch,
    Revision,
}

#[derive(Debug, Clone)]
pub enum Instr {
    /// Search the field on the current page itself.
    Self_,
    /// Search up the `parent` link chain, at most `depth` hops.
    Parents { depth: u32 },
    /// Breadth-first search down the `children` link, at most `depth` hops.
    Children { depth: u32 },
    /// Follow a named link (e.g. `content::page_type`) and search there.
    Link { name: String },
    /// Switches the row subsequent `Self_` steps read from the content row
    /// to the branch or revision row of the current page, resolved through
    /// the path context passed to `execute` (§4.5). Requires a context;
    /// fails if none was given.
    SwitchTable(TableTarget),
    /// Use a literal value if nothing has been found yet.
    DefaultValue { value: CellValue },
    /// Stop immediately with no value if nothing has been found yet
    /// (explicit "no default" marker, as opposed to omitting the field).
    DefaultValueOrNull,
}

pub struct Program {
    pub field: String,
    pub mode: Mode,
    pub steps: Vec<Instr>,
}

#[derive(Default)]
pub struct ProgramBuilder {
    field: Option<String>,
    mode: Mode,
    steps: Vec<Instr>,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::First
    }
}

impl ProgramBuilder {
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: Some(field.into()), mode: Mode::First, steps: Vec::new() }
    }

    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn self_(mut self) -> Self {
        self.steps.push(Instr::Self_);
        self
    }

    #[must_use]
    pub fn parents(mut self, depth: u32) -> Self {
        self.steps.push(Instr::Parents { depth });
        self
    }

    #[must_use]
    pub fn children(mut self, depth: u32) -> Self {
        self.steps.push(Instr::Children { depth });
        self
    }

    #[must_use]
    pub fn link(mut self, name: impl Into<String>) -> Self {
        self.steps.push(Instr::Link { name: name.into() });
        self
    }

    #[must_use]
    pub fn to_branch(mut self) -> Self {
        self.steps.push(Instr::SwitchTable(TableTarget::Branch));
        self
    }

    #[must_use]
    pub fn to_revision(mut self) -> Self {
        self.steps.push(Instr::SwitchTable(TableTarget::Revision));
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: CellValue) -> Self {
        self.steps.push(Instr::DefaultValue { value });
        self
    }

    #[must_use]
    pub fn default_value_or_null(mut self) -> Self {
        self.steps.push(Instr::DefaultValueOrNull);
        self
    }

    #[must_use]
    pub fn build(self) -> Program {
        Program { field: self.field.unwrap_or_default(), mode: self.mode, steps: self.steps }
    }
}

/// Field names ending in `::*` are prefix-matched: every cell whose column
/// name starts with the part before `::*` counts as a hit for that step.
fn is_prefix_field(field: &str) -> Option<&str> {
    field.strip_suffix("::*")
}

fn lookup_field(store: &dyn KvStore, table: Table, row: &str, field: &str) -> Result<Vec<(String, CellValue)>> {
    if let Some(prefix) = is_prefix_field(field) {
        let row = store.get_row(table, row)?.unwrap_or_default();
        return Ok(row
            .into_iter()
            .filter(|(col, _)| col.starts_with(prefix))
            .collect());
    }
    let cell = store.get_cell(table, row, field, Consistency::Any)?;
    Ok(cell.into_iter().map(|v| (field.to_string(), v)).collect())
}

/// Resolves a page and a table target to the actual row key to read,
/// using the supplied path context for branch/revision/locale. `Content`
/// never needs a context since a page's content row key is itself.
fn resolve_row(page: &str, target: TableTarget, ctx: Option<&ResolvedPath>) -> Result<(Table, String)> {
    match target {
        TableTarget::Content => Ok((Table::Content, page.to_string())),
        TableTarget::Branch => {
            let ctx = ctx.ok_or_else(|| crate::errors::ContentError::assert("table switch requires a path context"))?;
            Ok((Table::Branch, branch_key(page, ctx.branch)))
        }
        TableTarget::Revision => {
            let ctx = ctx.ok_or_else(|| crate::errors::ContentError::assert("table switch requires a path context"))?;
            Ok((Table::Revision, revision_key(page, &ctx.locale, ctx.branch, ctx.revision)))
        }
    }
}

fn parent_of(store: &dyn KvStore, page: &str) -> Result<Option<String>> {
    Ok(store
        .get_cell(Table::Content, page, "content::parent", Consistency::Any)?
        .and_then(|c| c.as_text().map(str::to_string)))
}

fn children_of(store: &dyn KvStore, page: &str) -> Result<Vec<String>> {
    let row = store.get_row(Table::Content, page)?.unwrap_or_default();
    Ok(row
        .into_iter()
        .filter_map(|(col, val)| {
            col.strip_prefix("content::children::").and_then(|_| val.as_text().map(str::to_string))
        })
        .collect())
}

fn link_target(store: &dyn KvStore, page: &str, name: &str) -> Result<Option<String>> {
    Ok(store
        .get_cell(Table::Content, page, name, Consistency::Any)?
        .and_then(|c| c.as_text().map(str::to_string)))
}

/// Executes `program` starting from `page`, returning every `(page,
/// value)` pair found. In `Mode::First` this has at most one element.
/// `ctx`, when given, lets `SwitchTable` steps resolve the current page's
/// branch/revision row; a program with no `SwitchTable` step never needs
/// one.
pub fn execute(
    store: &dyn KvStore,
    program: &Program,
    page: &str,
    ctx: Option<&ResolvedPath>,
) -> Result<Vec<(String, CellValue)>> {
    let mut results = Vec::new();
    // `(table, row)` the next `Self_`/prefix lookup reads from; reset to
    // the content row whenever we hop to a different page.
    let mut scope: (Table, String) = (Table::Content, page.to_string());
    for instr in &program.steps {
        let found = match instr {
            Instr::Self_ => {
                lookup_field(store, scope.0, &scope.1, &program.field)?
                    .into_iter()
                    .map(|(_, v)| (page.to_string(), v))
                    .collect::<Vec<_>>()
            }
            Instr::SwitchTable(target) => {
                scope = resolve_row(page, *target, ctx)?;
                Vec::new()
            }
            Instr::Parents { depth } => {
                let mut hits = Vec::new();
                let mut cur = page.to_string();
                for _ in 0..*depth {
                    let Some(parent) = parent_of(store, &cur)? else { break };
                    let vs = lookup_field(store, Table::Content, &parent, &program.field)?;
                    for (_, v) in vs {
                        hits.push((parent.clone(), v));
                        if program.mode == Mode::First {
                            break;
                        }
                    }
                    if !hits.is_empty() && program.mode == Mode::First {
                        break;
                    }
                    cur = parent;
                }
                scope = (Table::Content, cur);
                hits
            }
            Instr::Children { depth } => {
                let mut hits = Vec::new();
                let mut frontier = children_of(store, page)?;
                let mut level = 0u32;
                while !frontier.is_empty() && level < *depth {
                    let mut next_frontier = Vec::new();
                    for child in &frontier {
                        let vs = lookup_field(store, Table::Content, child, &program.field)?;
                        for (_, v) in vs {
                            hits.push((child.clone(), v));
                        }
                        next_frontier.extend(children_of(store, child)?);
                        if !hits.is_empty() && program.mode == Mode::First {
                            break;
                        }
                    }
                    if !hits.is_empty() && program.mode == Mode::First {
                        break;
                    }
                    frontier = next_frontier;
                    level += 1;
                }
                hits
            }
            Instr::Link { name } => {
                if let Some(target) = link_target(store, page, name)? {
                    scope = (Table::Content, target.clone());
                    lookup_field(store, Table::Content, &target, &program.field)?
                        .into_iter()
                        .map(|(_, v)| (target.clone(), v))
                        .collect()
                } else {
                    Vec::new()
                }
            }
            Instr::DefaultValue { value } => {
                if results.is_empty() { vec![(page.to_string(), value.clone())] } else { Vec::new() }
            }
            Instr::DefaultValueOrNull => {
                if results.is_empty() {
                    return Ok(Vec::new());
                }
                Vec::new()
            }
        };

        if !found.is_empty() {
            match program.mode {
                Mode::First => {
                    results.extend(found.into_iter().take(1));
                    break;
                }
                Mode::Each => results.extend(found),
            }
        }
    }
    Ok(results)
}
