//! The seam to the external C/C++ parser front-end.
//!
//! cnav does not parse C-family sources itself; it consumes a cursor
//! stream through the traits below. A front-end is expected to deliver,
//! per translation unit, a pre-order walk of recognised cursors (with
//! nesting depth), the inclusion directives, and the diagnostics.
//!
//! Contract notes:
//! - A cursor's `usr` names the semantic entity the cursor resolves to:
//!   itself for declarations and definitions, the referenced entity for
//!   references. Anonymous entities carry an empty USR and are skipped.
//! - References inside macro expansions are attributed to the expansion
//!   site, not the macro definition.
//! - `visit_cursors` must honor `ControlFlow::Break` between cursors; the
//!   indexer uses it for cooperative cancellation and the depth limit.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use cnav_core::{CursorKind, ParseFailure, SourceInformation};

/// One cursor from the front-end's walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub kind: CursorKind,
    /// USR of the entity this cursor resolves to. Empty for anonymous
    /// entities, which do not participate in cross-unit resolution.
    pub usr: String,
    /// Bare spelling, e.g. `foo`.
    pub spelling: String,
    /// Qualified display name, e.g. `ns::Widget::foo`.
    pub display_name: String,
    /// File containing the cursor's extent.
    pub path: PathBuf,
    pub start: u32,
    pub end: u32,
    /// Nesting depth in the pre-order walk; the translation-unit cursor's
    /// children are at depth 1.
    pub depth: u32,
    /// USRs of the virtuals this member function overrides.
    pub overridden: Vec<String>,
}

/// An `#include` directive seen during the parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inclusion {
    /// File containing the directive.
    pub path: PathBuf,
    pub start: u32,
    pub end: u32,
    /// The included file, resolved.
    pub included: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A diagnostic from the parse, optionally carrying a fix-it hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub start: u32,
    pub end: u32,
    pub severity: Severity,
    pub message: String,
    /// Replacement text for the `start..end` range, when the front-end
    /// suggests one.
    pub fix_it: Option<String>,
}

/// A parsed translation unit: an opaque handle owned by the front-end.
pub trait TranslationUnit: Send + Sync {
    /// Walk every recognised cursor in pre-order. Stops early when the
    /// visitor breaks.
    fn visit_cursors(&self, visitor: &mut dyn FnMut(&Cursor) -> ControlFlow<()>);

    /// Every inclusion directive in the unit, primary and headers alike.
    fn inclusions(&self) -> Vec<Inclusion>;

    /// Diagnostics collected during the parse.
    fn diagnostics(&self) -> Vec<Diagnostic>;

    /// Refresh this unit against current file contents, returning false
    /// when the handle cannot be reused and a fresh parse is needed.
    fn reparse(&self, source: &SourceInformation) -> bool {
        let _ = source;
        false
    }
}

/// The front-end itself. Implementations must observe filesystem contents
/// no older than the moment `parse` is called.
pub trait TranslationUnitParser: Send + Sync {
    fn parse(&self, source: &SourceInformation) -> Result<Arc<dyn TranslationUnit>, ParseFailure>;
}
