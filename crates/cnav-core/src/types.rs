//! Core value types shared across the indexing pipeline and the symbol graph.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::CnavError;

// ── Id Types ────────────────────────────────────────────────────────────────

/// Dense 32-bit identifier for a file known to the `FileRegistry`.
///
/// Allocated on first sighting of a path, stable for the project's
/// lifetime, never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct FileId(pub u32);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "file_{}", self.0)
    }
}

/// Dense 32-bit identifier for a semantic entity, allocated by the
/// `UsrTable` on first sighting of its USR string.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct UsrId(pub u32);

impl std::fmt::Display for UsrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "usr_{}", self.0)
    }
}

// ── Locations ───────────────────────────────────────────────────────────────

/// A byte-offset extent inside one file.
///
/// Ordering is (file, start, end), which makes per-file range scans over a
/// `BTreeMap<Location, _>` cheap.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Location {
    pub file: FileId,
    pub start: u32,
    pub end: u32,
}

impl Location {
    pub fn new(file: FileId, start: u32, end: u32) -> Self {
        Self { file, start, end }
    }

    /// Smallest location in `file`, usable as a range-scan lower bound.
    pub fn file_start(file: FileId) -> Self {
        Self::new(file, 0, 0)
    }

    /// Largest location in `file`, usable as a range-scan upper bound.
    pub fn file_end(file: FileId) -> Self {
        Self::new(file, u32::MAX, u32::MAX)
    }

    pub fn length(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// True when this extent fully covers `other` (same file).
    pub fn contains(&self, other: &Location) -> bool {
        self.file == other.file && self.start <= other.start && self.end >= other.end
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.file, self.start, self.end)
    }
}

// ── Cursor Kinds ────────────────────────────────────────────────────────────

/// The recognised cursor kinds delivered by the parser front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    Declaration,
    Definition,
    Reference,
    MemberFunctionDeclaration,
    MemberFunctionDefinition,
}

/// Which fact table a cursor lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactKind {
    Declaration,
    Definition,
    Reference,
}

impl CursorKind {
    /// Route a cursor to exactly one of decls, defs, or refs.
    pub fn category(self) -> FactKind {
        match self {
            Self::Declaration | Self::MemberFunctionDeclaration => FactKind::Declaration,
            Self::Definition | Self::MemberFunctionDefinition => FactKind::Definition,
            Self::Reference => FactKind::Reference,
        }
    }

    /// Collision precedence: Definition > Declaration > Reference.
    pub fn precedence(self) -> u8 {
        match self.category() {
            FactKind::Definition => 2,
            FactKind::Declaration => 1,
            FactKind::Reference => 0,
        }
    }

    /// True for member functions, which carry override edges.
    pub fn is_member_function(self) -> bool {
        matches!(
            self,
            Self::MemberFunctionDeclaration | Self::MemberFunctionDefinition
        )
    }
}

impl std::fmt::Display for CursorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Declaration => write!(f, "declaration"),
            Self::Definition => write!(f, "definition"),
            Self::Reference => write!(f, "reference"),
            Self::MemberFunctionDeclaration => write!(f, "member_function_declaration"),
            Self::MemberFunctionDefinition => write!(f, "member_function_definition"),
        }
    }
}

impl std::str::FromStr for CursorKind {
    type Err = CnavError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "declaration" => Ok(Self::Declaration),
            "definition" => Ok(Self::Definition),
            "reference" => Ok(Self::Reference),
            "member_function_declaration" => Ok(Self::MemberFunctionDeclaration),
            "member_function_definition" => Ok(Self::MemberFunctionDefinition),
            _ => Err(CnavError::InvalidCursorKind(s.to_string())),
        }
    }
}

// ── Cursor Info ─────────────────────────────────────────────────────────────

/// What the graph remembers about one visited cursor, keyed by `Location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorInfo {
    pub usr: UsrId,
    pub start: u32,
    pub end: u32,
    pub kind: CursorKind,
}

impl CursorInfo {
    pub fn length(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

impl std::fmt::Display for CursorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} range: {}-{} kind: {}",
            self.usr, self.start, self.end, self.kind
        )
    }
}

// ── Fix-its ─────────────────────────────────────────────────────────────────

/// A suggested textual edit attached to a diagnostic. Both offsets are
/// within one file. Ordered by start offset; overlapping fix-its from the
/// same parse are retained and the client reconciles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FixIt {
    pub start: u32,
    pub end: u32,
    pub text: String,
}

impl FixIt {
    pub fn new(start: u32, end: u32, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

impl std::fmt::Display for FixIt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{} {}", self.start, self.end, self.text)
    }
}

// ── Source Information ──────────────────────────────────────────────────────

/// Everything needed to (re)parse one translation unit: the primary source
/// file plus its compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInformation {
    pub source_file: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl SourceInformation {
    pub fn new(source_file: impl Into<PathBuf>) -> Self {
        Self {
            source_file: source_file.into(),
            args: Vec::new(),
            working_dir: PathBuf::from("/"),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// Why a translation unit is being (re)indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    /// First sighting of the unit.
    Initial,
    /// Scheduled by the dirty controller after a file change.
    Dirty,
    /// Explicit re-index request (e.g. stale source detected on restore).
    Reindex,
}

impl std::fmt::Display for IndexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Dirty => write!(f, "dirty"),
            Self::Reindex => write!(f, "reindex"),
        }
    }
}

// ── Policies and Modes ──────────────────────────────────────────────────────

/// Direction of a transitive dependency query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyMode {
    /// Files that (transitively) include the argument.
    DependsOnArg,
    /// Files the argument (transitively) includes.
    ArgDependsOn,
}

/// How cursors inside system headers outside the project root are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHeaderPolicy {
    /// Index system headers in every translation unit that visits them.
    Index,
    /// Never index system headers; dependency edges are still recorded.
    Skip,
    /// Index each system header once per project; later units see it blocked.
    IndexOnce,
}

impl std::fmt::Display for SystemHeaderPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index => write!(f, "index"),
            Self::Skip => write!(f, "skip"),
            Self::IndexOnce => write!(f, "index_once"),
        }
    }
}

// ── State Machines ──────────────────────────────────────────────────────────

/// Coarse project lifecycle. Indexing is accepted only in `Loaded` and
/// `Syncing`; `Syncing` means a persistence flush is in progress (reads
/// permitted, writes queued behind the graph lock).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectState {
    Unloaded,
    Inited,
    Loading,
    Loaded,
    Syncing,
}

impl std::fmt::Display for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Inited => write!(f, "inited"),
            Self::Loading => write!(f, "loading"),
            Self::Loaded => write!(f, "loaded"),
            Self::Syncing => write!(f, "syncing"),
        }
    }
}

/// Parse job lifecycle: `Queued → Parsing → Merging → Done`, with
/// `Cancelled` reachable from `Queued` and `Parsing` only. Merges are
/// atomic; cancellation from `Merging` is not permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Parsing,
    Merging,
    Done,
    Cancelled,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Parsing => write!(f, "parsing"),
            Self::Merging => write!(f, "merging"),
            Self::Done => write!(f, "done"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_ordering_groups_by_file() {
        let a = Location::new(FileId(1), 50, 60);
        let b = Location::new(FileId(1), 70, 80);
        let c = Location::new(FileId(2), 0, 10);
        assert!(a < b);
        assert!(b < c);
        assert!(Location::file_start(FileId(1)) <= a);
        assert!(a <= Location::file_end(FileId(1)));
    }

    #[test]
    fn cursor_kind_precedence() {
        assert!(CursorKind::Definition.precedence() > CursorKind::Declaration.precedence());
        assert!(CursorKind::Declaration.precedence() > CursorKind::Reference.precedence());
        assert_eq!(
            CursorKind::MemberFunctionDefinition.precedence(),
            CursorKind::Definition.precedence()
        );
    }

    #[test]
    fn cursor_kind_roundtrips_through_strings() {
        for kind in [
            CursorKind::Declaration,
            CursorKind::Definition,
            CursorKind::Reference,
            CursorKind::MemberFunctionDeclaration,
            CursorKind::MemberFunctionDefinition,
        ] {
            let parsed: CursorKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("widget".parse::<CursorKind>().is_err());
    }

    #[test]
    fn fixits_order_by_start_offset() {
        let early = FixIt::new(5, 9, ";");
        let late = FixIt::new(20, 21, ")");
        assert!(early < late);
    }

    #[test]
    fn location_contains() {
        let outer = Location::new(FileId(3), 10, 100);
        let inner = Location::new(FileId(3), 20, 30);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(!outer.contains(&Location::new(FileId(4), 20, 30)));
    }
}
