/// Unified error type for cnav.
#[derive(Debug, thiserror::Error)]
pub enum CnavError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid project state: {0}")]
    InvalidState(String),

    #[error("Invalid cursor kind: {0}")]
    InvalidCursorKind(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a parse job produced no index result.
///
/// Job failures never reach the scheduler or queries as errors; they are
/// recorded on the job and surfaced over the diagnostics channel. Prior
/// facts for the job's primary file are retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    /// The external parser produced no translation unit.
    #[error("parser produced no translation unit")]
    ParserInvocationFailed,

    /// The translation unit was too broken to walk.
    #[error("fatal syntax error")]
    SyntaxFatal,

    /// The job was cancelled between cursor visits. Not an error; silent.
    #[error("job cancelled")]
    Cancelled,
}
