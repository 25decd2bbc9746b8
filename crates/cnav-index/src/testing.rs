//! Scripted in-memory parser for exercising the pipeline without a real
//! C/C++ front-end. Used by this crate's tests and by downstream crates'
//! integration tests.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cnav_core::{CursorKind, ParseFailure, SourceInformation};

use crate::parser::{
    Cursor, Diagnostic, Inclusion, Severity, TranslationUnit, TranslationUnitParser,
};

/// Shorthand for a cursor with sensible defaults (depth 1, display name =
/// spelling, no overrides).
pub fn cursor(
    kind: CursorKind,
    usr: &str,
    spelling: &str,
    path: &str,
    start: u32,
    end: u32,
) -> Cursor {
    Cursor {
        kind,
        usr: usr.to_string(),
        spelling: spelling.to_string(),
        display_name: spelling.to_string(),
        path: PathBuf::from(path),
        start,
        end,
        depth: 1,
        overridden: Vec::new(),
    }
}

/// A canned translation unit: cursors replay in insertion order.
#[derive(Debug, Clone, Default)]
pub struct FixtureUnit {
    pub cursors: Vec<Cursor>,
    pub inclusions: Vec<Inclusion>,
    pub diagnostics: Vec<Diagnostic>,
}

impl FixtureUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(mut self, cursor: Cursor) -> Self {
        self.cursors.push(cursor);
        self
    }

    pub fn include(mut self, path: &str, start: u32, end: u32, included: &str) -> Self {
        self.inclusions.push(Inclusion {
            path: PathBuf::from(path),
            start,
            end,
            included: PathBuf::from(included),
        });
        self
    }

    pub fn fix_it(mut self, path: &str, start: u32, end: u32, text: &str) -> Self {
        self.diagnostics.push(Diagnostic {
            path: PathBuf::from(path),
            start,
            end,
            severity: Severity::Warning,
            message: format!("did you mean '{text}'?"),
            fix_it: Some(text.to_string()),
        });
        self
    }
}

impl TranslationUnit for FixtureUnit {
    fn visit_cursors(&self, visitor: &mut dyn FnMut(&Cursor) -> ControlFlow<()>) {
        for cursor in &self.cursors {
            if visitor(cursor).is_break() {
                return;
            }
        }
    }

    fn inclusions(&self) -> Vec<Inclusion> {
        self.inclusions.clone()
    }

    fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.clone()
    }
}

/// Scripted front-end: maps primary paths to canned units or failures.
/// Replacing a unit models an edit; parse counts let tests assert how
/// often a unit was (re)parsed.
pub struct FixtureParser {
    units: Mutex<HashMap<PathBuf, Arc<FixtureUnit>>>,
    failures: Mutex<HashMap<PathBuf, ParseFailure>>,
    delays: Mutex<HashMap<PathBuf, Duration>>,
    parse_counts: Mutex<HashMap<PathBuf, usize>>,
}

impl FixtureParser {
    pub fn new() -> Self {
        Self {
            units: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            parse_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_unit(&self, path: &str, unit: FixtureUnit) {
        self.units
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), Arc::new(unit));
        self.failures.lock().unwrap().remove(Path::new(path));
    }

    pub fn set_failure(&self, path: &str, failure: ParseFailure) {
        self.failures
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), failure);
    }

    /// Make parses of `path` take at least `delay`, for cancellation and
    /// supersede tests.
    pub fn set_delay(&self, path: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(PathBuf::from(path), delay);
    }

    pub fn parse_count(&self, path: &str) -> usize {
        self.parse_counts
            .lock()
            .unwrap()
            .get(Path::new(path))
            .copied()
            .unwrap_or(0)
    }
}

impl Default for FixtureParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationUnitParser for FixtureParser {
    fn parse(&self, source: &SourceInformation) -> Result<Arc<dyn TranslationUnit>, ParseFailure> {
        let path = &source.source_file;
        *self
            .parse_counts
            .lock()
            .unwrap()
            .entry(path.clone())
            .or_insert(0) += 1;

        let delay = self.delays.lock().unwrap().get(path).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(&failure) = self.failures.lock().unwrap().get(path) {
            return Err(failure);
        }
        let unit = self.units.lock().unwrap().get(path).cloned();
        match unit {
            Some(unit) => Ok(unit),
            None => Err(ParseFailure::ParserInvocationFailed),
        }
    }
}
