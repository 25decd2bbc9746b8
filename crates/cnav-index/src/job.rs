//! The per-translation-unit parse job.
//!
//! A job consumes a `SourceInformation`, drives the front-end, and
//! produces exactly one `IndexResult` or a `ParseFailure`. It owns its
//! transient state and has no side effects on the graph; merging is the
//! merge actor's business.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::path::PathBuf;

use cnav_core::{
    CnavConfig, FactKind, FileId, FileRegistry, FixIt, IndexResult, IndexType, Location,
    Metrics, ParseFailure, SourceInformation, SystemHeaderPolicy, UsrTable,
};

use crate::cache::UnitCache;
use crate::parser::{Cursor, Diagnostic, Inclusion, TranslationUnit, TranslationUnitParser};

// ── System-header claims ────────────────────────────────────────────────────

/// Claim table behind the `IndexOnce` system-header policy: the first unit
/// to visit a header outside the project root owns it; later units see it
/// blocked until the owner is removed or the header is dirtied.
pub struct VisitBroker {
    claims: Mutex<HashMap<FileId, FileId>>,
}

impl VisitBroker {
    pub fn new() -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// True when `primary` may index `file`.
    pub fn claim(&self, file: FileId, primary: FileId) -> bool {
        let mut claims = self.claims.lock().expect("visit broker poisoned");
        match claims.entry(file) {
            Entry::Occupied(e) => *e.get() == primary,
            Entry::Vacant(v) => {
                v.insert(primary);
                true
            }
        }
    }

    /// Free every header owned by a removed unit.
    pub fn release_owner(&self, primary: FileId) {
        let mut claims = self.claims.lock().expect("visit broker poisoned");
        claims.retain(|_, owner| *owner != primary);
    }

    /// Free a dirtied header so the next unit to see it re-claims it.
    pub fn release_file(&self, file: FileId) {
        let mut claims = self.claims.lock().expect("visit broker poisoned");
        claims.remove(&file);
    }

    /// Forget every claim, e.g. on project unload.
    pub fn clear(&self) {
        self.claims.lock().expect("visit broker poisoned").clear();
    }
}

impl Default for VisitBroker {
    fn default() -> Self {
        Self::new()
    }
}

// ── Job context ─────────────────────────────────────────────────────────────

/// Shared state a job needs while running on a worker.
#[derive(Clone)]
pub struct JobContext {
    pub files: Arc<FileRegistry>,
    pub usrs: Arc<UsrTable>,
    pub config: Arc<CnavConfig>,
    pub broker: Arc<VisitBroker>,
    pub project_root: PathBuf,
    pub cache: Arc<Mutex<UnitCache>>,
    pub metrics: Arc<dyn Metrics>,
}

// ── The job ─────────────────────────────────────────────────────────────────

pub struct ParseJob {
    pub source: SourceInformation,
    pub index_type: IndexType,
}

impl ParseJob {
    pub fn new(source: SourceInformation, index_type: IndexType) -> Self {
        Self { source, index_type }
    }

    /// Drive the parser and collect one `IndexResult`.
    ///
    /// `cancelled` is checked between cursor visits; a cancelled job drops
    /// its partial result and reports `ParseFailure::Cancelled`.
    pub fn run(
        &self,
        parser: &dyn TranslationUnitParser,
        ctx: &JobContext,
        cancelled: &AtomicBool,
    ) -> Result<IndexResult, ParseFailure> {
        let unit = self.obtain_unit(parser, ctx)?;
        if cancelled.load(Ordering::Relaxed) {
            return Err(ParseFailure::Cancelled);
        }

        let primary = ctx.files.intern(&self.source.source_file);
        let mut collector = Collector {
            ctx,
            cancelled,
            result: IndexResult::new(primary),
            ownership: HashMap::from([(primary, true)]),
            cancel_hit: false,
        };

        unit.visit_cursors(&mut |cursor| collector.visit(cursor));
        if collector.cancel_hit {
            return Err(ParseFailure::Cancelled);
        }
        for inclusion in unit.inclusions() {
            collector.record_inclusion(&inclusion);
        }
        if ctx.config.fix_its_enabled {
            for diagnostic in unit.diagnostics() {
                collector.record_diagnostic(&diagnostic);
            }
        }

        let result = collector.result;
        tracing::debug!(
            source = %self.source.source_file.display(),
            index_type = %self.index_type,
            facts = result.fact_count(),
            visited = result.visited.len(),
            partial = result.partial,
            "parsed translation unit"
        );
        ctx.cache
            .lock()
            .expect("unit cache poisoned")
            .put(self.source.source_file.clone(), unit);
        Ok(result)
    }

    fn obtain_unit(
        &self,
        parser: &dyn TranslationUnitParser,
        ctx: &JobContext,
    ) -> Result<Arc<dyn TranslationUnit>, ParseFailure> {
        let cached = ctx
            .cache
            .lock()
            .expect("unit cache poisoned")
            .get(&self.source.source_file);
        if let Some(unit) = cached {
            if unit.reparse(&self.source) {
                return Ok(unit);
            }
        }
        parser.parse(&self.source)
    }
}

// ── Cursor collection ───────────────────────────────────────────────────────

struct Collector<'a> {
    ctx: &'a JobContext,
    cancelled: &'a AtomicBool,
    result: IndexResult,
    /// file → owned. Blocked files contribute dependency edges only.
    ownership: HashMap<FileId, bool>,
    cancel_hit: bool,
}

impl Collector<'_> {
    fn visit(&mut self, cursor: &Cursor) -> ControlFlow<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            self.cancel_hit = true;
            return ControlFlow::Break(());
        }
        if cursor.depth as usize > self.ctx.config.max_cursor_depth {
            self.result.partial = true;
            return ControlFlow::Break(());
        }
        if cursor.usr.is_empty() {
            return ControlFlow::Continue(());
        }
        let file = self.ctx.files.intern(&cursor.path);
        if !self.owns(file) {
            return ControlFlow::Continue(());
        }

        let usr = self.ctx.usrs.intern(&cursor.usr);
        let location = Location::new(file, cursor.start, cursor.end);
        if !self.result.record_cursor(usr, location, cursor.kind) {
            return ControlFlow::Continue(());
        }

        if cursor.kind.category() != FactKind::Reference {
            self.result.record_name(&cursor.spelling, usr);
            for suffix in qualified_suffixes(&cursor.display_name) {
                self.result.record_name(suffix, usr);
            }
        }
        if cursor.kind.is_member_function() {
            for overridden in &cursor.overridden {
                if overridden.is_empty() {
                    continue;
                }
                let parent = self.ctx.usrs.intern(overridden);
                self.result.record_virtual(usr, parent);
            }
        }
        ControlFlow::Continue(())
    }

    fn owns(&mut self, file: FileId) -> bool {
        if let Some(&owned) = self.ownership.get(&file) {
            return owned;
        }
        let owned = self.decide(file);
        self.ownership.insert(file, owned);
        if owned {
            self.result.visited.insert(file);
        }
        owned
    }

    fn decide(&self, file: FileId) -> bool {
        let Some(path) = self.ctx.files.resolve(file) else {
            return false;
        };
        if path.starts_with(&self.ctx.project_root) {
            return true;
        }
        match self.ctx.config.system_header_policy {
            SystemHeaderPolicy::Index => true,
            SystemHeaderPolicy::Skip => false,
            SystemHeaderPolicy::IndexOnce => self.ctx.broker.claim(file, self.result.primary),
        }
    }

    fn record_inclusion(&mut self, inclusion: &Inclusion) {
        let directive_file = self.ctx.files.intern(&inclusion.path);
        let included = self.ctx.files.intern(&inclusion.included);
        // Headers with no cursors of their own still become visited, so a
        // re-merge replaces their now-empty fact set.
        self.owns(included);
        if self.owns(directive_file) {
            let location = Location::new(directive_file, inclusion.start, inclusion.end);
            self.result.record_include(location, included);
        } else {
            // Blocked includer: the edge still matters for dirty fan-out.
            self.result.dependencies.insert((directive_file, included));
        }
    }

    fn record_diagnostic(&mut self, diagnostic: &Diagnostic) {
        let Some(text) = &diagnostic.fix_it else {
            return;
        };
        let file = self.ctx.files.intern(&diagnostic.path);
        if !self.owns(file) {
            return;
        }
        self.result
            .record_fix_it(file, FixIt::new(diagnostic.start, diagnostic.end, text.clone()));
    }
}

/// `::`-separated suffixes of a qualified name: `a::b::c` yields
/// `a::b::c`, `b::c`, `c`.
fn qualified_suffixes(display_name: &str) -> impl Iterator<Item = &str> {
    let mut starts = vec![0];
    let mut search = 0;
    while let Some(found) = display_name[search..].find("::") {
        search += found + 2;
        starts.push(search);
    }
    starts.into_iter().map(move |start| &display_name[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cursor, FixtureParser, FixtureUnit};
    use cnav_core::CursorKind;
    use std::path::Path;

    fn context(policy: SystemHeaderPolicy) -> JobContext {
        let config = CnavConfig {
            system_header_policy: policy,
            ..Default::default()
        };
        JobContext {
            files: Arc::new(FileRegistry::new()),
            usrs: Arc::new(UsrTable::new()),
            config: Arc::new(config),
            broker: Arc::new(VisitBroker::new()),
            project_root: PathBuf::from("/proj"),
            cache: Arc::new(Mutex::new(UnitCache::new(4))),
            metrics: Arc::new(cnav_core::NoopMetrics),
        }
    }

    fn run(parser: &FixtureParser, ctx: &JobContext, path: &str) -> IndexResult {
        let job = ParseJob::new(SourceInformation::new(path), IndexType::Initial);
        job.run(parser, ctx, &AtomicBool::new(false)).unwrap()
    }

    #[test]
    fn qualified_suffixes_split_on_double_colon() {
        let suffixes: Vec<&str> = qualified_suffixes("ns::Widget::foo").collect();
        assert_eq!(suffixes, vec!["ns::Widget::foo", "Widget::foo", "foo"]);
        assert_eq!(qualified_suffixes("foo").collect::<Vec<_>>(), vec!["foo"]);
    }

    #[test]
    fn definition_and_call_index_into_one_usr() {
        let parser = FixtureParser::new();
        parser.set_unit(
            "/proj/a.c",
            FixtureUnit::new()
                .cursor(cursor(CursorKind::Definition, "c:@F@foo#", "foo", "/proj/a.c", 4, 7))
                .cursor(cursor(CursorKind::Reference, "c:@F@foo#", "foo", "/proj/a.c", 30, 33)),
        );
        let ctx = context(SystemHeaderPolicy::IndexOnce);
        let result = run(&parser, &ctx, "/proj/a.c");

        let usr = ctx.usrs.lookup("c:@F@foo#").unwrap();
        let file = ctx.files.lookup(Path::new("/proj/a.c")).unwrap();
        assert_eq!(result.defs[&usr], [Location::new(file, 4, 7)].into_iter().collect());
        assert_eq!(result.refs[&usr], [Location::new(file, 30, 33)].into_iter().collect());
        assert!(result.names["foo"].contains(&usr));
    }

    #[test]
    fn empty_usr_is_skipped() {
        let parser = FixtureParser::new();
        parser.set_unit(
            "/proj/a.c",
            FixtureUnit::new()
                .cursor(cursor(CursorKind::Definition, "", "", "/proj/a.c", 0, 10)),
        );
        let ctx = context(SystemHeaderPolicy::IndexOnce);
        let result = run(&parser, &ctx, "/proj/a.c");
        assert_eq!(result.fact_count(), 0);
    }

    #[test]
    fn member_function_records_symmetric_virtuals() {
        let mut child = cursor(
            CursorKind::MemberFunctionDefinition,
            "c:@S@D@F@f#",
            "f",
            "/proj/a.c",
            50,
            51,
        );
        child.overridden = vec!["c:@S@B@F@f#".to_string()];
        let parser = FixtureParser::new();
        parser.set_unit("/proj/a.c", FixtureUnit::new().cursor(child));

        let ctx = context(SystemHeaderPolicy::IndexOnce);
        let result = run(&parser, &ctx, "/proj/a.c");

        let derived = ctx.usrs.lookup("c:@S@D@F@f#").unwrap();
        let base = ctx.usrs.lookup("c:@S@B@F@f#").unwrap();
        assert!(result.virtuals[&derived].contains(&base));
        assert!(result.virtuals[&base].contains(&derived));
    }

    #[test]
    fn qualified_names_index_every_suffix() {
        let mut def = cursor(CursorKind::Definition, "c:@S@W@F@go#", "go", "/proj/a.c", 9, 11);
        def.display_name = "ns::W::go".to_string();
        let parser = FixtureParser::new();
        parser.set_unit("/proj/a.c", FixtureUnit::new().cursor(def));

        let ctx = context(SystemHeaderPolicy::IndexOnce);
        let result = run(&parser, &ctx, "/proj/a.c");
        let usr = ctx.usrs.lookup("c:@S@W@F@go#").unwrap();
        for name in ["go", "W::go", "ns::W::go"] {
            assert!(result.names[name].contains(&usr), "missing {name}");
        }
    }

    #[test]
    fn system_header_skip_policy_blocks_cursors_but_keeps_edges() {
        let parser = FixtureParser::new();
        parser.set_unit(
            "/proj/a.c",
            FixtureUnit::new()
                .cursor(cursor(CursorKind::Declaration, "c:@F@printf", "printf", "/usr/include/stdio.h", 4, 10))
                .include("/proj/a.c", 0, 18, "/usr/include/stdio.h"),
        );
        let ctx = context(SystemHeaderPolicy::Skip);
        let result = run(&parser, &ctx, "/proj/a.c");

        let header = ctx.files.lookup(Path::new("/usr/include/stdio.h")).unwrap();
        assert!(!result.visited.contains(&header));
        assert_eq!(result.fact_count(), 0);
        let primary = ctx.files.lookup(Path::new("/proj/a.c")).unwrap();
        assert!(result.dependencies.contains(&(primary, header)));
    }

    #[test]
    fn index_once_grants_header_to_first_unit_only() {
        let header_cursor =
            cursor(CursorKind::Declaration, "c:@F@g", "g", "/usr/include/g.h", 4, 5);
        let parser = FixtureParser::new();
        parser.set_unit("/proj/a.c", FixtureUnit::new().cursor(header_cursor.clone()));
        parser.set_unit("/proj/b.c", FixtureUnit::new().cursor(header_cursor));

        let ctx = context(SystemHeaderPolicy::IndexOnce);
        let first = run(&parser, &ctx, "/proj/a.c");
        let second = run(&parser, &ctx, "/proj/b.c");

        let header = ctx.files.lookup(Path::new("/usr/include/g.h")).unwrap();
        assert!(first.visited.contains(&header));
        assert!(!second.visited.contains(&header));
        assert_eq!(second.fact_count(), 0);

        // Releasing the owner lets the next parse claim the header again.
        let a = ctx.files.lookup(Path::new("/proj/a.c")).unwrap();
        ctx.broker.release_owner(a);
        let third = run(&parser, &ctx, "/proj/b.c");
        assert!(third.visited.contains(&header));
    }

    #[test]
    fn depth_limit_marks_partial() {
        let mut deep = cursor(CursorKind::Definition, "c:@F@deep", "deep", "/proj/a.c", 80, 84);
        deep.depth = 9;
        let parser = FixtureParser::new();
        parser.set_unit(
            "/proj/a.c",
            FixtureUnit::new()
                .cursor(cursor(CursorKind::Definition, "c:@F@top", "top", "/proj/a.c", 4, 7))
                .cursor(deep)
                .cursor(cursor(CursorKind::Definition, "c:@F@after", "after", "/proj/a.c", 90, 95)),
        );

        let mut config = CnavConfig::default();
        config.max_cursor_depth = 4;
        let ctx = JobContext {
            config: Arc::new(config),
            ..context(SystemHeaderPolicy::IndexOnce)
        };
        let result = run(&parser, &ctx, "/proj/a.c");

        assert!(result.partial);
        // The walk aborted at the deep cursor; facts before it survive.
        assert!(ctx.usrs.lookup("c:@F@top").is_some());
        assert!(ctx.usrs.lookup("c:@F@after").is_none());
    }

    #[test]
    fn cancellation_drops_partial_result() {
        let parser = FixtureParser::new();
        parser.set_unit(
            "/proj/a.c",
            FixtureUnit::new()
                .cursor(cursor(CursorKind::Definition, "c:@F@foo#", "foo", "/proj/a.c", 4, 7)),
        );
        let ctx = context(SystemHeaderPolicy::IndexOnce);
        let job = ParseJob::new(SourceInformation::new("/proj/a.c"), IndexType::Initial);
        let outcome = job.run(&parser, &ctx, &AtomicBool::new(true));
        assert_eq!(outcome.unwrap_err(), ParseFailure::Cancelled);
    }

    #[test]
    fn parse_failure_propagates() {
        let parser = FixtureParser::new();
        parser.set_failure("/proj/a.c", ParseFailure::ParserInvocationFailed);
        let ctx = context(SystemHeaderPolicy::IndexOnce);
        let job = ParseJob::new(SourceInformation::new("/proj/a.c"), IndexType::Initial);
        let outcome = job.run(&parser, &ctx, &AtomicBool::new(false));
        assert_eq!(outcome.unwrap_err(), ParseFailure::ParserInvocationFailed);
    }

    #[test]
    fn fix_its_collected_when_enabled() {
        let parser = FixtureParser::new();
        parser.set_unit(
            "/proj/a.c",
            FixtureUnit::new().fix_it("/proj/a.c", 12, 13, ";"),
        );
        let ctx = context(SystemHeaderPolicy::IndexOnce);
        let result = run(&parser, &ctx, "/proj/a.c");
        let file = ctx.files.lookup(Path::new("/proj/a.c")).unwrap();
        assert!(result.fix_its[&file].contains(&FixIt::new(12, 13, ";")));

        let mut config = CnavConfig::default();
        config.fix_its_enabled = false;
        let ctx = JobContext {
            config: Arc::new(config),
            ..context(SystemHeaderPolicy::IndexOnce)
        };
        let result = run(&parser, &ctx, "/proj/a.c");
        assert!(result.fix_its.is_empty());
    }
}
