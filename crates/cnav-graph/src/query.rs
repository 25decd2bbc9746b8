//! Read-only queries over the symbol graph.
//!
//! All of these run under the project's shared lock; none of them mutate
//! and none of them block on indexing. A query must not call back into
//! job submission while the lock is held.

use std::collections::HashSet;
use std::path::PathBuf;

use cnav_core::{CursorInfo, DependencyMode, FileId, FileRegistry, Location, UsrId};

use crate::SymbolGraph;

/// What `references` includes beside plain reference sites.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceFlags {
    pub include_declarations: bool,
    pub include_definitions: bool,
}

fn passes_filter(filter: &[PathBuf], files: &FileRegistry, file: FileId) -> bool {
    if filter.is_empty() {
        return true;
    }
    let Some(path) = files.resolve(file) else {
        return false;
    };
    filter.iter().any(|prefix| path.starts_with(prefix))
}

impl SymbolGraph {
    /// Cursor at a location: exact match first, otherwise the narrowest
    /// enclosing cursor in the same file. Un-indexed locations yield
    /// `None`, never an error.
    pub fn cursor(&self, location: Location) -> Option<CursorInfo> {
        if let Some(record) = self.cursors.get(&location) {
            return Some(record.info);
        }
        let mut best: Option<CursorInfo> = None;
        let range = Location::file_start(location.file)..=Location::file_end(location.file);
        for (key, record) in self.cursors.range(range) {
            if key.start > location.start {
                break;
            }
            if record.info.end < location.end {
                continue;
            }
            let narrower = match best {
                None => true,
                Some(b) => key.start > b.start || (key.start == b.start && record.info.end < b.end),
            };
            if narrower {
                best = Some(record.info);
            }
        }
        best
    }

    /// UsrId governing a location, if any cursor covers it.
    pub fn usr_at(&self, location: Location) -> Option<UsrId> {
        self.cursor(location).map(|info| info.usr)
    }

    /// All reference sites of the symbol at `location`, optionally with
    /// its declarations and definitions, filtered by path prefixes.
    pub fn references(
        &self,
        location: Location,
        flags: ReferenceFlags,
        filter: &[PathBuf],
        files: &FileRegistry,
    ) -> Vec<Location> {
        let Some(usr) = self.usr_at(location) else {
            return Vec::new();
        };
        let mut out: Vec<Location> = Vec::new();
        let mut extend = |locations: HashSet<Location>| {
            out.extend(
                locations
                    .into_iter()
                    .filter(|l| passes_filter(filter, files, l.file)),
            );
        };
        extend(self.ref_locations(usr));
        if flags.include_declarations {
            extend(self.decl_locations(usr));
        }
        if flags.include_definitions {
            extend(self.def_locations(usr));
        }
        out.sort();
        out.dedup();
        out
    }

    /// Every cursor belonging to the symbols a name resolves to.
    pub fn find_cursors(
        &self,
        name: &str,
        filter: &[PathBuf],
        files: &FileRegistry,
    ) -> Vec<(Location, CursorInfo)> {
        let mut out = Vec::new();
        for usr in self.usrs_for_name(name) {
            let mut locations: Vec<Location> = self
                .decl_locations(usr)
                .into_iter()
                .chain(self.def_locations(usr))
                .chain(self.ref_locations(usr))
                .collect();
            locations.sort();
            locations.dedup();
            for location in locations {
                if !passes_filter(filter, files, location.file) {
                    continue;
                }
                if let Some(record) = self.cursors.get(&location) {
                    out.push((location, record.info));
                }
            }
        }
        out.sort_by_key(|(location, _)| *location);
        out
    }

    /// Lexicographic scan of symbol names starting with `prefix`.
    pub fn list_symbols(
        &self,
        prefix: &str,
        filter: &[PathBuf],
        files: &FileRegistry,
    ) -> Vec<String> {
        self.names
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .filter(|(_, usrs)| {
                filter.is_empty()
                    || usrs.keys().any(|&usr| {
                        self.decl_locations(usr)
                            .into_iter()
                            .chain(self.def_locations(usr))
                            .chain(self.ref_locations(usr))
                            .any(|l| passes_filter(filter, files, l.file))
                    })
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// All cursors recorded in one file, in location order.
    pub fn cursors_in(&self, file: FileId) -> Vec<(Location, CursorInfo)> {
        self.cursors
            .range(Location::file_start(file)..=Location::file_end(file))
            .map(|(location, record)| (*location, record.info))
            .collect()
    }

    /// Transitive dependency closure of a file, including the file itself.
    pub fn dependencies(&self, file: FileId, mode: DependencyMode) -> HashSet<FileId> {
        self.deps.closure(file, mode)
    }

    /// The set of files to reindex when the given files change: the
    /// transitive reverse-dependency closure (headers invalidate all
    /// includers).
    pub fn dirty_closure(&self, dirty: &HashSet<FileId>) -> HashSet<FileId> {
        let mut out = HashSet::new();
        for &file in dirty {
            out.extend(self.deps.closure(file, DependencyMode::DependsOnArg));
        }
        out
    }

    /// Fix-its for one file as a line-oriented text block, sorted by start
    /// offset: `start-end text`.
    pub fn fixits(&self, file: FileId) -> String {
        let Some(fix_its) = self.fix_its.get(&file) else {
            return String::new();
        };
        let lines: Vec<String> = fix_its.keys().map(|f| f.to_string()).collect();
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cnav_core::{CursorKind, FixIt, IndexResult};
    use std::path::Path;

    fn loc(file: u32, start: u32, end: u32) -> Location {
        Location::new(FileId(file), start, end)
    }

    fn graph_with_foo() -> (SymbolGraph, FileRegistry) {
        let files = FileRegistry::new();
        let main = files.intern(Path::new("/src/a.c"));
        let other = files.intern(Path::new("/vendor/b.c"));
        assert_eq!((main, other), (FileId(0), FileId(1)));

        let mut graph = SymbolGraph::new();
        let mut result = IndexResult::new(main);
        result.visited.insert(other);
        result.record_cursor(UsrId(1), loc(0, 10, 13), CursorKind::Definition);
        result.record_cursor(UsrId(1), loc(0, 40, 43), CursorKind::Reference);
        result.record_cursor(UsrId(1), loc(1, 5, 8), CursorKind::Reference);
        result.record_name("foo", UsrId(1));
        result.record_name("ns::foo", UsrId(1));
        graph.merge(result);
        (graph, files)
    }

    #[test]
    fn cursor_exact_match() {
        let (graph, _) = graph_with_foo();
        let info = graph.cursor(loc(0, 10, 13)).unwrap();
        assert_eq!(info.usr, UsrId(1));
        assert_eq!(info.kind, CursorKind::Definition);
    }

    #[test]
    fn cursor_falls_back_to_narrowest_enclosing() {
        let mut graph = SymbolGraph::new();
        let mut result = IndexResult::new(FileId(0));
        result.record_cursor(UsrId(1), loc(0, 0, 100), CursorKind::Definition);
        result.record_cursor(UsrId(2), loc(0, 20, 60), CursorKind::Definition);
        result.record_name("outer", UsrId(1));
        result.record_name("inner", UsrId(2));
        graph.merge(result);

        // Point inside both extents resolves to the narrower one.
        assert_eq!(graph.cursor(loc(0, 30, 31)).unwrap().usr, UsrId(2));
        // Point only inside the outer extent.
        assert_eq!(graph.cursor(loc(0, 5, 6)).unwrap().usr, UsrId(1));
    }

    #[test]
    fn cursor_on_unindexed_location_is_none() {
        let graph = SymbolGraph::new();
        assert!(graph.cursor(loc(3, 1, 2)).is_none());
    }

    #[test]
    fn references_resolve_through_location() {
        let (graph, files) = graph_with_foo();
        let refs = graph.references(loc(0, 10, 13), ReferenceFlags::default(), &[], &files);
        assert_eq!(refs, vec![loc(0, 40, 43), loc(1, 5, 8)]);
    }

    #[test]
    fn references_with_definitions_and_filter() {
        let (graph, files) = graph_with_foo();
        let flags = ReferenceFlags {
            include_definitions: true,
            ..Default::default()
        };
        let refs = graph.references(loc(0, 40, 43), flags, &[PathBuf::from("/src")], &files);
        assert_eq!(refs, vec![loc(0, 10, 13), loc(0, 40, 43)]);
    }

    #[test]
    fn find_cursors_by_qualified_name() {
        let (graph, files) = graph_with_foo();
        let found = graph.find_cursors("ns::foo", &[], &files);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].0, loc(0, 10, 13));
    }

    #[test]
    fn list_symbols_prefix_scan() {
        let (graph, files) = graph_with_foo();
        assert_eq!(graph.list_symbols("fo", &[], &files), vec!["foo".to_string()]);
        assert_eq!(
            graph.list_symbols("", &[], &files),
            vec!["foo".to_string(), "ns::foo".to_string()]
        );
        assert!(graph.list_symbols("bar", &[], &files).is_empty());
    }

    #[test]
    fn list_symbols_honors_path_filter() {
        let (graph, files) = graph_with_foo();
        let hits = graph.list_symbols("foo", &[PathBuf::from("/vendor")], &files);
        assert_eq!(hits, vec!["foo".to_string()]);
        let misses = graph.list_symbols("foo", &[PathBuf::from("/elsewhere")], &files);
        assert!(misses.is_empty());
    }

    #[test]
    fn cursors_in_file_are_ordered() {
        let (graph, _) = graph_with_foo();
        let cursors = graph.cursors_in(FileId(0));
        assert_eq!(cursors.len(), 2);
        assert!(cursors[0].0 < cursors[1].0);
        assert!(graph.cursors_in(FileId(7)).is_empty());
    }

    #[test]
    fn fixits_render_sorted_lines() {
        let mut graph = SymbolGraph::new();
        let mut result = IndexResult::new(FileId(0));
        result.record_fix_it(FileId(0), FixIt::new(30, 31, ";"));
        result.record_fix_it(FileId(0), FixIt::new(4, 9, "foo"));
        graph.merge(result);

        assert_eq!(graph.fixits(FileId(0)), "4-9 foo\n30-31 ;");
        assert_eq!(graph.fixits(FileId(5)), "");
    }

    #[test]
    fn dirty_closure_reaches_all_includers() {
        let files = FileRegistry::new();
        let a = files.intern(Path::new("/a.c"));
        let b = files.intern(Path::new("/b.c"));
        let h = files.intern(Path::new("/x.h"));

        let mut graph = SymbolGraph::new();
        for primary in [a, b] {
            let mut result = IndexResult::new(primary);
            result.visited.insert(h);
            result.record_include(Location::new(primary, 0, 12), h);
            graph.merge(result);
        }

        let closure = graph.dirty_closure(&[h].into_iter().collect());
        assert_eq!(closure, [a, b, h].into_iter().collect());
    }
}
