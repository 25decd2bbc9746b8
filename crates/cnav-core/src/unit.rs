//! The per-translation-unit index result.
//!
//! A `ParseJob` fills one of these while walking the cursor stream; the
//! merger consumes it. It has no side effects on the graph of its own.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{CursorInfo, CursorKind, FactKind, FileId, FixIt, Location, UsrId};

/// Every fact extracted from one parse of one translation unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexResult {
    /// FileId of the unit's primary source file.
    pub primary: FileId,
    /// UsrId → locations of declarations.
    pub decls: HashMap<UsrId, HashSet<Location>>,
    /// UsrId → locations of definitions.
    pub defs: HashMap<UsrId, HashSet<Location>>,
    /// Referenced UsrId → reference sites.
    pub refs: HashMap<UsrId, HashSet<Location>>,
    /// Symmetric virtual-override closure.
    pub virtuals: HashMap<UsrId, HashSet<UsrId>>,
    /// Symbol name (and its qualified suffix permutations) → UsrIds.
    pub names: HashMap<String, HashSet<UsrId>>,
    /// Location → winning cursor at that extent.
    pub cursors: HashMap<Location, CursorInfo>,
    /// Include directive location → included file.
    pub includes: HashMap<Location, FileId>,
    /// Fix-it hints grouped by file, ordered by start offset.
    pub fix_its: HashMap<FileId, BTreeSet<FixIt>>,
    /// Files whose facts this unit owns: the primary plus every header the
    /// parser visited that was not blocked by the system-header policy.
    pub visited: HashSet<FileId>,
    /// Includer → includee dependency edges discovered during the walk.
    pub dependencies: HashSet<(FileId, FileId)>,
    /// Set when the cursor walk was aborted at the depth limit.
    pub partial: bool,
}

impl IndexResult {
    pub fn new(primary: FileId) -> Self {
        let mut result = Self {
            primary,
            ..Default::default()
        };
        result.visited.insert(primary);
        result
    }

    fn table_mut(&mut self, kind: FactKind) -> &mut HashMap<UsrId, HashSet<Location>> {
        match kind {
            FactKind::Declaration => &mut self.decls,
            FactKind::Definition => &mut self.defs,
            FactKind::Reference => &mut self.refs,
        }
    }

    /// Route one cursor into decls/defs/refs and the location→cursor map.
    ///
    /// If two cursors land on the same location with different UsrIds, the
    /// kind with the higher precedence wins (Definition > Declaration >
    /// Reference); on equal precedence the first one seen stays.
    pub fn record_cursor(&mut self, usr: UsrId, location: Location, kind: CursorKind) -> bool {
        if let Some(existing) = self.cursors.get(&location).copied() {
            if existing.kind.precedence() >= kind.precedence() {
                return false;
            }
            self.evict(existing, location);
        }
        self.cursors.insert(
            location,
            CursorInfo {
                usr,
                start: location.start,
                end: location.end,
                kind,
            },
        );
        self.table_mut(kind.category())
            .entry(usr)
            .or_default()
            .insert(location);
        true
    }

    fn evict(&mut self, loser: CursorInfo, location: Location) {
        let table = self.table_mut(loser.kind.category());
        if let Some(locations) = table.get_mut(&loser.usr) {
            locations.remove(&location);
            if locations.is_empty() {
                table.remove(&loser.usr);
            }
        }
    }

    /// Map a symbol name to a UsrId.
    pub fn record_name(&mut self, name: &str, usr: UsrId) {
        if name.is_empty() {
            return;
        }
        self.names.entry(name.to_string()).or_default().insert(usr);
    }

    /// Record an override edge in both directions.
    pub fn record_virtual(&mut self, child: UsrId, parent: UsrId) {
        self.virtuals.entry(child).or_default().insert(parent);
        self.virtuals.entry(parent).or_default().insert(child);
    }

    /// Record an inclusion directive and its dependency edge.
    pub fn record_include(&mut self, directive: Location, included: FileId) {
        self.includes.insert(directive, included);
        self.dependencies.insert((directive.file, included));
    }

    pub fn record_fix_it(&mut self, file: FileId, fix_it: FixIt) {
        self.fix_its.entry(file).or_default().insert(fix_it);
    }

    /// Total number of symbol facts, for completion logging.
    pub fn fact_count(&self) -> usize {
        let count = |m: &HashMap<UsrId, HashSet<Location>>| m.values().map(HashSet::len).sum::<usize>();
        count(&self.decls) + count(&self.defs) + count(&self.refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(file: u32, start: u32, end: u32) -> Location {
        Location::new(FileId(file), start, end)
    }

    #[test]
    fn cursor_routes_by_kind() {
        let mut result = IndexResult::new(FileId(0));
        let usr = UsrId(7);
        result.record_cursor(usr, loc(0, 4, 7), CursorKind::Definition);
        result.record_cursor(usr, loc(0, 20, 23), CursorKind::Reference);
        assert!(result.defs[&usr].contains(&loc(0, 4, 7)));
        assert!(result.refs[&usr].contains(&loc(0, 20, 23)));
        assert!(result.decls.is_empty());
    }

    #[test]
    fn definition_beats_declaration_at_same_location() {
        let mut result = IndexResult::new(FileId(0));
        let l = loc(0, 4, 7);
        result.record_cursor(UsrId(1), l, CursorKind::Declaration);
        assert!(result.record_cursor(UsrId(2), l, CursorKind::Definition));
        assert_eq!(result.cursors[&l].usr, UsrId(2));
        assert!(!result.decls.contains_key(&UsrId(1)));
        assert!(result.defs[&UsrId(2)].contains(&l));
    }

    #[test]
    fn equal_precedence_keeps_first() {
        let mut result = IndexResult::new(FileId(0));
        let l = loc(0, 4, 7);
        result.record_cursor(UsrId(1), l, CursorKind::Declaration);
        assert!(!result.record_cursor(UsrId(2), l, CursorKind::MemberFunctionDeclaration));
        assert_eq!(result.cursors[&l].usr, UsrId(1));
    }

    #[test]
    fn virtuals_are_symmetric() {
        let mut result = IndexResult::new(FileId(0));
        result.record_virtual(UsrId(1), UsrId(2));
        assert!(result.virtuals[&UsrId(1)].contains(&UsrId(2)));
        assert!(result.virtuals[&UsrId(2)].contains(&UsrId(1)));
    }

    #[test]
    fn includes_accumulate_dependency_edges() {
        let mut result = IndexResult::new(FileId(0));
        result.record_include(loc(0, 0, 18), FileId(3));
        assert_eq!(result.includes[&loc(0, 0, 18)], FileId(3));
        assert!(result.dependencies.contains(&(FileId(0), FileId(3))));
    }

    #[test]
    fn fix_its_stay_sorted_by_start() {
        let mut result = IndexResult::new(FileId(0));
        result.record_fix_it(FileId(0), FixIt::new(30, 31, ";"));
        result.record_fix_it(FileId(0), FixIt::new(4, 9, "foo"));
        let starts: Vec<u32> = result.fix_its[&FileId(0)].iter().map(|f| f.start).collect();
        assert_eq!(starts, vec![4, 30]);
    }

    #[test]
    fn primary_is_always_visited() {
        let result = IndexResult::new(FileId(9));
        assert!(result.visited.contains(&FileId(9)));
    }
}
