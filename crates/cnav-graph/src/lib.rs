//! cnav-graph: The authoritative cross-unit symbol store and its merger.
//!
//! Facts arrive as per-translation-unit `IndexResult`s and are merged by a
//! single writer under the project's graph lock. Every fact carries the
//! set of primary files that contributed it: merging a unit first retracts
//! that unit's previous contribution (facts whose contributor set drains
//! disappear), then inserts the new facts. Primary-file facts are thereby
//! replaced wholesale while header facts shared between units stay alive
//! as the union of all contributing units.

mod deps;
mod query;

pub use deps::DependencyGraph;
pub use query::ReferenceFlags;

use std::collections::{BTreeMap, HashMap, HashSet};

use cnav_core::{
    CnavError, CursorInfo, FileId, FileRegistry, FixIt, IndexResult, Location, UsrId, UsrTable,
};

type Contributors = HashSet<FileId>;

#[derive(Debug, Clone)]
pub(crate) struct CursorRecord {
    pub(crate) info: CursorInfo,
    contributors: Contributors,
}

#[derive(Debug, Clone)]
pub(crate) struct IncludeRecord {
    pub(crate) included: FileId,
    contributors: Contributors,
}

/// The cross-unit symbol graph.
pub struct SymbolGraph {
    /// Symbol name (with qualified suffix permutations) → UsrIds.
    pub(crate) names: BTreeMap<String, HashMap<UsrId, Contributors>>,
    pub(crate) decls: HashMap<UsrId, HashMap<Location, Contributors>>,
    pub(crate) defs: HashMap<UsrId, HashMap<Location, Contributors>>,
    pub(crate) refs: HashMap<UsrId, HashMap<Location, Contributors>>,
    pub(crate) virtuals: HashMap<UsrId, HashMap<UsrId, Contributors>>,
    pub(crate) cursors: BTreeMap<Location, CursorRecord>,
    pub(crate) includes: HashMap<Location, IncludeRecord>,
    pub(crate) fix_its: HashMap<FileId, BTreeMap<FixIt, Contributors>>,
    pub(crate) deps: DependencyGraph,
    /// Last merged result per primary file, driving retraction and
    /// persistence.
    merged: HashMap<FileId, IndexResult>,
}

/// Counts for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub units: usize,
    pub names: usize,
    pub decls: usize,
    pub defs: usize,
    pub refs: usize,
    pub dependency_edges: usize,
}

impl SymbolGraph {
    pub fn new() -> Self {
        Self {
            names: BTreeMap::new(),
            decls: HashMap::new(),
            defs: HashMap::new(),
            refs: HashMap::new(),
            virtuals: HashMap::new(),
            cursors: BTreeMap::new(),
            includes: HashMap::new(),
            fix_its: HashMap::new(),
            deps: DependencyGraph::new(),
            merged: HashMap::new(),
        }
    }

    // ── Merging ─────────────────────────────────────────────────────────

    /// Merge one unit's facts, replacing whatever the same primary merged
    /// before. Atomic from the perspective of readers: the caller holds
    /// the graph's exclusive lock for the duration.
    pub fn merge(&mut self, result: IndexResult) {
        let primary = result.primary;
        if let Some(prev) = self.merged.remove(&primary) {
            self.retract(&prev);
        }
        self.insert(&result);
        tracing::debug!(
            primary = %primary,
            facts = result.fact_count(),
            visited = result.visited.len(),
            partial = result.partial,
            "merged translation unit"
        );
        self.merged.insert(primary, result);
    }

    /// Erase every fact a primary contributed, then forget the unit.
    /// Returns false when the primary was never merged.
    pub fn remove_unit(&mut self, primary: FileId) -> bool {
        match self.merged.remove(&primary) {
            Some(prev) => {
                self.retract(&prev);
                tracing::debug!(primary = %primary, "removed translation unit");
                true
            }
            None => false,
        }
    }

    /// Drop every fact located inside the given files, ahead of their
    /// re-merge. Contributor bookkeeping in `merged` is left alone; the
    /// scheduled reindex of every affected unit replaces it.
    pub fn scrub_files(&mut self, files: &HashSet<FileId>) {
        for table in [&mut self.decls, &mut self.defs, &mut self.refs] {
            table.retain(|_, locations| {
                locations.retain(|location, _| !files.contains(&location.file));
                !locations.is_empty()
            });
        }
        self.cursors.retain(|location, _| !files.contains(&location.file));
        self.includes.retain(|location, _| !files.contains(&location.file));
        for &file in files {
            self.fix_its.remove(&file);
            self.deps.remove_outgoing(file);
        }
    }

    fn retract(&mut self, prev: &IndexResult) {
        let contributor = prev.primary;
        for (table, facts) in [
            (&mut self.decls, &prev.decls),
            (&mut self.defs, &prev.defs),
            (&mut self.refs, &prev.refs),
        ] {
            for (&usr, locations) in facts {
                let Some(stored) = table.get_mut(&usr) else {
                    continue;
                };
                for location in locations {
                    if let Some(contributors) = stored.get_mut(location) {
                        contributors.remove(&contributor);
                        if contributors.is_empty() {
                            stored.remove(location);
                        }
                    }
                }
                if stored.is_empty() {
                    table.remove(&usr);
                }
            }
        }
        for (&usr, others) in &prev.virtuals {
            let Some(stored) = self.virtuals.get_mut(&usr) else {
                continue;
            };
            for other in others {
                if let Some(contributors) = stored.get_mut(other) {
                    contributors.remove(&contributor);
                    if contributors.is_empty() {
                        stored.remove(other);
                    }
                }
            }
            if stored.is_empty() {
                self.virtuals.remove(&usr);
            }
        }
        for (name, usrs) in &prev.names {
            let Some(stored) = self.names.get_mut(name) else {
                continue;
            };
            for usr in usrs {
                if let Some(contributors) = stored.get_mut(usr) {
                    contributors.remove(&contributor);
                    if contributors.is_empty() {
                        stored.remove(usr);
                    }
                }
            }
            if stored.is_empty() {
                self.names.remove(name);
            }
        }
        for location in prev.cursors.keys() {
            if let Some(record) = self.cursors.get_mut(location) {
                record.contributors.remove(&contributor);
                if record.contributors.is_empty() {
                    self.cursors.remove(location);
                }
            }
        }
        for location in prev.includes.keys() {
            if let Some(record) = self.includes.get_mut(location) {
                record.contributors.remove(&contributor);
                if record.contributors.is_empty() {
                    self.includes.remove(location);
                }
            }
        }
        for (&file, fix_its) in &prev.fix_its {
            let Some(stored) = self.fix_its.get_mut(&file) else {
                continue;
            };
            for fix_it in fix_its {
                if let Some(contributors) = stored.get_mut(fix_it) {
                    contributors.remove(&contributor);
                    if contributors.is_empty() {
                        stored.remove(fix_it);
                    }
                }
            }
            if stored.is_empty() {
                self.fix_its.remove(&file);
            }
        }
        for &(includer, includee) in &prev.dependencies {
            self.deps.retract_edge(includer, includee, contributor);
        }
    }

    fn insert(&mut self, result: &IndexResult) {
        let contributor = result.primary;
        for (table, facts) in [
            (&mut self.decls, &result.decls),
            (&mut self.defs, &result.defs),
            (&mut self.refs, &result.refs),
        ] {
            for (&usr, locations) in facts {
                let stored = table.entry(usr).or_default();
                for &location in locations {
                    stored.entry(location).or_default().insert(contributor);
                }
            }
        }
        for (&usr, others) in &result.virtuals {
            let stored = self.virtuals.entry(usr).or_default();
            for &other in others {
                stored.entry(other).or_default().insert(contributor);
            }
        }
        for (name, usrs) in &result.names {
            let stored = self.names.entry(name.clone()).or_default();
            for &usr in usrs {
                stored.entry(usr).or_default().insert(contributor);
            }
        }
        for (&location, &info) in &result.cursors {
            match self.cursors.get_mut(&location) {
                Some(record) => {
                    // Last-merged unit wins the cursor at a shared location.
                    record.info = info;
                    record.contributors.insert(contributor);
                }
                None => {
                    let mut contributors = Contributors::new();
                    contributors.insert(contributor);
                    self.cursors.insert(location, CursorRecord { info, contributors });
                }
            }
        }
        for (&location, &included) in &result.includes {
            match self.includes.get_mut(&location) {
                Some(record) => {
                    record.included = included;
                    record.contributors.insert(contributor);
                }
                None => {
                    let mut contributors = Contributors::new();
                    contributors.insert(contributor);
                    self.includes.insert(location, IncludeRecord { included, contributors });
                }
            }
        }
        for (&file, fix_its) in &result.fix_its {
            let stored = self.fix_its.entry(file).or_default();
            for fix_it in fix_its {
                stored.entry(fix_it.clone()).or_default().insert(contributor);
            }
        }
        for &(includer, includee) in &result.dependencies {
            self.deps.add_edge(includer, includee, contributor);
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn deps(&self) -> &DependencyGraph {
        &self.deps
    }

    /// All merged units, for persistence. Unordered.
    pub fn units(&self) -> impl Iterator<Item = &IndexResult> {
        self.merged.values()
    }

    pub fn unit(&self, primary: FileId) -> Option<&IndexResult> {
        self.merged.get(&primary)
    }

    pub fn has_unit(&self, primary: FileId) -> bool {
        self.merged.contains_key(&primary)
    }

    pub fn decl_locations(&self, usr: UsrId) -> HashSet<Location> {
        self.decls
            .get(&usr)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn def_locations(&self, usr: UsrId) -> HashSet<Location> {
        self.defs
            .get(&usr)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn ref_locations(&self, usr: UsrId) -> HashSet<Location> {
        self.refs
            .get(&usr)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn overrides(&self, usr: UsrId) -> HashSet<UsrId> {
        self.virtuals
            .get(&usr)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn usrs_for_name(&self, name: &str) -> HashSet<UsrId> {
        self.names
            .get(name)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> GraphStats {
        let count = |t: &HashMap<UsrId, HashMap<Location, Contributors>>| {
            t.values().map(HashMap::len).sum::<usize>()
        };
        GraphStats {
            units: self.merged.len(),
            names: self.names.len(),
            decls: count(&self.decls),
            defs: count(&self.defs),
            refs: count(&self.refs),
            dependency_edges: self.deps.edge_count(),
        }
    }

    // ── Integrity ───────────────────────────────────────────────────────

    /// Structural invariant check. A violation means the graph is corrupt;
    /// the recovery policy is to discard and re-index from scratch.
    pub fn validate(&self, files: &FileRegistry, usrs: &UsrTable) -> Result<(), CnavError> {
        let file_known = |f: FileId| (f.0 as usize) < files.len();
        let usr_known = |u: UsrId| (u.0 as usize) < usrs.len();

        for (label, table) in [("decls", &self.decls), ("defs", &self.defs), ("refs", &self.refs)]
        {
            for (&usr, locations) in table {
                if !usr_known(usr) {
                    return Err(CnavError::Invariant(format!("{label}: unknown {usr}")));
                }
                for location in locations.keys() {
                    if !file_known(location.file) {
                        return Err(CnavError::Invariant(format!(
                            "{label}: location {location} has unknown file"
                        )));
                    }
                }
            }
        }
        for (&usr, others) in &self.virtuals {
            if !usr_known(usr) || others.keys().any(|&o| !usr_known(o)) {
                return Err(CnavError::Invariant(format!("virtuals: unknown usr near {usr}")));
            }
        }
        for usrs_of_name in self.names.values() {
            if usrs_of_name.keys().any(|&u| !usr_known(u)) {
                return Err(CnavError::Invariant("names: unknown usr".to_string()));
            }
        }
        for location in self.cursors.keys() {
            if !file_known(location.file) {
                return Err(CnavError::Invariant(format!(
                    "cursors: location {location} has unknown file"
                )));
            }
        }
        // Every defined symbol must be reachable by name.
        for &usr in self.defs.keys() {
            let named = self.names.values().any(|m| m.contains_key(&usr));
            if !named {
                return Err(CnavError::Invariant(format!("defs: {usr} has no name entry")));
            }
        }
        Ok(())
    }

    /// Canonical text dump with ids resolved through the registries: two
    /// graphs describe the same index iff their dumps match, regardless of
    /// id numbering. Lines are sorted.
    pub fn dump(&self, files: &FileRegistry, usrs: &UsrTable) -> String {
        let path = |f: FileId| {
            files
                .resolve(f)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| format!("<{f}>"))
        };
        let usr = |u: UsrId| usrs.resolve(u).unwrap_or_else(|| format!("<{u}>"));
        let loc = |l: &Location| format!("{}:{}-{}", path(l.file), l.start, l.end);

        let mut lines = Vec::new();
        for (label, table) in [("decl", &self.decls), ("def", &self.defs), ("ref", &self.refs)]
        {
            for (&u, locations) in table {
                for l in locations.keys() {
                    lines.push(format!("{label} {} {}", usr(u), loc(l)));
                }
            }
        }
        for (&u, others) in &self.virtuals {
            for &o in others.keys() {
                lines.push(format!("virtual {} {}", usr(u), usr(o)));
            }
        }
        for (name, us) in &self.names {
            for &u in us.keys() {
                lines.push(format!("name {} {}", name, usr(u)));
            }
        }
        for (l, record) in &self.cursors {
            lines.push(format!(
                "cursor {} {} {}",
                loc(l),
                usr(record.info.usr),
                record.info.kind
            ));
        }
        for (l, record) in &self.includes {
            lines.push(format!("include {} -> {}", loc(l), path(record.included)));
        }
        for (&file, fix_its) in &self.fix_its {
            for fix_it in fix_its.keys() {
                lines.push(format!("fixit {} {}", path(file), fix_it));
            }
        }
        for (a, b) in self.deps.edges() {
            lines.push(format!("dep {} -> {}", path(a), path(b)));
        }
        lines.sort();
        lines.join("\n")
    }
}

impl Default for SymbolGraph {
    fn default() -> Self {
        Self::new()
    }
}
