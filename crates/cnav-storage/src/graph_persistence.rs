//! Saving and restoring the symbol graph.
//!
//! Save flushes the registries, the source table, and every merged unit's
//! facts inside one transaction. Restore re-interns paths and USRs into
//! the live registries (ids may renumber) and replays each unit through
//! the merger, rebuilding contributor bookkeeping exactly as live merges
//! would have.

use rusqlite::{params, Transaction};
use std::collections::HashMap;
use std::path::PathBuf;

use cnav_core::{
    CnavError, CursorKind, FileId, FileRegistry, FixIt, IndexResult, Location, SourceInformation,
    UsrId, UsrTable,
};
use cnav_graph::SymbolGraph;

use crate::Storage;

/// What a restore hands back to the project.
pub struct RestoredIndex {
    pub graph: SymbolGraph,
    pub sources: HashMap<FileId, SourceInformation>,
    /// Sources whose on-disk content no longer matches the stored hash;
    /// the caller should schedule a reindex for each.
    pub stale: Vec<FileId>,
}

impl Storage {
    // ── Save ────────────────────────────────────────────────────────────

    /// Flush the whole graph. A failed save leaves both the database (by
    /// transaction rollback) and the in-memory graph untouched.
    pub fn save_graph(
        &self,
        graph: &SymbolGraph,
        files: &FileRegistry,
        usrs: &UsrTable,
        sources: &HashMap<FileId, SourceInformation>,
    ) -> Result<(), CnavError> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| CnavError::Storage(e.to_string()))?;

        for table in [
            "files",
            "usrs",
            "sources",
            "units",
            "unit_symbols",
            "unit_virtuals",
            "unit_names",
            "unit_cursors",
            "unit_includes",
            "unit_fixits",
            "unit_visited",
            "unit_deps",
        ] {
            tx.execute(&format!("DELETE FROM {table}"), [])
                .map_err(|e| CnavError::Storage(e.to_string()))?;
        }

        for (id, path) in files.snapshot() {
            tx.execute(
                "INSERT INTO files (id, path) VALUES (?1, ?2)",
                params![id.0 as i64, path.to_string_lossy()],
            )
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        }
        for (id, usr) in usrs.snapshot() {
            tx.execute(
                "INSERT INTO usrs (id, usr) VALUES (?1, ?2)",
                params![id.0 as i64, usr],
            )
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        }

        for (&file_id, source) in sources {
            let args = serde_json::to_string(&source.args)?;
            let hash = std::fs::read(&source.source_file)
                .ok()
                .map(|content| Self::content_hash(&content));
            tx.execute(
                "INSERT INTO sources (file_id, args, working_dir, content_hash)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    file_id.0 as i64,
                    args,
                    source.working_dir.to_string_lossy(),
                    hash
                ],
            )
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        }

        let mut unit_count = 0usize;
        for unit in graph.units() {
            save_unit(&tx, unit)?;
            unit_count += 1;
        }

        tx.commit().map_err(|e| CnavError::Storage(e.to_string()))?;
        tracing::info!(units = unit_count, files = files.len(), "graph saved");
        Ok(())
    }

    // ── Restore ─────────────────────────────────────────────────────────

    /// Rebuild the graph by replaying every stored unit through the
    /// merger. Stored ids are re-interned into the live registries, so the
    /// result is identical to the saved graph up to id renumbering.
    pub fn load_graph(
        &self,
        files: &FileRegistry,
        usrs: &UsrTable,
    ) -> Result<RestoredIndex, CnavError> {
        let conn = self.conn();

        let mut file_map: HashMap<i64, FileId> = HashMap::new();
        let mut stmt = conn
            .prepare("SELECT id, path FROM files ORDER BY id")
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        for row in rows {
            let (stored, path) = row.map_err(|e| CnavError::Storage(e.to_string()))?;
            file_map.insert(stored, files.intern(&PathBuf::from(path)));
        }

        let mut usr_map: HashMap<i64, UsrId> = HashMap::new();
        let mut stmt = conn
            .prepare("SELECT id, usr FROM usrs ORDER BY id")
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        for row in rows {
            let (stored, usr) = row.map_err(|e| CnavError::Storage(e.to_string()))?;
            usr_map.insert(stored, usrs.intern(&usr));
        }

        let map_file = |stored: i64| -> Result<FileId, CnavError> {
            file_map
                .get(&stored)
                .copied()
                .ok_or_else(|| CnavError::Invariant(format!("stored file id {stored} unknown")))
        };
        let map_usr = |stored: i64| -> Result<UsrId, CnavError> {
            usr_map
                .get(&stored)
                .copied()
                .ok_or_else(|| CnavError::Invariant(format!("stored usr id {stored} unknown")))
        };

        let mut graph = SymbolGraph::new();
        let mut stmt = conn
            .prepare("SELECT primary_file, partial FROM units ORDER BY primary_file")
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        let units: Vec<(i64, bool)> = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?)))
            .map_err(|e| CnavError::Storage(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| CnavError::Storage(e.to_string()))?;

        for (stored_primary, partial) in units {
            let mut result = IndexResult::new(map_file(stored_primary)?);
            result.partial = partial;
            load_unit(&conn, stored_primary, &mut result, &map_file, &map_usr)?;
            graph.merge(result);
        }

        let mut sources: HashMap<FileId, SourceInformation> = HashMap::new();
        let mut stale: Vec<FileId> = Vec::new();
        let mut stmt = conn
            .prepare("SELECT file_id, args, working_dir, content_hash FROM sources")
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        for row in rows {
            let (stored, args, working_dir, hash) =
                row.map_err(|e| CnavError::Storage(e.to_string()))?;
            let file_id = map_file(stored)?;
            let source_file = files
                .resolve(file_id)
                .ok_or_else(|| CnavError::Invariant(format!("source file {file_id} unknown")))?;
            let source = SourceInformation {
                source_file: source_file.clone(),
                args: serde_json::from_str(&args)?,
                working_dir: PathBuf::from(working_dir),
            };
            let current = std::fs::read(&source_file)
                .ok()
                .map(|content| Self::content_hash(&content));
            if current.is_none() || current != hash {
                stale.push(file_id);
            }
            sources.insert(file_id, source);
        }

        tracing::info!(
            units = graph.stats().units,
            stale = stale.len(),
            "graph restored"
        );
        Ok(RestoredIndex {
            graph,
            sources,
            stale,
        })
    }
}

fn save_unit(tx: &Transaction<'_>, unit: &IndexResult) -> Result<(), CnavError> {
    let store = |e: rusqlite::Error| CnavError::Storage(e.to_string());
    let primary = unit.primary.0 as i64;

    tx.execute(
        "INSERT INTO units (primary_file, partial) VALUES (?1, ?2)",
        params![primary, unit.partial],
    )
    .map_err(store)?;

    let mut symbols = tx
        .prepare_cached(
            "INSERT INTO unit_symbols (unit, category, usr, file, start_offset, end_offset)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(store)?;
    for (category, table) in [("decl", &unit.decls), ("def", &unit.defs), ("ref", &unit.refs)] {
        for (usr, locations) in table {
            for location in locations {
                symbols
                    .execute(params![
                        primary,
                        category,
                        usr.0 as i64,
                        location.file.0 as i64,
                        location.start as i64,
                        location.end as i64
                    ])
                    .map_err(store)?;
            }
        }
    }

    let mut virtuals = tx
        .prepare_cached("INSERT INTO unit_virtuals (unit, usr, other) VALUES (?1, ?2, ?3)")
        .map_err(store)?;
    for (usr, others) in &unit.virtuals {
        for other in others {
            virtuals
                .execute(params![primary, usr.0 as i64, other.0 as i64])
                .map_err(store)?;
        }
    }

    let mut names = tx
        .prepare_cached("INSERT INTO unit_names (unit, name, usr) VALUES (?1, ?2, ?3)")
        .map_err(store)?;
    for (name, usr_set) in &unit.names {
        for usr in usr_set {
            names
                .execute(params![primary, name, usr.0 as i64])
                .map_err(store)?;
        }
    }

    let mut cursors = tx
        .prepare_cached(
            "INSERT INTO unit_cursors (unit, file, start_offset, end_offset, usr, kind)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(store)?;
    for (location, info) in &unit.cursors {
        cursors
            .execute(params![
                primary,
                location.file.0 as i64,
                location.start as i64,
                location.end as i64,
                info.usr.0 as i64,
                info.kind.to_string()
            ])
            .map_err(store)?;
    }

    let mut includes = tx
        .prepare_cached(
            "INSERT INTO unit_includes (unit, file, start_offset, end_offset, included)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(store)?;
    for (location, included) in &unit.includes {
        includes
            .execute(params![
                primary,
                location.file.0 as i64,
                location.start as i64,
                location.end as i64,
                included.0 as i64
            ])
            .map_err(store)?;
    }

    let mut fixits = tx
        .prepare_cached(
            "INSERT INTO unit_fixits (unit, file, start_offset, end_offset, text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(store)?;
    for (file, fix_its) in &unit.fix_its {
        for fix_it in fix_its {
            fixits
                .execute(params![
                    primary,
                    file.0 as i64,
                    fix_it.start as i64,
                    fix_it.end as i64,
                    fix_it.text
                ])
                .map_err(store)?;
        }
    }

    let mut visited = tx
        .prepare_cached("INSERT INTO unit_visited (unit, file) VALUES (?1, ?2)")
        .map_err(store)?;
    for file in &unit.visited {
        visited.execute(params![primary, file.0 as i64]).map_err(store)?;
    }

    let mut deps = tx
        .prepare_cached("INSERT INTO unit_deps (unit, includer, includee) VALUES (?1, ?2, ?3)")
        .map_err(store)?;
    for (includer, includee) in &unit.dependencies {
        deps.execute(params![primary, includer.0 as i64, includee.0 as i64])
            .map_err(store)?;
    }

    Ok(())
}

fn load_unit(
    conn: &rusqlite::Connection,
    stored_primary: i64,
    result: &mut IndexResult,
    map_file: &dyn Fn(i64) -> Result<FileId, CnavError>,
    map_usr: &dyn Fn(i64) -> Result<UsrId, CnavError>,
) -> Result<(), CnavError> {
    let store = |e: rusqlite::Error| CnavError::Storage(e.to_string());

    let mut stmt = conn
        .prepare_cached(
            "SELECT category, usr, file, start_offset, end_offset
             FROM unit_symbols WHERE unit = ?1",
        )
        .map_err(store)?;
    let rows = stmt
        .query_map(params![stored_primary], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })
        .map_err(store)?;
    for row in rows {
        let (category, usr, file, start, end) = row.map_err(store)?;
        let usr = map_usr(usr)?;
        let location = Location::new(map_file(file)?, start as u32, end as u32);
        let table = match category.as_str() {
            "decl" => &mut result.decls,
            "def" => &mut result.defs,
            "ref" => &mut result.refs,
            other => {
                return Err(CnavError::Storage(format!("unknown fact category {other}")));
            }
        };
        table.entry(usr).or_default().insert(location);
    }

    let mut stmt = conn
        .prepare_cached("SELECT usr, other FROM unit_virtuals WHERE unit = ?1")
        .map_err(store)?;
    let rows = stmt
        .query_map(params![stored_primary], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(store)?;
    for row in rows {
        let (usr, other) = row.map_err(store)?;
        let (usr, other) = (map_usr(usr)?, map_usr(other)?);
        result.virtuals.entry(usr).or_default().insert(other);
    }

    let mut stmt = conn
        .prepare_cached("SELECT name, usr FROM unit_names WHERE unit = ?1")
        .map_err(store)?;
    let rows = stmt
        .query_map(params![stored_primary], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(store)?;
    for row in rows {
        let (name, usr) = row.map_err(store)?;
        result.names.entry(name).or_default().insert(map_usr(usr)?);
    }

    let mut stmt = conn
        .prepare_cached(
            "SELECT file, start_offset, end_offset, usr, kind FROM unit_cursors WHERE unit = ?1",
        )
        .map_err(store)?;
    let rows = stmt
        .query_map(params![stored_primary], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })
        .map_err(store)?;
    for row in rows {
        let (file, start, end, usr, kind) = row.map_err(store)?;
        let location = Location::new(map_file(file)?, start as u32, end as u32);
        let kind: CursorKind = kind.parse()?;
        result.cursors.insert(
            location,
            cnav_core::CursorInfo {
                usr: map_usr(usr)?,
                start: location.start,
                end: location.end,
                kind,
            },
        );
    }

    let mut stmt = conn
        .prepare_cached(
            "SELECT file, start_offset, end_offset, included FROM unit_includes WHERE unit = ?1",
        )
        .map_err(store)?;
    let rows = stmt
        .query_map(params![stored_primary], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .map_err(store)?;
    for row in rows {
        let (file, start, end, included) = row.map_err(store)?;
        let location = Location::new(map_file(file)?, start as u32, end as u32);
        result.includes.insert(location, map_file(included)?);
    }

    let mut stmt = conn
        .prepare_cached(
            "SELECT file, start_offset, end_offset, text FROM unit_fixits WHERE unit = ?1",
        )
        .map_err(store)?;
    let rows = stmt
        .query_map(params![stored_primary], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(store)?;
    for row in rows {
        let (file, start, end, text) = row.map_err(store)?;
        result
            .fix_its
            .entry(map_file(file)?)
            .or_default()
            .insert(FixIt::new(start as u32, end as u32, text));
    }

    let mut stmt = conn
        .prepare_cached("SELECT file FROM unit_visited WHERE unit = ?1")
        .map_err(store)?;
    let rows = stmt
        .query_map(params![stored_primary], |row| row.get::<_, i64>(0))
        .map_err(store)?;
    for row in rows {
        result.visited.insert(map_file(row.map_err(store)?)?);
    }

    let mut stmt = conn
        .prepare_cached("SELECT includer, includee FROM unit_deps WHERE unit = ?1")
        .map_err(store)?;
    let rows = stmt
        .query_map(params![stored_primary], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(store)?;
    for row in rows {
        let (includer, includee) = row.map_err(store)?;
        result
            .dependencies
            .insert((map_file(includer)?, map_file(includee)?));
    }

    Ok(())
}
