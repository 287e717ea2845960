//! Raw SQL operations backing the memory model (`crate::memory`) and the
//! vitality/cleanup subsystem (`crate::vitality`). Kept free of business
//! rules — callers hold the transaction and decide what to do with results.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::types::{GistMethod, Memory, MemoryGist, MemoryId, MemoryPath, MemoryTag};

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        priority: row.get("priority")?,
        disclosure: row.get("disclosure")?,
        deprecated: row.get::<_, i64>("deprecated")? != 0,
        migrated_to: row.get("migrated_to")?,
        created_at: row.get("created_at")?,
        vitality_score: row.get("vitality_score")?,
        last_accessed_at: row.get("last_accessed_at")?,
        access_count: row.get("access_count")?,
    })
}

pub fn insert_memory(
    conn: &Connection,
    content: &str,
    priority: i32,
    disclosure: Option<&str>,
) -> Result<MemoryId> {
    conn.execute(
        "INSERT INTO memories (content, priority, disclosure) VALUES (?1, ?2, ?3)",
        params![content, priority, disclosure],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_memory(conn: &Connection, id: MemoryId) -> Result<Option<Memory>> {
    Ok(conn
        .query_row("SELECT * FROM memories WHERE id = ?1", [id], row_to_memory)
        .optional()?)
}

pub fn update_memory_content(
    conn: &Connection,
    id: MemoryId,
    content: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE memories SET content = ?2 WHERE id = ?1",
        params![id, content],
    )?;
    Ok(())
}

pub fn update_memory_metadata(
    conn: &Connection,
    id: MemoryId,
    priority: Option<i32>,
    disclosure: Option<Option<&str>>,
) -> Result<()> {
    if let Some(p) = priority {
        conn.execute("UPDATE memories SET priority = ?2 WHERE id = ?1", params![id, p])?;
    }
    if let Some(d) = disclosure {
        conn.execute(
            "UPDATE memories SET disclosure = ?2 WHERE id = ?1",
            params![id, d],
        )?;
    }
    Ok(())
}

pub fn mark_deprecated_migrated(
    conn: &Connection,
    old_id: MemoryId,
    new_id: MemoryId,
) -> Result<()> {
    conn.execute(
        "UPDATE memories SET deprecated = 1, migrated_to = ?2 WHERE id = ?1",
        params![old_id, new_id],
    )?;
    Ok(())
}

pub fn repair_migrated_to_chain(
    conn: &Connection,
    removed_id: MemoryId,
    new_target: Option<MemoryId>,
) -> Result<()> {
    conn.execute(
        "UPDATE memories SET migrated_to = ?2 WHERE migrated_to = ?1",
        params![removed_id, new_target],
    )?;
    Ok(())
}

pub fn delete_memory(conn: &Connection, id: MemoryId) -> Result<()> {
    conn.execute("DELETE FROM memory_gists WHERE memory_id = ?1", [id])?;
    conn.execute("DELETE FROM memory_tags WHERE memory_id = ?1", [id])?;
    conn.execute("DELETE FROM memories WHERE id = ?1", [id])?;
    Ok(())
}

// --- Paths -----------------------------------------------------------------

fn row_to_path(row: &rusqlite::Row) -> rusqlite::Result<MemoryPath> {
    Ok(MemoryPath {
        domain: row.get("domain")?,
        path: row.get("path")?,
        memory_id: row.get("memory_id")?,
        priority: row.get("priority")?,
    })
}

pub fn get_path(conn: &Connection, domain: &str, path: &str) -> Result<Option<MemoryPath>> {
    Ok(conn
        .query_row(
            "SELECT * FROM paths WHERE domain = ?1 AND path = ?2",
            params![domain, path],
            row_to_path,
        )
        .optional()?)
}

pub fn insert_path(
    conn: &Connection,
    domain: &str,
    path: &str,
    memory_id: MemoryId,
    priority: i32,
) -> Result<()> {
    conn.execute(
        "INSERT INTO paths (domain, path, memory_id, priority) VALUES (?1, ?2, ?3, ?4)",
        params![domain, path, memory_id, priority],
    )?;
    Ok(())
}

pub fn delete_path(conn: &Connection, domain: &str, path: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM paths WHERE domain = ?1 AND path = ?2",
        params![domain, path],
    )?;
    Ok(())
}

pub fn repoint_paths(
    conn: &Connection,
    old_memory_id: MemoryId,
    new_memory_id: MemoryId,
) -> Result<()> {
    conn.execute(
        "UPDATE paths SET memory_id = ?2 WHERE memory_id = ?1",
        params![old_memory_id, new_memory_id],
    )?;
    Ok(())
}

pub fn paths_for_memory(conn: &Connection, memory_id: MemoryId) -> Result<Vec<MemoryPath>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM paths WHERE memory_id = ?1 ORDER BY domain, path",
    )?;
    let rows = stmt
        .query_map([memory_id], row_to_path)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn path_count_for_memory(conn: &Connection, memory_id: MemoryId) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM paths WHERE memory_id = ?1",
        [memory_id],
        |r| r.get(0),
    )?)
}

/// Immediate child paths of `path` within `domain`: rows whose string is
/// exactly `path/segment` for some non-empty segment.
pub fn child_paths(conn: &Connection, domain: &str, path: &str) -> Result<Vec<MemoryPath>> {
    let prefix = format!("{path}/");
    let mut stmt = conn.prepare(
        "SELECT * FROM paths WHERE domain = ?1 AND path LIKE ?2 ESCAPE '\\' ORDER BY path",
    )?;
    let like_prefix = format!("{}%", escape_like(&prefix));
    let rows = stmt
        .query_map(params![domain, like_prefix], row_to_path)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    // LIKE gives a superset (any string starting with "path/"); filter to
    // exactly one additional segment, i.e. no further '/' after the prefix.
    Ok(rows
        .into_iter()
        .filter(|p| !p.path[prefix.len()..].contains('/'))
        .collect())
}

/// All descendant paths (any depth) under `path`, used when reporting a
/// rejected `remove_path` call.
pub fn descendant_paths(conn: &Connection, domain: &str, path: &str) -> Result<Vec<String>> {
    let prefix = format!("{path}/");
    let like_prefix = format!("{}%", escape_like(&prefix));
    let mut stmt = conn.prepare(
        "SELECT path FROM paths WHERE domain = ?1 AND path LIKE ?2 ESCAPE '\\' ORDER BY path",
    )?;
    let rows = stmt
        .query_map(params![domain, like_prefix], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Top-level paths: those with no '/' in them. `None` domain means all domains.
pub fn root_paths(conn: &Connection, domain: Option<&str>) -> Result<Vec<MemoryPath>> {
    let mut stmt = match domain {
        Some(_) => conn.prepare(
            "SELECT * FROM paths WHERE domain = ?1 AND instr(path, '/') = 0 ORDER BY path",
        )?,
        None => conn.prepare("SELECT * FROM paths WHERE instr(path, '/') = 0 ORDER BY domain, path")?,
    };
    let rows = match domain {
        Some(d) => stmt
            .query_map([d], row_to_path)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        None => stmt
            .query_map([], row_to_path)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
    };
    Ok(rows)
}

// --- Gists -------------------------------------------------------------------

fn row_to_gist(row: &rusqlite::Row) -> rusqlite::Result<MemoryGist> {
    let method: String = row.get("gist_method")?;
    Ok(MemoryGist {
        memory_id: row.get("memory_id")?,
        gist_text: row.get("gist_text")?,
        source_content_hash: row.get("source_content_hash")?,
        gist_method: method.parse().unwrap_or(GistMethod::TruncateFallback),
        quality_score: row.get("quality_score")?,
        created_at: row.get("created_at")?,
    })
}

pub fn upsert_memory_gist(
    conn: &Connection,
    memory_id: MemoryId,
    gist_text: &str,
    source_content_hash: &str,
    method: GistMethod,
    quality_score: f64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO memory_gists (memory_id, gist_text, source_content_hash, gist_method, quality_score)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(memory_id, source_content_hash) DO UPDATE SET
            gist_text = excluded.gist_text,
            gist_method = excluded.gist_method,
            quality_score = excluded.quality_score",
        params![
            memory_id,
            gist_text,
            source_content_hash,
            method.as_str(),
            quality_score
        ],
    )?;
    Ok(())
}

pub fn latest_gist(conn: &Connection, memory_id: MemoryId) -> Result<Option<MemoryGist>> {
    Ok(conn
        .query_row(
            "SELECT * FROM memory_gists WHERE memory_id = ?1 ORDER BY created_at DESC LIMIT 1",
            [memory_id],
            row_to_gist,
        )
        .optional()?)
}

// --- Tags --------------------------------------------------------------------

pub fn add_tag(conn: &Connection, memory_id: MemoryId, tag_type: &str, tag_value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO memory_tags (memory_id, tag_type, tag_value) VALUES (?1, ?2, ?3)",
        params![memory_id, tag_type, tag_value],
    )?;
    Ok(())
}

pub fn tags_for_memory(conn: &Connection, memory_id: MemoryId) -> Result<Vec<MemoryTag>> {
    let mut stmt =
        conn.prepare("SELECT memory_id, tag_type, tag_value FROM memory_tags WHERE memory_id = ?1")?;
    let rows = stmt
        .query_map([memory_id], |r| {
            Ok(MemoryTag {
                memory_id: r.get(0)?,
                tag_type: r.get(1)?,
                tag_value: r.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Bulk scans used by retrieval, vitality, and consolidation ---------------

/// All memories reachable through at least one path, scoped by domain and
/// path prefix (used by keyword/semantic candidate generation).
pub fn scan_addressable_memories(
    conn: &Connection,
    domain: Option<&str>,
    path_prefix: Option<&str>,
    max_priority: Option<i32>,
    updated_after: Option<&str>,
) -> Result<Vec<(MemoryPath, Memory)>> {
    let mut sql = String::from(
        "SELECT p.domain AS p_domain, p.path AS p_path, p.memory_id AS p_memory_id,
                p.priority AS p_priority,
                m.id, m.content, m.priority, m.disclosure, m.deprecated, m.migrated_to,
                m.created_at, m.vitality_score, m.last_accessed_at, m.access_count
         FROM paths p JOIN memories m ON m.id = p.memory_id
         WHERE m.deprecated = 0",
    );
    let mut conditions = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(d) = domain {
        conditions.push("p.domain = ?".to_string());
        args.push(Box::new(d.to_string()));
    }
    if let Some(prefix) = path_prefix {
        conditions.push("(p.path = ? OR p.path LIKE ? ESCAPE '\\')".to_string());
        args.push(Box::new(prefix.to_string()));
        args.push(Box::new(format!("{}/%", escape_like(prefix))));
    }
    if let Some(mp) = max_priority {
        conditions.push("m.priority <= ?".to_string());
        args.push(Box::new(mp));
    }
    if let Some(after) = updated_after {
        conditions.push("m.created_at >= ?".to_string());
        args.push(Box::new(after.to_string()));
    }
    for c in conditions {
        sql.push_str(" AND ");
        sql.push_str(&c);
    }

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            let p = MemoryPath {
                domain: row.get("p_domain")?,
                path: row.get("p_path")?,
                memory_id: row.get("p_memory_id")?,
                priority: row.get("p_priority")?,
            };
            let m = row_to_memory(row)?;
            Ok((p, m))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Orphaned or deprecated memories: zero paths, or `deprecated = true`.
pub fn scan_orphans(conn: &Connection) -> Result<Vec<Memory>> {
    let mut stmt = conn.prepare(
        "SELECT m.* FROM memories m
         LEFT JOIN paths p ON p.memory_id = m.id
         WHERE p.memory_id IS NULL OR m.deprecated = 1
         GROUP BY m.id",
    )?;
    let rows = stmt
        .query_map([], row_to_memory)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn recent_memories_by_parent(
    conn: &Connection,
    limit: i64,
) -> Result<Vec<(MemoryPath, Memory)>> {
    let mut stmt = conn.prepare(
        "SELECT p.domain AS p_domain, p.path AS p_path, p.memory_id AS p_memory_id,
                p.priority AS p_priority,
                m.id, m.content, m.priority, m.disclosure, m.deprecated, m.migrated_to,
                m.created_at, m.vitality_score, m.last_accessed_at, m.access_count
         FROM paths p JOIN memories m ON m.id = p.memory_id
         WHERE m.deprecated = 0
         ORDER BY m.created_at DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], |row| {
            let p = MemoryPath {
                domain: row.get("p_domain")?,
                path: row.get("p_path")?,
                memory_id: row.get("p_memory_id")?,
                priority: row.get("p_priority")?,
            };
            let m = row_to_memory(row)?;
            Ok((p, m))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Vitality ------------------------------------------------------------

pub fn reinforce_memory(
    conn: &Connection,
    memory_id: MemoryId,
    now: &str,
    delta_reinforce: f64,
    vitality_cap: f64,
) -> Result<()> {
    conn.execute(
        "UPDATE memories SET
            access_count = access_count + 1,
            last_accessed_at = ?2,
            vitality_score = MIN(?3, vitality_score + ?4)
         WHERE id = ?1",
        params![memory_id, now, vitality_cap, delta_reinforce],
    )?;
    Ok(())
}

pub fn all_memory_ids_with_vitality(conn: &Connection) -> Result<Vec<(MemoryId, f64, Option<String>)>> {
    let mut stmt = conn.prepare("SELECT id, vitality_score, last_accessed_at FROM memories")?;
    let rows = stmt
        .query_map([], |r| {
            Ok((r.get::<_, MemoryId>(0)?, r.get::<_, f64>(1)?, r.get::<_, Option<String>>(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn set_vitality_score(conn: &Connection, memory_id: MemoryId, score: f64) -> Result<()> {
    conn.execute(
        "UPDATE memories SET vitality_score = ?2 WHERE id = ?1",
        params![memory_id, score],
    )?;
    Ok(())
}

/// Candidate rows for the cleanup query: memories below `threshold`,
/// inactive for at least `inactive_days`, scoped by domain/path_prefix.
pub struct CleanupRow {
    pub memory: Memory,
    pub paths: Vec<MemoryPath>,
}

pub fn cleanup_candidates(
    conn: &Connection,
    threshold: f64,
    inactive_days: i64,
    domain: Option<&str>,
    path_prefix: Option<&str>,
    limit: i64,
) -> Result<Vec<CleanupRow>> {
    let mut sql = String::from(
        "SELECT m.* FROM memories m WHERE m.vitality_score < ?1
         AND (m.last_accessed_at IS NULL OR
              julianday('now') - julianday(m.last_accessed_at) >= ?2)",
    );
    let mut args: Vec<Box<dyn rusqlite::ToSql>> =
        vec![Box::new(threshold), Box::new(inactive_days)];

    if domain.is_some() || path_prefix.is_some() {
        sql.push_str(
            " AND m.id IN (SELECT DISTINCT p.memory_id FROM paths p WHERE 1=1",
        );
        if let Some(d) = domain {
            sql.push_str(" AND p.domain = ?");
            args.push(Box::new(d.to_string()));
        }
        if let Some(prefix) = path_prefix {
            sql.push_str(" AND (p.path = ? OR p.path LIKE ? ESCAPE '\\')");
            args.push(Box::new(prefix.to_string()));
            args.push(Box::new(format!("{}/%", escape_like(prefix))));
        }
        sql.push(')');
    }
    sql.push_str(" ORDER BY m.vitality_score ASC, m.last_accessed_at ASC LIMIT ?");
    args.push(Box::new(limit));

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
    let memories = stmt
        .query_map(param_refs.as_slice(), row_to_memory)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::with_capacity(memories.len());
    for memory in memories {
        let paths = paths_for_memory(conn, memory.id)?;
        out.push(CleanupRow { memory, paths });
    }
    Ok(out)
}
