use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create database directory {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

/// Column names are the durable contract; existing databases must keep resuming.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- one row per discovered listing; columns fill left to right as stages complete
        CREATE TABLE IF NOT EXISTS links (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            href           TEXT UNIQUE,
            magnet_link    TEXT,
            torrent_hash   TEXT,
            torrent_file   TEXT,
            file_names     TEXT,
            training_group CHAR(1)
        );

        -- one row per normalized file name queued for labeling
        CREATE TABLE IF NOT EXISTS annotations (
            filename        TEXT UNIQUE,
            annotation_json TEXT
        );
        ",
    )?;
    Ok(())
}

// ── Work items ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Discovered,
    Resolved,
    Retrieved,
    Extracted,
    Partitioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Train,
    Eval,
}

impl Partition {
    pub fn code(self) -> char {
        match self {
            Partition::Train => 'T',
            Partition::Eval => 'E',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'T' => Some(Partition::Train),
            'E' => Some(Partition::Eval),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkItem {
    pub id: i64,
    pub handle: Option<String>,
    pub resolved_locator: Option<String>,
    pub content_hash: Option<String>,
    pub artifact_ref: Option<String>,
    pub member_paths: Option<String>,
    pub partition: Option<String>,
}

impl WorkItem {
    /// Furthest stage reached, reading columns left to right.
    pub fn stage(&self) -> Stage {
        if self.partition.is_some() {
            Stage::Partitioned
        } else if self.member_paths.is_some() {
            Stage::Extracted
        } else if self.artifact_ref.is_some() {
            Stage::Retrieved
        } else if self.resolved_locator.is_some() {
            Stage::Resolved
        } else {
            Stage::Discovered
        }
    }

    /// False if a later column is set while an earlier one is still null.
    pub fn is_consistent(&self) -> bool {
        let chain = [
            self.handle.is_some(),
            self.resolved_locator.is_some(),
            self.artifact_ref.is_some(),
            self.member_paths.is_some(),
            self.partition.is_some(),
        ];
        let hash_matches_artifact = self.content_hash.is_some() == self.artifact_ref.is_some();
        hash_matches_artifact && chain.windows(2).all(|w| w[0] || !w[1])
    }
}

pub fn insert_handles(conn: &Connection, handles: &[String]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO links (href) VALUES (?1)")?;
        for handle in handles {
            count += stmt.execute(params![handle])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

/// (id, href) rows still missing a magnet link.
pub fn fetch_unresolved(conn: &Connection) -> Result<Vec<(i64, String)>> {
    query_pairs(
        conn,
        "SELECT id, href FROM links WHERE href IS NOT NULL AND magnet_link IS NULL ORDER BY id",
    )
}

pub fn set_resolved_locator(conn: &Connection, id: i64, locator: &str) -> Result<()> {
    conn.execute(
        "UPDATE links SET magnet_link = ?1 WHERE id = ?2",
        params![locator, id],
    )?;
    Ok(())
}

/// (id, magnet_link) rows without a downloaded torrent file.
pub fn fetch_unretrieved(conn: &Connection) -> Result<Vec<(i64, String)>> {
    query_pairs(
        conn,
        "SELECT id, magnet_link FROM links
         WHERE magnet_link IS NOT NULL AND torrent_file IS NULL ORDER BY id",
    )
}

/// Hash and file are written by one statement so neither exists without the other.
pub fn set_artifact(conn: &Connection, id: i64, hash: &str, file: &str) -> Result<()> {
    conn.execute(
        "UPDATE links SET torrent_hash = ?1, torrent_file = ?2 WHERE id = ?3",
        params![hash, file, id],
    )?;
    Ok(())
}

/// (id, torrent_file) rows whose file names have not been extracted.
pub fn fetch_unextracted(conn: &Connection) -> Result<Vec<(i64, String)>> {
    query_pairs(
        conn,
        "SELECT id, torrent_file FROM links
         WHERE torrent_file IS NOT NULL AND file_names IS NULL ORDER BY id",
    )
}

pub fn set_member_paths(conn: &Connection, id: i64, paths: &[String]) -> Result<()> {
    conn.execute(
        "UPDATE links SET file_names = ?1 WHERE id = ?2",
        params![paths.join("\n"), id],
    )?;
    Ok(())
}

pub fn fetch_unpartitioned(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM links WHERE file_names IS NOT NULL AND training_group IS NULL ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_partition(conn: &Connection, id: i64, partition: Partition) -> Result<()> {
    conn.execute(
        "UPDATE links SET training_group = ?1 WHERE id = ?2",
        params![partition.code().to_string(), id],
    )?;
    Ok(())
}

/// (id, file_names) for one partition, read-only source of normalization.
pub fn fetch_member_paths(conn: &Connection, partition: Partition) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, file_names FROM links
         WHERE training_group = ?1 AND file_names IS NOT NULL ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![partition.code().to_string()], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_id_by_artifact_ref(conn: &Connection, file: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM links WHERE torrent_file = ?1",
            params![file],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn fetch_work_items(conn: &Connection) -> Result<Vec<WorkItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, href, magnet_link, torrent_hash, torrent_file, file_names, training_group
         FROM links ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(WorkItem {
                id: row.get(0)?,
                handle: row.get(1)?,
                resolved_locator: row.get(2)?,
                content_hash: row.get(3)?,
                artifact_ref: row.get(4)?,
                member_paths: row.get(5)?,
                partition: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_pairs(conn: &Connection, sql: &str) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Text items ──

pub fn insert_text_items(conn: &Connection, texts: &[String]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO annotations (filename) VALUES (?1)")?;
        for text in texts {
            count += stmt.execute(params![text])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_unlabeled(conn: &Connection, limit: usize) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT filename FROM annotations WHERE annotation_json IS NULL ORDER BY rowid LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_unlabeled(conn: &Connection) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM annotations WHERE annotation_json IS NULL",
        [],
        |r| r.get(0),
    )?;
    Ok(n as usize)
}

/// Returns false when no text item matches exactly.
pub fn set_label(conn: &Connection, text: &str, label_json: &str) -> Result<bool> {
    let n = conn.execute(
        "UPDATE annotations SET annotation_json = ?1 WHERE filename = ?2",
        params![label_json, text],
    )?;
    Ok(n > 0)
}

pub fn reset_labels(conn: &Connection) -> Result<usize> {
    let n = conn.execute(
        "UPDATE annotations SET annotation_json = NULL WHERE annotation_json IS NOT NULL",
        [],
    )?;
    Ok(n)
}

pub fn fetch_labeled(conn: &Connection) -> Result<Vec<(String, String)>> {
    query_text_pairs(
        conn,
        "SELECT filename, annotation_json FROM annotations
         WHERE annotation_json IS NOT NULL ORDER BY rowid",
    )
}

fn query_text_pairs(conn: &Connection, sql: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub resolved: usize,
    pub retrieved: usize,
    pub extracted: usize,
    pub train: usize,
    pub eval: usize,
    pub text_items: usize,
    pub labeled: usize,
    pub inconsistent: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<usize> {
        let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
        Ok(n as usize)
    };
    let inconsistent = fetch_work_items(conn)?
        .iter()
        .filter(|w| !w.is_consistent())
        .count();
    Ok(Stats {
        total: count("SELECT COUNT(*) FROM links")?,
        resolved: count("SELECT COUNT(*) FROM links WHERE magnet_link IS NOT NULL")?,
        retrieved: count("SELECT COUNT(*) FROM links WHERE torrent_file IS NOT NULL")?,
        extracted: count("SELECT COUNT(*) FROM links WHERE file_names IS NOT NULL")?,
        train: count("SELECT COUNT(*) FROM links WHERE training_group = 'T'")?,
        eval: count("SELECT COUNT(*) FROM links WHERE training_group = 'E'")?,
        text_items: count("SELECT COUNT(*) FROM annotations")?,
        labeled: count("SELECT COUNT(*) FROM annotations WHERE annotation_json IS NOT NULL")?,
        inconsistent,
    })
}

#[cfg(test)]
pub(crate) fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn duplicate_handles_are_ignored() {
        let conn = test_conn();
        assert_eq!(insert_handles(&conn, &handles(&["/t/1", "/t/2", "/t/1"])).unwrap(), 2);
        assert_eq!(insert_handles(&conn, &handles(&["/t/2", "/t/3"])).unwrap(), 1);
        assert_eq!(fetch_work_items(&conn).unwrap().len(), 3);
    }

    #[test]
    fn ids_are_not_reused() {
        let conn = test_conn();
        insert_handles(&conn, &handles(&["/a", "/b"])).unwrap();
        conn.execute("DELETE FROM links WHERE href = '/b'", []).unwrap();
        insert_handles(&conn, &handles(&["/c"])).unwrap();
        let ids: Vec<i64> = fetch_work_items(&conn).unwrap().iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn rows_move_through_stage_predicates() {
        let conn = test_conn();
        insert_handles(&conn, &handles(&["/a", "/b"])).unwrap();

        let unresolved = fetch_unresolved(&conn).unwrap();
        assert_eq!(unresolved.len(), 2);
        let (id, _) = unresolved[0];

        set_resolved_locator(&conn, id, "magnet:?xt=urn:btih:ABC").unwrap();
        assert_eq!(fetch_unresolved(&conn).unwrap().len(), 1);
        assert_eq!(fetch_unretrieved(&conn).unwrap(), vec![(id, "magnet:?xt=urn:btih:ABC".to_string())]);

        set_artifact(&conn, id, "ABC", "ABC.torrent").unwrap();
        assert!(fetch_unretrieved(&conn).unwrap().is_empty());
        assert_eq!(find_id_by_artifact_ref(&conn, "ABC.torrent").unwrap(), Some(id));
        assert_eq!(find_id_by_artifact_ref(&conn, "nope.torrent").unwrap(), None);

        set_member_paths(&conn, id, &[]).unwrap();
        assert!(fetch_unextracted(&conn).unwrap().is_empty());
        assert_eq!(fetch_unpartitioned(&conn).unwrap(), vec![id]);

        set_partition(&conn, id, Partition::Eval).unwrap();
        assert!(fetch_unpartitioned(&conn).unwrap().is_empty());
        assert_eq!(fetch_member_paths(&conn, Partition::Eval).unwrap(), vec![(id, String::new())]);
        assert!(fetch_member_paths(&conn, Partition::Train).unwrap().is_empty());

        let items = fetch_work_items(&conn).unwrap();
        assert_eq!(items[0].stage(), Stage::Partitioned);
        assert_eq!(items[1].stage(), Stage::Discovered);
        assert!(items.iter().all(WorkItem::is_consistent));
    }

    #[test]
    fn consistency_detects_gaps() {
        let gap = WorkItem {
            id: 1,
            handle: Some("/a".into()),
            member_paths: Some("x.mkv".into()),
            ..WorkItem::default()
        };
        assert!(!gap.is_consistent());

        let half_artifact = WorkItem {
            id: 2,
            handle: Some("/b".into()),
            resolved_locator: Some("magnet:".into()),
            artifact_ref: Some("X.torrent".into()),
            ..WorkItem::default()
        };
        assert!(!half_artifact.is_consistent());
    }

    #[test]
    fn text_items_label_lifecycle() {
        let conn = test_conn();
        let texts = handles(&["Show S01 E01", "Movie 2001", "Show S01 E01"]);
        assert_eq!(insert_text_items(&conn, &texts).unwrap(), 2);
        assert_eq!(count_unlabeled(&conn).unwrap(), 2);
        assert_eq!(fetch_unlabeled(&conn, 1).unwrap(), vec!["Show S01 E01".to_string()]);

        assert!(set_label(&conn, "Show S01 E01", "{}").unwrap());
        assert!(!set_label(&conn, "Unknown", "{}").unwrap());
        assert_eq!(count_unlabeled(&conn).unwrap(), 1);
        assert_eq!(fetch_labeled(&conn).unwrap().len(), 1);

        assert_eq!(reset_labels(&conn).unwrap(), 1);
        assert_eq!(count_unlabeled(&conn).unwrap(), 2);
        assert_eq!(get_stats(&conn).unwrap().text_items, 2);
    }
}
