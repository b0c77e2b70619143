use anyhow::{anyhow, Result};
use rusqlite::Connection;

use crate::schema::RosterRecord;

const DB_PATH: &str = "data/rostersync.sqlite";

pub fn connect() -> Result<Connection> {
    if let Some(dir) = std::path::Path::new(DB_PATH).parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS rosters (
            id         INTEGER PRIMARY KEY,
            team_name  TEXT NOT NULL,
            sport      TEXT NOT NULL,
            data       TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_rosters_team
            ON rosters(team_name COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS activity_log (
            id         INTEGER PRIMARY KEY,
            action     TEXT NOT NULL,
            details    TEXT NOT NULL,
            status     TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

// ── Rosters ──

pub struct SavedRoster {
    pub id: i64,
    pub team_name: String,
    pub sport: String,
    pub record: RosterRecord,
    pub created_at: String,
    pub updated_at: String,
}

type RawRow = (i64, String, String, String, String, String);

fn row_to_raw(row: &rusqlite::Row) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode(raw: RawRow) -> Result<SavedRoster> {
    let (id, team_name, sport, data, created_at, updated_at) = raw;
    let record: RosterRecord = serde_json::from_str(&data)
        .map_err(|e| anyhow!("corrupt roster data for '{}': {}", team_name, e))?;
    Ok(SavedRoster {
        id,
        team_name,
        sport,
        record,
        created_at,
        updated_at,
    })
}

/// Look up a saved roster by team name, case-insensitive and trimmed. This is
/// the conflict check before saving a new extraction.
pub fn find_by_team(conn: &Connection, team: &str) -> Result<Option<SavedRoster>> {
    let mut stmt = conn.prepare(
        "SELECT id, team_name, sport, data, created_at, updated_at
         FROM rosters WHERE team_name = ?1 COLLATE NOCASE",
    )?;
    let mut rows = stmt.query_map([team.trim()], row_to_raw)?;
    match rows.next() {
        Some(raw) => Ok(Some(decode(raw?)?)),
        None => Ok(None),
    }
}

pub fn insert_roster(conn: &Connection, record: &RosterRecord) -> Result<i64> {
    let data = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO rosters (team_name, sport, data) VALUES (?1, ?2, ?3)",
        rusqlite::params![record.team_name, record.sport, data],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_roster(conn: &Connection, id: i64, record: &RosterRecord) -> Result<()> {
    let data = serde_json::to_string(record)?;
    conn.execute(
        "UPDATE rosters
         SET team_name = ?1, sport = ?2, data = ?3, updated_at = datetime('now')
         WHERE id = ?4",
        rusqlite::params![record.team_name, record.sport, data, id],
    )?;
    Ok(())
}

/// Rename keeps the stored record's team name in sync with the column, since
/// the column is only an index over the canonical data.
pub fn rename_roster(conn: &Connection, id: i64, new_name: &str) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, team_name, sport, data, created_at, updated_at FROM rosters WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map([id], row_to_raw)?;
    let saved = match rows.next() {
        Some(raw) => decode(raw?)?,
        None => return Err(anyhow!("no roster with id {}", id)),
    };

    let mut record = saved.record;
    record.team_name = new_name.trim().to_string();
    update_roster(conn, id, &record)
}

pub fn delete_roster(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM rosters WHERE id = ?1", [id])?;
    Ok(())
}

pub struct RosterSummary {
    pub team_name: String,
    pub sport: String,
    pub player_count: usize,
    pub updated_at: String,
}

pub fn list_rosters(conn: &Connection) -> Result<Vec<RosterSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, team_name, sport, data, created_at, updated_at
         FROM rosters ORDER BY team_name COLLATE NOCASE",
    )?;
    let rows = stmt
        .query_map([], row_to_raw)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|raw| {
            let saved = decode(raw)?;
            Ok(RosterSummary {
                team_name: saved.team_name,
                sport: saved.sport,
                player_count: saved.record.players.len(),
                updated_at: saved.updated_at,
            })
        })
        .collect()
}

// ── Activity log ──

pub struct ActivityRow {
    pub action: String,
    pub details: String,
    pub status: String,
    pub created_at: String,
}

pub fn log_activity(conn: &Connection, action: &str, details: &str, status: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO activity_log (action, details, status) VALUES (?1, ?2, ?3)",
        rusqlite::params![action, details, status],
    )?;
    Ok(())
}

pub fn fetch_activity(conn: &Connection, limit: usize) -> Result<Vec<ActivityRow>> {
    let mut stmt = conn.prepare(
        "SELECT action, details, status, created_at
         FROM activity_log ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], |row| {
            Ok(ActivityRow {
                action: row.get(0)?,
                details: row.get(1)?,
                status: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub rosters: usize,
    pub athletes: usize,
    pub activities: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let rosters: usize = conn.query_row("SELECT COUNT(*) FROM rosters", [], |r| r.get(0))?;
    let activities: usize =
        conn.query_row("SELECT COUNT(*) FROM activity_log", [], |r| r.get(0))?;

    let athletes = list_rosters(conn)?.iter().map(|s| s.player_count).sum();

    Ok(Stats {
        rosters,
        athletes,
        activities,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Athlete, DEFAULT_NOTES};

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn record(team: &str) -> RosterRecord {
        RosterRecord {
            team_name: team.into(),
            sport: "Football".into(),
            players: vec![Athlete {
                name: "Bob Smith".into(),
                position: "QB".into(),
            }],
            verified_sources: vec!["https://example.com/roster".into()],
            verification_notes: DEFAULT_NOTES.into(),
            meta: None,
        }
    }

    #[test]
    fn roundtrip_preserves_the_record() {
        let conn = memory_db();
        let original = record("Springfield Atoms");
        let id = insert_roster(&conn, &original).unwrap();

        let saved = find_by_team(&conn, "Springfield Atoms").unwrap().unwrap();
        assert_eq!(saved.id, id);
        assert_eq!(saved.record, original);
    }

    #[test]
    fn lookup_is_case_insensitive_and_trimmed() {
        let conn = memory_db();
        insert_roster(&conn, &record("Springfield Atoms")).unwrap();

        assert!(find_by_team(&conn, "springfield atoms").unwrap().is_some());
        assert!(find_by_team(&conn, "  SPRINGFIELD ATOMS  ")
            .unwrap()
            .is_some());
        assert!(find_by_team(&conn, "Shelbyville").unwrap().is_none());
    }

    #[test]
    fn duplicate_team_names_are_rejected_by_the_index() {
        let conn = memory_db();
        insert_roster(&conn, &record("Springfield Atoms")).unwrap();
        assert!(insert_roster(&conn, &record("springfield atoms")).is_err());
    }

    #[test]
    fn rename_keeps_record_in_sync() {
        let conn = memory_db();
        let id = insert_roster(&conn, &record("Springfield Atoms")).unwrap();

        rename_roster(&conn, id, "Shelbyville Sharks").unwrap();
        assert!(find_by_team(&conn, "Springfield Atoms").unwrap().is_none());
        let renamed = find_by_team(&conn, "Shelbyville Sharks").unwrap().unwrap();
        assert_eq!(renamed.record.team_name, "Shelbyville Sharks");
    }

    #[test]
    fn list_and_stats_count_players() {
        let conn = memory_db();
        insert_roster(&conn, &record("Atoms")).unwrap();
        insert_roster(&conn, &record("Sharks")).unwrap();
        log_activity(&conn, "Extraction", "Saved: Atoms", "OK").unwrap();

        let summaries = list_rosters(&conn).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].team_name, "Atoms");
        assert_eq!(summaries[0].player_count, 1);

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.rosters, 2);
        assert_eq!(stats.athletes, 2);
        assert_eq!(stats.activities, 1);
    }

    #[test]
    fn delete_removes_the_roster() {
        let conn = memory_db();
        let id = insert_roster(&conn, &record("Atoms")).unwrap();
        delete_roster(&conn, id).unwrap();
        assert!(find_by_team(&conn, "Atoms").unwrap().is_none());
    }

    #[test]
    fn activity_log_returns_newest_first() {
        let conn = memory_db();
        log_activity(&conn, "Extraction", "first", "OK").unwrap();
        log_activity(&conn, "Deletion", "second", "OK").unwrap();

        let rows = fetch_activity(&conn, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].details, "second");
    }
}
