// 🗄️ Persistence - SQLite (WAL) storage for players, users, sessions, events
//
// Players are stored as JSON documents; the core never touches this module,
// callers load a Player, run operations against it, and save it back.

use crate::ledger::Ledger;
use crate::player::Player;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Event for the audit trail (enrollments, completions, logins, ...)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {:?}", path))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Identity: users + sessions
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT UNIQUE NOT NULL,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            token_hash TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Players (one JSON document per player)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS players (
            id TEXT PRIMARY KEY,
            owner_id TEXT UNIQUE,
            name TEXT NOT NULL,
            document TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// PLAYERS
// ============================================================================

/// Insert or replace a player document
///
/// `owner_id` links the save to a registered user; `None` keeps any existing owner.
pub fn save_player(conn: &Connection, player: &Player, owner_id: Option<&str>) -> Result<()> {
    let document = serde_json::to_string(player)?;

    conn.execute(
        "INSERT INTO players (id, owner_id, name, document, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            owner_id = COALESCE(excluded.owner_id, players.owner_id),
            name = excluded.name,
            document = excluded.document,
            updated_at = excluded.updated_at",
        params![
            player.id,
            owner_id,
            player.name,
            document,
            Utc::now().to_rfc3339(),
        ],
    )?;

    debug!(player = %player.id, "player saved");
    Ok(())
}

fn parse_player(document: String) -> Result<Player> {
    serde_json::from_str(&document).context("Failed to deserialize player document")
}

pub fn load_player(conn: &Connection, player_id: &str) -> Result<Option<Player>> {
    let document: Option<String> = conn
        .query_row(
            "SELECT document FROM players WHERE id = ?1",
            [player_id],
            |row| row.get(0),
        )
        .optional()?;

    document.map(parse_player).transpose()
}

pub fn load_player_by_owner(conn: &Connection, owner_id: &str) -> Result<Option<Player>> {
    let document: Option<String> = conn
        .query_row(
            "SELECT document FROM players WHERE owner_id = ?1",
            [owner_id],
            |row| row.get(0),
        )
        .optional()?;

    document.map(parse_player).transpose()
}

/// Most recently saved player without an owner (the local single-player save)
pub fn load_local_player(conn: &Connection) -> Result<Option<Player>> {
    let document: Option<String> = conn
        .query_row(
            "SELECT document FROM players WHERE owner_id IS NULL
             ORDER BY updated_at DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    document.map(parse_player).transpose()
}

pub fn count_players(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// CSV EXPORT
// ============================================================================

/// Write the ledger's transaction log as CSV; returns rows written
pub fn export_transactions_csv(csv_path: &Path, ledger: &Ledger) -> Result<usize> {
    let mut wtr = csv::Writer::from_path(csv_path)
        .with_context(|| format!("Failed to create CSV file: {:?}", csv_path))?;

    for tx in ledger.transactions() {
        wtr.serialize(tx).context("Failed to write transaction row")?;
    }
    wtr.flush()?;

    Ok(ledger.transactions().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::player::SocialClass;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn test_player() -> Player {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(1480, 3, 1, 0, 0, 0).unwrap());
        let mut player = Player::new("Lucrezia", SocialClass::Merchant, Ledger::new(Decimal::from(100)));
        player.ledger.earn_gold(Decimal::from(50), "Job", &clock).unwrap();
        player.completed_courses.insert("Abacus School".to_string());
        player
    }

    #[test]
    fn test_save_and_load_player() {
        let conn = test_db();
        let player = test_player();

        save_player(&conn, &player, None).unwrap();
        let loaded = load_player(&conn, &player.id).unwrap().unwrap();

        assert_eq!(loaded, player);
        assert!(load_player(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_save_player_upserts() {
        let conn = test_db();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(1480, 3, 2, 0, 0, 0).unwrap());
        let mut player = test_player();

        save_player(&conn, &player, None).unwrap();
        player.ledger.spend_gold(Decimal::from(20), "Bread", &clock).unwrap();
        save_player(&conn, &player, None).unwrap();

        assert_eq!(count_players(&conn).unwrap(), 1);
        let loaded = load_local_player(&conn).unwrap().unwrap();
        assert_eq!(loaded.money(), Decimal::from(125));
    }

    #[test]
    fn test_owner_lookup_keeps_owner_on_resave() {
        let conn = test_db();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, created_at)
             VALUES ('u1', 'lucrezia', 'l@tornabuoni.it', 'x', '1480-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        let player = test_player();

        save_player(&conn, &player, Some("u1")).unwrap();
        save_player(&conn, &player, None).unwrap();

        let loaded = load_player_by_owner(&conn, "u1").unwrap().unwrap();
        assert_eq!(loaded.id, player.id);
        assert!(load_local_player(&conn).unwrap().is_none());
    }

    #[test]
    fn test_event_log() {
        let conn = test_db();

        let event = Event::new(
            "course_enrolled",
            "player",
            "player_123",
            serde_json::json!({"course": "Trivium Studies"}),
            "education",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "player", "player_123").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "course_enrolled");
        assert_eq!(events[0].data["course"], "Trivium Studies");
    }

    #[test]
    fn test_export_transactions_csv() {
        let player = test_player();
        let path = std::env::temp_dir().join(format!("florence-export-{}.csv", player.id));

        let rows = export_transactions_csv(&path, &player.ledger).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(rows, 1);
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("id,kind,amount,memo,timestamp"));
        let row = lines.next().unwrap();
        assert!(row.contains(",earn,"));
        assert!(row.contains(",Job,1480-03-01"));
    }
}
