//! SQLite-backed world state.
//!
//! [`SqliteStore`] owns the connection and the schema. The row-level
//! operations are free functions over `&Connection` so the same code runs on
//! the bare connection and inside a [`Transaction`] (which derefs to it).

use std::path::Path;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction};
use serde_json::Value;
use thiserror::Error;
use village_schema::{AmbientEvent, Channel, Event, JsonMap, AMBIENT_SEEN_EVENT_TYPE};

use crate::catalog::{ActorProfile, GoalSeed, Place, RelationshipSeed};
use crate::routine::parse_routine_tick;

const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
    #[error("table {0} does not exist")]
    MissingTable(String),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid {column} value `{value}`")]
    InvalidColumn { column: &'static str, value: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(_, Some(message)) = &err {
            if let Some(table) = message.strip_prefix("no such table: ") {
                return StoreError::MissingTable(table.trim().to_string());
            }
        }
        StoreError::Sqlite(err)
    }
}

impl StoreError {
    /// Busy/locked conditions that a retry of the same unit may clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
                if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }

    pub fn is_missing_table(&self, table: &str) -> bool {
        matches!(self, StoreError::MissingTable(name) if name == table)
    }
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn transaction(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.conn.transaction()?)
    }

    fn configure(&mut self) -> Result<(), StoreError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn
            .busy_timeout(std::time::Duration::from_millis(250))?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                meta TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS actor_profiles (
                actor_id TEXT PRIMARY KEY,
                profile TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                sim_ms INTEGER NOT NULL,
                place_id TEXT,
                type TEXT NOT NULL,
                actors TEXT NOT NULL,
                targets TEXT NOT NULL,
                publicness REAL NOT NULL,
                severity REAL NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS relationships (
                from_actor TEXT NOT NULL,
                to_actor TEXT NOT NULL,
                mode TEXT,
                trust INTEGER NOT NULL DEFAULT 0,
                respect INTEGER NOT NULL DEFAULT 0,
                affection INTEGER NOT NULL DEFAULT 0,
                jealousy INTEGER NOT NULL DEFAULT 0,
                fear INTEGER NOT NULL DEFAULT 0,
                grievances TEXT NOT NULL DEFAULT '[]',
                debts TEXT NOT NULL DEFAULT '[]',
                last_interaction_ms INTEGER,
                PRIMARY KEY (from_actor, to_actor)
            );

            CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                importance REAL NOT NULL,
                summary TEXT NOT NULL,
                created_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ambient_events (
                id TEXT PRIMARY KEY,
                sim_date TEXT NOT NULL,
                type TEXT NOT NULL,
                topic TEXT NOT NULL,
                intensity REAL NOT NULL,
                sentiment REAL NOT NULL,
                confidence REAL NOT NULL,
                expires_ms INTEGER,
                created_ms INTEGER NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ambient_deliveries (
                ambient_event_id TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                delivered_ms INTEGER NOT NULL,
                PRIMARY KEY (ambient_event_id, actor_id)
            );

            CREATE TABLE IF NOT EXISTS goals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor_id TEXT NOT NULL,
                horizon TEXT NOT NULL,
                priority REAL NOT NULL,
                goal TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cooldowns (
                actor_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                last_post_ms INTEGER NOT NULL,
                PRIMARY KEY (actor_id, channel)
            );

            CREATE INDEX IF NOT EXISTS idx_events_type_time ON events(type, sim_ms);
            CREATE INDEX IF NOT EXISTS idx_events_time ON events(sim_ms);
            CREATE INDEX IF NOT EXISTS idx_memories_actor ON memories(actor_id, created_ms);
            CREATE INDEX IF NOT EXISTS idx_goals_actor ON goals(actor_id);
            CREATE INDEX IF NOT EXISTS idx_ambient_created ON ambient_events(created_ms);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name) VALUES (?1, 'initial')",
            params![SCHEMA_VERSION],
        )?;
        Ok(())
    }
}

pub fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_ms(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::InvalidColumn {
            column: "timestamp",
            value: ms.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Catalog seeding

pub fn entity_count(conn: &Connection) -> Result<u64, StoreError> {
    count(conn, "SELECT COUNT(*) FROM entities", [])
}

pub fn insert_place(conn: &Connection, place: &Place) -> Result<bool, StoreError> {
    let meta = serde_json::json!({ "place_type": place.kind });
    insert_entity(conn, &place.id, "place", &place.name, &meta)
}

pub fn insert_actor(conn: &Connection, actor: &ActorProfile) -> Result<bool, StoreError> {
    let meta = serde_json::json!({ "role": actor.role, "archetypes": actor.archetypes });
    let inserted = insert_entity(conn, &actor.id, "actor", &actor.name, &meta)?;
    conn.execute(
        "INSERT OR IGNORE INTO actor_profiles (actor_id, profile) VALUES (?1, ?2)",
        params![actor.id, serde_json::to_string(actor)?],
    )?;
    Ok(inserted)
}

pub fn insert_goal(conn: &Connection, actor_id: &str, goal: &GoalSeed) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO goals (actor_id, horizon, priority, goal) VALUES (?1, ?2, ?3, ?4)",
        params![actor_id, goal.horizon, goal.priority, goal.goal.to_string()],
    )?;
    Ok(())
}

/// Goals of `actor_id` in insertion order.
pub fn goals_for_actor(conn: &Connection, actor_id: &str) -> Result<Vec<GoalSeed>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT horizon, priority, goal FROM goals WHERE actor_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![actor_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    let mut goals = Vec::new();
    for row in rows {
        let (horizon, priority, goal) = row?;
        goals.push(GoalSeed {
            horizon,
            priority,
            goal: serde_json::from_str(&goal)?,
        });
    }
    Ok(goals)
}

pub fn goal_count(conn: &Connection) -> Result<u64, StoreError> {
    count(conn, "SELECT COUNT(*) FROM goals", [])
}

fn insert_entity(
    conn: &Connection,
    id: &str,
    kind: &str,
    name: &str,
    meta: &Value,
) -> Result<bool, StoreError> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO entities (id, kind, name, meta) VALUES (?1, ?2, ?3, ?4)",
        params![id, kind, name, meta.to_string()],
    )?;
    Ok(affected > 0)
}

pub fn insert_relationship_seed(
    conn: &Connection,
    seed: &RelationshipSeed,
) -> Result<bool, StoreError> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO relationships
            (from_actor, to_actor, mode, trust, respect, affection, jealousy, fear, grievances, debts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            seed.from_actor,
            seed.to_actor,
            seed.mode,
            seed.trust,
            seed.respect,
            seed.affection,
            seed.jealousy,
            seed.fear,
            serde_json::to_string(&seed.grievances)?,
            serde_json::to_string(&seed.debts)?,
        ],
    )?;
    Ok(affected > 0)
}

// ---------------------------------------------------------------------------
// Events

/// Inserts `event`; `false` when an event with the same id already exists.
pub fn insert_event(conn: &Connection, event: &Event) -> Result<bool, StoreError> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO events
            (id, sim_ms, place_id, type, actors, targets, publicness, severity, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.id,
            to_ms(event.sim_time),
            event.place_id,
            event.kind,
            serde_json::to_string(&event.actors)?,
            serde_json::to_string(&event.targets)?,
            event.publicness,
            event.severity,
            serde_json::to_string(&event.payload)?,
        ],
    )?;
    Ok(affected > 0)
}

pub fn event_count(conn: &Connection) -> Result<u64, StoreError> {
    count(conn, "SELECT COUNT(*) FROM events", [])
}

/// Events of `kind` with `from <= sim_time < to`.
pub fn count_events_of_type_between(
    conn: &Connection,
    kind: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<u64, StoreError> {
    count(
        conn,
        "SELECT COUNT(*) FROM events WHERE type = ?1 AND sim_ms >= ?2 AND sim_ms < ?3",
        params![kind, to_ms(from), to_ms(to)],
    )
}

pub fn load_event(conn: &Connection, id: &str) -> Result<Option<Event>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, sim_ms, place_id, type, actors, targets, publicness, severity, payload
             FROM events WHERE id = ?1",
            params![id],
            EventRow::from_row,
        )
        .optional()?;
    row.map(EventRow::into_event).transpose()
}

pub fn events_of_type(conn: &Connection, kind: &str) -> Result<Vec<Event>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, sim_ms, place_id, type, actors, targets, publicness, severity, payload
         FROM events WHERE type = ?1 ORDER BY sim_ms ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![kind], EventRow::from_row)?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?.into_event()?);
    }
    Ok(events)
}

/// Latest sim time among events that are not ambient sightings.
pub fn latest_event_time(conn: &Connection) -> Result<Option<DateTime<Utc>>, StoreError> {
    let latest: Option<i64> = conn.query_row(
        "SELECT MAX(sim_ms) FROM events WHERE type != ?1",
        params![AMBIENT_SEEN_EVENT_TYPE],
        |row| row.get(0),
    )?;
    latest.map(from_ms).transpose()
}

/// Highest tick encoded in a routine event id, with that event's sim time.
pub fn latest_routine_event(
    conn: &Connection,
) -> Result<Option<(u64, DateTime<Utc>)>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, sim_ms FROM events WHERE id LIKE 'evt_routine_%'")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    let mut latest: Option<(u64, i64)> = None;
    for row in rows {
        let (id, sim_ms) = row?;
        if let Some(tick) = parse_routine_tick(&id) {
            if latest.map_or(true, |(max, _)| tick > max) {
                latest = Some((tick, sim_ms));
            }
        }
    }
    latest
        .map(|(tick, sim_ms)| Ok((tick, from_ms(sim_ms)?)))
        .transpose()
}

struct EventRow {
    id: String,
    sim_ms: i64,
    place_id: Option<String>,
    kind: String,
    actors: String,
    targets: String,
    publicness: f64,
    severity: f64,
    payload: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sim_ms: row.get(1)?,
            place_id: row.get(2)?,
            kind: row.get(3)?,
            actors: row.get(4)?,
            targets: row.get(5)?,
            publicness: row.get(6)?,
            severity: row.get(7)?,
            payload: row.get(8)?,
        })
    }

    fn into_event(self) -> Result<Event, StoreError> {
        Ok(Event {
            id: self.id,
            sim_time: from_ms(self.sim_ms)?,
            place_id: self.place_id,
            kind: self.kind,
            actors: serde_json::from_str(&self.actors)?,
            targets: serde_json::from_str(&self.targets)?,
            publicness: self.publicness,
            severity: self.severity,
            payload: serde_json::from_str::<JsonMap>(&self.payload)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Memories

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    pub actor_id: String,
    pub event_id: String,
    pub importance: f64,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

pub fn insert_memory(conn: &Connection, memory: &MemoryRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO memories (actor_id, event_id, importance, summary, created_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            memory.actor_id,
            memory.event_id,
            memory.importance,
            memory.summary,
            to_ms(memory.created_at),
        ],
    )?;
    Ok(())
}

pub fn memories_for_event(conn: &Connection, event_id: &str) -> Result<Vec<MemoryRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT actor_id, event_id, importance, summary, created_ms
         FROM memories WHERE event_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![event_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;
    let mut memories = Vec::new();
    for row in rows {
        let (actor_id, event_id, importance, summary, created_ms) = row?;
        memories.push(MemoryRecord {
            actor_id,
            event_id,
            importance,
            summary,
            created_at: from_ms(created_ms)?,
        });
    }
    Ok(memories)
}

pub fn memory_count(conn: &Connection) -> Result<u64, StoreError> {
    count(conn, "SELECT COUNT(*) FROM memories", [])
}

// ---------------------------------------------------------------------------
// Relationships

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub from_actor: String,
    pub to_actor: String,
    pub mode: Option<String>,
    pub trust: i64,
    pub respect: i64,
    pub affection: i64,
    pub jealousy: i64,
    pub fear: i64,
    pub grievances: Vec<String>,
    pub debts: Vec<Value>,
    pub last_interaction: Option<DateTime<Utc>>,
}

/// Summed score increments for one directed edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreIncrements {
    pub trust: i64,
    pub respect: i64,
    pub affection: i64,
    pub jealousy: i64,
    pub fear: i64,
}

/// Creates the `(from, to)` edge with zeroed scores if it does not exist.
pub fn ensure_relationship(conn: &Connection, from: &str, to: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO relationships (from_actor, to_actor) VALUES (?1, ?2)",
        params![from, to],
    )?;
    Ok(())
}

pub fn load_relationship(
    conn: &Connection,
    from: &str,
    to: &str,
) -> Result<Option<Relationship>, StoreError> {
    let row = conn
        .query_row(
            "SELECT from_actor, to_actor, mode, trust, respect, affection, jealousy, fear,
                    grievances, debts, last_interaction_ms
             FROM relationships WHERE from_actor = ?1 AND to_actor = ?2",
            params![from, to],
            |row| {
                Ok((
                    Relationship {
                        from_actor: row.get(0)?,
                        to_actor: row.get(1)?,
                        mode: row.get(2)?,
                        trust: row.get(3)?,
                        respect: row.get(4)?,
                        affection: row.get(5)?,
                        jealousy: row.get(6)?,
                        fear: row.get(7)?,
                        grievances: Vec::new(),
                        debts: Vec::new(),
                        last_interaction: None,
                    },
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, Option<i64>>(10)?,
                ))
            },
        )
        .optional()?;

    let Some((mut relationship, grievances, debts, last_ms)) = row else {
        return Ok(None);
    };
    relationship.grievances = serde_json::from_str(&grievances)?;
    relationship.debts = serde_json::from_str(&debts)?;
    relationship.last_interaction = last_ms.map(from_ms).transpose()?;
    Ok(Some(relationship))
}

/// Adds `increments` to the edge's scores and replaces its grievance list.
pub fn update_relationship(
    conn: &Connection,
    from: &str,
    to: &str,
    increments: ScoreIncrements,
    grievances: &[String],
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE relationships
         SET trust = trust + ?3,
             respect = respect + ?4,
             affection = affection + ?5,
             jealousy = jealousy + ?6,
             fear = fear + ?7,
             grievances = ?8,
             last_interaction_ms = ?9
         WHERE from_actor = ?1 AND to_actor = ?2",
        params![
            from,
            to,
            increments.trust,
            increments.respect,
            increments.affection,
            increments.jealousy,
            increments.fear,
            serde_json::to_string(grievances)?,
            to_ms(at),
        ],
    )?;
    Ok(())
}

pub fn relationship_count(conn: &Connection) -> Result<u64, StoreError> {
    count(conn, "SELECT COUNT(*) FROM relationships", [])
}

// ---------------------------------------------------------------------------
// Ambient events and deliveries

/// Records an ambient fact; `false` when the id is already present.
pub fn insert_ambient_event(conn: &Connection, ambient: &AmbientEvent) -> Result<bool, StoreError> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO ambient_events
            (id, sim_date, type, topic, intensity, sentiment, confidence, expires_ms, created_ms, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            ambient.id,
            ambient.sim_date.format("%Y-%m-%d").to_string(),
            ambient.kind,
            ambient.topic,
            ambient.intensity,
            ambient.sentiment,
            ambient.confidence,
            ambient.expires_at.map(to_ms),
            to_ms(ambient.created_at),
            serde_json::to_string(&ambient.payload)?,
        ],
    )?;
    Ok(affected > 0)
}

/// Unexpired ambient events that still lack a delivery record for at least
/// one actor of `roster`, oldest first. Deliveries to actors outside the
/// roster do not count.
pub fn pending_ambient_events<S: AsRef<str>>(
    conn: &Connection,
    now: DateTime<Utc>,
    roster: &[S],
    limit: usize,
) -> Result<Vec<AmbientEvent>, StoreError> {
    if roster.is_empty() {
        return Ok(Vec::new());
    }
    let roster: Vec<&str> = roster.iter().map(AsRef::as_ref).collect();
    let mut stmt = conn.prepare(
        "SELECT ae.id, ae.sim_date, ae.type, ae.topic, ae.intensity, ae.sentiment,
                ae.confidence, ae.expires_ms, ae.created_ms, ae.payload
         FROM ambient_events ae
         WHERE (ae.expires_ms IS NULL OR ae.expires_ms > ?1)
           AND EXISTS (
                SELECT 1 FROM json_each(?2) actor
                WHERE NOT EXISTS (
                    SELECT 1 FROM ambient_deliveries d
                    WHERE d.ambient_event_id = ae.id AND d.actor_id = actor.value
                )
           )
         ORDER BY ae.created_ms ASC, ae.id ASC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(
        params![
            to_ms(now),
            serde_json::to_string(&roster)?,
            i64::try_from(limit).unwrap_or(i64::MAX),
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, String>(9)?,
            ))
        },
    )?;

    let mut pending = Vec::new();
    for row in rows {
        let (id, sim_date, kind, topic, intensity, sentiment, confidence, expires, created, payload) =
            row?;
        let sim_date = NaiveDate::parse_from_str(&sim_date, "%Y-%m-%d").map_err(|_| {
            StoreError::InvalidColumn {
                column: "sim_date",
                value: sim_date.clone(),
            }
        })?;
        pending.push(
            AmbientEvent {
                id,
                sim_date,
                kind,
                topic,
                intensity,
                sentiment,
                confidence,
                expires_at: expires.map(from_ms).transpose()?,
                created_at: from_ms(created)?,
                payload: serde_json::from_str(&payload)?,
            }
            .normalized(),
        );
    }
    Ok(pending)
}

pub fn delivery_exists(conn: &Connection, ambient_id: &str, actor_id: &str) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM ambient_deliveries WHERE ambient_event_id = ?1 AND actor_id = ?2",
            params![ambient_id, actor_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn record_delivery(
    conn: &Connection,
    ambient_id: &str,
    actor_id: &str,
    at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO ambient_deliveries (ambient_event_id, actor_id, delivered_ms)
         VALUES (?1, ?2, ?3)",
        params![ambient_id, actor_id, to_ms(at)],
    )?;
    Ok(affected > 0)
}

pub fn delivery_count(conn: &Connection, ambient_id: &str) -> Result<u64, StoreError> {
    count(
        conn,
        "SELECT COUNT(*) FROM ambient_deliveries WHERE ambient_event_id = ?1",
        params![ambient_id],
    )
}

// ---------------------------------------------------------------------------
// Cooldowns

pub fn load_cooldowns(conn: &Connection) -> Result<Vec<(String, Channel, DateTime<Utc>)>, StoreError> {
    let mut stmt = conn.prepare("SELECT actor_id, channel, last_post_ms FROM cooldowns")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    let mut entries = Vec::new();
    for row in rows {
        let (actor_id, channel, last_ms) = row?;
        let channel = channel
            .parse::<Channel>()
            .map_err(|_| StoreError::InvalidColumn {
                column: "channel",
                value: channel.clone(),
            })?;
        entries.push((actor_id, channel, from_ms(last_ms)?));
    }
    Ok(entries)
}

pub fn upsert_cooldown(
    conn: &Connection,
    actor_id: &str,
    channel: Channel,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO cooldowns (actor_id, channel, last_post_ms) VALUES (?1, ?2, ?3)
         ON CONFLICT(actor_id, channel) DO UPDATE SET last_post_ms = excluded.last_post_ms",
        params![actor_id, channel.as_str(), to_ms(at)],
    )?;
    Ok(())
}

fn count<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<u64, StoreError> {
    let value: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(u64::try_from(value).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("in-memory store")
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    fn event(id: &str, kind: &str, sim_time: DateTime<Utc>) -> Event {
        Event {
            id: id.to_string(),
            sim_time,
            place_id: None,
            kind: kind.to_string(),
            actors: vec!["npc_a".into()],
            targets: vec!["npc_b".into()],
            publicness: 0.5,
            severity: 0.25,
            payload: JsonMap::new(),
        }
    }

    fn ambient(id: &str, created: DateTime<Utc>, expires: Option<DateTime<Utc>>) -> AmbientEvent {
        AmbientEvent {
            id: id.to_string(),
            sim_date: created.date_naive(),
            kind: "AMBIENT_WEATHER".into(),
            topic: "weather_rain".into(),
            intensity: 0.5,
            sentiment: -0.2,
            confidence: 0.9,
            expires_at: expires,
            created_at: created,
            payload: JsonMap::new(),
        }
    }

    #[test]
    fn event_insert_is_idempotent() {
        let store = store();
        let evt = event("evt_1", "SMALL_TALK", at(8));
        assert!(insert_event(store.conn(), &evt).unwrap());
        assert!(!insert_event(store.conn(), &evt).unwrap());
        assert_eq!(event_count(store.conn()).unwrap(), 1);
        assert_eq!(load_event(store.conn(), "evt_1").unwrap(), Some(evt));
        assert_eq!(load_event(store.conn(), "evt_2").unwrap(), None);
    }

    #[test]
    fn type_window_is_half_open() {
        let store = store();
        for (id, hour) in [("a", 1), ("b", 5), ("c", 9)] {
            insert_event(store.conn(), &event(id, "SMALL_TALK", at(hour))).unwrap();
        }
        insert_event(store.conn(), &event("d", "ARGUMENT", at(5))).unwrap();
        let n = count_events_of_type_between(store.conn(), "SMALL_TALK", at(1), at(9)).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn routine_tick_and_latest_time_recover() {
        let store = store();
        assert_eq!(latest_routine_event(store.conn()).unwrap(), None);
        assert_eq!(latest_event_time(store.conn()).unwrap(), None);
        for (id, hour) in [
            ("evt_routine_120_npc_b", 4),
            ("evt_routine_90_npc_a", 5),
            ("evt_seed_abc", 11),
        ] {
            insert_event(store.conn(), &event(id, "SMALL_TALK", at(hour))).unwrap();
        }
        insert_event(
            store.conn(),
            &event("evt_ambient_seen_x", AMBIENT_SEEN_EVENT_TYPE, at(13)),
        )
        .unwrap();
        assert_eq!(
            latest_routine_event(store.conn()).unwrap(),
            Some((120, at(4)))
        );
        assert_eq!(latest_event_time(store.conn()).unwrap(), Some(at(11)));
    }

    #[test]
    fn goals_keep_insertion_order() {
        let store = store();
        let first = GoalSeed {
            horizon: "long".to_string(),
            priority: 0.9,
            goal: serde_json::json!({ "text": "open a bakery" }),
        };
        let second = GoalSeed {
            horizon: "short".to_string(),
            priority: 0.5,
            goal: serde_json::json!({}),
        };
        insert_goal(store.conn(), "npc_a", &first).unwrap();
        insert_goal(store.conn(), "npc_a", &second).unwrap();
        insert_goal(store.conn(), "npc_b", &second).unwrap();
        assert_eq!(goal_count(store.conn()).unwrap(), 3);
        assert_eq!(
            goals_for_actor(store.conn(), "npc_a").unwrap(),
            vec![first, second]
        );
        assert!(goals_for_actor(store.conn(), "npc_c").unwrap().is_empty());
    }

    #[test]
    fn relationship_updates_accumulate() {
        let store = store();
        ensure_relationship(store.conn(), "npc_a", "npc_b").unwrap();
        ensure_relationship(store.conn(), "npc_a", "npc_b").unwrap();
        let inc = ScoreIncrements {
            trust: 2,
            fear: -1,
            ..ScoreIncrements::default()
        };
        update_relationship(store.conn(), "npc_a", "npc_b", inc, &["late".into()], at(8)).unwrap();
        update_relationship(store.conn(), "npc_a", "npc_b", inc, &[], at(9)).unwrap();
        let edge = load_relationship(store.conn(), "npc_a", "npc_b")
            .unwrap()
            .expect("edge exists");
        assert_eq!(edge.trust, 4);
        assert_eq!(edge.fear, -2);
        assert!(edge.grievances.is_empty());
        assert_eq!(edge.last_interaction, Some(at(9)));
        assert_eq!(relationship_count(store.conn()).unwrap(), 1);
    }

    #[test]
    fn pending_ambient_skips_expired_and_fully_delivered() {
        let store = store();
        let now = at(12);
        insert_ambient_event(store.conn(), &ambient("amb_old", at(1), Some(at(2)))).unwrap();
        insert_ambient_event(store.conn(), &ambient("amb_done", at(3), None)).unwrap();
        insert_ambient_event(store.conn(), &ambient("amb_open", at(4), Some(now + Duration::hours(1))))
            .unwrap();
        assert!(!insert_ambient_event(store.conn(), &ambient("amb_open", at(4), None)).unwrap());
        for actor in ["npc_a", "npc_b"] {
            record_delivery(store.conn(), "amb_done", actor, now).unwrap();
        }
        record_delivery(store.conn(), "amb_open", "npc_a", now).unwrap();
        assert!(!record_delivery(store.conn(), "amb_open", "npc_a", now).unwrap());

        let pending = pending_ambient_events(store.conn(), now, &["npc_a", "npc_b"], 10).unwrap();
        let ids: Vec<&str> = pending.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["amb_open"]);
        assert!(delivery_exists(store.conn(), "amb_open", "npc_a").unwrap());
        assert!(!delivery_exists(store.conn(), "amb_open", "npc_b").unwrap());
        assert_eq!(delivery_count(store.conn(), "amb_done").unwrap(), 2);
    }

    #[test]
    fn pending_ambient_round_trips_payload() {
        let store = store();
        let mut record = ambient("amb_1", at(1), None);
        record.payload.insert("summary".into(), json!("Heavy rain"));
        record.payload.insert("facts".into(), json!(["10mm"]));
        insert_ambient_event(store.conn(), &record).unwrap();
        let pending = pending_ambient_events(store.conn(), at(2), &["npc_a"], 10).unwrap();
        assert_eq!(pending, vec![record]);
    }

    #[test]
    fn deliveries_to_departed_actors_keep_event_pending() {
        let store = store();
        insert_ambient_event(store.conn(), &ambient("amb_x", at(1), None)).unwrap();
        for departed in ["npc_removed_1", "npc_removed_2"] {
            record_delivery(store.conn(), "amb_x", departed, at(1)).unwrap();
        }
        assert!(!delivery_exists(store.conn(), "amb_x", "npc_a").unwrap());

        let pending = pending_ambient_events(store.conn(), at(2), &["npc_a", "npc_b"], 10).unwrap();
        assert_eq!(pending.len(), 1);

        for actor in ["npc_a", "npc_b"] {
            record_delivery(store.conn(), "amb_x", actor, at(2)).unwrap();
        }
        let pending = pending_ambient_events(store.conn(), at(3), &["npc_a", "npc_b"], 10).unwrap();
        assert!(pending.is_empty());
        let empty: [&str; 0] = [];
        assert!(pending_ambient_events(store.conn(), at(3), &empty, 10).unwrap().is_empty());
    }

    #[test]
    fn missing_table_is_classified() {
        let store = store();
        store.conn().execute_batch("DROP TABLE ambient_events").unwrap();
        let err = pending_ambient_events(store.conn(), at(1), &["npc_a"], 1).expect_err("table gone");
        assert!(err.is_missing_table("ambient_events"), "{err}");
        assert!(!err.is_transient());
    }

    #[test]
    fn cooldowns_upsert_and_load() {
        let store = store();
        upsert_cooldown(store.conn(), "npc_a", Channel::Feed, at(1)).unwrap();
        upsert_cooldown(store.conn(), "npc_a", Channel::Feed, at(3)).unwrap();
        upsert_cooldown(store.conn(), "npc_b", Channel::Chat, at(2)).unwrap();
        let mut entries = load_cooldowns(store.conn()).unwrap();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            entries,
            vec![
                ("npc_a".to_string(), Channel::Feed, at(3)),
                ("npc_b".to_string(), Channel::Chat, at(2)),
            ]
        );
    }

    #[test]
    fn file_store_reopens_with_data() {
        let path = std::env::temp_dir().join(format!("village_store_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let store = SqliteStore::open(&path).unwrap();
            insert_event(store.conn(), &event("evt_keep", "SMALL_TALK", at(8))).unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(event_count(reopened.conn()).unwrap(), 1);
        drop(reopened);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }
}
