//! SQLite-backed repository.
//!
//! The connection sits behind a `parking_lot::Mutex` so the repository is
//! `Sync` and no guard is ever held across an `.await` by callers.

use crate::error::{Result, StoreError};
use crate::model::{Author, AuthorList, Event, EventFilter, Follow, Profile, ReplaceableStamp};
use crate::repository::EventRepository;
use log::debug;
use parking_lot::Mutex;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;

const EVENT_COLUMNS: &str = "local_id, id, pubkey, created_at, kind, tags, content, sig, received_at,
     expires_at, replaceable_id, refs, author_refs, seen_on, deleted_on, deleted_everywhere";

const AUTHOR_COLUMNS: &str = "pubkey, profile, muted, relays, metadata_at, metadata_id,
     contact_list_at, contact_list_id, mute_list_at, mute_list_id";

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open or create an event database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                local_id           INTEGER PRIMARY KEY AUTOINCREMENT,
                id                 TEXT UNIQUE,
                pubkey             TEXT,
                created_at         INTEGER,
                kind               INTEGER,
                tags               TEXT NOT NULL DEFAULT '[]',
                content            TEXT NOT NULL DEFAULT '',
                sig                TEXT,
                received_at        REAL,
                expires_at         REAL,
                replaceable_id     TEXT,
                refs               TEXT NOT NULL DEFAULT '[]',
                author_refs        TEXT NOT NULL DEFAULT '[]',
                seen_on            TEXT NOT NULL DEFAULT '[]',
                deleted_on         TEXT NOT NULL DEFAULT '[]',
                deleted_everywhere INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_events_author_kind
                ON events(pubkey, kind);
            CREATE INDEX IF NOT EXISTS idx_events_address
                ON events(kind, pubkey, replaceable_id);

            CREATE TABLE IF NOT EXISTS authors (
                pubkey          TEXT PRIMARY KEY,
                profile         TEXT NOT NULL DEFAULT '{}',
                muted           INTEGER NOT NULL DEFAULT 0,
                relays          TEXT NOT NULL DEFAULT '[]',
                metadata_at     INTEGER,
                metadata_id     TEXT,
                contact_list_at INTEGER,
                contact_list_id TEXT,
                mute_list_at    INTEGER,
                mute_list_id    TEXT
            );

            CREATE TABLE IF NOT EXISTS follows (
                source      TEXT NOT NULL,
                destination TEXT NOT NULL,
                pet_name    TEXT,
                relay       TEXT,
                PRIMARY KEY (source, destination)
            );
            CREATE INDEX IF NOT EXISTS idx_follows_destination
                ON follows(destination);

            CREATE TABLE IF NOT EXISTS author_lists (
                owner       TEXT NOT NULL,
                kind        INTEGER NOT NULL,
                identifier  TEXT NOT NULL,
                title       TEXT,
                image       TEXT,
                description TEXT,
                members     TEXT NOT NULL DEFAULT '[]',
                created_at  INTEGER NOT NULL,
                event_id    TEXT NOT NULL,
                PRIMARY KEY (owner, kind, identifier)
            );",
        )?;

        debug!("opened event store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    pub fn count_events(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    fn query_events(&self, sql: &str, values: Vec<Value>) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn stamp(at: Option<i64>, id: Option<String>) -> Option<ReplaceableStamp> {
    match (at, id) {
        (Some(at), Some(id)) => Some(ReplaceableStamp::new(at as u64, id)),
        _ => None,
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        local_id: Some(row.get(0)?),
        id: row.get(1)?,
        pubkey: row.get(2)?,
        created_at: row.get::<_, Option<i64>>(3)?.map(|t| t as u64),
        kind: row.get::<_, Option<i64>>(4)?.map(|k| k as u16),
        tags: json_col(row, 5)?,
        content: row.get(6)?,
        sig: row.get(7)?,
        received_at: row.get(8)?,
        expires_at: row.get(9)?,
        replaceable_id: row.get(10)?,
        references: json_col(row, 11)?,
        author_references: json_col(row, 12)?,
        seen_on_relays: json_col(row, 13)?,
        deleted_on_relays: json_col(row, 14)?,
        deleted_everywhere: row.get(15)?,
    })
}

fn row_to_author(row: &Row<'_>) -> rusqlite::Result<Author> {
    let profile: Profile = json_col(row, 1)?;
    Ok(Author {
        pubkey: row.get(0)?,
        profile,
        muted: row.get(2)?,
        relays: json_col(row, 3)?,
        metadata: stamp(row.get(4)?, row.get(5)?),
        contact_list: stamp(row.get(6)?, row.get(7)?),
        mute_list: stamp(row.get(8)?, row.get(9)?),
    })
}

fn row_to_follow(row: &Row<'_>) -> rusqlite::Result<Follow> {
    Ok(Follow {
        source: row.get(0)?,
        destination: row.get(1)?,
        pet_name: row.get(2)?,
        relay: row.get(3)?,
    })
}

fn in_clause(column: &str, n: usize) -> String {
    let marks = vec!["?"; n].join(", ");
    format!("{} IN ({})", column, marks)
}

fn upsert_event(conn: &Connection, event: &Event) -> Result<i64> {
    let tags = serde_json::to_string(&event.tags)?;
    let refs = serde_json::to_string(&event.references)?;
    let author_refs = serde_json::to_string(&event.author_references)?;
    let seen_on = serde_json::to_string(&event.seen_on_relays)?;
    let deleted_on = serde_json::to_string(&event.deleted_on_relays)?;
    let created_at = event.created_at.map(|t| t as i64);
    let kind = event.kind.map(|k| k as i64);

    if let Some(local_id) = event.local_id {
        let changed = conn.execute(
            "UPDATE events SET id = ?2, pubkey = ?3, created_at = ?4, kind = ?5, tags = ?6,
                content = ?7, sig = ?8, received_at = ?9, expires_at = ?10,
                replaceable_id = ?11, refs = ?12, author_refs = ?13, seen_on = ?14,
                deleted_on = ?15, deleted_everywhere = ?16
             WHERE local_id = ?1",
            params![
                local_id, event.id, event.pubkey, created_at, kind, tags, event.content,
                event.sig, event.received_at, event.expires_at, event.replaceable_id,
                refs, author_refs, seen_on, deleted_on, event.deleted_everywhere,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::MissingRow(local_id));
        }
        return Ok(local_id);
    }

    let local_id = conn.query_row(
        "INSERT INTO events (id, pubkey, created_at, kind, tags, content, sig, received_at,
            expires_at, replaceable_id, refs, author_refs, seen_on, deleted_on, deleted_everywhere)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(id) DO UPDATE SET
            pubkey = excluded.pubkey, created_at = excluded.created_at, kind = excluded.kind,
            tags = excluded.tags, content = excluded.content, sig = excluded.sig,
            received_at = excluded.received_at, expires_at = excluded.expires_at,
            replaceable_id = excluded.replaceable_id, refs = excluded.refs,
            author_refs = excluded.author_refs, seen_on = excluded.seen_on,
            deleted_on = excluded.deleted_on, deleted_everywhere = excluded.deleted_everywhere
         RETURNING local_id",
        params![
            event.id, event.pubkey, created_at, kind, tags, event.content, event.sig,
            event.received_at, event.expires_at, event.replaceable_id, refs, author_refs,
            seen_on, deleted_on, event.deleted_everywhere,
        ],
        |r| r.get(0),
    )?;
    Ok(local_id)
}

impl EventRepository for SqliteRepository {
    fn find_by_id(&self, id: &str) -> Result<Option<Event>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS);
        Ok(conn.query_row(&sql, params![id], row_to_event).optional()?)
    }

    fn find_stub(&self, replaceable_id: &str, author: &str, kind: u16) -> Result<Option<Event>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM events
             WHERE kind = ?1 AND pubkey = ?2 AND replaceable_id = ?3
             ORDER BY created_at DESC LIMIT 1",
            EVENT_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![kind as i64, author, replaceable_id], row_to_event)
            .optional()?)
    }

    fn save_event(&self, event: &Event) -> Result<i64> {
        let conn = self.conn.lock();
        upsert_event(&conn, event)
    }

    fn delete_event(&self, local_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM events WHERE local_id = ?1", params![local_id])?;
        Ok(())
    }

    fn replace_event(&self, event: &Event, retired: i64) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if event.local_id != Some(retired) {
            tx.execute("DELETE FROM events WHERE local_id = ?1", params![retired])?;
        }
        let local_id = upsert_event(&tx, event)?;
        tx.commit()?;
        Ok(local_id)
    }

    fn purge_expired(&self, now: f64) -> Result<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM events WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        if n > 0 {
            debug!("purged {} expired events", n);
        }
        Ok(n)
    }

    fn events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if !filter.ids.is_empty() {
            clauses.push(in_clause("id", filter.ids.len()));
            values.extend(filter.ids.iter().cloned().map(Value::Text));
        }
        if !filter.authors.is_empty() {
            clauses.push(in_clause("pubkey", filter.authors.len()));
            values.extend(filter.authors.iter().cloned().map(Value::Text));
        }
        if !filter.kinds.is_empty() {
            clauses.push(in_clause("kind", filter.kinds.len()));
            values.extend(filter.kinds.iter().map(|k| Value::Integer(*k as i64)));
        }
        if let Some(d) = &filter.replaceable_id {
            clauses.push("replaceable_id = ?".to_string());
            values.push(Value::Text(d.clone()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM events {} ORDER BY created_at DESC, local_id DESC",
            EVENT_COLUMNS, where_sql
        );

        // Stub, deletion and `until` checks share the in-memory predicate.
        let mut out: Vec<Event> = self
            .query_events(&sql, values)?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn has_events_by(&self, pubkey: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM events
                WHERE pubkey = ?1 AND id IS NOT NULL AND created_at IS NOT NULL)",
            params![pubkey],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    fn find_author(&self, pubkey: &str) -> Result<Option<Author>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM authors WHERE pubkey = ?1", AUTHOR_COLUMNS);
        Ok(conn.query_row(&sql, params![pubkey], row_to_author).optional()?)
    }

    fn save_author(&self, author: &Author) -> Result<()> {
        let profile = serde_json::to_string(&author.profile)?;
        let relays = serde_json::to_string(&author.relays)?;
        let split = |s: &Option<ReplaceableStamp>| {
            (
                s.as_ref().map(|s| s.created_at as i64),
                s.as_ref().map(|s| s.event_id.clone()),
            )
        };
        let (metadata_at, metadata_id) = split(&author.metadata);
        let (contact_list_at, contact_list_id) = split(&author.contact_list);
        let (mute_list_at, mute_list_id) = split(&author.mute_list);

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO authors (pubkey, profile, muted, relays, metadata_at, metadata_id,
                contact_list_at, contact_list_id, mute_list_at, mute_list_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(pubkey) DO UPDATE SET
                profile = excluded.profile, muted = excluded.muted, relays = excluded.relays,
                metadata_at = excluded.metadata_at, metadata_id = excluded.metadata_id,
                contact_list_at = excluded.contact_list_at,
                contact_list_id = excluded.contact_list_id,
                mute_list_at = excluded.mute_list_at, mute_list_id = excluded.mute_list_id",
            params![
                author.pubkey, profile, author.muted, relays, metadata_at, metadata_id,
                contact_list_at, contact_list_id, mute_list_at, mute_list_id,
            ],
        )?;
        Ok(())
    }

    fn authors(&self) -> Result<Vec<Author>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM authors ORDER BY pubkey", AUTHOR_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_author)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn muted_authors(&self) -> Result<Vec<Author>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM authors WHERE muted = 1 ORDER BY pubkey", AUTHOR_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_author)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn follows(&self, source: &str) -> Result<Vec<Follow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT source, destination, pet_name, relay FROM follows
             WHERE source = ?1 ORDER BY destination",
        )?;
        let rows = stmt.query_map(params![source], row_to_follow)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn followers(&self, destination: &str) -> Result<Vec<Follow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT source, destination, pet_name, relay FROM follows
             WHERE destination = ?1 ORDER BY source",
        )?;
        let rows = stmt.query_map(params![destination], row_to_follow)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn replace_follows(&self, source: &str, follows: &[Follow]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM follows WHERE source = ?1", params![source])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO follows (source, destination, pet_name, relay)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for f in follows.iter().filter(|f| f.source == source) {
                stmt.execute(params![f.source, f.destination, f.pet_name, f.relay])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn find_author_list(&self, owner: &str, kind: u16, identifier: &str) -> Result<Option<AuthorList>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT owner, kind, identifier, title, image, description, members,
                        created_at, event_id
                 FROM author_lists WHERE owner = ?1 AND kind = ?2 AND identifier = ?3",
                params![owner, kind as i64, identifier],
                |row| {
                    Ok(AuthorList {
                        owner: row.get(0)?,
                        kind: row.get::<_, i64>(1)? as u16,
                        identifier: row.get(2)?,
                        title: row.get(3)?,
                        image: row.get(4)?,
                        description: row.get(5)?,
                        members: json_col(row, 6)?,
                        stamp: ReplaceableStamp::new(row.get::<_, i64>(7)? as u64, row.get::<_, String>(8)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn save_author_list(&self, list: &AuthorList) -> Result<()> {
        let members = serde_json::to_string(&list.members)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO author_lists
                (owner, kind, identifier, title, image, description, members, created_at, event_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                list.owner, list.kind as i64, list.identifier, list.title, list.image,
                list.description, members, list.stamp.created_at as i64, list.stamp.event_id,
            ],
        )?;
        Ok(())
    }
}
