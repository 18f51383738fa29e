//! SQLite event store implementation.

use crate::{EndStatus, Event, EventKind, Result, SessionId};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;

/// Summary of one session in the log.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_status: Option<EndStatus>,
    pub message_count: usize,
}

/// SQLite-backed event store.
///
/// The connection sits behind a mutex so one store can be shared by the
/// orchestrator's session tasks.
pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    /// Open or create an event store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Create an in-memory event store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_session
                ON events(session_id, timestamp);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append an event to the store.
    pub fn append(&self, event: &Event) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO events (id, session_id, timestamp, kind, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id.to_string(),
                event.session_id.to_string(),
                event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                event.kind.name(),
                serde_json::to_string(&event.kind)?,
            ],
        )?;
        Ok(())
    }

    /// Load all events for a session, ordered by timestamp.
    pub fn load_session(&self, session_id: SessionId) -> Result<Vec<Event>> {
        self.load_events(session_id, None)
    }

    /// Load a session's events, optionally only those of one kind.
    pub fn load_events(&self, session_id: SessionId, kind: Option<&str>) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, data FROM events
             WHERE session_id = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY timestamp, rowid",
        )?;

        let rows = stmt
            .query_map(params![session_id.to_string(), kind], |row| {
                let id: String = row.get(0)?;
                let timestamp: String = row.get(1)?;
                let data: String = row.get(2)?;
                Ok((id, timestamp, data))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let events = rows
            .into_iter()
            .filter_map(|(id, timestamp, data)| {
                Some(Event {
                    id: id.parse().ok()?,
                    session_id,
                    timestamp: timestamp.parse().ok()?,
                    kind: serde_json::from_str(&data).ok()?,
                })
            })
            .collect();

        Ok(events)
    }

    /// List sessions, most recently started first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id,
                    COALESCE(MIN(CASE WHEN kind = 'session_start' THEN timestamp END), MIN(timestamp)),
                    MAX(CASE WHEN kind = 'session_end' THEN timestamp END),
                    MAX(CASE WHEN kind = 'session_end' THEN data END),
                    SUM(CASE WHEN kind = 'message' THEN 1 ELSE 0 END)
             FROM events
             GROUP BY session_id
             ORDER BY 2 DESC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let started: String = row.get(1)?;
                let ended: Option<String> = row.get(2)?;
                let end_data: Option<String> = row.get(3)?;
                let messages: i64 = row.get(4)?;
                Ok((id, started, ended, end_data, messages))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let sessions = rows
            .into_iter()
            .filter_map(|(id, started, ended, end_data, messages)| {
                let end_status = end_data
                    .and_then(|data| serde_json::from_str::<EventKind>(&data).ok())
                    .and_then(|kind| match kind {
                        EventKind::SessionEnd { status } => Some(status),
                        _ => None,
                    });
                Some(SessionSummary {
                    id: id.parse().ok()?,
                    started_at: started.parse().ok()?,
                    ended_at: ended.and_then(|t| t.parse().ok()),
                    end_status,
                    message_count: usize::try_from(messages).unwrap_or_default(),
                })
            })
            .collect();

        Ok(sessions)
    }

    /// Whether any event exists for the session.
    pub fn contains(&self, session_id: SessionId) -> Result<bool> {
        let found = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM events WHERE session_id = ?1 LIMIT 1",
                [session_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    #[test]
    fn append_and_load_in_order() {
        let store = EventStore::in_memory().unwrap();
        let id = SessionId::new();

        store.append(&Event::new(id, EventKind::SessionStart)).unwrap();
        store
            .append(&Event::message(id, Role::User, "hello"))
            .unwrap();
        store
            .append(&Event::message(id, Role::Assistant, "hi"))
            .unwrap();
        store.append(&Event::end(id, EndStatus::Finished)).unwrap();

        let events = store.load_session(id).unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.kind.name()).collect();
        assert_eq!(
            kinds,
            vec!["session_start", "message", "message", "session_end"]
        );
    }

    #[test]
    fn load_events_filters_by_kind() {
        let store = EventStore::in_memory().unwrap();
        let id = SessionId::new();
        store.append(&Event::new(id, EventKind::SessionStart)).unwrap();
        store
            .append(&Event::new(
                id,
                EventKind::ToolCall {
                    name: "read_file".into(),
                    input: serde_json::json!({"path": "a"}),
                },
            ))
            .unwrap();

        let calls = store.load_events(id, Some("tool_call")).unwrap();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0].kind, EventKind::ToolCall { .. }));
    }

    #[test]
    fn list_sessions_summarizes() {
        let store = EventStore::in_memory().unwrap();
        let ended = SessionId::new();
        let running = SessionId::new();

        store
            .append(&Event::new(ended, EventKind::SessionStart))
            .unwrap();
        store
            .append(&Event::message(ended, Role::User, "q"))
            .unwrap();
        store
            .append(&Event::end(ended, EndStatus::Cancelled))
            .unwrap();
        store
            .append(&Event::new(running, EventKind::SessionStart))
            .unwrap();

        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions.len(), 2);

        let summary = sessions.iter().find(|s| s.id == ended).unwrap();
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.end_status, Some(EndStatus::Cancelled));
        assert!(summary.ended_at.is_some());

        let summary = sessions.iter().find(|s| s.id == running).unwrap();
        assert!(summary.ended_at.is_none());
        assert!(store.contains(running).unwrap());
        assert!(!store.contains(SessionId::new()).unwrap());
    }
}
