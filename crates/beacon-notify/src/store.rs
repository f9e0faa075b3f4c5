use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use beacon_types::notification::Notification;

/// Store-level failures. `NotFound` is a distinct outcome, not a backend
/// error: callers mutate through a composite key and must know the
/// difference between "no such record" and "the store is down".
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("notification not found")]
    NotFound,
    #[error("store backend error: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

type Result<T> = std::result::Result<T, StoreError>;

/// Key-value notification store, deliberately separate from the relational
/// store: a notification's lifecycle is independent of the transaction that
/// triggered it. The primary key is composite — `(id, created_at)` with
/// `created_at` as the sort key — so mutations by id alone need a prior
/// sort-key lookup.
pub struct NotificationStore {
    conn: Mutex<Connection>,
}

fn sort_key(created_at: &DateTime<Utc>) -> String {
    created_at.to_rfc3339_opts(SecondsFormat::Micros, false)
}

impl NotificationStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, &path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, ":memory:")
    }

    fn init(conn: Connection, label: &str) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS notifications (
                id          TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                body        TEXT NOT NULL,
                PRIMARY KEY (id, created_at)
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_receiver
                ON notifications(receiver_id);
            ",
        )?;

        info!("Notification store opened at {}", label);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    pub fn put(&self, notification: &Notification) -> Result<()> {
        let body = serde_json::to_string(notification)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO notifications (id, created_at, receiver_id, body)
                 VALUES (?1, ?2, ?3, ?4)",
                (
                    notification.id.to_string(),
                    sort_key(&notification.created_at),
                    notification.receiver_id.to_string(),
                    body,
                ),
            )?;
            Ok(())
        })
    }

    pub fn batch_put(&self, notifications: &[Notification]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            for notification in notifications {
                let body = serde_json::to_string(notification)?;
                tx.execute(
                    "INSERT OR REPLACE INTO notifications (id, created_at, receiver_id, body)
                     VALUES (?1, ?2, ?3, ?4)",
                    (
                        notification.id.to_string(),
                        sort_key(&notification.created_at),
                        notification.receiver_id.to_string(),
                        body,
                    ),
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Full scan filtered by receiver. Fine at per-user notification
    /// volume; never meant for store-wide queries.
    pub fn scan_by(&self, receiver_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM notifications WHERE receiver_id = ?1 ORDER BY created_at DESC",
            )?;

            let mut rows = Vec::new();
            let bodies = stmt.query_map([receiver_id.to_string()], |row| {
                row.get::<_, String>(0)
            })?;
            for body in bodies {
                rows.push(serde_json::from_str(&body?)?);
            }

            Ok(rows)
        })
    }

    /// Resolve the sort key for an id. Mutations by id alone go through
    /// here first.
    pub fn created_at_for(&self, id: Uuid) -> Result<String> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT created_at FROM notifications WHERE id = ?1 LIMIT 1")?;
            let mut rows = stmt.query_map([id.to_string()], |row| row.get::<_, String>(0))?;
            match rows.next() {
                Some(created_at) => Ok(created_at?),
                None => Err(StoreError::NotFound),
            }
        })
    }

    /// Flip a boolean field on the stored record body. The record is the
    /// source of truth; the indexed columns never change here.
    pub fn update_flag(&self, id: Uuid, created_at: &str, field: &str, value: bool) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM notifications WHERE id = ?1 AND created_at = ?2",
            )?;
            let mut rows =
                stmt.query_map((id.to_string(), created_at), |row| row.get::<_, String>(0))?;
            let body = match rows.next() {
                Some(body) => body?,
                None => return Err(StoreError::NotFound),
            };
            drop(rows);

            let mut record: serde_json::Value = serde_json::from_str(&body)?;
            record[field] = serde_json::Value::Bool(value);

            conn.execute(
                "UPDATE notifications SET body = ?3 WHERE id = ?1 AND created_at = ?2",
                (id.to_string(), created_at, record.to_string()),
            )?;
            Ok(())
        })
    }

    pub fn delete(&self, id: Uuid, created_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND created_at = ?2",
                (id.to_string(), created_at),
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }
}
