use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Row;
use uuid::Uuid;

use beacon_types::models::{Message, UserProfile};

use crate::{Database, OptionalExt, ts, uuid_col};

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let file_urls: String = row.get(4)?;
    Ok(Message {
        id: uuid_col(row, 0)?,
        room_id: uuid_col(row, 1)?,
        sender: UserProfile {
            id: uuid_col(row, 2)?,
            first_name: row.get(6)?,
            last_name: row.get(7)?,
            email: row.get(8)?,
        },
        content: row.get(3)?,
        file_urls: serde_json::from_str(&file_urls).unwrap_or_default(),
        timestamp: row.get(5)?,
    })
}

const MESSAGE_COLUMNS: &str = "m.id, m.room_id, m.sender_id, m.content, m.file_urls, m.created_at,
                               u.first_name, u.last_name, u.email";

/// Pagination cursor: the oldest message of the previous page. The id
/// breaks ties between messages sharing a timestamp; without it the
/// strict timestamp comparison can skip a boundary message.
#[derive(Debug, Clone, Copy)]
pub struct PageCursor {
    pub before: DateTime<Utc>,
    pub before_id: Option<Uuid>,
}

impl Database {
    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, sender_id, content, file_urls, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    message.id.to_string(),
                    message.room_id.to_string(),
                    message.sender.id.to_string(),
                    &message.content,
                    serde_json::to_string(&message.file_urls)?,
                    ts(&message.timestamp),
                ),
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, message_id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages m
                     JOIN users u ON u.id = m.sender_id
                     WHERE m.id = ?1"
                ),
                [message_id.to_string()],
                message_from_row,
            )
            .optional()
        })
    }

    /// Newest page first; pass the cursor from the oldest message of the
    /// previous page to walk backwards through history.
    pub fn messages_for_room(
        &self,
        room_id: Uuid,
        limit: u32,
        cursor: Option<PageCursor>,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let rows = match cursor {
                Some(PageCursor {
                    before,
                    before_id: Some(before_id),
                }) => {
                    let before = ts(&before);
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages m
                         JOIN users u ON u.id = m.sender_id
                         WHERE m.room_id = ?1
                           AND (m.created_at < ?2
                                OR (m.created_at = ?2 AND m.id < ?3))
                         ORDER BY m.created_at DESC, m.id DESC
                         LIMIT ?4"
                    ))?;
                    stmt.query_map(
                        rusqlite::params![
                            room_id.to_string(),
                            before,
                            before_id.to_string(),
                            limit
                        ],
                        message_from_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                }
                Some(PageCursor {
                    before,
                    before_id: None,
                }) => {
                    let before = ts(&before);
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages m
                         JOIN users u ON u.id = m.sender_id
                         WHERE m.room_id = ?1 AND m.created_at < ?2
                         ORDER BY m.created_at DESC, m.id DESC
                         LIMIT ?3"
                    ))?;
                    stmt.query_map(
                        rusqlite::params![room_id.to_string(), before, limit],
                        message_from_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages m
                         JOIN users u ON u.id = m.sender_id
                         WHERE m.room_id = ?1
                         ORDER BY m.created_at DESC, m.id DESC
                         LIMIT ?2"
                    ))?;
                    stmt.query_map(
                        rusqlite::params![room_id.to_string(), limit],
                        message_from_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };

            Ok(rows)
        })
    }

    // -- Read receipts --

    /// `get_or_create` for the (message, user) pair. `None` means the
    /// message does not exist; `Some(true)` means a receipt row was
    /// created. A repeat mark is a no-op so reconnecting clients can
    /// re-request read state safely.
    pub fn mark_read(
        &self,
        receipt_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<Option<bool>> {
        self.with_conn(|conn| {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM messages WHERE id = ?1",
                    [message_id.to_string()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !exists {
                return Ok(None);
            }

            let changed = conn.execute(
                "INSERT OR IGNORE INTO read_receipts (id, message_id, user_id, read_at)
                 VALUES (?1, ?2, ?3, ?4)",
                (
                    receipt_id.to_string(),
                    message_id.to_string(),
                    user_id.to_string(),
                    ts(&read_at),
                ),
            )?;
            Ok(Some(changed == 1))
        })
    }

    /// Create receipts for every message in the page the user has not read
    /// yet, in one transaction. Returns (receipt_id, message_id) for each
    /// row actually created, in input order.
    pub fn batch_mark_read(
        &self,
        message_ids: &[Uuid],
        user_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, Uuid)>> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut created = Vec::new();

            for message_id in message_ids {
                let receipt_id = Uuid::new_v4();
                let changed = tx.execute(
                    "INSERT OR IGNORE INTO read_receipts (id, message_id, user_id, read_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    (
                        receipt_id.to_string(),
                        message_id.to_string(),
                        user_id.to_string(),
                        ts(&read_at),
                    ),
                )?;
                if changed == 1 {
                    created.push((receipt_id, *message_id));
                }
            }

            tx.commit()?;
            Ok(created)
        })
    }

    /// Members of the message's room who have no receipt for it, excluding
    /// the sender. Used by the unread-reminder job at fire time.
    pub fn unread_recipients(&self, message_id: Uuid) -> Result<Vec<UserProfile>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.first_name, u.last_name, u.email
                 FROM room_members rm
                 JOIN messages m ON m.room_id = rm.room_id
                 JOIN users u ON u.id = rm.user_id
                 WHERE m.id = ?1
                   AND rm.user_id != m.sender_id
                   AND rm.user_id NOT IN (
                       SELECT user_id FROM read_receipts WHERE message_id = ?1
                   )",
            )?;

            let rows = stmt
                .query_map([message_id.to_string()], |row| {
                    Ok(UserProfile {
                        id: uuid_col(row, 0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                        email: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::models::{Room, RoomKind};

    fn user(first: &str) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            first_name: first.into(),
            last_name: "Tester".into(),
            email: format!("{}@example.org", first.to_lowercase()),
        }
    }

    fn seed_room(db: &Database, members: &[&UserProfile]) -> Room {
        let now = Utc::now();
        let room = Room {
            id: Uuid::new_v4(),
            title: None,
            kind: RoomKind::Direct,
            announcement_category: None,
            created_at: now,
            updated_at: now,
        };
        db.create_room(&room).unwrap();
        for member in members {
            db.upsert_user(member).unwrap();
            db.add_member(room.id, member.id, now).unwrap();
        }
        room
    }

    fn seed_message(db: &Database, room: &Room, sender: &UserProfile, content: &str) -> Message {
        let message = Message {
            id: Uuid::new_v4(),
            room_id: room.id,
            sender: sender.clone(),
            content: content.into(),
            file_urls: vec![],
            timestamp: Utc::now(),
        };
        db.insert_message(&message).unwrap();
        message
    }

    #[test]
    fn marking_read_twice_creates_one_receipt() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("Alice");
        let bob = user("Bob");
        let room = seed_room(&db, &[&alice, &bob]);
        let message = seed_message(&db, &room, &alice, "hello");

        assert_eq!(
            db.mark_read(Uuid::new_v4(), message.id, bob.id, Utc::now())
                .unwrap(),
            Some(true)
        );
        assert_eq!(
            db.mark_read(Uuid::new_v4(), message.id, bob.id, Utc::now())
                .unwrap(),
            Some(false)
        );

        // Bob read it, so he drops out of the unread set; Alice is the
        // sender and is excluded too.
        assert!(db.unread_recipients(message.id).unwrap().is_empty());
    }

    #[test]
    fn marking_a_missing_message_read_is_a_typed_miss() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("Alice");
        seed_room(&db, &[&alice]);

        let outcome = db
            .mark_read(Uuid::new_v4(), Uuid::new_v4(), alice.id, Utc::now())
            .unwrap();
        assert_eq!(outcome, None);

        let receipts: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM read_receipts", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(receipts, 0);
    }

    #[test]
    fn batch_mark_read_skips_already_read_messages() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("Alice");
        let bob = user("Bob");
        let room = seed_room(&db, &[&alice, &bob]);
        let first = seed_message(&db, &room, &alice, "one");
        let second = seed_message(&db, &room, &alice, "two");
        let third = seed_message(&db, &room, &alice, "three");

        db.mark_read(Uuid::new_v4(), first.id, bob.id, Utc::now())
            .unwrap();

        let created = db
            .batch_mark_read(&[first.id, second.id, third.id], bob.id, Utc::now())
            .unwrap();

        let created_messages: Vec<Uuid> = created.iter().map(|(_, m)| *m).collect();
        assert_eq!(created_messages, vec![second.id, third.id]);
    }

    #[test]
    fn unread_recipients_excludes_readers_and_sender() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("Alice");
        let bob = user("Bob");
        let carol = user("Carol");
        let room = seed_room(&db, &[&alice, &bob, &carol]);
        let message = seed_message(&db, &room, &alice, "reminder check");

        db.mark_read(Uuid::new_v4(), message.id, bob.id, Utc::now())
            .unwrap();

        let pending = db.unread_recipients(message.id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, carol.id);
    }

    #[test]
    fn pagination_walks_backwards_with_cursor() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("Alice");
        let room = seed_room(&db, &[&alice]);

        for i in 0..5 {
            let message = Message {
                id: Uuid::new_v4(),
                room_id: room.id,
                sender: alice.clone(),
                content: format!("msg {i}"),
                file_urls: vec![],
                timestamp: Utc::now() + chrono::Duration::seconds(i),
            };
            db.insert_message(&message).unwrap();
        }

        let newest = db.messages_for_room(room.id, 2, None).unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].content, "msg 4");

        let oldest = newest.last().unwrap();
        let older = db
            .messages_for_room(
                room.id,
                2,
                Some(PageCursor {
                    before: oldest.timestamp,
                    before_id: Some(oldest.id),
                }),
            )
            .unwrap();
        assert_eq!(older[0].content, "msg 2");
    }

    #[test]
    fn pagination_keeps_messages_sharing_a_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("Alice");
        let room = seed_room(&db, &[&alice]);

        let shared = Utc::now();
        let mut all_ids = Vec::new();
        for i in 0..3 {
            let message = Message {
                id: Uuid::new_v4(),
                room_id: room.id,
                sender: alice.clone(),
                content: format!("burst {i}"),
                file_urls: vec![],
                timestamp: shared,
            };
            db.insert_message(&message).unwrap();
            all_ids.push(message.id);
        }

        let first_page = db.messages_for_room(room.id, 2, None).unwrap();
        assert_eq!(first_page.len(), 2);

        let oldest = first_page.last().unwrap();
        let second_page = db
            .messages_for_room(
                room.id,
                2,
                Some(PageCursor {
                    before: oldest.timestamp,
                    before_id: Some(oldest.id),
                }),
            )
            .unwrap();
        assert_eq!(second_page.len(), 1);

        let mut seen: Vec<Uuid> = first_page
            .iter()
            .chain(second_page.iter())
            .map(|m| m.id)
            .collect();
        seen.sort();
        all_ids.sort();
        assert_eq!(seen, all_ids);
    }
}
