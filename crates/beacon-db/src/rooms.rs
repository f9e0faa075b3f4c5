use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Row;
use uuid::Uuid;

use beacon_types::models::{Room, RoomKind, UserProfile};

use crate::{Database, OptionalExt, ts, uuid_col};

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    let kind: String = row.get(2)?;
    Ok(Room {
        id: uuid_col(row, 0)?,
        title: row.get(1)?,
        kind: match kind.as_str() {
            "announcement" => RoomKind::Announcement,
            _ => RoomKind::Direct,
        },
        announcement_category: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: uuid_col(row, 0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
    })
}

impl Database {
    // -- Users (lookup surface only; account CRUD lives upstream) --

    pub fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, first_name, last_name, email) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    first_name = excluded.first_name,
                    last_name = excluded.last_name,
                    email = excluded.email",
                (
                    user.id.to_string(),
                    &user.first_name,
                    &user.last_name,
                    &user.email,
                ),
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, first_name, last_name, email FROM users WHERE id = ?1",
                [id.to_string()],
                profile_from_row,
            )
            .optional()
        })
    }

    // -- Rooms --

    pub fn create_room(&self, room: &Room) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, title, kind, announcement_category, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    room.id.to_string(),
                    &room.title,
                    room.kind.as_str(),
                    &room.announcement_category,
                    ts(&room.created_at),
                    ts(&room.updated_at),
                ),
            )?;
            Ok(())
        })
    }

    pub fn get_room(&self, room_id: Uuid) -> Result<Option<Room>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, title, kind, announcement_category, created_at, updated_at
                 FROM rooms WHERE id = ?1",
                [room_id.to_string()],
                room_from_row,
            )
            .optional()
        })
    }

    /// Rooms the user belongs to, with that user's archived flag.
    pub fn rooms_for_user(&self, user_id: Uuid) -> Result<Vec<(Room, bool)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.title, r.kind, r.announcement_category, r.created_at, r.updated_at,
                        rm.archived
                 FROM rooms r
                 JOIN room_members rm ON rm.room_id = r.id
                 WHERE rm.user_id = ?1
                 ORDER BY r.updated_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok((room_from_row(row)?, row.get::<_, bool>(6)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn room_ids_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT room_id FROM room_members WHERE user_id = ?1")?;

            let rows = stmt
                .query_map([user_id.to_string()], |row| uuid_col(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Membership --

    /// Idempotent add. Returns true when the membership was created, false
    /// when the (room, user) pair already existed.
    pub fn add_member(&self, room_id: Uuid, user_id: Uuid, joined_at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO room_members (id, room_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                (
                    Uuid::new_v4().to_string(),
                    room_id.to_string(),
                    user_id.to_string(),
                    ts(&joined_at),
                ),
            )?;
            Ok(changed == 1)
        })
    }

    pub fn remove_member(&self, room_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                (room_id.to_string(), user_id.to_string()),
            )?;
            Ok(changed == 1)
        })
    }

    pub fn is_member(&self, room_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                (room_id.to_string(), user_id.to_string()),
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn set_archived(&self, room_id: Uuid, user_id: Uuid, archived: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE room_members SET archived = ?3 WHERE room_id = ?1 AND user_id = ?2",
                (room_id.to_string(), user_id.to_string(), archived),
            )?;
            Ok(changed == 1)
        })
    }

    pub fn member_profiles(&self, room_id: Uuid) -> Result<Vec<UserProfile>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.first_name, u.last_name, u.email
                 FROM users u
                 JOIN room_members rm ON rm.user_id = u.id
                 WHERE rm.room_id = ?1
                 ORDER BY rm.joined_at",
            )?;

            let rows = stmt
                .query_map([room_id.to_string()], profile_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}
