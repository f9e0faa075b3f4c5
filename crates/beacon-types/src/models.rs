use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The slice of a user the messaging engine needs: identity plus the
/// display fields embedded in outgoing events. The full user schema lives
/// with the organizational CRUD layer, outside this subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl UserProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Direct,
    Announcement,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Direct => "direct",
            RoomKind::Announcement => "announcement",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub title: Option<String>,
    pub kind: RoomKind,
    pub announcement_category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A room as delivered to clients: the room itself plus membership and the
/// latest message, mirroring what the `create_room` event carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomView {
    pub id: Uuid,
    pub title: Option<String>,
    pub kind: RoomKind,
    pub announcement_category: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Per-member visibility toggle for the requesting user.
    pub archived: bool,
    pub members: Vec<UserProfile>,
    pub last_message: Option<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender: UserProfile,
    pub content: String,
    #[serde(default)]
    pub file_urls: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user: UserProfile,
    pub read_at: DateTime<Utc>,
}
