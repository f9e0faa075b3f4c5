use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, RoomView, UserProfile};
use crate::notification::Notification;

/// Events delivered to connected clients. Serialized as self-describing
/// JSON with a `type` tag so clients can branch without sniffing fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A message was posted to a room the session is subscribed to.
    ChatMessage {
        id: Uuid,
        content: String,
        room_id: Uuid,
        sender: UserProfile,
        #[serde(default)]
        file_urls: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A member read a message. Published at most once per (message, user).
    ReadReceipt {
        id: Uuid,
        room_id: Uuid,
        message_id: Uuid,
        user: UserProfile,
        read_at: DateTime<Utc>,
    },

    /// The user was added to a new room; sessions react by joining the
    /// room's broadcast group.
    CreateRoom { room: RoomView },

    /// Delivery of a persisted notification record, as stored.
    Notification(Notification),
}

impl GatewayEvent {
    pub fn chat_message(message: &Message) -> Self {
        GatewayEvent::ChatMessage {
            id: message.id,
            content: message.content.clone(),
            room_id: message.room_id,
            sender: message.sender.clone(),
            file_urls: message.file_urls.clone(),
            timestamp: message.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserProfile;

    fn profile() -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.org".into(),
        }
    }

    #[test]
    fn events_carry_a_type_tag() {
        let event = GatewayEvent::ReadReceipt {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            user: profile(),
            read_at: Utc::now(),
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "read_receipt");
        assert!(json["message_id"].is_string());
    }

    #[test]
    fn notification_delivery_is_the_raw_record() {
        use crate::notification::{Notification, NotificationKind};

        let n = Notification::draft(NotificationKind::SchoolInfoUpdate, Uuid::new_v4(), "update");
        let event = GatewayEvent::Notification(n.clone());

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "notification");
        assert_eq!(json["id"], n.id.to_string());
        assert_eq!(json["receiver_id"], n.receiver_id.to_string());
    }
}
