use uuid::Uuid;

use crate::events::GatewayEvent;

/// Publish side of the room broadcast bus. Injected as a constructed
/// dependency everywhere fan-out happens; there is no process-wide
/// singleton. Delivery is fire-and-forget: publishing to a group nobody is
/// subscribed to is not an error.
pub trait Broadcaster: Send + Sync {
    fn group_send(&self, group: &str, event: GatewayEvent);
}

/// Personal group: every event addressed to one user (room invites).
pub fn user_group(user_id: Uuid) -> String {
    format!("user_{user_id}")
}

/// Room group: chat messages and read receipts for one room.
pub fn chat_group(room_id: Uuid) -> String {
    format!("chat_{room_id}")
}

/// Notification group: fan-out target for a user's notification socket.
pub fn notify_group(user_id: Uuid) -> String {
    format!("notifications_{user_id}")
}
