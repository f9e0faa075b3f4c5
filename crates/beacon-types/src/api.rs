use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ReadReceipt, RoomKind};
use crate::notification::{Notification, NotificationKind};

// -- JWT Claims --

/// Claims shared by the REST middleware and the websocket upgrade path.
/// Token issuance happens upstream; this subsystem only verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Rooms --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub kind: Option<RoomKind>,
    #[serde(default)]
    pub announcement_category: Option<String>,
    /// Members besides the creator.
    pub members: Vec<Uuid>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveRoomRequest {
    pub archived: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMembersRequest {
    pub user_ids: Vec<Uuid>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub file_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: timestamp of the oldest message from the
    /// previous page.
    pub before: Option<String>,
    /// Id of that message, to break ties when several messages share the
    /// cursor timestamp.
    pub before_id: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

// -- Notifications --

/// One notification draft as posted by an internal producer. Which foreign
/// ids are mandatory depends on the kind; enrichment validates them.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNotificationRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: NotificationKind,
    pub receiver_id: Uuid,
    #[serde(default)]
    pub report_id: Option<Uuid>,
    #[serde(default)]
    pub comment_id: Option<Uuid>,
    #[serde(default)]
    pub complaint_id: Option<Uuid>,
    #[serde(default)]
    pub application_id: Option<Uuid>,
    #[serde(default)]
    pub school_ids: Vec<Uuid>,
    #[serde(default)]
    pub new_user_id: Option<Uuid>,
}

impl CreateNotificationRequest {
    pub fn into_draft(self) -> Notification {
        let mut draft = Notification::draft(self.kind, self.receiver_id, self.title);
        draft.description = self.description;
        draft.report_id = self.report_id;
        draft.comment_id = self.comment_id;
        draft.complaint_id = self.complaint_id;
        draft.application_id = self.application_id;
        draft.school_ids = self.school_ids;
        draft.new_user_id = self.new_user_id;
        draft
    }
}

/// Producers post either a single draft or a batch; a batch is validated
/// and persisted all-or-nothing.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CreateNotificationsRequest {
    One(Box<CreateNotificationRequest>),
    Many(Vec<CreateNotificationRequest>),
}

/// Mark-as-read outcome: either a freshly created receipt or confirmation
/// that the pair was already recorded.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum MarkReadResponse {
    Created(ReadReceipt),
    AlreadyRead { status: String },
}

impl MarkReadResponse {
    pub fn already_read() -> Self {
        MarkReadResponse::AlreadyRead {
            status: "already read".into(),
        }
    }
}
