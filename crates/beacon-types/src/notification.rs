use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain event categories a notification can describe. The required
/// foreign-id fields per kind are declared in the enrichment schema table,
/// not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ReportAssignment,
    ReportUnassignment,
    MultipleReportAssignment,
    MultipleReportUnassignment,
    ReportSubmission,
    NewComments,
    NewSchoolUsers,
    SchoolInfoUpdate,
    BoardCalendarUpdate,
    ApplicationSubmission,
    ApplicationEvaluation,
    ComplaintAssignment,
    NewAgencyUser,
}

/// Entity namespaces a notification link can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Report,
    School,
    Comment,
    Complaint,
    Application,
    User,
}

/// A resolved human-readable reference attached to a notification during
/// link enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "entityType")]
    pub entity_type: EntityType,
    pub id: Uuid,
    pub label: String,
}

/// A notification record. Lives in the key-value notification store, never
/// in the relational store; `links` is derived by enrichment before the
/// record is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: NotificationKind,
    pub receiver_id: Uuid,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub links: Vec<Link>,
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

impl Notification {
    /// A fresh unread draft with server-assigned id and timestamp. Foreign
    /// ids are filled in by the caller before the draft reaches enrichment.
    pub fn draft(kind: NotificationKind, receiver_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            kind,
            receiver_id,
            read: false,
            created_at: Utc::now(),
            links: Vec::new(),
            report_id: None,
            comment_id: None,
            complaint_id: None,
            application_id: None,
            school_ids: Vec::new(),
            new_user_id: None,
        }
    }
}
