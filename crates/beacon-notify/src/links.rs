use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use beacon_db::Database;
use beacon_types::notification::{EntityType, Link, Notification, NotificationKind};

/// Bulk id -> label resolution for one entity type. The relational store
/// implements this; tests substitute counting fakes.
pub trait EntityDirectory: Send + Sync {
    fn labels(&self, entity: EntityType, ids: &[Uuid]) -> Result<Vec<(Uuid, String)>>;
}

/// Directory backed by the relational store's lookup tables.
pub struct SqlDirectory {
    db: Arc<Database>,
}

impl SqlDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl EntityDirectory for SqlDirectory {
    fn labels(&self, entity: EntityType, ids: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
        match entity {
            EntityType::Report => self.db.report_labels(ids),
            EntityType::School => self.db.school_labels(ids),
            EntityType::Comment => self.db.comment_labels(ids),
            EntityType::Complaint => self.db.complaint_labels(ids),
            EntityType::Application => self.db.application_labels(ids),
            EntityType::User => self.db.user_labels(ids),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("{field} is required for notification kind {kind:?}")]
    MissingField {
        kind: NotificationKind,
        field: &'static str,
    },
    #[error("entity lookup failed: {0}")]
    Lookup(#[from] anyhow::Error),
}

/// Which foreign-id slot on the notification record an entity type reads.
/// New kinds are a row in `KIND_SCHEMA`, not a new branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdField {
    Report,
    Schools,
    Comment,
    Complaint,
    Application,
    NewUser,
}

impl IdField {
    fn name(self) -> &'static str {
        match self {
            IdField::Report => "report_id",
            IdField::Schools => "school_ids",
            IdField::Comment => "comment_id",
            IdField::Complaint => "complaint_id",
            IdField::Application => "application_id",
            IdField::NewUser => "new_user_id",
        }
    }

    fn entity(self) -> EntityType {
        match self {
            IdField::Report => EntityType::Report,
            IdField::Schools => EntityType::School,
            IdField::Comment => EntityType::Comment,
            IdField::Complaint => EntityType::Complaint,
            IdField::Application => EntityType::Application,
            IdField::NewUser => EntityType::User,
        }
    }

    fn values(self, notification: &Notification) -> Vec<Uuid> {
        match self {
            IdField::Report => notification.report_id.into_iter().collect(),
            IdField::Schools => notification.school_ids.clone(),
            IdField::Comment => notification.comment_id.into_iter().collect(),
            IdField::Complaint => notification.complaint_id.into_iter().collect(),
            IdField::Application => notification.application_id.into_iter().collect(),
            IdField::NewUser => notification.new_user_id.into_iter().collect(),
        }
    }
}

/// Per-kind mandatory id fields. Persisting a notification whose kind's
/// required slots are empty would produce a record that can never be
/// enriched, so validation runs before any store write.
const KIND_SCHEMA: &[(NotificationKind, &[IdField])] = &[
    (NotificationKind::ReportAssignment, &[IdField::Report, IdField::Schools]),
    (NotificationKind::ReportUnassignment, &[IdField::Report, IdField::Schools]),
    (NotificationKind::MultipleReportAssignment, &[IdField::Report, IdField::Schools]),
    (NotificationKind::MultipleReportUnassignment, &[IdField::Report, IdField::Schools]),
    (NotificationKind::ReportSubmission, &[IdField::Report, IdField::Schools]),
    (NotificationKind::NewComments, &[IdField::Report, IdField::Comment]),
    (NotificationKind::NewSchoolUsers, &[IdField::Schools, IdField::NewUser]),
    (NotificationKind::SchoolInfoUpdate, &[IdField::Schools]),
    (NotificationKind::BoardCalendarUpdate, &[IdField::Schools]),
    (NotificationKind::ApplicationSubmission, &[IdField::Schools, IdField::Application]),
    (NotificationKind::ApplicationEvaluation, &[IdField::Schools, IdField::Application]),
    (NotificationKind::ComplaintAssignment, &[IdField::Complaint]),
    (NotificationKind::NewAgencyUser, &[IdField::NewUser]),
];

fn required_fields(kind: NotificationKind) -> &'static [IdField] {
    KIND_SCHEMA
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, fields)| *fields)
        .unwrap_or(&[])
}

/// Validate and enrich a batch of drafts in place. A single missing
/// mandatory field fails the whole batch before any lookup; unknown entity
/// ids are silently left without a link. Lookups are grouped across the
/// batch — one bulk query per entity type, however many drafts reference
/// the same entity.
pub fn enrich(
    notifications: &mut [Notification],
    directory: &dyn EntityDirectory,
) -> std::result::Result<(), EnrichError> {
    // entity type -> (entity id -> draft indexes referencing it)
    let mut wanted: HashMap<EntityType, HashMap<Uuid, Vec<usize>>> = HashMap::new();

    for (idx, notification) in notifications.iter().enumerate() {
        for &field in required_fields(notification.kind) {
            let ids = field.values(notification);
            if ids.is_empty() {
                return Err(EnrichError::MissingField {
                    kind: notification.kind,
                    field: field.name(),
                });
            }

            let by_id = wanted.entry(field.entity()).or_default();
            for id in ids {
                by_id.entry(id).or_default().push(idx);
            }
        }
    }

    for (entity, by_id) in wanted {
        let ids: Vec<Uuid> = by_id.keys().copied().collect();
        for (id, label) in directory.labels(entity, &ids)? {
            for &idx in &by_id[&id] {
                notifications[idx].links.push(Link {
                    entity_type: entity,
                    id,
                    label: label.clone(),
                });
            }
        }
    }

    Ok(())
}
