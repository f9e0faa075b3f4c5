use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};
use uuid::Uuid;

use beacon_notify::NotifyError;
use beacon_types::api::{Claims, CreateNotificationsRequest};

use crate::state::AppState;

fn store_status(what: &'static str, e: NotifyError) -> StatusCode {
    match e {
        NotifyError::NotFound => StatusCode::NOT_FOUND,
        NotifyError::Validation(reason) => {
            warn!("notification {} rejected: {}", what, reason);
            StatusCode::BAD_REQUEST
        }
        other => {
            error!("notification {} failed: {}", what, other);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Entry point for internal producers. A single draft or a batch; a batch
/// is enriched, validated and persisted all-or-nothing, then each record
/// is pushed to its receiver's notification socket.
pub async fn create_notifications(
    State(state): State<Arc<AppState>>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<CreateNotificationsRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let (drafts, batch) = match req {
        CreateNotificationsRequest::One(draft) => (vec![draft.into_draft()], false),
        CreateNotificationsRequest::Many(drafts) => {
            let batch = drafts.len() > 1;
            (
                drafts.into_iter().map(|d| d.into_draft()).collect(),
                batch,
            )
        }
    };

    if drafts.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let svc = state.notifications.clone();
    let created = tokio::task::spawn_blocking(move || svc.create(drafts, batch))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| store_status("create", e))?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Newest first, for the caller only.
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.notifications.clone();
    let receiver_id = claims.sub;

    let notifications = tokio::task::spawn_blocking(move || svc.get_for_receiver(receiver_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| store_status("list", e))?;

    Ok(Json(notifications))
}

pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.notifications.clone();

    tokio::task::spawn_blocking(move || svc.mark_as_read(id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| store_status("mark read", e))?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.notifications.clone();

    tokio::task::spawn_blocking(move || svc.delete(id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| store_status("delete", e))?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use beacon_db::Database;
    use beacon_jobs::{LogMailer, Reminders, TaskQueue};
    use beacon_notify::{NotificationService, NotificationStore, SqlDirectory};
    use beacon_types::api::CreateNotificationRequest;
    use beacon_types::broadcast::Broadcaster;
    use beacon_types::events::GatewayEvent;
    use beacon_types::notification::NotificationKind;

    struct NullBus;

    impl Broadcaster for NullBus {
        fn group_send(&self, _group: &str, _event: GatewayEvent) {}
    }

    fn test_state() -> Arc<AppState> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let bus: Arc<dyn Broadcaster> = Arc::new(NullBus);
        let notifications = Arc::new(NotificationService::new(
            NotificationStore::open_in_memory().unwrap(),
            Arc::new(SqlDirectory::new(db.clone())),
            bus.clone(),
        ));
        let reminders = Reminders::new(
            db.clone(),
            Arc::new(LogMailer),
            TaskQueue::new(),
            Duration::from_secs(0),
        );
        Arc::new(AppState {
            db,
            bus,
            notifications,
            reminders,
            jwt_secret: "test".into(),
        })
    }

    fn claims() -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            exp: usize::MAX,
        }
    }

    fn draft(kind: NotificationKind, receiver_id: Uuid) -> CreateNotificationRequest {
        CreateNotificationRequest {
            title: "heads up".into(),
            description: None,
            kind,
            receiver_id,
            report_id: None,
            comment_id: None,
            complaint_id: None,
            application_id: None,
            school_ids: vec![],
            new_user_id: None,
        }
    }

    #[tokio::test]
    async fn create_endpoint_persists_and_lists_the_record() {
        let state = test_state();
        let receiver = Uuid::new_v4();
        let school = Uuid::new_v4();
        state.db.insert_school(school, "Northside").unwrap();

        let mut request = draft(NotificationKind::SchoolInfoUpdate, receiver);
        request.school_ids = vec![school];

        let response = create_notifications(
            State(state.clone()),
            Extension(claims()),
            Json(CreateNotificationsRequest::One(Box::new(request))),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let listed = state.notifications.get_for_receiver(receiver).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].links[0].label, "Northside");
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected_and_persists_nothing() {
        let state = test_state();
        let receiver = Uuid::new_v4();

        // complaint assignment without a complaint_id
        let request = draft(NotificationKind::ComplaintAssignment, receiver);

        let result = create_notifications(
            State(state.clone()),
            Extension(claims()),
            Json(CreateNotificationsRequest::One(Box::new(request))),
        )
        .await;

        match result {
            Err(status) => assert_eq!(status, StatusCode::BAD_REQUEST),
            Ok(_) => panic!("expected a validation rejection"),
        }
        assert!(state.notifications.get_for_receiver(receiver).unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_create_persists_every_record() {
        let state = test_state();
        let school = Uuid::new_v4();
        state.db.insert_school(school, "Eastside").unwrap();

        let receivers = [Uuid::new_v4(), Uuid::new_v4()];
        let drafts = receivers
            .iter()
            .map(|&receiver| {
                let mut request = draft(NotificationKind::SchoolInfoUpdate, receiver);
                request.school_ids = vec![school];
                request
            })
            .collect();

        let response = create_notifications(
            State(state.clone()),
            Extension(claims()),
            Json(CreateNotificationsRequest::Many(drafts)),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        for receiver in receivers {
            assert_eq!(state.notifications.get_for_receiver(receiver).unwrap().len(), 1);
        }
    }
}
