use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use beacon_db::messages::PageCursor;
use beacon_types::api::{Claims, MarkReadResponse, MessageQuery, SendMessageRequest};
use beacon_types::broadcast::{Broadcaster, chat_group};
use beacon_types::events::GatewayEvent;
use beacon_types::models::{Message, ReadReceipt};

use crate::state::AppState;

const MAX_PAGE: u32 = 200;

/// Paged history fetch. Fetching a page also marks every message in it as
/// read by the caller; of the receipts that creates, only the one for the
/// newest message is broadcast, so a catch-up scroll does not flood the
/// room with receipt events.
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let cursor = match &query.before {
        Some(raw) => Some(PageCursor {
            before: raw
                .parse::<DateTime<Utc>>()
                .map_err(|_| StatusCode::BAD_REQUEST)?,
            before_id: query.before_id,
        }),
        None => None,
    };

    let user = state.current_user(claims.sub).await?;

    let db = state.db.clone();
    let limit = query.limit.min(MAX_PAGE);
    let user_id = user.id;
    let read_at = Utc::now();

    let (mut page, created) = tokio::task::spawn_blocking(
        move || -> anyhow::Result<Option<(Vec<Message>, Vec<(Uuid, Uuid)>)>> {
            if !db.is_member(room_id, user_id)? {
                return Ok(None);
            }

            let page = db.messages_for_room(room_id, limit, cursor)?;
            let unread: Vec<Uuid> = page
                .iter()
                .filter(|m| m.sender.id != user_id)
                .map(|m| m.id)
                .collect();
            let created = db.batch_mark_read(&unread, user_id, read_at)?;

            Ok(Some((page, created)))
        },
    )
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("message fetch failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .ok_or(StatusCode::FORBIDDEN)?;

    // The page is newest-first, so the first created receipt belongs to
    // the most recent message.
    if let Some((receipt_id, message_id)) = created.first() {
        state.bus.group_send(
            &chat_group(room_id),
            GatewayEvent::ReadReceipt {
                id: *receipt_id,
                room_id,
                message_id: *message_id,
                user: user.clone(),
                read_at,
            },
        );
    }

    // Clients render oldest-first.
    page.reverse();
    Ok(Json(page))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.content.is_empty() && req.file_urls.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let sender = state.current_user(claims.sub).await?;

    let message = Message {
        id: Uuid::new_v4(),
        room_id,
        sender,
        content: req.content,
        file_urls: req.file_urls,
        timestamp: Utc::now(),
    };

    let db = state.db.clone();
    let to_insert = message.clone();
    let sender_id = message.sender.id;

    let member = tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
        if !db.is_member(room_id, sender_id)? {
            return Ok(false);
        }
        db.insert_message(&to_insert)?;
        Ok(true)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("message persist failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if !member {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .bus
        .group_send(&chat_group(room_id), GatewayEvent::chat_message(&message));
    state.reminders.schedule(message.id);

    Ok((StatusCode::CREATED, Json(message)))
}

/// Idempotent single-message mark read. A repeat call confirms instead of
/// erroring, so optimistic clients can fire it freely.
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = state.current_user(claims.sub).await?;

    let receipt_id = Uuid::new_v4();
    let read_at = Utc::now();

    enum MarkOutcome {
        NotMember,
        MessageMissing,
        Created,
        AlreadyRead,
    }

    let db = state.db.clone();
    let user_id = user.id;
    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<MarkOutcome> {
        if !db.is_member(room_id, user_id)? {
            return Ok(MarkOutcome::NotMember);
        }
        Ok(
            match db.mark_read(receipt_id, message_id, user_id, read_at)? {
                None => MarkOutcome::MessageMissing,
                Some(true) => MarkOutcome::Created,
                Some(false) => MarkOutcome::AlreadyRead,
            },
        )
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        warn!("read receipt persist failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    match outcome {
        MarkOutcome::NotMember => return Err(StatusCode::FORBIDDEN),
        MarkOutcome::MessageMissing => return Err(StatusCode::NOT_FOUND),
        MarkOutcome::AlreadyRead => {
            return Ok((StatusCode::OK, Json(MarkReadResponse::already_read())));
        }
        MarkOutcome::Created => {}
    }

    let receipt = ReadReceipt {
        id: receipt_id,
        message_id,
        user: user.clone(),
        read_at,
    };

    state.bus.group_send(
        &chat_group(room_id),
        GatewayEvent::ReadReceipt {
            id: receipt_id,
            room_id,
            message_id,
            user,
            read_at,
        },
    );

    Ok((StatusCode::CREATED, Json(MarkReadResponse::Created(receipt))))
}
