use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use beacon_db::Database;
use beacon_types::api::{AddMembersRequest, ArchiveRoomRequest, Claims, CreateRoomRequest};
use beacon_types::broadcast::{Broadcaster, chat_group, user_group};
use beacon_types::events::GatewayEvent;
use beacon_types::models::{Message, Room, RoomKind, RoomView, UserProfile};

use crate::state::AppState;

/// Assemble the client-facing view of a room: membership plus the latest
/// message. Runs on a blocking thread; callers wrap it in spawn_blocking.
pub(crate) fn build_room_view(db: &Database, room: Room, archived: bool) -> anyhow::Result<RoomView> {
    let members = db.member_profiles(room.id)?;
    let last_message = db.messages_for_room(room.id, 1, None)?.into_iter().next();

    Ok(RoomView {
        id: room.id,
        title: room.title,
        kind: room.kind,
        announcement_category: room.announcement_category,
        created_at: room.created_at,
        archived,
        members,
        last_message,
    })
}

pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let views = tokio::task::spawn_blocking(move || {
        let rooms = db.rooms_for_user(user_id)?;
        rooms
            .into_iter()
            .map(|(room, archived)| build_room_view(&db, room, archived))
            .collect::<anyhow::Result<Vec<RoomView>>>()
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("room listing failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(views))
}

pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.members.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let kind = req.kind.unwrap_or(RoomKind::Direct);
    if kind == RoomKind::Announcement && req.title.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let creator = state.current_user(claims.sub).await?;
    let now = Utc::now();
    let room = Room {
        id: Uuid::new_v4(),
        title: req.title,
        kind,
        announcement_category: req.announcement_category,
        created_at: now,
        updated_at: now,
    };
    let room_id = room.id;

    let initial_message = req.message.map(|content| Message {
        id: Uuid::new_v4(),
        room_id,
        sender: creator.clone(),
        content,
        file_urls: vec![],
        timestamp: now,
    });

    let db = state.db.clone();
    let member_ids = req.members.clone();
    let creator_id = creator.id;
    let message_to_insert = initial_message.clone();
    let room_to_insert = room.clone();

    let view = tokio::task::spawn_blocking(move || {
        db.create_room(&room_to_insert)?;
        db.add_member(room_id, creator_id, now)?;
        for member_id in &member_ids {
            db.add_member(room_id, *member_id, now)?;
        }
        if let Some(message) = &message_to_insert {
            db.insert_message(message)?;
        }
        build_room_view(&db, room_to_insert, false)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("room creation failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    // Everything is durable; now fan out. Each member's personal group gets
    // the new room so live chat sockets subscribe to it immediately.
    for member in &view.members {
        state.bus.group_send(
            &user_group(member.id),
            GatewayEvent::CreateRoom { room: view.clone() },
        );
    }

    if let Some(message) = initial_message {
        state
            .bus
            .group_send(&chat_group(room_id), GatewayEvent::chat_message(&message));
        state.reminders.schedule(message.id);
    }

    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn archive_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ArchiveRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let changed = tokio::task::spawn_blocking(move || db.set_archived(room_id, user_id, req.archived))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("archive toggle failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    // The toggle is per membership row, so a miss means the caller is not
    // in the room (or the room does not exist).
    if !changed {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_members(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddMembersRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.user_ids.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let caller = claims.sub;
    let user_ids = req.user_ids.clone();
    let now = Utc::now();

    let (view, added) = tokio::task::spawn_blocking(
        move || -> anyhow::Result<Option<(RoomView, Vec<UserProfile>)>> {
        if !db.is_member(room_id, caller)? {
            return Ok(None);
        }
        let Some(room) = db.get_room(room_id)? else {
            return Ok(None);
        };

        let mut added_ids = Vec::new();
        for user_id in &user_ids {
            if db.add_member(room_id, *user_id, now)? {
                added_ids.push(*user_id);
            }
        }

        let view = build_room_view(&db, room, false)?;
        let added = view
            .members
            .iter()
            .filter(|m| added_ids.contains(&m.id))
            .cloned()
            .collect();
        Ok(Some((view, added)))
    },
    )
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("member add failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .ok_or(StatusCode::NOT_FOUND)?;

    // Only freshly added users get the room pushed to their personal group;
    // existing members already have it.
    for member in &added {
        state.bus.group_send(
            &user_group(member.id),
            GatewayEvent::CreateRoom { room: view.clone() },
        );
    }

    Ok(Json(view))
}

pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    Path((room_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let caller = claims.sub;

    let removed = tokio::task::spawn_blocking(move || {
        if !db.is_member(room_id, caller)? {
            return Ok(false);
        }
        db.remove_member(room_id, user_id)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("member removal failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if !removed {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(StatusCode::NO_CONTENT)
}
