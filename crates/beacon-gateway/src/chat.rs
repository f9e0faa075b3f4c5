use std::collections::HashSet;
use std::sync::{Arc, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use beacon_db::Database;
use beacon_jobs::Reminders;
use beacon_types::broadcast::{Broadcaster, chat_group, user_group};
use beacon_types::events::GatewayEvent;
use beacon_types::models::{Message, UserProfile};

use crate::bus::{GroupBus, SessionHandle};
use crate::frame::Frame;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct ChatDeps {
    pub bus: Arc<GroupBus>,
    pub db: Arc<Database>,
    pub reminders: Reminders,
}

/// Drive one authenticated chat socket until it closes. The token was
/// already verified at the upgrade layer; anonymous sockets never reach
/// this function.
pub async fn handle_chat_socket(socket: WebSocket, deps: ChatDeps, user: UserProfile) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to chat", user.full_name(), user.id);

    let (handle, mut rx) = SessionHandle::channel();
    let session_id = handle.id;

    // Groups this session joined, shared with the send task so rooms
    // created mid-session still get cleaned up on disconnect.
    let groups: Arc<std::sync::RwLock<HashSet<String>>> =
        Arc::new(std::sync::RwLock::new(HashSet::new()));

    // Personal group plus one group per current room membership. Rooms
    // joined later arrive as create_room events; they are added
    // incrementally, never re-scanned.
    let initial_rooms = {
        let db = deps.db.clone();
        let user_id = user.id;
        match tokio::task::spawn_blocking(move || db.room_ids_for_user(user_id)).await {
            Ok(Ok(rooms)) => rooms,
            Ok(Err(e)) => {
                warn!("room lookup failed for {}: {}", user.id, e);
                vec![]
            }
            Err(e) => {
                warn!("room lookup join error: {}", e);
                vec![]
            }
        }
    };

    {
        let mut joined = groups.write().unwrap_or_else(PoisonError::into_inner);
        let personal = user_group(user.id);
        deps.bus.group_add(&personal, handle.clone());
        joined.insert(personal);
        for room_id in initial_rooms {
            let group = chat_group(room_id);
            deps.bus.group_add(&group, handle.clone());
            joined.insert(group);
        }
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward bus deliveries -> socket, with heartbeat. A create_room
    // delivery also subscribes the session to the new room's group.
    let send_bus = deps.bus.clone();
    let send_handle = handle.clone();
    let send_groups = groups.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let event = match event {
                        Some(event) => event,
                        None => break,
                    };

                    if let GatewayEvent::CreateRoom { room } = &event {
                        let group = chat_group(room.id);
                        send_bus.group_add(&group, send_handle.clone());
                        send_groups
                            .write()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(group);
                    }

                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("event serialization failed: {}", e);
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout, dropping chat session {}", send_handle.id);
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read frames from the client.
    let recv_deps = deps.clone();
    let recv_user = user.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => {
                    handle_frame(&recv_deps, &recv_user, Frame::parse(&text)).await;
                }
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Unsubscribe from everything, including rooms joined mid-session, so
    // the bus never queues for a dead socket.
    let joined = groups.read().unwrap_or_else(PoisonError::into_inner).clone();
    for group in &joined {
        deps.bus.group_discard(group, session_id);
    }

    info!("{} ({}) disconnected from chat", user.full_name(), user.id);
}

async fn handle_frame(deps: &ChatDeps, user: &UserProfile, frame: Frame) {
    match frame {
        Frame::Chat { room_id, content } => {
            handle_chat_message(deps, user, room_id, content).await;
        }
        Frame::Receipt {
            message_id,
            room_id,
        } => {
            handle_read_receipt(deps, user, message_id, room_id).await;
        }
        Frame::Malformed => {
            // Protocol errors never take the connection down.
            warn!("dropping malformed frame from {}", user.id);
        }
    }
}

/// Persist first, publish second. A failed write skips the publish; a
/// failed publish is silently tolerated — the message is already durable
/// and shows up on the next fetch.
async fn handle_chat_message(deps: &ChatDeps, user: &UserProfile, room_id: Uuid, content: String) {
    let message = Message {
        id: Uuid::new_v4(),
        room_id,
        sender: user.clone(),
        content,
        file_urls: vec![],
        timestamp: Utc::now(),
    };

    let db = deps.db.clone();
    let to_insert = message.clone();
    let persisted =
        tokio::task::spawn_blocking(move || db.insert_message(&to_insert)).await;

    match persisted {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("message persist failed in room {}: {}", room_id, e);
            return;
        }
        Err(e) => {
            warn!("message persist join error: {}", e);
            return;
        }
    }

    deps.bus
        .group_send(&chat_group(room_id), GatewayEvent::chat_message(&message));

    deps.reminders.schedule(message.id);
}

/// Idempotent mark-read; the receipt event goes out only when a row was
/// actually created, so reconnect-triggered re-marks never spam the room.
async fn handle_read_receipt(deps: &ChatDeps, user: &UserProfile, message_id: Uuid, room_id: Uuid) {
    let receipt_id = Uuid::new_v4();
    let read_at = Utc::now();

    let db = deps.db.clone();
    let user_id = user.id;
    let created =
        tokio::task::spawn_blocking(move || db.mark_read(receipt_id, message_id, user_id, read_at))
            .await;

    match created {
        Ok(Ok(Some(true))) => {
            deps.bus.group_send(
                &chat_group(room_id),
                GatewayEvent::ReadReceipt {
                    id: receipt_id,
                    room_id,
                    message_id,
                    user: user.clone(),
                    read_at,
                },
            );
        }
        Ok(Ok(Some(false))) => {}
        // The message was deleted or never existed; nothing to record.
        Ok(Ok(None)) => {
            debug!("receipt from {} for unknown message {}", user.id, message_id)
        }
        Ok(Err(e)) => warn!("read receipt persist failed: {}", e),
        Err(e) => warn!("read receipt join error: {}", e),
    }
}
