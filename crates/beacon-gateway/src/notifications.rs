use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use beacon_notify::service::{NotificationService, NotifyError};
use beacon_types::broadcast::notify_group;
use beacon_types::models::UserProfile;

use crate::bus::{GroupBus, SessionHandle};
use crate::chat::HEARTBEAT_INTERVAL;
use crate::frame::NotifyFrame;

#[derive(Clone)]
pub struct NotifyDeps {
    pub bus: Arc<GroupBus>,
    pub notifications: Arc<NotificationService>,
}

/// Drive one notification socket. The session joins a single group,
/// `notifications_{user}`, and receives freshly created notifications on
/// it; inbound frames mark read, delete, or hang up.
pub async fn handle_notify_socket(socket: WebSocket, deps: NotifyDeps, user: UserProfile) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to notifications", user.full_name(), user.id);

    let (handle, mut rx) = SessionHandle::channel();
    let session_id = handle.id;
    let group = notify_group(user.id);
    deps.bus.group_add(&group, handle);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

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
                            warn!("heartbeat timeout, dropping notify session {}", session_id);
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

    let recv_notifications = deps.notifications.clone();
    let recv_user_id = user.id;
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => {
                    // An empty frame is the client's way of hanging up.
                    if !handle_notify_frame(
                        &recv_notifications,
                        recv_user_id,
                        NotifyFrame::parse(&text),
                    )
                    .await
                    {
                        break;
                    }
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

    deps.bus.group_discard(&group, session_id);

    info!(
        "{} ({}) disconnected from notifications",
        user.full_name(),
        user.id
    );
}

/// Returns false when the session should close.
async fn handle_notify_frame(
    notifications: &Arc<NotificationService>,
    user_id: Uuid,
    frame: NotifyFrame,
) -> bool {
    match frame {
        NotifyFrame::MarkRead(id) => {
            run_store_op(notifications.clone(), user_id, "mark read", move |svc| {
                svc.mark_as_read(id)
            })
            .await;
            true
        }
        NotifyFrame::Delete(id) => {
            run_store_op(notifications.clone(), user_id, "delete", move |svc| {
                svc.delete(id)
            })
            .await;
            true
        }
        NotifyFrame::Close => false,
        NotifyFrame::Malformed => {
            warn!("dropping malformed notify frame from {}", user_id);
            true
        }
    }
}

async fn run_store_op<F>(svc: Arc<NotificationService>, user_id: Uuid, what: &'static str, op: F)
where
    F: FnOnce(&NotificationService) -> Result<(), NotifyError> + Send + 'static,
{
    let outcome = tokio::task::spawn_blocking(move || op(&svc)).await;
    match outcome {
        // A stale id is routine: the row may have been deleted from
        // another tab. Log and carry on.
        Ok(Err(NotifyError::NotFound)) => {
            info!("notification {} for {} already gone", what, user_id)
        }
        Ok(Err(e)) => warn!("notification {} failed for {}: {}", what, user_id, e),
        Ok(Ok(())) => {}
        Err(e) => warn!("notification {} join error: {}", what, e),
    }
}
