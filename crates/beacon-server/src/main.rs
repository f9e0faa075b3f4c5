mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade, ws::Message as WsMessage},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use beacon_api::middleware::{require_auth, verify_token};
use beacon_api::state::AppState;
use beacon_api::{messages, notifications, rooms};
use beacon_db::Database;
use beacon_gateway::bus::GroupBus;
use beacon_gateway::chat::{self, ChatDeps};
use beacon_gateway::notifications as notify_socket;
use beacon_jobs::{LogMailer, Reminders, TaskQueue};
use beacon_notify::{NotificationService, NotificationStore, SqlDirectory};
use beacon_types::broadcast::Broadcaster;
use beacon_types::models::UserProfile;

use crate::config::Config;

#[derive(Clone)]
struct WsState {
    chat: ChatDeps,
    notify: notify_socket::NotifyDeps,
    db: Arc<Database>,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let store = NotificationStore::open(&config.notify_db_path)?;

    let bus = Arc::new(GroupBus::new());
    let directory = Arc::new(SqlDirectory::new(db.clone()));
    let notifications = Arc::new(NotificationService::new(
        store,
        directory,
        bus.clone() as Arc<dyn Broadcaster>,
    ));

    let queue = TaskQueue::new();
    let mailer = Arc::new(LogMailer);
    let reminders = Reminders::new(db.clone(), mailer, queue, config.reminder_delay);

    let app_state = Arc::new(AppState {
        db: db.clone(),
        bus: bus.clone() as Arc<dyn Broadcaster>,
        notifications: notifications.clone(),
        reminders: reminders.clone(),
        jwt_secret: config.jwt_secret.clone(),
    });

    let ws_state = WsState {
        chat: ChatDeps {
            bus: bus.clone(),
            db: db.clone(),
            reminders,
        },
        notify: notify_socket::NotifyDeps {
            bus,
            notifications,
        },
        db,
        jwt_secret: config.jwt_secret,
    };

    let rest_routes = Router::new()
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/rooms/{room_id}/archive", post(rooms::archive_room))
        .route("/rooms/{room_id}/members", post(rooms::add_members))
        .route(
            "/rooms/{room_id}/members/{user_id}",
            delete(rooms::remove_member),
        )
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/rooms/{room_id}/messages/{message_id}/read",
            post(messages::mark_read),
        )
        .route(
            "/notifications",
            get(notifications::list_notifications).post(notifications::create_notifications),
        )
        .route(
            "/notifications/{id}/read",
            post(notifications::mark_notification_read),
        )
        .route(
            "/notifications/{id}",
            delete(notifications::delete_notification),
        )
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_routes = Router::new()
        .route("/ws/chat", get(chat_upgrade))
        .route("/ws/notifications", get(notify_upgrade))
        .with_state(ws_state);

    let app = Router::new()
        .merge(rest_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Beacon server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct WsAuth {
    token: Option<String>,
}

/// Resolve the `?token=` query parameter to a known user. Anonymous or
/// stale-token sockets are still upgraded, then closed without sending a
/// frame, matching what browsers expect from an auth failure mid-handshake.
async fn ws_user(state: &WsState, auth: &WsAuth) -> Option<UserProfile> {
    let token = auth.token.as_deref()?;
    let claims = verify_token(token, &state.jwt_secret)?;

    let db = state.db.clone();
    match tokio::task::spawn_blocking(move || db.get_user(claims.sub)).await {
        Ok(Ok(user)) => user,
        Ok(Err(e)) => {
            warn!("socket user lookup failed: {}", e);
            None
        }
        Err(e) => {
            warn!("socket user lookup join error: {}", e);
            None
        }
    }
}

async fn chat_upgrade(
    State(state): State<WsState>,
    Query(auth): Query<WsAuth>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |mut socket| async move {
        match ws_user(&state, &auth).await {
            Some(user) => chat::handle_chat_socket(socket, state.chat, user).await,
            None => {
                warn!("closing unauthenticated chat socket");
                let _ = socket.send(WsMessage::Close(None)).await;
            }
        }
    })
}

async fn notify_upgrade(
    State(state): State<WsState>,
    Query(auth): Query<WsAuth>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |mut socket| async move {
        match ws_user(&state, &auth).await {
            Some(user) => notify_socket::handle_notify_socket(socket, state.notify, user).await,
            None => {
                warn!("closing unauthenticated notification socket");
                let _ = socket.send(WsMessage::Close(None)).await;
            }
        }
    })
}
