use std::sync::Arc;

use axum::http::StatusCode;
use tracing::error;
use uuid::Uuid;

use beacon_db::Database;
use beacon_jobs::Reminders;
use beacon_notify::NotificationService;
use beacon_types::broadcast::Broadcaster;
use beacon_types::models::UserProfile;

/// Shared handler state. The bus is held behind the trait so handlers can
/// be exercised with a recording double.
pub struct AppState {
    pub db: Arc<Database>,
    pub bus: Arc<dyn Broadcaster>,
    pub notifications: Arc<NotificationService>,
    pub reminders: Reminders,
    pub jwt_secret: String,
}

impl AppState {
    /// Load the caller's profile off the async runtime. A valid token whose
    /// subject no longer exists maps to 401, not 500.
    pub async fn current_user(self: &Arc<Self>, user_id: Uuid) -> Result<UserProfile, StatusCode> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.get_user(user_id))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .map_err(|e| {
                error!("user lookup failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}
