pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod rooms;
pub mod state;

pub use state::AppState;
