pub mod links;
pub mod service;
pub mod store;

pub use links::{EnrichError, EntityDirectory, SqlDirectory};
pub use service::{NotificationService, NotifyError};
pub use store::{NotificationStore, StoreError};
