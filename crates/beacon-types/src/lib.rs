pub mod api;
pub mod broadcast;
pub mod events;
pub mod models;
pub mod notification;
