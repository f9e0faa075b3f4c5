pub mod bus;
pub mod chat;
pub mod frame;
pub mod notifications;
