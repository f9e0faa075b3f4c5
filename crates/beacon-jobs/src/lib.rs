pub mod mailer;
pub mod queue;
pub mod reminder;

pub use mailer::{LogMailer, Mailer};
pub use queue::TaskQueue;
pub use reminder::Reminders;
