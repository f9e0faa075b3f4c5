use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};
use uuid::Uuid;

use beacon_db::Database;

use crate::mailer::Mailer;
use crate::queue::TaskQueue;

/// Delayed "unread message" reminders. Every chat message schedules one
/// job; the job re-fetches membership and receipts when it fires and emails
/// whoever still has not read the message. All-read means the job is a
/// no-op — relevance is checked at fire time, there is no cancellation.
#[derive(Clone)]
pub struct Reminders {
    db: Arc<Database>,
    mailer: Arc<dyn Mailer>,
    queue: TaskQueue,
    delay: Duration,
}

impl Reminders {
    pub fn new(db: Arc<Database>, mailer: Arc<dyn Mailer>, queue: TaskQueue, delay: Duration) -> Self {
        Self {
            db,
            mailer,
            queue,
            delay,
        }
    }

    pub fn schedule(&self, message_id: Uuid) {
        let this = self.clone();
        self.queue.enqueue(self.delay, async move {
            this.run(message_id).await;
        });
    }

    /// The job body. Public so tests can fire it without waiting out the
    /// delay.
    pub async fn run(&self, message_id: Uuid) {
        let db = self.db.clone();
        let fetched = tokio::task::spawn_blocking(move || {
            let message = db.get_message(message_id)?;
            let pending = db.unread_recipients(message_id)?;
            anyhow::Ok((message, pending))
        })
        .await;

        let (message, pending) = match fetched {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("reminder lookup failed for message {}: {}", message_id, e);
                return;
            }
            Err(e) => {
                error!("reminder task join error: {}", e);
                return;
            }
        };

        let Some(message) = message else {
            warn!("reminder fired for unknown message {}", message_id);
            return;
        };

        if pending.is_empty() {
            debug!("message {} read by everyone before reminder fired", message_id);
            return;
        }

        let sender = message.sender.full_name();
        let subject = format!("{} sent you a message", sender);
        let body = format!("{} sent you a message: {}", sender, message.content);

        // One recipient failing must not starve the rest.
        for user in &pending {
            if let Err(e) = self.mailer.send_email(&user.email, &subject, &body) {
                warn!("reminder email to {} failed: {}", user.email, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use anyhow::anyhow;
    use beacon_types::models::{Message, Room, RoomKind, UserProfile};
    use chrono::Utc;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<String>>,
        fail_for: Option<String>,
    }

    impl Mailer for RecordingMailer {
        fn send_email(&self, to: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
            if self.fail_for.as_deref() == Some(to) {
                return Err(anyhow!("smtp unavailable"));
            }
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    fn user(first: &str) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            first_name: first.into(),
            last_name: "Tester".into(),
            email: format!("{}@example.org", first.to_lowercase()),
        }
    }

    fn setup() -> (Arc<Database>, UserProfile, UserProfile, UserProfile, Message) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let a = user("Alice");
        let b = user("Bob");
        let c = user("Carol");

        let now = Utc::now();
        let room = Room {
            id: Uuid::new_v4(),
            title: None,
            kind: RoomKind::Direct,
            announcement_category: None,
            created_at: now,
            updated_at: now,
        };
        db.create_room(&room).unwrap();
        for member in [&a, &b, &c] {
            db.upsert_user(member).unwrap();
            db.add_member(room.id, member.id, now).unwrap();
        }

        let message = Message {
            id: Uuid::new_v4(),
            room_id: room.id,
            sender: a.clone(),
            content: "please read".into(),
            file_urls: vec![],
            timestamp: now,
        };
        db.insert_message(&message).unwrap();

        (db, a, b, c, message)
    }

    #[tokio::test]
    async fn emails_only_members_who_did_not_read() {
        let (db, _a, b, c, message) = setup();
        let mailer = Arc::new(RecordingMailer::default());

        db.mark_read(Uuid::new_v4(), message.id, b.id, Utc::now())
            .unwrap();

        let reminders = Reminders::new(
            db,
            mailer.clone(),
            TaskQueue::new(),
            Duration::from_secs(0),
        );
        reminders.run(message.id).await;

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![c.email.clone()]);
    }

    #[tokio::test]
    async fn all_read_means_no_emails() {
        let (db, _a, b, c, message) = setup();
        let mailer = Arc::new(RecordingMailer::default());

        for reader in [&b, &c] {
            db.mark_read(Uuid::new_v4(), message.id, reader.id, Utc::now())
                .unwrap();
        }

        let reminders = Reminders::new(
            db,
            mailer.clone(),
            TaskQueue::new(),
            Duration::from_secs(0),
        );
        reminders.run(message.id).await;

        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_failed_send_does_not_block_the_rest() {
        let (db, _a, b, c, message) = setup();
        let mailer = Arc::new(RecordingMailer {
            sent: Mutex::new(vec![]),
            fail_for: Some(b.email.clone()),
        });

        let reminders = Reminders::new(
            db,
            mailer.clone(),
            TaskQueue::new(),
            Duration::from_secs(0),
        );
        reminders.run(message.id).await;

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![c.email.clone()]);
    }
}
