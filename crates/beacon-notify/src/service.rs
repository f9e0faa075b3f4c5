use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use beacon_types::broadcast::{Broadcaster, notify_group};
use beacon_types::events::GatewayEvent;
use beacon_types::notification::Notification;

use crate::links::{self, EnrichError, EntityDirectory};
use crate::store::{NotificationStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification not found")]
    NotFound,
    #[error("invalid notification batch: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(StoreError),
    #[error("entity lookup failed: {0}")]
    Lookup(#[from] anyhow::Error),
}

impl From<StoreError> for NotifyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => NotifyError::NotFound,
            other => NotifyError::Store(other),
        }
    }
}

impl From<EnrichError> for NotifyError {
    fn from(e: EnrichError) -> Self {
        match e {
            EnrichError::MissingField { .. } => NotifyError::Validation(e.to_string()),
            EnrichError::Lookup(e) => NotifyError::Lookup(e),
        }
    }
}

/// Builds, persists and publishes notifications. Store write first, bus
/// publish second, no two-phase guarantee between them: a crash in the gap
/// leaves a durable-but-undelivered record that the receiver picks up on
/// the next `get_for_receiver` poll.
pub struct NotificationService {
    store: NotificationStore,
    directory: Arc<dyn EntityDirectory>,
    bus: Arc<dyn Broadcaster>,
}

impl NotificationService {
    pub fn new(
        store: NotificationStore,
        directory: Arc<dyn EntityDirectory>,
        bus: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            store,
            directory,
            bus,
        }
    }

    /// Enrich, persist, then fan out one event per notification to the
    /// receiver's personal group. A validation failure aborts before any
    /// store write; zero records land.
    pub fn create(
        &self,
        mut notifications: Vec<Notification>,
        batch: bool,
    ) -> Result<Vec<Notification>, NotifyError> {
        if notifications.is_empty() {
            return Ok(notifications);
        }

        links::enrich(&mut notifications, self.directory.as_ref())?;

        if batch {
            self.store.batch_put(&notifications)?;
        } else {
            self.store.put(&notifications[0])?;
        }

        info!("persisted {} notification(s)", notifications.len());

        for notification in &notifications {
            self.bus.group_send(
                &notify_group(notification.receiver_id),
                GatewayEvent::Notification(notification.clone()),
            );
        }

        Ok(notifications)
    }

    pub fn get_for_receiver(&self, receiver_id: Uuid) -> Result<Vec<Notification>, NotifyError> {
        Ok(self.store.scan_by(receiver_id)?)
    }

    pub fn mark_as_read(&self, id: Uuid) -> Result<(), NotifyError> {
        let created_at = self.store.created_at_for(id)?;
        self.store.update_flag(id, &created_at, "read", true)?;
        debug!("notification {} marked read", id);
        Ok(())
    }

    pub fn delete(&self, id: Uuid) -> Result<(), NotifyError> {
        let created_at = self.store.created_at_for(id)?;
        self.store.delete(id, &created_at)?;
        debug!("notification {} deleted", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use anyhow::Result;
    use beacon_types::notification::{EntityType, NotificationKind};

    struct StaticDirectory;

    impl EntityDirectory for StaticDirectory {
        fn labels(&self, _entity: EntityType, ids: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
            Ok(ids.iter().map(|id| (*id, "label".to_string())).collect())
        }
    }

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, GatewayEvent)>>,
    }

    impl Broadcaster for RecordingBus {
        fn group_send(&self, group: &str, event: GatewayEvent) {
            self.published.lock().unwrap().push((group.to_string(), event));
        }
    }

    fn service(bus: Arc<RecordingBus>) -> NotificationService {
        NotificationService::new(
            NotificationStore::open_in_memory().unwrap(),
            Arc::new(StaticDirectory),
            bus,
        )
    }

    fn complaint_draft(receiver: Uuid) -> Notification {
        let mut n = Notification::draft(NotificationKind::ComplaintAssignment, receiver, "assigned");
        n.complaint_id = Some(Uuid::new_v4());
        n
    }

    #[test]
    fn create_persists_and_publishes_per_receiver() {
        let bus = Arc::new(RecordingBus::default());
        let service = service(bus.clone());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let created = service
            .create(vec![complaint_draft(alice), complaint_draft(bob)], true)
            .unwrap();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|n| !n.links.is_empty()));

        let published = bus.published.lock().unwrap();
        let groups: Vec<&str> = published.iter().map(|(g, _)| g.as_str()).collect();
        assert_eq!(
            groups,
            vec![
                notify_group(alice).as_str(),
                notify_group(bob).as_str()
            ]
        );

        assert_eq!(service.get_for_receiver(alice).unwrap().len(), 1);
    }

    #[test]
    fn invalid_batch_persists_nothing() {
        let bus = Arc::new(RecordingBus::default());
        let service = service(bus.clone());
        let receiver = Uuid::new_v4();

        // Second draft is missing its mandatory report_id.
        let bad = Notification::draft(NotificationKind::ReportAssignment, receiver, "assigned");
        let batch = vec![complaint_draft(receiver), bad];

        match service.create(batch, true) {
            Err(NotifyError::Validation(_)) => {}
            other => panic!("expected validation failure, got {other:?}"),
        }

        assert!(service.get_for_receiver(receiver).unwrap().is_empty());
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[test]
    fn mark_as_read_missing_id_is_not_found_without_mutation() {
        let bus = Arc::new(RecordingBus::default());
        let service = service(bus.clone());
        let receiver = Uuid::new_v4();

        service.create(vec![complaint_draft(receiver)], false).unwrap();

        match service.mark_as_read(Uuid::new_v4()) {
            Err(NotifyError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }

        let stored = service.get_for_receiver(receiver).unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].read);
    }

    #[test]
    fn mark_as_read_then_delete() {
        let bus = Arc::new(RecordingBus::default());
        let service = service(bus);
        let receiver = Uuid::new_v4();

        let created = service.create(vec![complaint_draft(receiver)], false).unwrap();
        let id = created[0].id;

        service.mark_as_read(id).unwrap();
        assert!(service.get_for_receiver(receiver).unwrap()[0].read);

        service.delete(id).unwrap();
        assert!(service.get_for_receiver(receiver).unwrap().is_empty());

        match service.delete(id) {
            Err(NotifyError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
