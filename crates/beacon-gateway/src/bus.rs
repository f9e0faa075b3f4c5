use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use beacon_types::broadcast::Broadcaster;
use beacon_types::events::GatewayEvent;

/// Delivery endpoint for one live session. Cloning shares the underlying
/// channel; dropping the receiving side makes every subsequent send a no-op.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl SessionHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    fn deliver(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

const SHARD_COUNT: usize = 16;

/// Named-group publish/subscribe table shared by every session. The group
/// map is sharded by group-name hash so concurrent add/discard/send on
/// unrelated groups never contend on one lock.
pub struct GroupBus {
    shards: Vec<RwLock<HashMap<String, Vec<SessionHandle>>>>,
}

impl GroupBus {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, group: &str) -> &RwLock<HashMap<String, Vec<SessionHandle>>> {
        let mut hasher = std::hash::DefaultHasher::new();
        group.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }

    pub fn group_add(&self, group: &str, handle: SessionHandle) {
        let mut shard = self.shard(group).write().unwrap_or_else(PoisonError::into_inner);
        let members = shard.entry(group.to_string()).or_default();
        if !members.iter().any(|m| m.id == handle.id) {
            members.push(handle);
        }
    }

    pub fn group_discard(&self, group: &str, session_id: Uuid) {
        let mut shard = self.shard(group).write().unwrap_or_else(PoisonError::into_inner);
        if let Some(members) = shard.get_mut(group) {
            members.retain(|m| m.id != session_id);
            if members.is_empty() {
                shard.remove(group);
            }
        }
    }

    /// Current subscriber count, mostly useful to tests and diagnostics.
    pub fn group_size(&self, group: &str) -> usize {
        let shard = self.shard(group).read().unwrap_or_else(PoisonError::into_inner);
        shard.get(group).map(Vec::len).unwrap_or(0)
    }
}

impl Broadcaster for GroupBus {
    /// Fire-and-forget fan-out: one delivery per currently-subscribed
    /// session, in publish order per group. Sessions whose receiver is gone
    /// are pruned on the spot instead of queueing for a dead socket.
    fn group_send(&self, group: &str, event: GatewayEvent) {
        let members = {
            let shard = self.shard(group).read().unwrap_or_else(PoisonError::into_inner);
            match shard.get(group) {
                Some(members) => members.clone(),
                None => return,
            }
        };

        let mut dead = Vec::new();
        for member in &members {
            if !member.deliver(event.clone()) {
                dead.push(member.id);
            }
        }

        if !dead.is_empty() {
            let mut shard = self.shard(group).write().unwrap_or_else(PoisonError::into_inner);
            if let Some(members) = shard.get_mut(group) {
                members.retain(|m| !dead.contains(&m.id));
                if members.is_empty() {
                    shard.remove(group);
                }
            }
        }
    }
}

impl Default for GroupBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::models::UserProfile;
    use chrono::Utc;

    fn chat_event(room_id: Uuid, content: &str) -> GatewayEvent {
        GatewayEvent::ChatMessage {
            id: Uuid::new_v4(),
            content: content.into(),
            room_id,
            sender: UserProfile {
                id: Uuid::new_v4(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.org".into(),
            },
            file_urls: vec![],
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives_exactly_one_copy() {
        let bus = GroupBus::new();
        let room = Uuid::new_v4();
        let group = beacon_types::broadcast::chat_group(room);

        let (a, mut rx_a) = SessionHandle::channel();
        let (b, mut rx_b) = SessionHandle::channel();
        let (c, mut rx_c) = SessionHandle::channel();
        bus.group_add(&group, a);
        bus.group_add(&group, b);
        bus.group_add(&group, c);

        bus.group_send(&group, chat_event(room, "hello room"));

        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            match rx.try_recv().unwrap() {
                GatewayEvent::ChatMessage { room_id, content, .. } => {
                    assert_eq!(room_id, room);
                    assert_eq!(content, "hello room");
                }
                other => panic!("unexpected event: {other:?}"),
            }
            assert!(rx.try_recv().is_err(), "received a duplicate");
        }
    }

    #[tokio::test]
    async fn delivery_order_matches_publish_order() {
        let bus = GroupBus::new();
        let room = Uuid::new_v4();
        let group = beacon_types::broadcast::chat_group(room);

        let (handle, mut rx) = SessionHandle::channel();
        bus.group_add(&group, handle);

        bus.group_send(&group, chat_event(room, "first"));
        bus.group_send(&group, chat_event(room, "second"));

        let contents: Vec<String> = (0..2)
            .map(|_| match rx.try_recv().unwrap() {
                GatewayEvent::ChatMessage { content, .. } => content,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn disconnected_sessions_are_pruned_on_send() {
        let bus = GroupBus::new();
        let room = Uuid::new_v4();
        let group = beacon_types::broadcast::chat_group(room);

        let (alive, mut rx_alive) = SessionHandle::channel();
        let (dead, rx_dead) = SessionHandle::channel();
        bus.group_add(&group, alive);
        bus.group_add(&group, dead);
        drop(rx_dead);

        bus.group_send(&group, chat_event(room, "still here"));

        assert!(rx_alive.try_recv().is_ok());
        assert_eq!(bus.group_size(&group), 1);
    }

    #[tokio::test]
    async fn poisoned_shard_is_recovered_not_propagated() {
        use std::sync::Arc;

        let bus = Arc::new(GroupBus::new());
        let group = "user_recovery";
        let (handle, mut rx) = SessionHandle::channel();
        let session_id = handle.id;
        bus.group_add(group, handle);

        // Panic while holding every shard's write lock.
        let poisoner = Arc::clone(&bus);
        std::thread::spawn(move || {
            let _guards: Vec<_> = poisoner
                .shards
                .iter()
                .map(|shard| shard.write().unwrap())
                .collect();
            panic!("poisoning the bus");
        })
        .join()
        .unwrap_err();

        bus.group_send(group, chat_event(Uuid::new_v4(), "still alive"));
        assert!(rx.try_recv().is_ok());

        bus.group_discard(group, session_id);
        assert_eq!(bus.group_size(group), 0);
    }

    #[tokio::test]
    async fn discard_removes_only_the_given_session() {
        let bus = GroupBus::new();
        let group = "user_test";

        let (a, _rx_a) = SessionHandle::channel();
        let (b, mut rx_b) = SessionHandle::channel();
        let a_id = a.id;
        bus.group_add(group, a);
        bus.group_add(group, b);

        bus.group_discard(group, a_id);
        assert_eq!(bus.group_size(group), 1);

        bus.group_send(group, chat_event(Uuid::new_v4(), "to b"));
        assert!(rx_b.try_recv().is_ok());
    }
}
