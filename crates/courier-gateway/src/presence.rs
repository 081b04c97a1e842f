//! Online/offline tracking.
//!
//! A user is online while at least one of their connections is alive and has
//! sent a heartbeat within the TTL. Connections are gateway sockets or the
//! HTTP announce endpoint, which shares the fixed [`ANNOUNCE_CONNECTION`] id.
//! State is in memory only and starts empty on every process start.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use courier_types::events::{RelayEvent, Topic};

use crate::relay::EventRelay;

/// Connection id used by HTTP presence announcements.
pub const ANNOUNCE_CONNECTION: Uuid = Uuid::nil();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Offline,
    Online,
}

struct PresenceEntry {
    connections: HashSet<Uuid>,
    last_seen: Instant,
}

#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<RwLock<HashMap<Uuid, PresenceEntry>>>,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a live connection. Returns true on the offline → online edge.
    pub async fn connect(&self, user_id: Uuid, connection_id: Uuid) -> bool {
        self.connect_at(user_id, connection_id, Instant::now()).await
    }

    pub async fn connect_at(&self, user_id: Uuid, connection_id: Uuid, now: Instant) -> bool {
        let mut users = self.inner.write().await;
        match users.get_mut(&user_id) {
            Some(entry) => {
                entry.connections.insert(connection_id);
                entry.last_seen = now;
                false
            }
            None => {
                users.insert(
                    user_id,
                    PresenceEntry {
                        connections: HashSet::from([connection_id]),
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Refresh the heartbeat. A connection whose user was expired is
    /// re-registered, so this also returns true on the offline → online edge.
    pub async fn touch(&self, user_id: Uuid, connection_id: Uuid) -> bool {
        self.connect(user_id, connection_id).await
    }

    /// Drop a connection. Returns true on the online → offline edge.
    pub async fn disconnect(&self, user_id: Uuid, connection_id: Uuid) -> bool {
        let mut users = self.inner.write().await;
        let Some(entry) = users.get_mut(&user_id) else {
            return false;
        };
        entry.connections.remove(&connection_id);
        if entry.connections.is_empty() {
            users.remove(&user_id);
            true
        } else {
            false
        }
    }

    /// Demote every user whose last heartbeat is older than the TTL.
    pub async fn expire(&self, now: Instant) -> Vec<Uuid> {
        let mut users = self.inner.write().await;
        let stale: Vec<Uuid> = users
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) > self.ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            users.remove(id);
        }
        stale
    }

    pub async fn state(&self, user_id: Uuid) -> PresenceState {
        if self.inner.read().await.contains_key(&user_id) {
            PresenceState::Online
        } else {
            PresenceState::Offline
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.state(user_id).await == PresenceState::Online
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.read().await.keys().copied().collect()
    }
}

/// Register or refresh a connection and announce the user if they just came
/// online.
pub async fn announce_online(
    tracker: &PresenceTracker,
    relay: &dyn EventRelay,
    user_id: Uuid,
    connection_id: Uuid,
) {
    if tracker.touch(user_id, connection_id).await {
        info!("{} is online", user_id);
        publish_presence(relay, RelayEvent::UserOnline { user_id }).await;
    }
}

/// Drop a connection and announce the user if it was their last one.
pub async fn announce_offline(
    tracker: &PresenceTracker,
    relay: &dyn EventRelay,
    user_id: Uuid,
    connection_id: Uuid,
) {
    if tracker.disconnect(user_id, connection_id).await {
        info!("{} is offline", user_id);
        publish_presence(relay, RelayEvent::UserOffline { user_id }).await;
    }
}

async fn publish_presence(relay: &dyn EventRelay, event: RelayEvent) {
    if let Err(e) = relay.publish(Topic::Presence, event).await {
        warn!("Presence publish failed: {}", e);
    }
}

/// Background task that demotes users whose heartbeats stopped.
pub async fn run_expiry_loop(
    tracker: PresenceTracker,
    relay: Arc<dyn EventRelay>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        let expired = tracker.expire(Instant::now()).await;
        if !expired.is_empty() {
            info!("Presence: expired {} silent users", expired.len());
        }
        for user_id in expired {
            publish_presence(relay.as_ref(), RelayEvent::UserOffline { user_id }).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn online_until_last_connection_leaves() {
        let tracker = PresenceTracker::new(TTL);
        let user = Uuid::new_v4();
        let (phone, laptop) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(tracker.state(user).await, PresenceState::Offline);
        assert!(tracker.connect(user, phone).await);
        assert!(!tracker.connect(user, laptop).await);
        assert!(tracker.is_online(user).await);

        assert!(!tracker.disconnect(user, phone).await);
        assert!(tracker.is_online(user).await);
        assert!(tracker.disconnect(user, laptop).await);
        assert!(!tracker.is_online(user).await);

        // Repeated disconnect is not a second transition
        assert!(!tracker.disconnect(user, laptop).await);
    }

    #[tokio::test]
    async fn expire_demotes_silent_users_only() {
        let tracker = PresenceTracker::new(TTL);
        let start = Instant::now();
        let (quiet, chatty) = (Uuid::new_v4(), Uuid::new_v4());

        tracker.connect_at(quiet, Uuid::new_v4(), start).await;
        tracker.connect_at(chatty, ANNOUNCE_CONNECTION, start).await;
        tracker
            .connect_at(chatty, ANNOUNCE_CONNECTION, start + Duration::from_secs(50))
            .await;

        assert!(tracker.expire(start + Duration::from_secs(30)).await.is_empty());

        let expired = tracker.expire(start + Duration::from_secs(61)).await;
        assert_eq!(expired, vec![quiet]);
        assert!(!tracker.is_online(quiet).await);
        assert_eq!(tracker.online_users().await, vec![chatty]);
    }

    #[tokio::test]
    async fn announcements_publish_only_on_edges() {
        let tracker = PresenceTracker::new(TTL);
        let dispatcher = Dispatcher::new();
        let (watcher, mut rx) = dispatcher.connect().await;
        dispatcher.subscribe(watcher, Topic::Presence).await;

        let user = Uuid::new_v4();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());
        announce_online(&tracker, &dispatcher, user, c1).await;
        announce_online(&tracker, &dispatcher, user, c2).await;
        announce_offline(&tracker, &dispatcher, user, c1).await;
        announce_offline(&tracker, &dispatcher, user, c2).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.envelope.event, RelayEvent::UserOnline { user_id: user });
        let second = rx.recv().await.unwrap();
        assert_eq!(second.envelope.event, RelayEvent::UserOffline { user_id: user });
        assert!(rx.try_recv().is_err());
    }
}
