//! Who is online, as seen through the presence topic.

use std::collections::HashSet;

use uuid::Uuid;

use courier_types::events::RelayEvent;

#[derive(Debug, Clone, Default)]
pub struct Roster {
    online: HashSet<Uuid>,
}

impl Roster {
    pub fn reset(&mut self, online: impl IntoIterator<Item = Uuid>) {
        self.online = online.into_iter().collect();
    }

    pub fn apply(&mut self, event: &RelayEvent) -> bool {
        match event {
            RelayEvent::UserOnline { user_id } => self.online.insert(*user_id),
            RelayEvent::UserOffline { user_id } => self.online.remove(user_id),
            _ => false,
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online.contains(&user_id)
    }

    pub fn online(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.online.iter().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_online_and_offline_edges() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let mut roster = Roster::default();
        roster.reset([alice]);

        assert!(!roster.apply(&RelayEvent::UserOnline { user_id: alice }));
        assert!(roster.apply(&RelayEvent::UserOnline { user_id: bob }));
        assert!(roster.apply(&RelayEvent::UserOffline { user_id: alice }));

        assert!(!roster.is_online(alice));
        assert_eq!(roster.online(), vec![bob]);
    }
}
