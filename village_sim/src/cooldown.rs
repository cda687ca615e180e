//! Per-actor, per-channel posting cooldowns.
//!
//! The ledger keeps the last post time in memory and writes every post
//! through to the `cooldowns` table, so a restarted engine keeps honoring
//! windows opened before the restart.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use village_schema::{ActorId, Channel};

use crate::store::{self, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub feed: Duration,
    pub chat: Duration,
    pub news: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            feed: Duration::hours(2),
            chat: Duration::minutes(30),
            news: Duration::hours(24),
        }
    }
}

impl CooldownPolicy {
    pub fn window(&self, channel: Channel) -> Duration {
        match channel {
            Channel::Feed => self.feed,
            Channel::Chat => self.chat,
            Channel::News => self.news,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CooldownLedger {
    policy: CooldownPolicy,
    last_post: HashMap<(ActorId, Channel), DateTime<Utc>>,
}

impl CooldownLedger {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            last_post: HashMap::new(),
        }
    }

    /// Loads every persisted last-post time.
    pub fn restore(conn: &Connection, policy: CooldownPolicy) -> Result<Self, StoreError> {
        let mut ledger = Self::new(policy);
        for (actor_id, channel, at) in store::load_cooldowns(conn)? {
            ledger.last_post.insert((actor_id, channel), at);
        }
        Ok(ledger)
    }

    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }

    pub fn last_post(&self, actor_id: &str, channel: Channel) -> Option<DateTime<Utc>> {
        self.last_post
            .get(&(actor_id.to_string(), channel))
            .copied()
    }

    /// True when the actor has never posted on `channel` or the window since
    /// the last post has fully elapsed.
    pub fn is_clear(&self, actor_id: &str, channel: Channel, now: DateTime<Utc>) -> bool {
        match self.last_post(actor_id, channel) {
            Some(last) => now - last >= self.policy.window(channel),
            None => true,
        }
    }

    /// Records a post in memory and in the store.
    pub fn commit(
        &mut self,
        conn: &Connection,
        actor_id: &str,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.last_post.insert((actor_id.to_string(), channel), now);
        store::upsert_cooldown(conn, actor_id, channel, now)
    }

    pub fn len(&self) -> usize {
        self.last_post.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_post.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut ledger = CooldownLedger::default();
        assert!(ledger.is_clear("npc_a", Channel::Chat, t0()));
        ledger.commit(store.conn(), "npc_a", Channel::Chat, t0()).unwrap();
        assert!(!ledger.is_clear("npc_a", Channel::Chat, t0() + Duration::minutes(29)));
        assert!(ledger.is_clear("npc_a", Channel::Chat, t0() + Duration::minutes(30)));
        // Other channels and actors are independent.
        assert!(ledger.is_clear("npc_a", Channel::Feed, t0()));
        assert!(ledger.is_clear("npc_b", Channel::Chat, t0()));
    }

    #[test]
    fn default_windows() {
        let policy = CooldownPolicy::default();
        assert_eq!(policy.window(Channel::Feed), Duration::seconds(7_200));
        assert_eq!(policy.window(Channel::Chat), Duration::seconds(1_800));
        assert_eq!(policy.window(Channel::News), Duration::seconds(86_400));
    }

    #[test]
    fn restore_survives_restart() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut ledger = CooldownLedger::default();
        ledger.commit(store.conn(), "npc_a", Channel::Feed, t0()).unwrap();

        let restored = CooldownLedger::restore(store.conn(), CooldownPolicy::default()).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.last_post("npc_a", Channel::Feed), Some(t0()));
        assert!(!restored.is_clear("npc_a", Channel::Feed, t0() + Duration::hours(1)));
    }
}
