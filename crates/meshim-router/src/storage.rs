use async_trait::async_trait;
use dashmap::DashMap;
use meshim_packet::{Location, Session};
use tracing::debug;

use crate::error::{Result, RouterError};

/// Where logged-in sessions and account locations are kept.
///
/// Lookups of unknown keys fail with [`RouterError::SessionNotFound`].
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Store `session` and point its account's location at it.
    async fn add(&self, session: &Session) -> Result<()>;

    /// Drop the session of `channel_id` and the location of `account`.
    async fn delete(&self, account: &str, channel_id: &str) -> Result<()>;

    async fn get(&self, channel_id: &str) -> Result<Session>;

    /// Locations of every listed account that is online. Fails when none is.
    async fn get_locations(&self, accounts: &[String]) -> Result<Vec<Location>>;

    /// Location of `account` on `device`; an empty device means any.
    async fn get_location(&self, account: &str, device: &str) -> Result<Location>;
}

fn location_key(account: &str, device: &str) -> String {
    if device.is_empty() {
        format!("login:loc:{account}")
    } else {
        format!("login:loc:{account}:{device}")
    }
}

/// Process-local [`SessionStorage`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    sessions: DashMap<String, Session>,
    locations: DashMap<String, Location>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn add(&self, session: &Session) -> Result<()> {
        let location = Location::new(session.channel_id.clone(), session.gate_id.clone());
        self.locations
            .insert(location_key(&session.account, ""), location);
        self.sessions
            .insert(session.channel_id.clone(), session.clone());
        debug!(account = %session.account, channel = %session.channel_id, "session added");
        Ok(())
    }

    async fn delete(&self, account: &str, channel_id: &str) -> Result<()> {
        // A replaced connection signing out must not erase its successor.
        self.locations
            .remove_if(&location_key(account, ""), |_, loc| loc.channel_id == channel_id);
        self.sessions.remove(channel_id);
        Ok(())
    }

    async fn get(&self, channel_id: &str) -> Result<Session> {
        self.sessions
            .get(channel_id)
            .map(|entry| entry.value().clone())
            .ok_or(RouterError::SessionNotFound)
    }

    async fn get_locations(&self, accounts: &[String]) -> Result<Vec<Location>> {
        let locations: Vec<Location> = accounts
            .iter()
            .filter_map(|account| {
                self.locations
                    .get(&location_key(account, ""))
                    .map(|entry| entry.value().clone())
            })
            .collect();
        if locations.is_empty() {
            return Err(RouterError::SessionNotFound);
        }
        Ok(locations)
    }

    async fn get_location(&self, account: &str, device: &str) -> Result<Location> {
        self.locations
            .get(&location_key(account, device))
            .map(|entry| entry.value().clone())
            .ok_or(RouterError::SessionNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(account: &str, channel: &str) -> Session {
        Session {
            channel_id: channel.to_string(),
            gate_id: "gate-1".to_string(),
            account: account.to_string(),
            ..Session::default()
        }
    }

    #[tokio::test]
    async fn add_then_lookup_by_channel_and_account() {
        let storage = MemoryStorage::new();
        storage
            .add(&session("alice", "gate-1_alice_1"))
            .await
            .expect("add should succeed");

        let found = storage.get("gate-1_alice_1").await.expect("session should exist");
        assert_eq!(found.account, "alice");
        let loc = storage
            .get_location("alice", "")
            .await
            .expect("location should exist");
        assert_eq!(loc, Location::new("gate-1_alice_1", "gate-1"));
    }

    #[tokio::test]
    async fn unknown_keys_are_session_not_found() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.get("nope").await,
            Err(RouterError::SessionNotFound)
        ));
        assert!(matches!(
            storage.get_location("nobody", "").await,
            Err(RouterError::SessionNotFound)
        ));
        assert!(matches!(
            storage.get_locations(&["nobody".to_string()]).await,
            Err(RouterError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn get_locations_skips_offline_accounts() {
        let storage = MemoryStorage::new();
        storage.add(&session("alice", "c1")).await.expect("add should succeed");
        storage.add(&session("bob", "c2")).await.expect("add should succeed");

        let locations = storage
            .get_locations(&["alice".to_string(), "carol".to_string(), "bob".to_string()])
            .await
            .expect("two accounts are online");
        let channels: Vec<_> = locations.iter().map(|l| l.channel_id.as_str()).collect();
        assert_eq!(channels, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn stale_logout_keeps_newer_location() {
        let storage = MemoryStorage::new();
        storage.add(&session("alice", "old")).await.expect("add should succeed");
        storage.add(&session("alice", "new")).await.expect("add should succeed");

        storage.delete("alice", "old").await.expect("delete should succeed");
        assert!(storage.get("old").await.is_err());
        let loc = storage
            .get_location("alice", "")
            .await
            .expect("newer login should remain");
        assert_eq!(loc.channel_id, "new");

        storage.delete("alice", "new").await.expect("delete should succeed");
        assert!(storage.get_location("alice", "").await.is_err());
        assert!(storage.is_empty());
    }
}
