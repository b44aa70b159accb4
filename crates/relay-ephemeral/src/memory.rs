use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::store::{EphemeralStore, Result};

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process ephemeral store. Expiry is enforced lazily on read, so a key
/// past its TTL is indistinguishable from an absent one.
#[derive(Default)]
pub struct MemoryEphemeral {
    values: DashMap<String, Entry>,
    sets: DashMap<String, HashSet<String>>,
    windows: DashMap<String, Vec<DateTime<Utc>>>,
}

impl MemoryEphemeral {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EphemeralStore for MemoryEphemeral {
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.and_then(|d| {
            chrono::Duration::from_std(d)
                .ok()
                .map(|d| Utc::now() + d)
        });
        self.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now();
        if let Some(entry) = self.values.get(key) {
            if !entry.expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        // drop the read guard before removing the stale entry
        self.values.remove_if(key, |_, e| e.expired(now));
        Ok(None)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }

    fn take(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now();
        match self.values.remove(key) {
            Some((_, entry)) if !entry.expired(now) => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        self.sets.remove_if(key, |_, set| set.is_empty());
        Ok(())
    }

    fn set_members(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn count_in_window(&self, key: &str, window: Duration) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut events = self.windows.entry(key.to_string()).or_default();
        events.retain(|ts| *ts > cutoff);
        events.push(now);
        Ok(events.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let store = MemoryEphemeral::new();
        store.set("k", "v", None).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let store = MemoryEphemeral::new();
        store.set("k", "v", Some(Duration::ZERO)).unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn take_is_single_use() {
        let store = MemoryEphemeral::new();
        store.set("reset", "user-1", None).unwrap();
        assert_eq!(store.take("reset").unwrap().as_deref(), Some("user-1"));
        assert_eq!(store.take("reset").unwrap(), None);
        assert_eq!(store.get("reset").unwrap(), None);
    }

    #[test]
    fn take_honors_expiry() {
        let store = MemoryEphemeral::new();
        store.set("reset", "user-1", Some(Duration::ZERO)).unwrap();
        assert_eq!(store.take("reset").unwrap(), None);
    }

    #[test]
    fn set_membership() {
        let store = MemoryEphemeral::new();
        store.set_add("sessions", "c1").unwrap();
        store.set_add("sessions", "c2").unwrap();
        store.set_add("sessions", "c1").unwrap(); // idempotent
        let mut members = store.set_members("sessions").unwrap();
        members.sort();
        assert_eq!(members, vec!["c1", "c2"]);

        store.set_remove("sessions", "c1").unwrap();
        assert_eq!(store.set_members("sessions").unwrap(), vec!["c2"]);
    }

    #[test]
    fn window_counter_counts_inside_window() {
        let store = MemoryEphemeral::new();
        let hour = Duration::from_secs(3600);
        for expected in 1..=6 {
            assert_eq!(store.count_in_window("rate:a@x", hour).unwrap(), expected);
        }
    }

    #[test]
    fn window_counter_is_per_key() {
        let store = MemoryEphemeral::new();
        let hour = Duration::from_secs(3600);
        assert_eq!(store.count_in_window("rate:a@x", hour).unwrap(), 1);
        assert_eq!(store.count_in_window("rate:b@x", hour).unwrap(), 1);
    }
}
