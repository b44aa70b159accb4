use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relay_core::config::{OFFLINE_GRACE_SECS, PRESENCE_TTL_SECS, SESSION_BINDING_TTL_SECS};
use relay_ephemeral::{keys, EphemeralStore, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct ConnectionHandle {
    user_id: String,
    sender: mpsc::Sender<String>,
}

/// Live sessions on this instance: conn id → outbound sender, plus the
/// three ephemeral keys (`user:server:*`, `server:sessions:*`,
/// `user:presence:*`) that make the binding visible across instances.
pub struct ConnectionManager {
    instance_id: String,
    ephemeral: Arc<dyn EphemeralStore>,
    connections: DashMap<String, ConnectionHandle>,
}

impl ConnectionManager {
    pub fn new(instance_id: impl Into<String>, ephemeral: Arc<dyn EphemeralStore>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ephemeral,
            connections: DashMap::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Record a freshly authenticated connection.
    pub fn register(
        &self,
        user_id: &str,
        conn_id: &str,
        sender: mpsc::Sender<String>,
    ) -> Result<()> {
        self.connections.insert(
            conn_id.to_string(),
            ConnectionHandle {
                user_id: user_id.to_string(),
                sender,
            },
        );

        self.ephemeral.set(
            &keys::user_server(user_id),
            &self.instance_id,
            Some(Duration::from_secs(SESSION_BINDING_TTL_SECS)),
        )?;
        self.ephemeral
            .set_add(&keys::server_sessions(&self.instance_id), conn_id)?;
        self.ephemeral.set(
            &keys::user_presence(user_id),
            "online",
            Some(Duration::from_secs(PRESENCE_TTL_SECS)),
        )?;

        info!(user_id, conn_id, instance = %self.instance_id, "connection registered");
        Ok(())
    }

    /// Re-arm the presence and binding TTLs; called on any traffic from
    /// the user, heartbeats included.
    pub fn refresh(&self, user_id: &str) -> Result<()> {
        self.ephemeral.set(
            &keys::user_presence(user_id),
            "online",
            Some(Duration::from_secs(PRESENCE_TTL_SECS)),
        )?;
        self.ephemeral.set(
            &keys::user_server(user_id),
            &self.instance_id,
            Some(Duration::from_secs(SESSION_BINDING_TTL_SECS)),
        )?;
        Ok(())
    }

    /// Drop a closed connection. The user goes offline (with a short
    /// grace TTL) only when this was their last connection here.
    pub fn unregister(&self, conn_id: &str) -> Result<()> {
        let Some((_, handle)) = self.connections.remove(conn_id) else {
            debug!(conn_id, "unregister for unknown connection");
            return Ok(());
        };

        self.ephemeral
            .set_remove(&keys::server_sessions(&self.instance_id), conn_id)?;

        let has_other = self
            .connections
            .iter()
            .any(|entry| entry.value().user_id == handle.user_id);
        if !has_other {
            self.ephemeral.delete(&keys::user_server(&handle.user_id))?;
            self.ephemeral.set(
                &keys::user_presence(&handle.user_id),
                "offline",
                Some(Duration::from_secs(OFFLINE_GRACE_SECS)),
            )?;
        }

        info!(user_id = %handle.user_id, conn_id, "connection unregistered");
        Ok(())
    }

    /// Outbound senders for every live connection of the given users on
    /// this instance. The fanout loop iterates this.
    pub fn connections_for_users(&self, user_ids: &[String]) -> Vec<(String, mpsc::Sender<String>)> {
        self.connections
            .iter()
            .filter(|entry| user_ids.iter().any(|u| u == &entry.value().user_id))
            .map(|entry| (entry.key().clone(), entry.value().sender.clone()))
            .collect()
    }

    /// Send a payload to every live connection of `user_ids`, logging and
    /// skipping per-connection failures.
    pub async fn fanout(&self, user_ids: &[String], payload: &str) -> usize {
        let targets = self.connections_for_users(user_ids);
        let mut delivered = 0;
        for (conn_id, sender) in targets {
            match sender.send(payload.to_string()).await {
                Ok(()) => delivered += 1,
                Err(_) => warn!(conn_id, "send failed, connection likely closing"),
            }
        }
        delivered
    }

    pub fn is_online(&self, user_id: &str) -> Result<bool> {
        Ok(self.ephemeral.get(&keys::user_presence(user_id))?.as_deref() == Some("online"))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_ephemeral::MemoryEphemeral;

    fn manager() -> (ConnectionManager, Arc<MemoryEphemeral>) {
        let store = Arc::new(MemoryEphemeral::new());
        (ConnectionManager::new("server-1", store.clone()), store)
    }

    #[tokio::test]
    async fn register_writes_binding_session_and_presence() {
        let (mgr, store) = manager();
        let (tx, _rx) = mpsc::channel(4);
        mgr.register("u-1", "c-1", tx).unwrap();

        assert_eq!(
            store.get(&keys::user_server("u-1")).unwrap().as_deref(),
            Some("server-1")
        );
        assert_eq!(
            store.set_members(&keys::server_sessions("server-1")).unwrap(),
            vec!["c-1"]
        );
        assert!(mgr.is_online("u-1").unwrap());
    }

    #[tokio::test]
    async fn unregister_last_connection_goes_offline() {
        let (mgr, store) = manager();
        let (tx, _rx) = mpsc::channel(4);
        mgr.register("u-1", "c-1", tx).unwrap();
        mgr.unregister("c-1").unwrap();

        assert_eq!(store.get(&keys::user_server("u-1")).unwrap(), None);
        assert_eq!(
            store.get(&keys::user_presence("u-1")).unwrap().as_deref(),
            Some("offline")
        );
        assert!(store
            .set_members(&keys::server_sessions("server-1"))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn second_connection_keeps_user_online() {
        let (mgr, _store) = manager();
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);
        mgr.register("u-1", "c-1", tx1).unwrap();
        mgr.register("u-1", "c-2", tx2).unwrap();

        mgr.unregister("c-1").unwrap();
        assert!(mgr.is_online("u-1").unwrap());
        assert_eq!(mgr.connection_count(), 1);
    }

    #[tokio::test]
    async fn fanout_reaches_only_the_named_users() {
        let (mgr, _store) = manager();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        mgr.register("u-a", "c-a", tx_a).unwrap();
        mgr.register("u-b", "c-b", tx_b).unwrap();

        let delivered = mgr.fanout(&["u-a".to_string()], "hello").await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_a.recv().await.unwrap(), "hello");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn fanout_survives_a_dead_connection() {
        let (mgr, _store) = manager();
        let (tx_a, rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        mgr.register("u-a", "c-a", tx_a).unwrap();
        mgr.register("u-b", "c-b", tx_b).unwrap();
        drop(rx_a); // u-a's socket task died

        let delivered = mgr
            .fanout(&["u-a".to_string(), "u-b".to_string()], "hello")
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_b.recv().await.unwrap(), "hello");
    }
}
