//! Tracked streaming connections (`spec.md` §4.6 "Track streaming
//! connections in a concurrent map; a periodic reaper closes connections
//! idle beyond the configured timeout").
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::generation::CancellationToken;
use crate::model::{StreamConnection, StreamStatus, now_ms};

struct Entry {
    connection: StreamConnection,
    cancel: CancellationToken,
}

/// Concurrent registry of active SSE streams, with cooperative cancellation
/// and idle reaping.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ConnectionRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream, returning its cancellation token.
    pub async fn open(&self, connection_id: String, query: String, remote_addr: Option<String>, user_agent: Option<String>) -> CancellationToken {
        let now = now_ms();
        let cancel = CancellationToken::new();
        let connection = StreamConnection {
            connection_id: connection_id.clone(),
            created_at: now,
            last_activity_at: now,
            status: StreamStatus::Active,
            remote_addr,
            user_agent,
            query,
        };
        self.entries.write().await.insert(connection_id, Entry { connection, cancel: cancel.clone() });
        cancel
    }

    /// Record activity on a stream, refreshing its idle timer.
    pub async fn touch(&self, connection_id: &str) {
        if let Some(entry) = self.entries.write().await.get_mut(connection_id) {
            entry.connection.last_activity_at = now_ms();
        }
    }

    /// Remove a stream's entry, e.g. once it has finished or been cancelled.
    pub async fn close(&self, connection_id: &str) {
        self.entries.write().await.remove(connection_id);
    }

    /// Cancel and remove a connection by id, if present.
    pub async fn cancel(&self, connection_id: &str) -> bool {
        if let Some(entry) = self.entries.write().await.remove(connection_id) {
            entry.cancel.cancel();
            true
        } else {
            false
        }
    }

    /// Snapshot every tracked connection; copy-on-read per `spec.md` §5.
    pub async fn list(&self) -> Vec<StreamConnection> {
        self.entries.read().await.values().map(|entry| entry.connection.clone()).collect()
    }

    async fn reap_once(&self, idle_timeout: Duration) {
        let cutoff = now_ms().saturating_sub(idle_timeout.as_millis() as u64);
        let mut entries = self.entries.write().await;
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.connection.last_activity_at <= cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(entry) = entries.remove(&id) {
                entry.cancel.cancel();
                tracing::info!(connection_id = id, "reaped idle stream connection");
            }
        }
    }

    /// Spawn the background idle-connection reaper.
    pub fn spawn_reaper(self: Arc<Self>, idle_timeout: Duration, check_interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            loop {
                ticker.tick().await;
                self.reap_once(idle_timeout).await;
            }
        })
    }
}

/// RAII guard over one registry entry. Freeing a stream's entry only on the
/// generator's trailing `close()` call misses a client disconnect mid-stream,
/// since Axum/Hyper simply drops the stream future without polling it to
/// completion; holding this guard for the stream's lifetime ensures the entry
/// is freed as soon as the future is dropped, even then.
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    connection_id: String,
    closed: bool,
}

impl ConnectionGuard {
    /// Hold open `connection_id`'s entry in `registry` until dropped or closed.
    pub fn new(registry: Arc<ConnectionRegistry>, connection_id: String) -> Self {
        Self { registry, connection_id, closed: false }
    }

    /// Close the entry now, so the redundant close-on-drop is skipped.
    pub async fn close(mut self) {
        self.registry.close(&self.connection_id).await;
        self.closed = true;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let registry = self.registry.clone();
        let connection_id = self.connection_id.clone();
        tokio::spawn(async move { registry.close(&connection_id).await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_then_list_then_cancel() {
        let registry = ConnectionRegistry::new();
        registry.open("conn-1".to_string(), "hello".to_string(), None, None).await;
        assert_eq!(registry.list().await.len(), 1);
        assert!(registry.cancel("conn-1").await);
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_unknown_connection_returns_false() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.cancel("missing").await);
    }

    #[tokio::test]
    async fn reaper_removes_idle_connections() {
        let registry = Arc::new(ConnectionRegistry::new());
        registry.open("conn-1".to_string(), "hello".to_string(), None, None).await;
        registry.reap_once(Duration::from_millis(0)).await;
        assert!(registry.list().await.is_empty());
    }
}
