use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Semaphore};
use tracing::info;

use crate::errors::ServerError;

/// Bounds the number of concurrently accepted TCP clients and tracks who is
/// currently connected, for the `/stats` endpoint and for logging.
#[derive(Debug)]
pub struct ConnectionManager {
    semaphore: Arc<Semaphore>,
    clients: Mutex<HashSet<SocketAddr>>,
    total_accepted: AtomicU64,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    start_time: Instant,
}

impl ConnectionManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_clients)),
            clients: Mutex::new(HashSet::new()),
            total_accepted: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Tries to admit a new client, failing immediately if `max_clients` is
    /// already reached rather than queuing the connection.
    pub async fn accept(self: &Arc<Self>, addr: SocketAddr) -> Result<ConnectionGuard, ServerError> {
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| ServerError::client(addr, "max_clients limit reached"))?;

        self.clients.lock().await.insert(addr);
        self.total_accepted.fetch_add(1, Ordering::Relaxed);

        Ok(ConnectionGuard {
            manager: Arc::clone(self),
            addr,
            _permit: permit,
        })
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Average requests per second since this manager was created (i.e.
    /// since the owning server was constructed).
    pub fn requests_per_second(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed) as f64;
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            total / elapsed
        } else {
            0.0
        }
    }

    pub async fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            active_clients: self.clients.lock().await.len(),
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            requests_per_second: self.requests_per_second(),
        }
    }

    async fn remove(&self, addr: SocketAddr) {
        self.clients.lock().await.remove(&addr);
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ConnectionStats {
    pub active_clients: usize,
    pub total_accepted: u64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub requests_per_second: f64,
}

/// RAII handle releasing its slot (and removing the client from the
/// active-client set) on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    manager: Arc<ConnectionManager>,
    addr: SocketAddr,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl ConnectionGuard {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let manager = Arc::clone(&self.manager);
        let addr = self.addr;
        tokio::spawn(async move {
            manager.remove(addr).await;
            info!(%addr, "client disconnected");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_limit_then_rejects() {
        let manager = Arc::new(ConnectionManager::new(1));
        let addr1: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let addr2: SocketAddr = "127.0.0.1:2".parse().unwrap();

        let guard = manager.accept(addr1).await.unwrap();
        assert_eq!(manager.client_count().await, 1);
        assert!(manager.accept(addr2).await.is_err());

        drop(guard);
        // Drop spawns an async cleanup task; give it a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(manager.accept(addr2).await.is_ok());
    }

    #[tokio::test]
    async fn stats_reflect_recorded_activity() {
        let manager = Arc::new(ConnectionManager::new(4));
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let _guard = manager.accept(addr).await.unwrap();
        manager.record_request();
        manager.record_request();
        manager.record_error();

        let stats = manager.stats().await;
        assert_eq!(stats.active_clients, 1);
        assert_eq!(stats.total_accepted, 1);
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.total_errors, 1);
        assert!(stats.requests_per_second > 0.0);
    }

    #[tokio::test]
    async fn requests_per_second_is_zero_with_no_traffic() {
        let manager = ConnectionManager::new(4);
        assert_eq!(manager.requests_per_second(), 0.0);
    }
}
