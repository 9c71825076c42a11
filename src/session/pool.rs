//! Reuse of connected sessions across runs.
//!
//! Checkout, checkin and the idle sweep all take the same lock, so the
//! reaper can never pick a session that is checked out.

use super::SessionHandle;
use crate::config::PoolConfig;
use crate::host::HostId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct PoolEntry {
    handle: SessionHandle,
    checkouts: usize,
    last_used: Instant,
}

pub struct SessionPool {
    entries: Mutex<HashMap<HostId, PoolEntry>>,
    config: PoolConfig,
}

impl SessionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Register a connected session, returning any session it replaces.
    pub fn insert(&self, handle: SessionHandle) -> Option<SessionHandle> {
        let entry = PoolEntry {
            handle: handle.clone(),
            checkouts: 0,
            last_used: Instant::now(),
        };
        self.entries
            .lock()
            .insert(handle.host_id().to_string(), entry)
            .map(|old| old.handle)
    }

    /// Borrow the session for `host_id`. Dead sessions are dropped instead.
    pub fn checkout(self: &Arc<Self>, host_id: &str) -> Option<PoolLease> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(host_id)?;
        if !entry.handle.is_alive() {
            debug!(host = %host_id, "dropping dead pooled session");
            entries.remove(host_id);
            return None;
        }
        entry.checkouts += 1;
        entry.last_used = Instant::now();
        Some(PoolLease {
            handle: entry.handle.clone(),
            pool: Arc::clone(self),
        })
    }

    fn checkin(&self, host_id: &str) {
        if let Some(entry) = self.entries.lock().get_mut(host_id) {
            entry.checkouts = entry.checkouts.saturating_sub(1);
            entry.last_used = Instant::now();
        }
    }

    pub fn remove(&self, host_id: &str) -> Option<SessionHandle> {
        self.entries.lock().remove(host_id).map(|entry| entry.handle)
    }

    pub fn contains(&self, host_id: &str) -> bool {
        self.entries.lock().contains_key(host_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove and return every session idle for at least `idle` with no
    /// outstanding checkout.
    pub fn take_idle(&self, idle: Duration) -> Vec<SessionHandle> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<HostId> = entries
            .iter()
            .filter(|(_, e)| {
                e.checkouts == 0 && (now.duration_since(e.last_used) >= idle || !e.handle.is_alive())
            })
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| entries.remove(id))
            .map(|entry| entry.handle)
            .collect()
    }

    /// Close sessions idle longer than the configured threshold.
    pub async fn reap_idle(&self) -> usize {
        let reclaimed = self.take_idle(self.config.idle_reclaim());
        for handle in &reclaimed {
            info!(host = %handle.host_id(), "reclaiming idle session");
            handle.close().await;
        }
        reclaimed.len()
    }

    /// Run [`reap_idle`](Self::reap_idle) every reap interval until `shutdown`.
    pub fn spawn_reaper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.reap_interval());
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        pool.reap_idle().await;
                    }
                }
            }
        })
    }

    /// Close and forget every pooled session.
    pub async fn close_all(&self) {
        let handles: Vec<SessionHandle> = self.entries.lock().drain().map(|(_, e)| e.handle).collect();
        for handle in handles {
            handle.close().await;
        }
    }
}

/// A checked-out session. Checked back in when dropped.
pub struct PoolLease {
    handle: SessionHandle,
    pool: Arc<SessionPool>,
}

impl Deref for PoolLease {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.pool.checkin(self.handle.host_id());
    }
}
