//! 租约到期监视器
//! 每个活跃租约一个任务；显式释放时通过取消令牌立即唤醒

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ExpiryWatchers {
    tokens: Arc<DashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

impl ExpiryWatchers {
    /// Watchers stop (without firing) once `shutdown` is cancelled.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tokens: Arc::new(DashMap::new()),
            shutdown,
        }
    }

    /// Runs `on_expire` after `wait` unless the lease is cancelled first.
    pub fn spawn<F>(&self, lease_id: &str, wait: Duration, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.tokens.insert(lease_id.to_string(), token.clone()) {
            previous.cancel();
        }

        let tokens = self.tokens.clone();
        let lease_id = lease_id.to_string();
        debug!(lease_id = %lease_id, wait_ms = wait.as_millis() as u64, "expiry watcher started");

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    tokens.remove_if(&lease_id, |_, t| !t.is_cancelled());
                    on_expire();
                }
                _ = token.cancelled() => {
                    debug!(lease_id = %lease_id, "expiry watcher cancelled");
                }
            }
        });
    }

    /// Wakes the watcher of `lease_id` without firing it.
    pub fn cancel(&self, lease_id: &str) -> bool {
        match self.tokens.remove(lease_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, lease_id: &str) -> bool {
        self.tokens.contains_key(lease_id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
