//! 租约调度器
//!
//! 每个 (group, type) 一条 FIFO 队列。每个 tick 先 drain（为队首需求分配空闲
//! 资源），再 sweep（激活已满足的租约并启动到期监视器）。对账任务以更低频率
//! 释放不再被任何存活租约引用的资源。
//!
//! Lock order: `lease_lock`, then the store. The queue lock is only held
//! inside [`LeaseQueues`] calls and never while touching the store.

pub mod queue;
pub mod watcher;

pub use queue::{LeaseQueues, PendingReq, QueueKey};
pub use watcher::ExpiryWatchers;

use crate::models::{
    factory::LEASE, ActivityState, Lease, LeaseState, ModelError, Resource, GROUP_LABEL,
};
use crate::repository::{filter::matches, Axis, Store, StoreError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("lease not found: {0}")]
    NotFound(String),

    #[error("lease {0} is already released")]
    AlreadyReleased(String),
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// drain + sweep 周期
    pub tick_interval: Duration,
    /// 对账周期
    pub reconcile_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            reconcile_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    core: Arc<Core>,
}

struct Core {
    store: Arc<dyn Store>,
    queues: LeaseQueues,
    watchers: ExpiryWatchers,
    /// 串行化租约记录的读-改-写
    lease_lock: Mutex<()>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, config: SchedulerConfig, shutdown: CancellationToken) -> Self {
        Self {
            core: Arc::new(Core {
                store,
                queues: LeaseQueues::new(),
                watchers: ExpiryWatchers::new(shutdown.child_token()),
                lease_lock: Mutex::new(()),
                config,
                shutdown,
            }),
        }
    }

    /// Persists a new lease and enqueues each of its requirements.
    pub fn submit(&self, mut lease: Lease) -> Result<Lease, SchedulerError> {
        for req in &mut lease.request {
            req.resources.clear();
        }
        lease.activation_time = None;
        lease.released_at = None;
        lease.status.state = ActivityState::Inactive;

        {
            let _guard = self.core.lock_leases();
            self.core.store.create(Resource::Lease(lease.clone()))?;
        }
        self.core.enqueue(&lease);

        info!(
            lease_id = %lease.id(),
            owner = %lease.owner(),
            requirements = lease.request.len(),
            "lease submitted"
        );
        Ok(lease)
    }

    /// Releases a lease early. Assigned resources go back to the free pool
    /// and a running expiry watcher is woken.
    pub fn cancel(&self, lease_id: &str) -> Result<Lease, SchedulerError> {
        let lease = {
            let _guard = self.core.lock_leases();
            let mut lease = self.core.load_lease(lease_id)?;
            if lease.released_at.is_some() {
                return Err(SchedulerError::AlreadyReleased(lease_id.to_string()));
            }
            self.core.release(&mut lease, Utc::now())?;
            lease
        };
        self.core.watchers.cancel(lease_id);

        info!(lease_id = %lease_id, "lease cancelled");
        Ok(lease)
    }

    /// One scheduling round: drain every queue, then activate what is
    /// satisfied. Returns `(assigned, activated)`.
    pub fn tick(&self) -> (usize, usize) {
        let assigned = self.drain();
        let activated = self.sweep();
        (assigned, activated)
    }

    /// 单次遍历所有队列；返回本轮分配的资源数
    pub fn drain(&self) -> usize {
        let mut assigned = 0;
        for key in self.core.queues.keys() {
            match self.core.drain_key(&key) {
                Ok(n) => assigned += n,
                Err(e) => warn!(key = %key, error = %e, "drain failed, will retry next tick"),
            }
        }
        if assigned > 0 {
            metrics::counter!("resources_assigned_total").increment(assigned as u64);
        }
        assigned
    }

    /// Activates every pending, satisfied lease.
    pub fn sweep(&self) -> usize {
        let _guard = self.core.lock_leases();
        let now = Utc::now();
        let mut activated = 0;

        for resource in self.core.store.query_type(&[LEASE.to_string()]).into_resources() {
            let Resource::Lease(mut lease) = resource else {
                continue;
            };
            if !lease.is_pending() || !lease.is_satisfied() {
                continue;
            }
            if let Err(e) = lease.activate(now) {
                warn!(lease_id = %lease.id(), error = %e, "activation rejected");
                continue;
            }
            if let Err(e) = self.core.store.create(Resource::Lease(lease.clone())) {
                error!(lease_id = %lease.id(), error = %e, "failed to persist activated lease");
                continue;
            }

            info!(
                lease_id = %lease.id(),
                owner = %lease.owner(),
                expires_at = ?lease.expires_at(),
                "lease activated"
            );
            metrics::counter!("lease_activations_total").increment(1);
            self.watch(&lease, now);
            activated += 1;
        }
        activated
    }

    /// Expires stale active leases and frees leased resources that no live
    /// lease references. Returns the number of resources freed.
    pub fn reconcile(&self) -> usize {
        let _guard = self.core.lock_leases();
        let now = Utc::now();
        let mut live_ids = HashSet::new();

        for resource in self.core.store.query_type(&[LEASE.to_string()]).into_resources() {
            let Resource::Lease(mut lease) = resource else {
                continue;
            };
            if lease.activation_time.is_some() && lease.released_at.is_none() && lease.is_expired(now) {
                warn!(lease_id = %lease.id(), "expiring lease missed by its watcher");
                self.core.watchers.cancel(lease.id());
                if let Err(e) = self.core.release(&mut lease, now) {
                    error!(lease_id = %lease.id(), error = %e, "failed to expire lease");
                }
                continue;
            }
            if lease.is_live(now) {
                live_ids.extend(lease.assigned_ids());
            }
        }

        let orphaned: Vec<String> = self
            .core
            .store
            .query()
            .iter()
            .filter(|r| r.status().lease == LeaseState::Leased && !live_ids.contains(r.id()))
            .map(|r| r.id().to_string())
            .collect();
        if orphaned.is_empty() {
            return 0;
        }

        match self.core.store.free_resources(&orphaned) {
            Ok(()) => {
                info!(count = orphaned.len(), "reconciliation freed orphaned resources");
                metrics::counter!("resources_reclaimed_total").increment(orphaned.len() as u64);
                orphaned.len()
            }
            Err(e) => {
                error!(error = %e, "reconciliation failed to free resources");
                0
            }
        }
    }

    /// Rebuilds in-memory state from the store after a restart: pending
    /// leases are re-enqueued in creation order and active leases get
    /// their watchers back. Returns the number of leases recovered.
    pub fn recover(&self) -> usize {
        let now = Utc::now();
        let mut leases: Vec<Lease> = self
            .core
            .store
            .query_type(&[LEASE.to_string()])
            .into_resources()
            .filter_map(|r| match r {
                Resource::Lease(lease) => Some(lease),
                _ => None,
            })
            .collect();
        leases.sort_by_key(|l| l.meta.created);

        let mut recovered = 0;
        for mut lease in leases {
            if lease.is_pending() {
                self.core.enqueue(&lease);
                recovered += 1;
            } else if lease.released_at.is_none() {
                if lease.is_expired(now) {
                    let _guard = self.core.lock_leases();
                    if let Err(e) = self.core.release(&mut lease, now) {
                        error!(lease_id = %lease.id(), error = %e, "failed to expire lease during recovery");
                    }
                } else {
                    self.watch(&lease, now);
                }
                recovered += 1;
            }
        }

        info!(recovered, queued = self.core.queues.len(), "scheduler state recovered");
        recovered
    }

    /// Drives tick and reconcile on their intervals until shutdown.
    pub fn spawn(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        let shutdown = self.core.shutdown.clone();
        let config = self.core.config;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(config.tick_interval);
            let mut reconcile = tokio::time::interval(config.reconcile_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                tick_ms = config.tick_interval.as_millis() as u64,
                reconcile_secs = config.reconcile_interval.as_secs(),
                "scheduler started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        let s = scheduler.clone();
                        match tokio::task::spawn_blocking(move || s.tick()).await {
                            Ok((assigned, activated)) if assigned + activated > 0 => {
                                debug!(assigned, activated, "scheduler tick");
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "scheduler tick panicked"),
                        }
                    }
                    _ = reconcile.tick() => {
                        let s = scheduler.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || s.reconcile()).await {
                            error!(error = %e, "reconciliation panicked");
                        }
                    }
                }
            }
            info!("scheduler stopped");
        })
    }

    /// Requirements still waiting in queues.
    pub fn queued(&self) -> usize {
        self.core.queues.len()
    }

    pub fn is_watching(&self, lease_id: &str) -> bool {
        self.core.watchers.is_watching(lease_id)
    }

    fn watch(&self, lease: &Lease, now: DateTime<Utc>) {
        let Some(deadline) = lease.expires_at() else {
            return;
        };
        let wait = (deadline - now).to_std().unwrap_or(Duration::ZERO);
        let core = self.core.clone();
        let lease_id = lease.id().to_string();
        self.core.watchers.spawn(lease.id(), wait, move || {
            core.expire(&lease_id);
        });
    }
}

impl Core {
    fn lock_leases(&self) -> MutexGuard<'_, ()> {
        self.lease_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, lease: &Lease) {
        for (index, req) in lease.request.iter().enumerate() {
            if req.is_satisfied() {
                continue;
            }
            let key = QueueKey::new(&req.group, &req.kind);
            debug!(lease_id = %lease.id(), key = %key, index, "requirement enqueued");
            self.queues.push(
                key,
                PendingReq {
                    lease_id: lease.id().to_string(),
                    index,
                    owner: lease.owner().to_string(),
                    filters: req.filters.clone().unwrap_or_default(),
                },
            );
        }
    }

    fn load_lease(&self, lease_id: &str) -> Result<Lease, SchedulerError> {
        match self.store.get(lease_id) {
            Some(Resource::Lease(lease)) => Ok(lease),
            _ => Err(SchedulerError::NotFound(lease_id.to_string())),
        }
    }

    /// Deactivates and persists. Caller holds `lease_lock`.
    fn release(&self, lease: &mut Lease, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        let freed = lease.deactivate(self.store.as_ref(), now)?;
        self.store.create(Resource::Lease(lease.clone()))?;
        if !freed.is_empty() {
            metrics::counter!("resources_reclaimed_total").increment(freed.len() as u64);
        }
        debug!(lease_id = %lease.id(), freed = freed.len(), "lease released");
        Ok(())
    }

    fn expire(&self, lease_id: &str) {
        let _guard = self.lock_leases();
        let mut lease = match self.load_lease(lease_id) {
            Ok(lease) => lease,
            Err(_) => return,
        };
        if lease.released_at.is_some() {
            return;
        }

        match self.release(&mut lease, Utc::now()) {
            Ok(()) => {
                info!(lease_id = %lease_id, owner = %lease.owner(), "lease expired");
                metrics::counter!("lease_expirations_total").increment(1);
            }
            Err(e) => error!(lease_id = %lease_id, error = %e, "failed to expire lease"),
        }
    }

    /// Serves the head of one queue until it is empty or the head cannot be
    /// fully satisfied from the current free pool. Strict FIFO: a later
    /// requirement never overtakes an unsatisfied head.
    fn drain_key(&self, key: &QueueKey) -> Result<usize, SchedulerError> {
        let mut assigned = 0;

        while let Some(head) = self.queues.peek(key) {
            let _guard = self.lock_leases();

            let mut lease = match self.load_lease(&head.lease_id) {
                Ok(lease) if lease.is_pending() => lease,
                _ => {
                    debug!(lease_id = %head.lease_id, key = %key, "discarding stale requirement");
                    self.queues.pop_if(key, &head);
                    continue;
                }
            };
            let Some(req) = lease.request.get_mut(head.index) else {
                self.queues.pop_if(key, &head);
                continue;
            };
            if req.is_satisfied() {
                self.queues.pop_if(key, &head);
                continue;
            }

            let pool = self.store.query_type(&[key.kind.clone()]);
            let candidates = pool.iter().filter(|r| {
                r.status().is_free()
                    && r.meta().labels.get(GROUP_LABEL) == Some(&key.group)
                    && head.filters.iter().all(|q| matches(Axis::Label, q, r))
            });

            let mut claimed = Vec::new();
            let mut failure = None;
            for candidate in candidates {
                if req.is_satisfied() {
                    break;
                }
                match self.store.acquire(candidate.id(), &head.owner) {
                    Ok(Some(resource)) => {
                        claimed.push(resource.id().to_string());
                        req.assign(resource);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            let satisfied = req.is_satisfied();

            let persisted = match failure {
                Some(e) => Err(e),
                None if claimed.is_empty() => Ok(()),
                None => self.store.create(Resource::Lease(lease.clone())),
            };
            if let Err(e) = persisted {
                // 分配回滚：资源保持空闲，下个 tick 重试
                if let Err(free_err) = self.store.free_resources(&claimed) {
                    error!(error = %free_err, "failed to roll back assignment");
                }
                return Err(e.into());
            }

            if !claimed.is_empty() {
                debug!(
                    lease_id = %lease.id(),
                    key = %key,
                    count = claimed.len(),
                    "resources assigned"
                );
                assigned += claimed.len();
            }

            if !satisfied {
                break;
            }
            self.queues.pop_if(key, &head);
        }

        Ok(assigned)
    }
}
