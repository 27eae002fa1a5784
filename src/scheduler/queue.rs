//! 按 (group, type) 分桶的 FIFO 需求队列

use crate::models::Query;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueKey {
    pub group: String,
    pub kind: String,
}

impl QueueKey {
    pub fn new(group: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            kind: kind.to_string(),
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.kind)
    }
}

/// 队列中的一条需求：指向租约中第 `index` 个 ResourceReq
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReq {
    pub lease_id: String,
    pub index: usize,
    pub owner: String,
    pub filters: Vec<Query>,
}

/// 队列表。锁只在单次队列操作内持有，调用方不得在持锁期间访问存储
#[derive(Debug, Default)]
pub struct LeaseQueues {
    inner: Mutex<BTreeMap<QueueKey, VecDeque<PendingReq>>>,
}

impl LeaseQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, key: QueueKey, req: PendingReq) {
        let mut queues = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        queues.entry(key).or_default().push_back(req);
    }

    pub fn peek(&self, key: &QueueKey) -> Option<PendingReq> {
        let queues = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        queues.get(key).and_then(|q| q.front().cloned())
    }

    /// Pops the head only if it is still `expected`.
    pub fn pop_if(&self, key: &QueueKey, expected: &PendingReq) -> bool {
        let mut queues = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(queue) = queues.get_mut(key) else {
            return false;
        };
        if queue.front() != Some(expected) {
            return false;
        }
        queue.pop_front();
        if queue.is_empty() {
            queues.remove(key);
        }
        true
    }

    /// Keys with at least one queued requirement.
    pub fn keys(&self) -> Vec<QueueKey> {
        let queues = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Total queued requirements.
    pub fn len(&self) -> usize {
        let queues = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(lease: &str, index: usize) -> PendingReq {
        PendingReq {
            lease_id: lease.to_string(),
            index,
            owner: "u@x".to_string(),
            filters: Vec::new(),
        }
    }

    #[test]
    fn test_fifo_per_key() {
        let queues = LeaseQueues::new();
        let key = QueueKey::new("sj14", "compute.server");
        queues.push(key.clone(), req("a", 0));
        queues.push(key.clone(), req("b", 0));
        queues.push(QueueKey::new("sj18", "compute.vm"), req("a", 1));

        assert_eq!(queues.len(), 3);
        assert_eq!(queues.peek(&key).unwrap().lease_id, "a");
        assert!(queues.pop_if(&key, &req("a", 0)));
        assert_eq!(queues.peek(&key).unwrap().lease_id, "b");
    }

    #[test]
    fn test_pop_if_checks_head() {
        let queues = LeaseQueues::new();
        let key = QueueKey::new("g", "t");
        queues.push(key.clone(), req("a", 0));
        assert!(!queues.pop_if(&key, &req("b", 0)));
        assert!(queues.pop_if(&key, &req("a", 0)));
        assert!(queues.keys().is_empty());
        assert!(!queues.pop_if(&key, &req("a", 0)));
    }
}
