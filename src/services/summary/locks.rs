//! 社区级压缩租约

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 每个社区一把 try-lock，持有一个社区的租约不会阻塞其他社区
#[derive(Default)]
pub struct CommunityLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CommunityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, community_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(community_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 租约被其他任务持有时返回 `None`
    pub fn try_acquire(&self, community_id: &str) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(community_id).try_lock_owned().ok()
    }

    pub fn is_held(&self, community_id: &str) -> bool {
        self.locks
            .get(community_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// 清理无人持有的租约
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
    }
}
