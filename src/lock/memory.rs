use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashSet;

use super::{LockProbe, LockResult};

/// In-process lock store.
///
/// Stands in for Redis in tests and local rehearsals: keys are set and
/// cleared directly instead of by the archival worker.
#[derive(Debug, Default)]
pub struct MemoryLockProbe {
    held: DashSet<String>,
    checks: AtomicU64,
}

impl MemoryLockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, key: &str) {
        self.held.insert(key.to_string());
    }

    pub fn release(&self, key: &str) {
        self.held.remove(key);
    }

    /// Number of existence checks served so far.
    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LockProbe for MemoryLockProbe {
    async fn is_held(&self, key: &str) -> LockResult<bool> {
        self.checks.fetch_add(1, Ordering::Relaxed);
        Ok(self.held.contains(key))
    }
}
