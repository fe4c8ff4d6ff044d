//! Versioned config store with change notification.
//!
//! Holds the hot-reloadable part of the configuration (the risk policy).
//! Readers take a cheap snapshot per operation; a reload swaps the value and
//! bumps the version so watchers can react without polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, RwLockReadGuard, watch};

pub struct ConfigStore<T> {
    inner: Arc<ConfigStoreInner<T>>,
}

struct ConfigStoreInner<T> {
    data: RwLock<T>,
    version: AtomicU64,
    version_tx: watch::Sender<u64>,
}

/// Receives notifications when a [`ConfigStore`] is updated.
pub struct ConfigWatcher {
    version_rx: watch::Receiver<u64>,
}

impl<T> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(ConfigStoreInner {
                data: RwLock::new(initial),
                version: AtomicU64::new(0),
                version_tx,
            }),
        }
    }

    /// Replace the stored value and notify all watchers. Returns the new version.
    pub async fn update(&self, value: T) -> u64 {
        let mut guard = self.inner.data.write().await;
        *guard = value;
        let new_version = self.inner.version.fetch_add(1, Ordering::Relaxed) + 1;
        drop(guard);
        self.inner.version_tx.send_replace(new_version);
        new_version
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.data.read().await
    }

    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> ConfigWatcher {
        ConfigWatcher {
            version_rx: self.inner.version_tx.subscribe(),
        }
    }
}

impl<T: Clone> ConfigStore<T> {
    /// Clone of the current value, so no lock is held across awaits.
    pub async fn snapshot(&self) -> T {
        self.inner.data.read().await.clone()
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConfigWatcher {
    /// Wait until the store is updated. `Err` once the store is dropped.
    pub async fn changed(&mut self) -> Result<u64, watch::error::RecvError> {
        self.version_rx.changed().await?;
        Ok(*self.version_rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskPolicy;

    #[tokio::test]
    async fn test_update_notifies_watchers() {
        let store = ConfigStore::new(RiskPolicy::default());
        let mut watcher = store.subscribe();

        let stricter = RiskPolicy {
            block_above: 50,
            ..RiskPolicy::default()
        };
        assert_eq!(store.update(stricter.clone()).await, 1);

        assert_eq!(watcher.changed().await.unwrap(), 1);
        assert_eq!(store.snapshot().await, stricter);
        assert_eq!(store.version(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = ConfigStore::new(RiskPolicy::default());
        let other = store.clone();
        other
            .update(RiskPolicy {
                review_above: 10,
                ..RiskPolicy::default()
            })
            .await;
        assert_eq!(store.read().await.review_above, 10);
    }
}
