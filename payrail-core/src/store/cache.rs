use crate::entities::AccountSnapshot;
use crate::error::StoreError;
use crate::ports::{AccountDirectory, Cache};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// In-process cache with a per-entry time to live.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, (V, Instant)>>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> TtlCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<K, V> Cache<K, V> for TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: K, value: V, ttl: Duration) {
        self.entries.lock().insert(key, (value, Instant::now() + ttl));
    }

    async fn invalidate(&self, key: &K) {
        self.entries.lock().remove(key);
    }
}

/// Account lookups through an injected cache.
pub struct CachedAccountDirectory {
    inner: Arc<dyn AccountDirectory>,
    cache: Arc<dyn Cache<Uuid, AccountSnapshot>>,
    ttl: Duration,
}

impl CachedAccountDirectory {
    pub fn new(
        inner: Arc<dyn AccountDirectory>,
        cache: Arc<dyn Cache<Uuid, AccountSnapshot>>,
        ttl: Duration,
    ) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait]
impl AccountDirectory for CachedAccountDirectory {
    async fn get_account(&self, account_id: Uuid) -> Result<Option<AccountSnapshot>, StoreError> {
        if let Some(hit) = self.cache.get(&account_id).await {
            return Ok(Some(hit));
        }
        let account = self.inner.get_account(account_id).await?;
        if let Some(account) = &account {
            self.cache.put(account_id, account.clone(), self.ttl).await;
        }
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::AccountStatus;
    use crate::store::memory::InMemoryAccountDirectory;
    use time::OffsetDateTime;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = TtlCache::new();
        cache.put("k", 1, Duration::from_secs(10)).await;
        assert_eq!(cache.get(&"k").await, Some(1));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get(&"k").await, None);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = TtlCache::new();
        cache.put(1u8, "v", Duration::from_secs(60)).await;
        cache.invalidate(&1).await;
        assert_eq!(cache.get(&1).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_directory_hits_backend_once_per_ttl() {
        let backend = Arc::new(InMemoryAccountDirectory::default());
        let account = AccountSnapshot {
            account_id: Uuid::new_v4(),
            status: AccountStatus::Active,
            created_at: OffsetDateTime::now_utc(),
        };
        backend.upsert(account.clone()).await;
        let directory =
            CachedAccountDirectory::new(backend.clone(), Arc::new(TtlCache::new()), Duration::from_secs(30));

        for _ in 0..3 {
            assert_eq!(directory.get_account(account.account_id).await.unwrap(), Some(account.clone()));
        }
        assert_eq!(backend.lookups(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        directory.get_account(account.account_id).await.unwrap();
        assert_eq!(backend.lookups(), 2);
    }

    #[tokio::test]
    async fn test_missing_accounts_are_not_cached() {
        let backend = Arc::new(InMemoryAccountDirectory::default());
        let directory =
            CachedAccountDirectory::new(backend.clone(), Arc::new(TtlCache::new()), Duration::from_secs(30));
        let id = Uuid::new_v4();
        assert_eq!(directory.get_account(id).await.unwrap(), None);
        assert_eq!(directory.get_account(id).await.unwrap(), None);
        assert_eq!(backend.lookups(), 2);
    }
}
