use crate::{ConfigStore, Result};
use std::collections::HashMap;
use vhsync_schema::StoredTableConfig;

/// Stored configs already read during one request.
///
/// Create one per request and pass it down. Writers invalidate what they
/// touch; `synchronize` clears it outright.
#[derive(Debug, Default)]
pub struct ConfigCache {
    entries: HashMap<String, Option<StoredTableConfig>>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached record for `name`, read from `store` on first use.
    ///
    /// A missing record is cached too.
    pub async fn get_or_load<S: ConfigStore>(
        &mut self,
        store: &S,
        name: &str,
    ) -> Result<Option<StoredTableConfig>> {
        if let Some(hit) = self.entries.get(name) {
            return Ok(hit.clone());
        }
        let loaded = store.get(name).await?;
        self.entries.insert(name.to_string(), loaded.clone());
        Ok(loaded)
    }

    pub fn invalidate(&mut self, name: &str) {
        self.entries.remove(name);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    #[tokio::test]
    async fn test_second_read_is_cached() {
        let store = MemoryStore::with([StoredTableConfig::new("orders")]);
        let mut cache = ConfigCache::new();

        let first = cache.get_or_load(&store, "orders").await.unwrap();
        let second = cache.get_or_load(&store, "orders").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.gets(), 1);

        assert_eq!(cache.get_or_load(&store, "missing").await.unwrap(), None);
        assert_eq!(cache.get_or_load(&store, "missing").await.unwrap(), None);
        assert_eq!(store.gets(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let store = MemoryStore::with([StoredTableConfig::new("orders")]);
        let mut cache = ConfigCache::new();

        cache.get_or_load(&store, "orders").await.unwrap();
        cache.invalidate("orders");
        cache.get_or_load(&store, "orders").await.unwrap();
        assert_eq!(store.gets(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
