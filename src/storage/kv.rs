use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Unsorted,
    Ascending,
    Descending,
}

/// Options for prefix reads. `limit == 0` means no limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    pub sort: SortOrder,
    pub limit: usize,
}

impl GetOptions {
    pub fn sorted(sort: SortOrder) -> Self {
        Self { sort, limit: 0 }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Key-value store contract the scheduler relies on.
///
/// Required guarantees: atomic single-key writes, read-your-writes within a
/// client, and lexicographic iteration over a prefix. `compare_and_delete`
/// is the primitive that makes queue-head removal safe under concurrent
/// dispatchers; no multi-key transactions are needed.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn delete_prefix(&self, prefix: &str) -> Result<()>;

    async fn get_prefix(&self, prefix: &str, opts: GetOptions) -> Result<Vec<(String, Vec<u8>)>>;

    async fn count_prefix(&self, prefix: &str) -> Result<usize>;

    /// Delete `key` only if its current value equals `expected`. Returns
    /// whether the delete happened. A missing key or a changed value both
    /// report `false`.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool>;
}

/// In-memory backend over a BTreeMap, which provides the lexicographic key
/// order the contract requires. Used by tests and single-process runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let mut data = self.data.write().await;
        let doomed: Vec<String> = data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            data.remove(&key);
        }
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str, opts: GetOptions) -> Result<Vec<(String, Vec<u8>)>> {
        let data = self.data.read().await;
        let mut entries: Vec<(String, Vec<u8>)> = data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        // BTreeMap range iteration is already ascending.
        if opts.sort == SortOrder::Descending {
            entries.reverse();
        }
        if opts.limit > 0 {
            entries.truncate(opts.limit);
        }
        Ok(entries)
    }

    async fn count_prefix(&self, prefix: &str) -> Result<usize> {
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .count())
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut data = self.data.write().await;
        match data.get(key) {
            Some(current) if current.as_slice() == expected => {
                data.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefix_reads_are_ordered_and_limited() {
        let kv = MemoryKv::new();
        kv.put("/q/b", b"2".to_vec()).await.unwrap();
        kv.put("/q/a", b"1".to_vec()).await.unwrap();
        kv.put("/q/c", b"3".to_vec()).await.unwrap();
        kv.put("/other", b"x".to_vec()).await.unwrap();

        let head = kv
            .get_prefix("/q/", GetOptions::sorted(SortOrder::Ascending).with_limit(1))
            .await
            .unwrap();
        assert_eq!(head.len(), 1);
        assert_eq!(head[0].0, "/q/a");

        let tail = kv
            .get_prefix("/q/", GetOptions::sorted(SortOrder::Descending).with_limit(1))
            .await
            .unwrap();
        assert_eq!(tail[0].0, "/q/c");

        assert_eq!(kv.count_prefix("/q/").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn compare_and_delete_requires_matching_value() {
        let kv = MemoryKv::new();
        kv.put("/k", b"v1".to_vec()).await.unwrap();

        assert!(!kv.compare_and_delete("/k", b"v2").await.unwrap());
        assert!(kv.get("/k").await.unwrap().is_some());

        assert!(kv.compare_and_delete("/k", b"v1").await.unwrap());
        assert!(kv.get("/k").await.unwrap().is_none());

        // Missing key is not an error, just a miss.
        assert!(!kv.compare_and_delete("/k", b"v1").await.unwrap());
    }

    #[tokio::test]
    async fn delete_prefix_leaves_siblings() {
        let kv = MemoryKv::new();
        kv.put("/a/1", b"x".to_vec()).await.unwrap();
        kv.put("/a/2", b"y".to_vec()).await.unwrap();
        kv.put("/ab", b"z".to_vec()).await.unwrap();

        kv.delete_prefix("/a/").await.unwrap();
        assert_eq!(kv.count_prefix("/a/").await.unwrap(), 0);
        assert!(kv.get("/ab").await.unwrap().is_some());
    }
}
