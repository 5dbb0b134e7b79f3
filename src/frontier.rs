//! URL frontier (spec §3, §4.1).
//!
//! A priority queue of URLs backed by the KV store's sorted set, exactly as
//! the KV contract in spec §6 calls for: lower priority score dispatches
//! first. Like the bloom filter, frontier state lives only in the KV store
//! (spec §9) so workers can restart and scale without coordinating
//! in-process.

use std::sync::Arc;
use url::Url;

use crate::error::KvError;
use crate::kv::KvStore;

const FRONTIER_KEY: &str = "crawler:frontier";

/// Computes dispatch priority for a discovered URL (spec §3):
/// `p = max(0, 10*depth + 0.5*pathSegments - 5*[path is "" or "/"] - [scheme is https])`.
/// Lower values are dispatched earlier.
pub fn calculate_priority(url: &Url, depth: u32) -> f32 {
    let path = url.path();
    let path_segments = path.split('/').filter(|s| !s.is_empty()).count() as f32;

    let mut priority = 10.0 * depth as f32 + 0.5 * path_segments;
    if path.is_empty() || path == "/" {
        priority -= 5.0;
    }
    if url.scheme() == "https" {
        priority -= 1.0;
    }
    priority.max(0.0)
}

/// Priority queue of URLs awaiting fetch, backed by [`KvStore`]'s sorted
/// set primitive.
pub struct Frontier {
    kv: Arc<dyn KvStore>,
    key: String,
}

impl Frontier {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            key: FRONTIER_KEY.to_string(),
        }
    }

    /// Inserts one URL. Seed URLs should be pushed at priority `0.0`.
    pub async fn push(&self, url: &str, priority: f32) -> Result<(), KvError> {
        self.kv.zadd(&self.key, &[(url.to_string(), priority as f64)]).await
    }

    /// Inserts many URLs in a single atomic KV call.
    pub async fn push_many(&self, urls: &[(String, f32)]) -> Result<(), KvError> {
        if urls.is_empty() {
            return Ok(());
        }
        let members: Vec<(String, f64)> = urls.iter().map(|(u, p)| (u.clone(), *p as f64)).collect();
        self.kv.zadd(&self.key, &members).await
    }

    /// Pops the single lowest-priority entry, or `None` if the frontier is
    /// empty. Ties are broken by the KV store's internal ordering
    /// (implementation-defined; spec §4.1 says tests must not depend on it
    /// against the real store — see [`crate::kv::MemoryKv`] for the
    /// deterministic test-only tie-break).
    pub async fn pop(&self) -> Result<Option<String>, KvError> {
        let top = self.kv.zrange(&self.key, 0, 0).await?;
        let Some(url) = top.into_iter().next() else {
            return Ok(None);
        };
        self.kv.zrem(&self.key, &[url.clone()]).await?;
        Ok(Some(url))
    }

    /// Pops up to `n` lowest-priority entries atomically.
    pub async fn pop_batch(&self, n: usize) -> Result<Vec<String>, KvError> {
        if n == 0 {
            return Ok(vec![]);
        }
        let entries = self.kv.zrange(&self.key, 0, n as isize - 1).await?;
        if !entries.is_empty() {
            self.kv.zrem(&self.key, &entries).await?;
        }
        Ok(entries)
    }

    pub async fn size(&self) -> Result<u64, KvError> {
        self.kv.zcard(&self.key).await
    }

    pub async fn clear(&self) -> Result<(), KvError> {
        self.kv.del(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn priority_is_never_negative() {
        for depth in 0..5 {
            for url in ["https://a.test/", "http://a.test/x/y/z", "https://a.test/a/b/c/d"] {
                assert!(calculate_priority(&u(url), depth) >= 0.0);
            }
        }
    }

    #[test]
    fn root_path_and_https_reduce_priority() {
        let root_https = calculate_priority(&u("https://a.test/"), 0);
        let deep_http = calculate_priority(&u("http://a.test/a/b/c"), 0);
        assert!(root_https < deep_http);
    }

    #[tokio::test]
    async fn pop_returns_lower_priority_first() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let frontier = Frontier::new(kv);
        frontier.push("https://a/", 0.0).await.unwrap();
        frontier.push("https://b/page/deep/x", 30.5).await.unwrap();
        assert_eq!(frontier.pop().await.unwrap().as_deref(), Some("https://a/"));
        assert_eq!(
            frontier.pop().await.unwrap().as_deref(),
            Some("https://b/page/deep/x")
        );
        assert_eq!(frontier.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn pop_batch_is_atomic_and_ordered() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let frontier = Frontier::new(kv);
        frontier
            .push_many(&[
                ("https://a/".into(), 2.0),
                ("https://b/".into(), 0.0),
                ("https://c/".into(), 1.0),
            ])
            .await
            .unwrap();
        let batch = frontier.pop_batch(2).await.unwrap();
        assert_eq!(batch, vec!["https://b/".to_string(), "https://c/".to_string()]);
        assert_eq!(frontier.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_empties_frontier() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let frontier = Frontier::new(kv);
        frontier.push("https://a/", 0.0).await.unwrap();
        frontier.clear().await.unwrap();
        assert_eq!(frontier.size().await.unwrap(), 0);
    }
}
