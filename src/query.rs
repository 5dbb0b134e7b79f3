//! Query scorer (spec §4.6) — the glue between full-text relevance and
//! PageRank, and this crate's only consumer-facing surface.
//!
//! Grounded on `original_source/backend/search_api/main.py`'s `/search`
//! handler: cache lookup, `_apply_pagerank_boost`, `_log_query`. This crate
//! does not ship the HTTP layer itself (out of scope, see SPEC_FULL.md §1);
//! `QueryScorer` is the library call a façade binary would wrap in a route.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{KvError, MetadataError, StoreError};
use crate::fulltext::{FieldBoosts, FullTextStore};
use crate::kv::KvStore;
use crate::metadata::{MetadataStore, QueryLog};
use crate::pagerank;

/// Weight given to full-text relevance vs. PageRank in the blended score
/// (spec §4.6: `0.7 * ft_score + 0.3 * pagerank * 100`).
const FT_WEIGHT: f64 = 0.7;
const PAGERANK_WEIGHT: f64 = 0.3;
const PAGERANK_SCALE: f64 = 100.0;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScoredHit {
    pub url: String,
    pub title: String,
    pub description: String,
    pub score: f64,
    /// Query-term-highlighted excerpt (spec §4.6, §6).
    pub snippet: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueryResponse {
    pub hits: Vec<ScoredHit>,
    pub total: usize,
    pub cache_hit: bool,
}

pub struct QueryScorer {
    fulltext: Arc<dyn FullTextStore>,
    kv: Arc<dyn KvStore>,
    metadata: Arc<dyn MetadataStore>,
    cache_ttl: Duration,
}

impl QueryScorer {
    pub fn new(fulltext: Arc<dyn FullTextStore>, kv: Arc<dyn KvStore>, metadata: Arc<dyn MetadataStore>, config: &Config) -> Self {
        Self {
            fulltext,
            kv,
            metadata,
            cache_ttl: Duration::from_secs(config.cache_ttl),
        }
    }

    fn cache_key(query: &str, page: usize, size: usize) -> String {
        let digest = md5::compute(format!("{query}:{page}:{size}").as_bytes());
        format!("query_cache:{:x}", digest)
    }

    /// Runs a search, blending full-text relevance with cached PageRank
    /// scores, and returns results sorted by the blended score descending.
    /// Best-effort cache read/write and query logging: failures there are
    /// logged and swallowed rather than surfaced (spec §7).
    pub async fn search(&self, query: &str, page: usize, size: usize) -> Result<QueryResponse, QueryError> {
        let started = Instant::now();
        let key = Self::cache_key(query, page, size);

        if let Ok(Some(cached)) = self.kv.get(&key).await {
            if let Ok(response) = serde_json::from_str::<QueryResponse>(&cached) {
                self.log_best_effort(query, response.hits.len(), started, true).await;
                return Ok(QueryResponse {
                    cache_hit: true,
                    ..response
                });
            }
        }

        let from = page.saturating_sub(1).saturating_mul(size);
        let results = self
            .fulltext
            .multi_match(query, &FieldBoosts::default(), from, size)
            .await?;

        let mut hits = Vec::with_capacity(results.hits.len());
        for hit in results.hits {
            let boosted_score = match pagerank::lookup_score(&*self.kv, &hit.url).await {
                Ok(Some(rank)) => FT_WEIGHT * hit.score as f64 + PAGERANK_WEIGHT * rank * PAGERANK_SCALE,
                _ => hit.score as f64,
            };
            hits.push(ScoredHit {
                url: hit.url,
                title: hit.title,
                description: hit.description,
                score: boosted_score,
                snippet: hit.snippet,
            });
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

        let response = QueryResponse {
            total: results.total,
            hits,
            cache_hit: false,
        };

        if let Ok(serialized) = serde_json::to_string(&response) {
            let _ = self.kv.setex(&key, self.cache_ttl, &serialized).await;
        }

        self.log_best_effort(query, response.hits.len(), started, false).await;
        Ok(response)
    }

    async fn log_best_effort(&self, query: &str, results_count: usize, started: Instant, cache_hit: bool) {
        let entry = QueryLog {
            query: query.to_string(),
            results_count,
            response_time_ms: started.elapsed().as_millis() as u64,
            cache_hit,
            queried_at: chrono::Utc::now(),
        };
        if let Err(e) = self.metadata.log_query(entry).await {
            tracing::warn!(error = %e, "failed to log query");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulltext::{IndexedDocument, TantivyFullTextStore};
    use crate::kv::MemoryKv;
    use crate::metadata::MemoryMetadataStore;
    use crate::url_canon;

    fn doc(id: &str, url: &str, title: &str) -> IndexedDocument {
        IndexedDocument {
            id: id.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            description: String::new(),
            content: "rust programming".to_string(),
            domain: "example.com".to_string(),
            crawled_at: chrono::Utc::now(),
            indexed_at: chrono::Utc::now(),
            word_count: 2,
        }
    }

    #[tokio::test]
    async fn higher_pagerank_wins_tie_in_full_text_score() {
        let fulltext = Arc::new(TantivyFullTextStore::in_memory().unwrap());
        fulltext
            .bulk_upsert(vec![
                doc("a", "https://example.com/a", "rust programming guide"),
                doc("b", "https://example.com/b", "rust programming guide"),
            ])
            .await
            .unwrap();

        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let fp_b = url_canon::fingerprint_prefix16("https://example.com/b");
        kv.setex(&format!("pagerank:{fp_b}"), Duration::from_secs(60), "0.9")
            .await
            .unwrap();

        let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
        let scorer = QueryScorer::new(fulltext, kv, metadata, &Config::default());
        let response = scorer.search("rust", 1, 10).await.unwrap();
        assert_eq!(response.hits.first().unwrap().url, "https://example.com/b");
    }

    #[tokio::test]
    async fn second_identical_query_is_served_from_cache() {
        let fulltext = Arc::new(TantivyFullTextStore::in_memory().unwrap());
        fulltext.upsert_document(doc("a", "https://example.com/a", "rust")).await.unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
        let scorer = QueryScorer::new(fulltext, kv, metadata, &Config::default());

        let first = scorer.search("rust", 1, 10).await.unwrap();
        assert!(!first.cache_hit);
        let second = scorer.search("rust", 1, 10).await.unwrap();
        assert!(second.cache_hit);
    }

    #[tokio::test]
    async fn query_is_logged_even_on_cache_hit() {
        let fulltext = Arc::new(TantivyFullTextStore::in_memory().unwrap());
        fulltext.upsert_document(doc("a", "https://example.com/a", "rust")).await.unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let scorer = QueryScorer::new(fulltext, kv, metadata.clone(), &Config::default());

        scorer.search("rust", 1, 10).await.unwrap();
        scorer.search("rust", 1, 10).await.unwrap();
        assert_eq!(metadata.query_log_count().await, 2);
    }
}
