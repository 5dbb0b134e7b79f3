//! Indexer component (spec §4.4, C2).
//!
//! Replaces the teacher's `Indexer` trait/`IndexerService` (`indexer.rs`,
//! a thin gRPC-facing delegate) with the real consumer loop described in
//! `original_source/backend/indexer_service/indexer.py`'s `Indexer` class:
//! drain the `queue:indexing` KV list, build an [`crate::fulltext::IndexedDocument`],
//! bulk-submit to the full-text store, and upsert the page's metadata row.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{KvError, MetadataError, StoreError};
use crate::fetched_page::FetchedPage;
use crate::fulltext::{FullTextStore, IndexedDocument};
use crate::kv::KvStore;
use crate::metadata::{MetadataStore, PageMetadataRow};
use crate::tokenize;
use crate::url_canon;

const QUEUE_KEY: &str = "queue:indexing";
const BLPOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("malformed queue payload: {0}")]
    Malformed(String),
}

/// Running totals surfaced at shutdown (SPEC_FULL.md's added operator
/// visibility, mirroring `indexer.py::_print_stats`).
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexerStats {
    pub pages_indexed: u64,
    pub errors: u64,
}

/// Outcome of one [`Indexer::process_batch`] call: how many dequeued records
/// were successfully indexed versus dropped as malformed. A malformed record
/// is counted and skipped, never allowed to abort the rest of an
/// already-dequeued batch (spec §4.4, §7).
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchOutcome {
    pub indexed: usize,
    pub dropped: usize,
}

pub struct Indexer {
    kv: Arc<dyn KvStore>,
    fulltext: Arc<dyn FullTextStore>,
    metadata: Arc<dyn MetadataStore>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        kv: Arc<dyn KvStore>,
        fulltext: Arc<dyn FullTextStore>,
        metadata: Arc<dyn MetadataStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            kv,
            fulltext,
            metadata,
            batch_size,
        }
    }

    fn build_document(&self, page: &FetchedPage) -> Result<IndexedDocument, IndexerError> {
        let canonical = url_canon::canonicalize(&page.url)
            .ok_or_else(|| IndexerError::Malformed(format!("uncanonicalizable url: {}", page.url)))?;
        let id = url_canon::fingerprint(&canonical);
        Ok(IndexedDocument {
            id,
            url: canonical,
            title: page.title.clone(),
            description: page.description.clone(),
            content: tokenize::preprocess(&page.content),
            domain: page.domain.clone(),
            crawled_at: page.crawled_at,
            indexed_at: chrono::Utc::now(),
            word_count: tokenize::word_count(&page.content) as u64,
        })
    }

    async fn index_one(&self, page: FetchedPage) -> Result<(), IndexerError> {
        let document = self.build_document(&page)?;
        let id = document.id.clone();
        let url = document.url.clone();
        let title = document.title.clone();
        let content_length = document.word_count;
        let domain = page.domain.clone();
        let crawled_at = page.crawled_at;

        self.fulltext.upsert_document(document).await?;
        self.metadata
            .upsert_page(PageMetadataRow {
                id,
                url,
                title,
                domain,
                status: "indexed".to_string(),
                crawled_at,
                indexed_at: Some(chrono::Utc::now()),
                content_length,
            })
            .await?;
        Ok(())
    }

    /// Processes one queue entry, blocking up to 5 seconds for work (spec
    /// §4.4's one-at-a-time mode). Returns `Ok(false)` on an empty queue
    /// (caller should stop or retry later), `Ok(true)` after indexing one
    /// page.
    pub async fn process_one(&self) -> Result<bool, IndexerError> {
        let Some(raw) = self.kv.blpop(QUEUE_KEY, BLPOP_TIMEOUT).await? else {
            return Ok(false);
        };
        let page: FetchedPage =
            serde_json::from_str(&raw).map_err(|e| IndexerError::Malformed(e.to_string()))?;
        self.index_one(page).await?;
        Ok(true)
    }

    /// Drains up to `batch_size` entries without blocking and bulk-submits
    /// them in one full-text-store round trip (spec §4.4's batch mode). A
    /// record that fails to decode is dropped and counted rather than
    /// aborting the whole call — one bad record must never discard the
    /// other already-dequeued, valid pages in the batch (spec §4.4, §7).
    pub async fn process_batch(&self) -> Result<BatchOutcome, IndexerError> {
        let mut pages = Vec::new();
        let mut dropped = 0usize;
        for _ in 0..self.batch_size {
            match self.kv.lpop(QUEUE_KEY).await? {
                Some(raw) => match serde_json::from_str::<FetchedPage>(&raw) {
                    Ok(page) => pages.push(page),
                    Err(e) => {
                        dropped += 1;
                        tracing::warn!(error = %e, raw = %raw, "dropping malformed queue record");
                    }
                },
                None => break,
            }
        }
        if pages.is_empty() {
            return Ok(BatchOutcome { indexed: 0, dropped });
        }

        let mut docs = Vec::with_capacity(pages.len());
        let mut rows = Vec::with_capacity(pages.len());
        for page in &pages {
            let document = self.build_document(page)?;
            rows.push(PageMetadataRow {
                id: document.id.clone(),
                url: document.url.clone(),
                title: document.title.clone(),
                domain: page.domain.clone(),
                status: "indexed".to_string(),
                crawled_at: page.crawled_at,
                indexed_at: Some(chrono::Utc::now()),
                content_length: document.word_count,
            });
            docs.push(document);
        }

        let indexed = docs.len();
        self.fulltext.bulk_upsert(docs).await?;
        for row in rows {
            self.metadata.upsert_page(row).await?;
        }
        Ok(BatchOutcome { indexed, dropped })
    }

    /// Runs the batch consumer loop until `queue:indexing` stays empty for
    /// one full poll, accumulating [`IndexerStats`] along the way.
    pub async fn run_until_drained(&self) -> Result<IndexerStats, IndexerError> {
        let mut stats = IndexerStats::default();
        loop {
            match self.process_batch().await {
                Ok(BatchOutcome { indexed: 0, dropped: 0 }) => break,
                Ok(outcome) => {
                    stats.pages_indexed += outcome.indexed as u64;
                    stats.errors += outcome.dropped as u64;
                }
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(error = %e, "failed to index batch");
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulltext::{FieldBoosts, TantivyFullTextStore};
    use crate::kv::MemoryKv;
    use crate::metadata::MemoryMetadataStore;

    fn sample_page(url: &str) -> FetchedPage {
        FetchedPage {
            url: url.to_string(),
            title: "Rust Programming".to_string(),
            description: "A page about rust".to_string(),
            content: "Rust is a systems programming language".to_string(),
            links: vec![],
            crawled_at: chrono::Utc::now(),
            worker_id: "w0".to_string(),
            http_status: 200,
            content_length: 6,
            domain: "example.com".to_string(),
        }
    }

    fn setup() -> (Indexer, Arc<dyn KvStore>, Arc<TantivyFullTextStore>, Arc<MemoryMetadataStore>) {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let fulltext = Arc::new(TantivyFullTextStore::in_memory().unwrap());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let indexer = Indexer::new(kv.clone(), fulltext.clone(), metadata.clone(), 50);
        (indexer, kv, fulltext, metadata)
    }

    #[tokio::test]
    async fn process_batch_indexes_and_upserts_metadata() {
        let (indexer, kv, fulltext, metadata) = setup();
        let page = sample_page("https://example.com/a");
        kv.rpush("queue:indexing", &serde_json::to_string(&page).unwrap())
            .await
            .unwrap();

        let outcome = indexer.process_batch().await.unwrap();
        assert_eq!(outcome.indexed, 1);
        assert_eq!(outcome.dropped, 0);
        assert_eq!(metadata.all_page_ids().await.unwrap().len(), 1);

        let results = fulltext
            .multi_match("rust", &FieldBoosts::default(), 0, 10)
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 1);
    }

    #[tokio::test]
    async fn empty_queue_returns_zero() {
        let (indexer, _kv, _f, _m) = setup();
        let outcome = indexer.process_batch().await.unwrap();
        assert_eq!(outcome.indexed, 0);
        assert_eq!(outcome.dropped, 0);
    }

    #[tokio::test]
    async fn malformed_record_is_dropped_without_losing_the_rest_of_the_batch() {
        let (indexer, kv, fulltext, metadata) = setup();
        kv.rpush("queue:indexing", "not valid json").await.unwrap();
        let good = sample_page("https://example.com/a");
        kv.rpush("queue:indexing", &serde_json::to_string(&good).unwrap()).await.unwrap();

        let outcome = indexer.process_batch().await.unwrap();
        assert_eq!(outcome.indexed, 1);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(metadata.all_page_ids().await.unwrap().len(), 1);

        let results = fulltext.multi_match("rust", &FieldBoosts::default(), 0, 10).await.unwrap();
        assert_eq!(results.hits.len(), 1);
    }

    #[tokio::test]
    async fn process_one_indexes_a_single_queued_record() {
        let (indexer, kv, fulltext, metadata) = setup();
        let page = sample_page("https://example.com/a");
        kv.rpush("queue:indexing", &serde_json::to_string(&page).unwrap()).await.unwrap();

        let indexed = indexer.process_one().await.unwrap();
        assert!(indexed);
        assert_eq!(metadata.all_page_ids().await.unwrap().len(), 1);

        let results = fulltext.multi_match("rust", &FieldBoosts::default(), 0, 10).await.unwrap();
        assert_eq!(results.hits.len(), 1);
    }

    #[tokio::test]
    async fn reindexing_same_url_updates_rather_than_duplicates() {
        let (indexer, kv, fulltext, metadata) = setup();
        let page = sample_page("https://example.com/a");
        kv.rpush("queue:indexing", &serde_json::to_string(&page).unwrap()).await.unwrap();
        indexer.process_batch().await.unwrap();

        let mut updated = sample_page("https://example.com/a");
        updated.title = "Updated title".to_string();
        kv.rpush("queue:indexing", &serde_json::to_string(&updated).unwrap()).await.unwrap();
        indexer.process_batch().await.unwrap();

        assert_eq!(metadata.all_page_ids().await.unwrap().len(), 1);
        let results = fulltext
            .multi_match("updated", &FieldBoosts::default(), 0, 10)
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 1);
    }
}
