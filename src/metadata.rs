//! Relational metadata store collaborator (spec §3, §6).
//!
//! Grounded on `original_source/backend/shared/database.py` (the relational
//! schema: `pages`, `links`, `pagerank_scores`, `crawl_jobs`, `query_logs`)
//! and `original_source/backend/shared/models.py` (the `CrawlJob` row
//! shape). No equivalent exists in the teacher, which has no relational
//! store at all — this module follows `examples/other_examples/.../
//! sumi__src-storage-traits.rs`'s pattern (a narrow trait plus a thiserror
//! enum) for how the rest of this crate defines storage boundaries, and
//! uses `sqlx` for the production adapter since it's the Postgres client
//! this pack's manifests already reach for.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::MetadataError;

#[derive(Debug, Clone)]
pub struct PageMetadataRow {
    pub id: String,
    pub url: String,
    pub title: String,
    pub domain: String,
    pub status: String,
    pub crawled_at: DateTime<Utc>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub content_length: u64,
}

#[derive(Debug, Clone)]
pub struct LinkEdge {
    pub from_id: String,
    pub to_id: String,
}

#[derive(Debug, Clone)]
pub struct PageRankScoreRow {
    pub page_id: String,
    pub url: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CrawlJobStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub id: String,
    pub seed_url: String,
    pub status: CrawlJobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pages_crawled: u64,
    pub pages_indexed: u64,
    pub errors_count: u64,
}

#[derive(Debug, Clone)]
pub struct QueryLog {
    pub query: String,
    pub results_count: usize,
    pub response_time_ms: u64,
    pub cache_hit: bool,
    pub queried_at: DateTime<Utc>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn upsert_page(&self, page: PageMetadataRow) -> Result<(), MetadataError>;
    async fn insert_links(&self, edges: &[LinkEdge]) -> Result<(), MetadataError>;
    async fn all_page_ids(&self) -> Result<Vec<String>, MetadataError>;
    /// Returns every page's (id, canonical url) pair — PageRank needs the
    /// url alongside the id to derive the KV fingerprint key it persists
    /// scores under (spec §3: reader/writer must use the same prefix).
    async fn all_page_urls(&self) -> Result<Vec<(String, String)>, MetadataError>;
    async fn all_links(&self) -> Result<Vec<LinkEdge>, MetadataError>;
    async fn replace_pagerank_scores(&self, scores: &[PageRankScoreRow]) -> Result<(), MetadataError>;

    async fn insert_crawl_job(&self, job: CrawlJob) -> Result<(), MetadataError>;
    async fn update_crawl_job(&self, job: CrawlJob) -> Result<(), MetadataError>;

    async fn log_query(&self, entry: QueryLog) -> Result<(), MetadataError>;
}

/// Production adapter over Postgres via `sqlx`.
pub struct PgMetadataStore {
    pool: sqlx::PgPool,
}

impl PgMetadataStore {
    pub async fn connect(database_url: &str) -> Result<Self, MetadataError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn upsert_page(&self, page: PageMetadataRow) -> Result<(), MetadataError> {
        sqlx::query(
            "INSERT INTO pages (id, url, title, domain, status, crawled_at, indexed_at, content_length) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
             title = EXCLUDED.title, status = EXCLUDED.status, \
             indexed_at = EXCLUDED.indexed_at, content_length = EXCLUDED.content_length",
        )
        .bind(&page.id)
        .bind(&page.url)
        .bind(&page.title)
        .bind(&page.domain)
        .bind(&page.status)
        .bind(page.crawled_at)
        .bind(page.indexed_at)
        .bind(page.content_length as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_links(&self, edges: &[LinkEdge]) -> Result<(), MetadataError> {
        for edge in edges {
            sqlx::query(
                "INSERT INTO links (from_id, to_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(&edge.from_id)
            .bind(&edge.to_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn all_page_ids(&self) -> Result<Vec<String>, MetadataError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM pages").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn all_page_urls(&self) -> Result<Vec<(String, String)>, MetadataError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT id, url FROM pages").fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn all_links(&self) -> Result<Vec<LinkEdge>, MetadataError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT from_id, to_id FROM links").fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(from_id, to_id)| LinkEdge { from_id, to_id })
            .collect())
    }

    async fn replace_pagerank_scores(&self, scores: &[PageRankScoreRow]) -> Result<(), MetadataError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("TRUNCATE pagerank_scores").execute(&mut *tx).await?;
        for score in scores {
            sqlx::query("INSERT INTO pagerank_scores (page_id, url, score) VALUES ($1, $2, $3)")
                .bind(&score.page_id)
                .bind(&score.url)
                .bind(score.score)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_crawl_job(&self, job: CrawlJob) -> Result<(), MetadataError> {
        sqlx::query(
            "INSERT INTO crawl_jobs (id, seed_url, status, started_at, completed_at, \
             pages_crawled, pages_indexed, errors_count) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&job.id)
        .bind(&job.seed_url)
        .bind(job.status.as_str())
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.pages_crawled as i64)
        .bind(job.pages_indexed as i64)
        .bind(job.errors_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_crawl_job(&self, job: CrawlJob) -> Result<(), MetadataError> {
        sqlx::query(
            "UPDATE crawl_jobs SET status = $2, completed_at = $3, pages_crawled = $4, \
             pages_indexed = $5, errors_count = $6 WHERE id = $1",
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(job.completed_at)
        .bind(job.pages_crawled as i64)
        .bind(job.pages_indexed as i64)
        .bind(job.errors_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn log_query(&self, entry: QueryLog) -> Result<(), MetadataError> {
        sqlx::query(
            "INSERT INTO query_logs (query, results_count, response_time_ms, cache_hit, queried_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&entry.query)
        .bind(entry.results_count as i64)
        .bind(entry.response_time_ms as i64)
        .bind(entry.cache_hit)
        .bind(entry.queried_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    pages: HashMap<String, PageMetadataRow>,
    links: Vec<LinkEdge>,
    pagerank_scores: Vec<PageRankScoreRow>,
    crawl_jobs: HashMap<String, CrawlJob>,
    query_logs: Vec<QueryLog>,
}

/// In-memory [`MetadataStore`] used by the test suite (spec §8).
#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn query_log_count(&self) -> usize {
        self.state.lock().await.query_logs.len()
    }

    pub async fn crawl_job(&self, id: &str) -> Option<CrawlJob> {
        self.state.lock().await.crawl_jobs.get(id).cloned()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn upsert_page(&self, mut page: PageMetadataRow) -> Result<(), MetadataError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.pages.get(&page.id) {
            // Mirrors `PgMetadataStore`'s `ON CONFLICT (id) DO UPDATE`: title,
            // status, indexed_at and content_length advance, crawled_at is
            // the first-seen timestamp and is never overwritten by a re-index.
            page.crawled_at = existing.crawled_at;
        }
        state.pages.insert(page.id.clone(), page);
        Ok(())
    }

    async fn insert_links(&self, edges: &[LinkEdge]) -> Result<(), MetadataError> {
        self.state.lock().await.links.extend_from_slice(edges);
        Ok(())
    }

    async fn all_page_ids(&self) -> Result<Vec<String>, MetadataError> {
        Ok(self.state.lock().await.pages.keys().cloned().collect())
    }

    async fn all_page_urls(&self) -> Result<Vec<(String, String)>, MetadataError> {
        Ok(self
            .state
            .lock()
            .await
            .pages
            .values()
            .map(|p| (p.id.clone(), p.url.clone()))
            .collect())
    }

    async fn all_links(&self) -> Result<Vec<LinkEdge>, MetadataError> {
        Ok(self.state.lock().await.links.clone())
    }

    async fn replace_pagerank_scores(&self, scores: &[PageRankScoreRow]) -> Result<(), MetadataError> {
        self.state.lock().await.pagerank_scores = scores.to_vec();
        Ok(())
    }

    async fn insert_crawl_job(&self, job: CrawlJob) -> Result<(), MetadataError> {
        self.state.lock().await.crawl_jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn update_crawl_job(&self, job: CrawlJob) -> Result<(), MetadataError> {
        self.state.lock().await.crawl_jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn log_query(&self, entry: QueryLog) -> Result<(), MetadataError> {
        self.state.lock().await.query_logs.push(entry);
        Ok(())
    }
}
