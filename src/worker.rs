//! Crawl worker (spec §4.1, §4.3, §5, §9, C1).
//!
//! This is the generalization SPEC_FULL.md §9 calls for: the teacher's
//! `Crawler::crawl` (`crawly.rs`) recurses in-process with a `Semaphore`
//! gating concurrency and an `IndexMap` holding robots state; here the
//! frontier pop/push loop runs against [`crate::kv::KvStore`] so state
//! survives a restart and multiple worker processes never duplicate work.
//! Bounded concurrency is kept exactly as the teacher does it — a
//! `tokio::sync::Semaphore` around the fetch step.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use url::Url;

use crate::bloom::BloomFilter;
use crate::config::Config;
use crate::error::{KvError, MetadataError};
use crate::extract;
use crate::fetch::Fetcher;
use crate::fetched_page::FetchedPage;
use crate::frontier::{calculate_priority, Frontier};
use crate::kv::KvStore;
use crate::metadata::{CrawlJob, CrawlJobStatus, LinkEdge, MetadataStore};
use crate::politeness::{Admission, Politeness};
use crate::url_canon;

const INDEXING_QUEUE_KEY: &str = "queue:indexing";
/// Hash mapping a frontier URL to the link-depth it was discovered at. The
/// sorted-set frontier itself only carries (url, priority) per spec §3/§4.1,
/// so depth travels alongside it in the KV store's hash primitive rather
/// than being threaded through the priority score, keeping the two
/// independently tunable.
const DEPTH_HASH_KEY: &str = "crawler:depth";

const RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const RETRY_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// True for KV failures worth retrying (connection/unreachable); a malformed
/// stored value is a data bug, not a transient fault, so it is not retried.
fn is_transient(e: &KvError) -> bool {
    matches!(e, KvError::Unreachable(_) | KvError::Redis(_))
}

/// Retries a frontier KV operation with exponential backoff (100ms -> 5s
/// cap) on a transient KV error, per spec §4.1: the worker retries
/// KV-unreachable failures itself rather than propagating them up and
/// killing the process. Never gives up, since `ConnectionManager`'s
/// internal reconnect doesn't cover exhausted-retry or non-reconnect errors.
async fn retry_kv<T, F, Fut>(mut op: F) -> Result<T, KvError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, KvError>>,
{
    let mut backoff = RETRY_INITIAL_BACKOFF;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if is_transient(&e) => {
                tracing::warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "kv store unreachable, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RETRY_MAX_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CrawlStats {
    pub pages_crawled: u64,
    pub pages_indexed: u64,
    pub errors: u64,
}

/// One crawler process (spec §2: "N worker processes... coordinate only
/// through the KV store and metadata store").
pub struct CrawlWorker {
    worker_id: String,
    frontier: Frontier,
    bloom: BloomFilter,
    politeness: Politeness,
    fetcher: Fetcher,
    kv: Arc<dyn KvStore>,
    metadata: Arc<dyn MetadataStore>,
    max_depth: u32,
    semaphore: Arc<Semaphore>,
}

impl CrawlWorker {
    pub fn new(
        worker_id: impl Into<String>,
        kv: Arc<dyn KvStore>,
        metadata: Arc<dyn MetadataStore>,
        config: Config,
        max_concurrent_requests: usize,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            worker_id: worker_id.into(),
            frontier: Frontier::new(kv.clone()),
            bloom: BloomFilter::new(kv.clone()),
            politeness: Politeness::new(kv.clone(), config.clone())?,
            fetcher: Fetcher::new(&config)?,
            max_depth: config.crawler_max_depth,
            kv,
            metadata,
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests)),
        })
    }

    /// Seeds the frontier with starting URLs at priority 0 (spec §4.1;
    /// mirrors `original_source/backend/shared/seed_urls.py`).
    pub async fn seed(&self, urls: &[String]) -> Result<(), WorkerError> {
        let canonical: Vec<String> = urls.iter().filter_map(|u| url_canon::canonicalize(u)).collect();
        let depths: Vec<(String, String)> = canonical.iter().map(|u| (u.clone(), "0".to_string())).collect();
        if !depths.is_empty() {
            self.kv.hset(DEPTH_HASH_KEY, &depths).await?;
        }
        let entries: Vec<(String, f32)> = canonical.into_iter().map(|u| (u, 0.0)).collect();
        retry_kv(|| self.frontier.push_many(&entries)).await?;
        Ok(())
    }

    /// Processes one URL end to end: bloom-mark, fetch, extract, publish to
    /// the indexing queue, and push newly discovered links back to the
    /// frontier. Depth is tracked via a per-URL hash field rather than
    /// threading it through the frontier's sorted-set score, so priority and
    /// depth stay independently tunable.
    async fn crawl_one(&self, canonical_url: String, depth: u32) -> Result<(), WorkerError> {
        if self.bloom.seen(&canonical_url).await? {
            return Ok(());
        }
        self.bloom.mark(&canonical_url).await?;

        let Ok(url) = Url::parse(&canonical_url) else {
            return Ok(());
        };
        if extract::should_skip(&url) {
            return Ok(());
        }

        let permit = self.semaphore.clone().acquire_owned().await;
        let admission = self.politeness.admit(&url).await?;
        if admission == Admission::Deny {
            drop(permit);
            return Ok(());
        }

        let fetched = self.fetcher.fetch(&url).await;
        drop(permit);

        let response = match fetched {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(url = %canonical_url, error = %e, "fetch failed");
                return Ok(());
            }
        };

        let extracted = extract::extract(&response.body, &response.final_url);
        let fingerprint = url_canon::fingerprint(&canonical_url);
        let domain = url.host_str().unwrap_or_default().to_string();

        let page = FetchedPage {
            url: canonical_url.clone(),
            title: extracted.title,
            description: extracted.description,
            content: extracted.content.clone(),
            links: extracted.links.clone(),
            crawled_at: chrono::Utc::now(),
            worker_id: self.worker_id.clone(),
            http_status: response.status,
            content_length: extracted.content.split_whitespace().count(),
            domain,
        };

        let payload = serde_json::to_string(&page).map_err(|e| {
            tracing::warn!(error = %e, "failed to serialize fetched page");
            WorkerError::Kv(KvError::Malformed {
                key: INDEXING_QUEUE_KEY.to_string(),
                reason: e.to_string(),
            })
        })?;
        self.kv.rpush(INDEXING_QUEUE_KEY, &payload).await?;

        let mut edges = Vec::with_capacity(extracted.links.len());
        let mut to_enqueue = Vec::new();
        let mut child_depths = Vec::new();
        for link in &extracted.links {
            edges.push(LinkEdge {
                from_id: fingerprint.clone(),
                to_id: url_canon::fingerprint(link),
            });
            if depth < self.max_depth && !self.bloom.seen(link).await? {
                if let Ok(link_url) = Url::parse(link) {
                    let child_depth = depth + 1;
                    let priority = calculate_priority(&link_url, child_depth);
                    to_enqueue.push((link.clone(), priority));
                    child_depths.push((link.clone(), child_depth.to_string()));
                }
            }
        }
        if !edges.is_empty() {
            self.metadata.insert_links(&edges).await?;
        }
        if !child_depths.is_empty() {
            self.kv.hset(DEPTH_HASH_KEY, &child_depths).await?;
        }
        if !to_enqueue.is_empty() {
            retry_kv(|| self.frontier.push_many(&to_enqueue)).await?;
        }

        Ok(())
    }

    /// Looks up the depth a frontier URL was discovered at, defaulting to 0
    /// for URLs pushed without a recorded depth (e.g. an operator pushing
    /// directly onto the frontier sorted set outside `seed`/`crawl_one`).
    async fn depth_of(&self, url: &str) -> Result<u32, WorkerError> {
        Ok(self
            .kv
            .hget(DEPTH_HASH_KEY, url)
            .await?
            .and_then(|d| d.parse::<u32>().ok())
            .unwrap_or(0))
    }

    /// Drains the frontier until empty, `max_pages` have been crawled, or
    /// `cancel` fires, recording a [`CrawlJob`] lifecycle row (SPEC_FULL.md's
    /// added operator-visible crawl job, pending -> running -> completed).
    ///
    /// `cancel` is checked only between pops (spec §5: "in-flight fetches
    /// finish but no new URL is popped"; any URL already popped when
    /// cancellation fires is processed to completion, then the loop exits —
    /// a popped-but-unprocessed URL is lost by design, at-most-once).
    pub async fn run(&self, max_pages: u64, cancel: &tokio::sync::watch::Receiver<bool>) -> Result<CrawlStats, WorkerError> {
        let job_id = uuid_like(&self.worker_id);
        self.metadata
            .insert_crawl_job(CrawlJob {
                id: job_id.clone(),
                seed_url: String::new(),
                status: CrawlJobStatus::Running,
                started_at: Some(chrono::Utc::now()),
                completed_at: None,
                pages_crawled: 0,
                pages_indexed: 0,
                errors_count: 0,
            })
            .await?;

        let mut stats = CrawlStats::default();
        while stats.pages_crawled < max_pages {
            if *cancel.borrow() {
                break;
            }
            let Some(url) = retry_kv(|| self.frontier.pop()).await? else {
                break;
            };
            let depth = self.depth_of(&url).await?;
            match self.crawl_one(url, depth).await {
                Ok(()) => stats.pages_crawled += 1,
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(error = %e, "crawl_one failed");
                }
            }
        }

        self.metadata
            .update_crawl_job(CrawlJob {
                id: job_id,
                seed_url: String::new(),
                status: CrawlJobStatus::Completed,
                started_at: None,
                completed_at: Some(chrono::Utc::now()),
                pages_crawled: stats.pages_crawled,
                pages_indexed: stats.pages_indexed,
                errors_count: stats.errors,
            })
            .await?;

        Ok(stats)
    }
}

fn uuid_like(seed: &str) -> String {
    let digest = md5::compute(format!("{seed}:{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)));
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::metadata::MemoryMetadataStore;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> Config {
        let mut c = Config::default();
        c.crawler_politeness_delay = 0.0;
        c.crawler_max_depth = 1;
        c
    }

    #[tokio::test]
    async fn retry_kv_recovers_from_transient_errors_without_propagating() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = retry_kv(|| {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(KvError::Unreachable("connection refused".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_kv_does_not_retry_malformed_data_errors() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), KvError> = retry_kv(|| {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                Err(KvError::Malformed {
                    key: "k".to_string(),
                    reason: "bad value".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn crawl_respects_max_depth() {
        let server = MockServer::start().await;
        Mock::given(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(format!(r#"<html><body><a href="{}/child">child</a></body></html>"#, server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(path("/child"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(format!(r#"<html><body><a href="{}/grandchild">gc</a></body></html>"#, server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(path("/grandchild"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html").set_body_string("<html><body>leaf</body></html>"))
            .mount(&server)
            .await;

        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let w = CrawlWorker::new("w0", kv.clone(), metadata.clone(), config(), 2).unwrap();
        w.seed(&[server.uri()]).await.unwrap();

        let (_tx, rx) = tokio::sync::watch::channel(false);
        let stats = w.run(10, &rx).await.unwrap();
        // max_depth=1: seed (depth 0) fetched, child (depth 1) fetched but
        // its link is never enqueued since depth(1) is not < max_depth(1) --
        // only frontier enqueueing is depth-gated, the child's outbound link
        // is still recorded as an edge.
        assert_eq!(stats.pages_crawled, 2);
        assert_eq!(kv.llen("queue:indexing").await.unwrap(), 2);

        // The child page (depth 1, at max_depth) still has its outbound link
        // to /grandchild recorded as an edge, even though it was never
        // enqueued onto the frontier.
        let links = metadata.all_links().await.unwrap();
        assert!(links.iter().any(|e| e.to_id == url_canon::fingerprint(&format!("{}/grandchild", server.uri()))));
    }

    #[tokio::test]
    async fn seeded_urls_are_recorded_at_depth_zero() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
        let w = CrawlWorker::new("w0", kv.clone(), metadata, config(), 2).unwrap();
        w.seed(&["https://example.com/".to_string()]).await.unwrap();
        assert_eq!(w.depth_of("https://example.com/").await.unwrap(), 0);
    }
}
