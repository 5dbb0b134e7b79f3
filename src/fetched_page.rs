//! Wire format for a fetched page (spec §3, §6).
//!
//! This is the JSON payload the crawler pushes onto the `queue:indexing`
//! KV list and the indexer pops and consumes — the one boundary between
//! C1 (crawler) and C2 (indexer) that isn't a shared store row.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub links: Vec<String>,
    pub crawled_at: chrono::DateTime<chrono::Utc>,
    pub worker_id: String,
    pub http_status: u16,
    /// Word count of `content`, computed once at fetch time (spec §3: this
    /// field means word count, not byte length).
    pub content_length: usize,
    pub domain: String,
}
