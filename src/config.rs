//! Process-wide configuration surface.
//!
//! `Config::default()` reproduces the documented defaults for every key the
//! pipeline's components read; `Config::from_env()` layers environment
//! variables (prefix `SEARCH_PIPELINE_`) on top via the `config` crate for
//! operators who want to tune a deployment without recompiling.

use serde::{Deserialize, Serialize};

pub const USER_AGENT: &str = "SearchPipelineBot/1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum gap between successive fetches to the same host.
    pub crawler_politeness_delay: f64,
    /// Link-follow depth cap; URLs discovered beyond this are not enqueued.
    pub crawler_max_depth: u32,
    /// Operator-tuned worker process count (informational; each process
    /// is launched independently, this is not consumed by the library).
    pub crawler_workers: u32,
    /// Query-result cache TTL, seconds.
    pub cache_ttl: u64,
    /// PageRank damping factor `d`.
    pub pagerank_damping: f64,
    /// PageRank iteration upper bound.
    pub pagerank_iterations: u32,
    /// Full-text index name (directory name for the embedded adapter).
    pub elasticsearch_index: String,
    /// Directory the embedded full-text index is stored under; the index
    /// itself lives at `<data_dir>/<elasticsearch_index>`.
    pub data_dir: String,
    /// Indexer batch size (§4.4 default 50).
    pub indexer_batch_size: usize,
    /// Bounded HTTP fetch budget, seconds (§4.3: total timeout 10s).
    pub fetch_timeout_secs: u64,
    /// Robots.txt fetch budget, seconds (§4.2: 5-second timeout).
    pub robots_timeout_secs: u64,
    /// Max redirects followed per fetch.
    pub max_redirects: usize,
    /// Max response body read, bytes (§4.3: 5 MiB).
    pub max_body_bytes: usize,
    /// Total HTTP connections in the pool.
    pub pool_max_total: usize,
    /// Max HTTP connections per host.
    pub pool_max_per_host: usize,
    /// Robots cache TTL, seconds (§3: 3600s).
    pub robots_cache_ttl_secs: u64,
    /// PageRank KV score TTL, seconds (§4.5: 7 days).
    pub pagerank_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler_politeness_delay: 1.0,
            crawler_max_depth: 3,
            crawler_workers: 5,
            cache_ttl: 3600,
            pagerank_damping: 0.85,
            pagerank_iterations: 20,
            elasticsearch_index: "web_pages".to_string(),
            data_dir: "./data".to_string(),
            indexer_batch_size: 50,
            fetch_timeout_secs: 10,
            robots_timeout_secs: 5,
            max_redirects: 5,
            max_body_bytes: 5 * 1024 * 1024,
            pool_max_total: 10,
            pool_max_per_host: 2,
            robots_cache_ttl_secs: 3600,
            pagerank_ttl_secs: 7 * 24 * 3600,
        }
    }
}

impl Config {
    /// Loads defaults, then overlays `SEARCH_PIPELINE_*` environment
    /// variables (e.g. `SEARCH_PIPELINE_CRAWLER_MAX_DEPTH=5`).
    pub fn from_env() -> anyhow::Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::Environment::with_prefix("SEARCH_PIPELINE"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}
