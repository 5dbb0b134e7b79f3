//! `seed` binary — operator utility that reads a newline-delimited URL list
//! and pushes it to the frontier at priority 0 (mirrors
//! `original_source/backend/shared/seed_urls.py`).

use std::sync::Arc;

use clap::Parser;
use search_pipeline::frontier::Frontier;
use search_pipeline::kv::{KvStore, RedisKvStore};
use search_pipeline::url_canon;

#[derive(Parser)]
struct Args {
    #[arg(long, env = "SEARCH_PIPELINE_REDIS_URL", default_value = "redis://127.0.0.1/")]
    redis_url: String,
    /// Path to a newline-delimited list of URLs. Reads stdin if omitted.
    #[arg(long)]
    file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let raw = match args.file {
        Some(path) => std::fs::read_to_string(path)?,
        None => std::io::read_to_string(std::io::stdin())?,
    };

    let kv: Arc<dyn KvStore> = Arc::new(RedisKvStore::connect(&args.redis_url).await?);
    let frontier = Frontier::new(kv);

    let mut seeded = 0;
    let mut skipped = 0;
    let entries: Vec<(String, f32)> = raw
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .filter_map(|l| {
            match url_canon::canonicalize(l) {
                Some(u) => {
                    seeded += 1;
                    Some((u, 0.0))
                }
                None => {
                    skipped += 1;
                    None
                }
            }
        })
        .collect();

    frontier.push_many(&entries).await?;
    tracing::info!(seeded, skipped, "seed finished");
    Ok(())
}
