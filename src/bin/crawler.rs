//! `crawler` binary — runs one [`search_pipeline::worker::CrawlWorker`].

use std::sync::Arc;

use clap::Parser;
use search_pipeline::config::Config;
use search_pipeline::kv::{KvStore, RedisKvStore};
use search_pipeline::metadata::{MetadataStore, PgMetadataStore};
use search_pipeline::worker::CrawlWorker;

#[derive(Parser)]
struct Args {
    #[arg(long, env = "SEARCH_PIPELINE_REDIS_URL", default_value = "redis://127.0.0.1/")]
    redis_url: String,
    #[arg(long, env = "SEARCH_PIPELINE_DATABASE_URL")]
    database_url: String,
    #[arg(long, env = "SEARCH_PIPELINE_WORKER_ID", default_value = "worker-0")]
    worker_id: String,
    #[arg(long, default_value_t = 1000)]
    max_pages: u64,
    #[arg(long, default_value_t = 5)]
    max_concurrent_requests: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let kv: Arc<dyn KvStore> = Arc::new(RedisKvStore::connect(&args.redis_url).await?);
    let metadata: Arc<dyn MetadataStore> = Arc::new(PgMetadataStore::connect(&args.database_url).await?);

    let worker = CrawlWorker::new(args.worker_id, kv, metadata, config, args.max_concurrent_requests)?;

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, finishing in-flight fetches");
        let _ = cancel_tx.send(true);
    });

    let stats = worker.run(args.max_pages, &cancel_rx).await?;
    tracing::info!(pages_crawled = stats.pages_crawled, errors = stats.errors, "crawl finished");
    Ok(())
}
