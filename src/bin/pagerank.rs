//! `pagerank` binary — runs one `PageRankJob::run_once()` batch and exits.

use std::sync::Arc;

use clap::Parser;
use search_pipeline::config::Config;
use search_pipeline::kv::{KvStore, RedisKvStore};
use search_pipeline::metadata::{MetadataStore, PgMetadataStore};
use search_pipeline::pagerank::PageRankJob;

#[derive(Parser)]
struct Args {
    #[arg(long, env = "SEARCH_PIPELINE_REDIS_URL", default_value = "redis://127.0.0.1/")]
    redis_url: String,
    #[arg(long, env = "SEARCH_PIPELINE_DATABASE_URL")]
    database_url: String,
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

    let job = PageRankJob::new(metadata, kv, config);
    let result = job.run_once().await?;
    tracing::info!(
        pages = result.scores.len(),
        iterations = result.iterations_run,
        "pagerank run finished"
    );
    Ok(())
}
