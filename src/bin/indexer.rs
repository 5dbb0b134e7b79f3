//! `indexer` binary — drains `queue:indexing` into the full-text store.

use std::sync::Arc;

use clap::Parser;
use search_pipeline::config::Config;
use search_pipeline::fulltext::{FullTextStore, TantivyFullTextStore};
use search_pipeline::indexer::Indexer;
use search_pipeline::kv::{KvStore, RedisKvStore};
use search_pipeline::metadata::{MetadataStore, PgMetadataStore};

#[derive(Clone, Copy, clap::ValueEnum)]
enum IndexerMode {
    /// Non-blocking batch pop, N at a time (spec §4.4's batch mode).
    Batch,
    /// Blocking pop, one record at a time (spec §4.4's one-at-a-time mode).
    OneAtATime,
}

#[derive(Parser)]
struct Args {
    #[arg(long, env = "SEARCH_PIPELINE_REDIS_URL", default_value = "redis://127.0.0.1/")]
    redis_url: String,
    #[arg(long, env = "SEARCH_PIPELINE_DATABASE_URL")]
    database_url: String,
    /// Run one batch (or one record, in `--mode one-at-a-time`) and exit
    /// instead of looping forever.
    #[arg(long)]
    once: bool,
    #[arg(long, value_enum, default_value = "batch")]
    mode: IndexerMode,
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
    let index_path = std::path::Path::new(&config.data_dir).join(&config.elasticsearch_index);
    let fulltext: Arc<dyn FullTextStore> = Arc::new(TantivyFullTextStore::open_or_create(&index_path)?);

    let indexer = Indexer::new(kv, fulltext, metadata, config.indexer_batch_size);

    let (cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = cancel_tx.send(true);
    });

    match args.mode {
        IndexerMode::Batch => loop {
            let stats = indexer.run_until_drained().await?;
            tracing::info!(pages_indexed = stats.pages_indexed, errors = stats.errors, "indexer batch finished");
            if args.once || *cancel_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
                _ = cancel_rx.changed() => break,
            }
        },
        IndexerMode::OneAtATime => loop {
            // `process_one` blocks up to 5s on an empty queue (spec §4.4);
            // shutdown is only observed between pops, never mid-fetch.
            if let Err(e) = indexer.process_one().await {
                tracing::warn!(error = %e, "failed to index one record");
            }
            if args.once || *cancel_rx.borrow() {
                break;
            }
        },
    }
    Ok(())
}
