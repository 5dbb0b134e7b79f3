//! Crate-wide error types.
//!
//! Each subsystem defines its own narrow error enum (so callers can match on
//! the failure modes relevant to them); [`Error`] aggregates all of them for
//! binaries that just want one `Result` type at their `main()` boundary.

use thiserror::Error;

/// Failure modes for the [`crate::kv::KvStore`] trait.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv store unreachable: {0}")]
    Unreachable(String),
    #[error("kv store returned a malformed value for key {key}: {reason}")]
    Malformed { key: String, reason: String },
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// Failure modes for the [`crate::fulltext::FullTextStore`] trait.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("full-text store unavailable: {0}")]
    Unavailable(String),
    #[error("query could not be parsed: {0}")]
    BadQuery(String),
    #[error(transparent)]
    Tantivy(#[from] tantivy::TantivyError),
    #[error(transparent)]
    QueryParse(#[from] tantivy::query::QueryParserError),
}

/// Failure modes for the [`crate::metadata::MetadataStore`] trait.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Failure modes for a single fetch attempt (§4.3 failure taxonomy).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("http error status {0}")]
    HttpStatus(u16),
    #[error("failed to parse response body: {0}")]
    Parse(String),
}

/// Failure modes for PageRank computation.
#[derive(Debug, Error)]
pub enum PageRankError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Kv(#[from] KvError),
}

/// Aggregate error type for binaries.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    PageRank(#[from] PageRankError),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
