//! Bloom filter deduplication for crawled URLs.
//!
//! Lives entirely in the KV store's bitmap primitive, never in process
//! memory, so crawler workers can restart losslessly and scale
//! horizontally without a shared in-process dedup set. m = 10M bits,
//! k = 7, positions derived from `md5(url ++ ":" ++ i) mod m`.

use std::sync::Arc;

use crate::error::KvError;
use crate::kv::KvStore;

const BLOOM_SIZE: u64 = 10_000_000;
const HASH_COUNT: u32 = 7;
const BLOOM_KEY: &str = "bloom:crawled_urls";

/// Probabilistic "seen" set over crawled URLs. False positives are
/// acceptable (a page gets skipped); false negatives are not allowed by
/// construction — every bit tested was only ever set by a prior `mark`.
pub struct BloomFilter {
    kv: Arc<dyn KvStore>,
    key: String,
}

impl BloomFilter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            key: BLOOM_KEY.to_string(),
        }
    }

    fn hash_positions(url: &str) -> [u64; HASH_COUNT as usize] {
        let mut positions = [0u64; HASH_COUNT as usize];
        for (i, slot) in positions.iter_mut().enumerate() {
            let input = format!("{url}:{i}");
            let digest = md5::compute(input.as_bytes());
            // md5::Digest is a [u8; 16]; fold it into a u128 and reduce mod m,
            // matching Python's `int(hexdigest, 16) % size` exactly.
            let mut acc: u128 = 0;
            for byte in digest.0 {
                acc = (acc << 8) | byte as u128;
            }
            *slot = (acc % BLOOM_SIZE as u128) as u64;
        }
        positions
    }

    /// Sets all k bits for `url`, pipelined in a single round trip.
    pub async fn mark(&self, url: &str) -> Result<(), KvError> {
        let positions = Self::hash_positions(url);
        self.kv.setbits(&self.key, &positions).await
    }

    /// Returns true only if all k bits are set.
    pub async fn seen(&self, url: &str) -> Result<bool, KvError> {
        let positions = Self::hash_positions(url);
        let bits = self.kv.getbits(&self.key, &positions).await?;
        Ok(bits.iter().all(|&b| b))
    }

    pub async fn clear(&self) -> Result<(), KvError> {
        self.kv.del(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[tokio::test]
    async fn no_false_negative_after_mark() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let bloom = BloomFilter::new(kv);
        let url = "https://example.com/a";
        assert!(!bloom.seen(url).await.unwrap());
        bloom.mark(url).await.unwrap();
        assert!(bloom.seen(url).await.unwrap());
    }

    #[tokio::test]
    async fn distinct_urls_are_independent_with_high_probability() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let bloom = BloomFilter::new(kv);
        bloom.mark("https://example.com/a").await.unwrap();
        assert!(!bloom.seen("https://example.com/totally-different-path-xyz").await.unwrap());
    }

    #[tokio::test]
    async fn clear_resets_membership() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let bloom = BloomFilter::new(kv);
        bloom.mark("https://example.com/a").await.unwrap();
        bloom.clear().await.unwrap();
        assert!(!bloom.seen("https://example.com/a").await.unwrap());
    }
}
