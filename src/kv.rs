//! The key-value store collaborator (spec §6).
//!
//! Treated as a black box at the architecture level: the pipeline only
//! relies on the primitives spec §6 lists (sorted set, list, TTL string,
//! bitmap, hash, pipelining). [`KvStore`] is that boundary; [`RedisKvStore`]
//! is the production adapter (the `redis` crate, as used elsewhere in the
//! retrieval pack for exactly this role) and [`MemoryKv`] is an in-process
//! stand-in used by the test suite so the whole pipeline is exercisable
//! without a running Redis.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::KvError;

/// Primitives required by spec §6. Every method is async because the
/// production adapter is a network round-trip; this is also the crate's one
/// and only cooperative suspension point for KV access (spec §5).
#[async_trait]
pub trait KvStore: Send + Sync {
    // Sorted set (frontier).
    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> Result<(), KvError>;
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, KvError>;
    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), KvError>;
    async fn zcard(&self, key: &str) -> Result<u64, KvError>;

    // List (indexing queue).
    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError>;
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, KvError>;
    async fn lpop(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn llen(&self, key: &str) -> Result<u64, KvError>;

    // TTL string (robots cache, rate limit, query cache, pagerank scores).
    async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<(), KvError>;
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn del(&self, key: &str) -> Result<(), KvError>;

    // Bitmap (bloom filter).
    async fn setbit(&self, key: &str, offset: u64, value: bool) -> Result<(), KvError>;
    async fn getbit(&self, key: &str, offset: u64) -> Result<bool, KvError>;
    /// Pipelined equivalent of calling [`KvStore::setbit`] for each offset in
    /// one round trip (spec §6: "pipelining required for bloom filter
    /// set/test").
    async fn setbits(&self, key: &str, offsets: &[u64]) -> Result<(), KvError>;
    /// Pipelined equivalent of [`KvStore::getbit`] for each offset.
    async fn getbits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>, KvError>;

    // Hash (pagerank:meta, crawler:depth).
    async fn hset(&self, key: &str, mapping: &[(String, String)]) -> Result<(), KvError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;
}

/// Production adapter over the `redis` crate's async connection manager.
/// `ConnectionManager` already gives us transparent reconnection, which is
/// the behavior spec §4.1 asks for ("the worker retries with exponential
/// backoff") one layer down in the driver itself.
pub struct RedisKvStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(KvError::Redis)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(KvError::Redis)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> Result<(), KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let items: Vec<(f64, String)> = members.iter().map(|(m, s)| (*s, m.clone())).collect();
        conn.zadd_multiple(key, &items).await.map_err(KvError::Redis)
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.zrange(key, start, stop).await.map_err(KvError::Redis)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.zrem(key, members).await.map_err(KvError::Redis)
    }

    async fn zcard(&self, key: &str) -> Result<u64, KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.zcard(key).await.map_err(KvError::Redis)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.rpush(key, value).await.map_err(KvError::Redis)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let result: Option<(String, String)> = conn
            .blpop(key, timeout.as_secs_f64())
            .await
            .map_err(KvError::Redis)?;
        Ok(result.map(|(_, v)| v))
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.lpop(key, None).await.map_err(KvError::Redis)
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.llen(key).await.map_err(KvError::Redis)
    }

    async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<(), KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl.as_secs()).await.map_err(KvError::Redis)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(KvError::Redis)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.del(key).await.map_err(KvError::Redis)
    }

    async fn setbit(&self, key: &str, offset: u64, value: bool) -> Result<(), KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.setbit(key, offset as usize, value).await.map_err(KvError::Redis)
    }

    async fn getbit(&self, key: &str, offset: u64) -> Result<bool, KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.getbit(key, offset as usize).await.map_err(KvError::Redis)
    }

    async fn setbits(&self, key: &str, offsets: &[u64]) -> Result<(), KvError> {
        let mut pipe = redis::pipe();
        for &offset in offsets {
            pipe.cmd("SETBIT").arg(key).arg(offset).arg(1).ignore();
        }
        let mut conn = self.conn.clone();
        pipe.query_async(&mut conn).await.map_err(KvError::Redis)
    }

    async fn getbits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>, KvError> {
        let mut pipe = redis::pipe();
        for &offset in offsets {
            pipe.cmd("GETBIT").arg(key).arg(offset);
        }
        let mut conn = self.conn.clone();
        let results: Vec<i64> = pipe.query_async(&mut conn).await.map_err(KvError::Redis)?;
        Ok(results.into_iter().map(|b| b != 0).collect())
    }

    async fn hset(&self, key: &str, mapping: &[(String, String)]) -> Result<(), KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.hset_multiple(key, mapping).await.map_err(KvError::Redis)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.hget(key, field).await.map_err(KvError::Redis)
    }
}

#[derive(Default)]
struct MemoryState {
    zsets: HashMap<String, BTreeMap<String, f64>>,
    lists: HashMap<String, Vec<String>>,
    strings: HashMap<String, (String, Option<Instant>)>,
    bitmaps: HashMap<String, Vec<bool>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl MemoryState {
    fn string_get(&mut self, key: &str) -> Option<String> {
        if let Some((value, expires_at)) = self.strings.get(key) {
            if let Some(exp) = expires_at {
                if Instant::now() >= *exp {
                    self.strings.remove(key);
                    return None;
                }
            }
            Some(value.clone())
        } else {
            None
        }
    }
}

/// In-memory [`KvStore`] used by the test suite (spec §8). Ties in directly
/// to the shared test-adapter pattern: a single `Mutex`-guarded state, the
/// way `koumoutsas-search_engine`'s `SearchEngine` wraps its tantivy writer
/// in a `Mutex` to present a `Send + Sync` surface over interior state.
#[derive(Clone, Default)]
pub struct MemoryKv {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        let set = state.zsets.entry(key.to_string()).or_default();
        for (member, score) in members {
            set.insert(member.clone(), *score);
        }
        Ok(())
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, KvError> {
        let state = self.state.lock().await;
        let Some(set) = state.zsets.get(key) else {
            return Ok(vec![]);
        };
        // Order by (score, member) ascending: score is the primary sort key
        // per spec §3/§8; member breaks ties lexicographically, the explicit
        // tie-break this crate's test adapter commits to (see DESIGN.md).
        let mut entries: Vec<(&String, &f64)> = set.iter().collect();
        entries.sort_by(|a, b| a.1.partial_cmp(b.1).unwrap().then_with(|| a.0.cmp(b.0)));
        let len = entries.len() as isize;
        let norm = |i: isize| -> isize {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len)
            }
        };
        let (s, e) = (norm(start), norm(stop) + 1);
        if s >= e || s >= len {
            return Ok(vec![]);
        }
        Ok(entries[s as usize..e.min(len) as usize]
            .iter()
            .map(|(m, _)| (*m).clone())
            .collect())
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        if let Some(set) = state.zsets.get_mut(key) {
            for member in members {
                set.remove(member);
            }
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<u64, KvError> {
        let state = self.state.lock().await;
        Ok(state.zsets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        state.lists.entry(key.to_string()).or_default().push(value.to_string());
        Ok(())
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, KvError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(list) = state.lists.get_mut(key) {
                    if !list.is_empty() {
                        return Ok(Some(list.remove(0)));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut state = self.state.lock().await;
        if let Some(list) = state.lists.get_mut(key) {
            if !list.is_empty() {
                return Ok(Some(list.remove(0)));
            }
        }
        Ok(None)
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        let state = self.state.lock().await;
        Ok(state.lists.get(key).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        state
            .strings
            .insert(key.to_string(), (value.to_string(), Some(Instant::now() + ttl)));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut state = self.state.lock().await;
        Ok(state.string_get(key))
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        state.strings.remove(key);
        state.lists.remove(key);
        state.zsets.remove(key);
        state.bitmaps.remove(key);
        state.hashes.remove(key);
        Ok(())
    }

    async fn setbit(&self, key: &str, offset: u64, value: bool) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        let bits = state.bitmaps.entry(key.to_string()).or_default();
        let idx = offset as usize;
        if bits.len() <= idx {
            bits.resize(idx + 1, false);
        }
        bits[idx] = value;
        Ok(())
    }

    async fn getbit(&self, key: &str, offset: u64) -> Result<bool, KvError> {
        let state = self.state.lock().await;
        Ok(state
            .bitmaps
            .get(key)
            .and_then(|bits| bits.get(offset as usize).copied())
            .unwrap_or(false))
    }

    async fn setbits(&self, key: &str, offsets: &[u64]) -> Result<(), KvError> {
        for &offset in offsets {
            self.setbit(key, offset, true).await?;
        }
        Ok(())
    }

    async fn getbits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>, KvError> {
        let mut out = Vec::with_capacity(offsets.len());
        for &offset in offsets {
            out.push(self.getbit(key, offset).await?);
        }
        Ok(out)
    }

    async fn hset(&self, key: &str, mapping: &[(String, String)]) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in mapping {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let state = self.state.lock().await;
        Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }
}
