//! Ephemeral server-side state: response cache and the external backend.
//!
//! Sessions are disabled outright (see [`SessionStore`]). What remains is a
//! key-value cache, which is process-local by default, a no-op when caching
//! is turned off, or Redis when configured.
//!
//! Redis is reached lazily: startup never blocks on it. Every connect gets a
//! bounded budget (per-attempt connect timeout × attempts) and reports
//! [`Error::BackendUnavailable`] once it is spent. Callers never wait on each
//! other's connect attempts, and a failure is remembered for one connect
//! timeout so a burst of requests against a dead backend fails at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use moka::Expiry;
use moka::future::Cache;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, warn};

use crate::config::{BackendConfig, CacheStoreKind, Config, SessionStore};
use crate::error::{Error, Result};

/// Default weight budget of the in-memory store: 32 MiB of keys and values.
pub const DEFAULT_MEMORY_BUDGET: u64 = 32 * 1024 * 1024;

/// A key-value store for short-lived data.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Stores `value`, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<()>;

    fn kind(&self) -> CacheStoreKind;
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Entry {
    value: Bytes,
    ttl: Option<Duration>,
}

/// Each entry lives for the TTL it was last written with.
struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// Process-local store, bounded by the byte size of keys plus values.
///
/// Expired entries are purged by the cache's own housekeeping whether or
/// not they are read again; past the budget, the least useful entries are
/// evicted first.
pub struct MemoryStore {
    entries: Cache<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_MEMORY_BUDGET)
    }

    /// A store holding at most `bytes` worth of keys and values.
    pub fn with_budget(bytes: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(bytes)
            .weigher(|key: &String, entry: &Entry| {
                u32::try_from(key.len() + entry.value.len()).unwrap_or(u32::MAX)
            })
            .expire_after(EntryTtl)
            .build();
        Self { entries }
    }

    /// Live entries, after pending expirations and evictions are applied.
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(key.to_owned(), Entry { value, ttl }).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.invalidate(key).await;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> CacheStoreKind {
        CacheStoreKind::Memory
    }
}

// ── Null ──────────────────────────────────────────────────────────────────────

/// Caching disabled: writes vanish, reads always miss.
pub struct NullStore;

#[async_trait]
impl KeyValueStore for NullStore {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>> { Ok(None) }
    async fn set(&self, _key: &str, _value: Bytes, _ttl: Option<Duration>) -> Result<()> { Ok(()) }
    async fn delete(&self, _key: &str) -> Result<()> { Ok(()) }
    async fn ping(&self) -> Result<()> { Ok(()) }
    fn kind(&self) -> CacheStoreKind { CacheStoreKind::Null }
}

// ── Redis ─────────────────────────────────────────────────────────────────────

/// Redis-backed store with a bounded connection budget.
pub struct RedisStore {
    client: redis::Client,
    connect_timeout: Duration,
    attempts: u32,
    conn: Mutex<Option<MultiplexedConnection>>,
    last_failure: Mutex<Option<(Instant, String)>>,
}

impl RedisStore {
    /// Validates the URL; does not connect.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Error::config("REDIS_URL", e))?;
        Ok(Self {
            client,
            connect_timeout: config.connect_timeout,
            attempts: config.reconnect_attempts.max(1),
            conn: Mutex::new(None),
            last_failure: Mutex::new(None),
        })
    }

    fn unavailable(&self, reason: String) -> Error {
        Error::BackendUnavailable { attempts: self.attempts, reason }
    }

    /// The reason of a connect failure younger than one connect timeout.
    fn recent_failure(&self) -> Option<String> {
        self.last_failure
            .lock()
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.connect_timeout)
            .map(|(_, reason)| reason.clone())
    }

    /// Returns the cached connection or establishes a new one, trying at
    /// most `attempts` times with `connect_timeout` each. No lock is held
    /// while connecting.
    async fn connection(&self) -> Result<MultiplexedConnection> {
        let cached = self.conn.lock().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }
        if let Some(reason) = self.recent_failure() {
            return Err(self.unavailable(reason));
        }

        let mut reason = String::new();
        for attempt in 1..=self.attempts {
            match tokio::time::timeout(
                self.connect_timeout,
                self.client.get_multiplexed_async_connection(),
            )
            .await
            {
                Ok(Ok(conn)) => {
                    debug!(attempt, "redis connected");
                    *self.conn.lock() = Some(conn.clone());
                    *self.last_failure.lock() = None;
                    return Ok(conn);
                }
                Ok(Err(e)) => reason = e.to_string(),
                Err(_) => reason = format!("connect timed out after {:?}", self.connect_timeout),
            }
            debug!(attempt, max = self.attempts, %reason, "redis connect attempt failed");
        }

        warn!(attempts = self.attempts, %reason, "redis unavailable");
        *self.last_failure.lock() = Some((Instant::now(), reason.clone()));
        Err(self.unavailable(reason))
    }

    /// Forgets the cached connection so the next call reconnects.
    fn reset(&self) {
        *self.conn.lock() = None;
    }

    /// Runs one command, bounded by the connect timeout. A failed or silent
    /// command drops the cached connection.
    async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        let reason = match tokio::time::timeout(self.connect_timeout, op(conn)).await {
            Ok(Ok(v)) => return Ok(v),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no reply within {:?}", self.connect_timeout),
        };
        self.reset();
        Err(Error::BackendUnavailable { attempts: 1, reason })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let value: Option<Vec<u8>> = self.run(|mut c| async move { c.get(key).await }).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.run(|mut c| async move {
            match ttl {
                // SETEX takes whole seconds; round sub-second TTLs up.
                Some(ttl) => c.set_ex(key, value.to_vec(), ttl.as_secs().max(1)).await,
                None => c.set(key, value.to_vec()).await,
            }
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.run(|mut c| async move { c.del(key).await }).await
    }

    async fn ping(&self) -> Result<()> {
        let _: String = self
            .run(|mut c| async move { redis::cmd("PING").query_async(&mut c).await })
            .await?;
        Ok(())
    }

    fn kind(&self) -> CacheStoreKind {
        CacheStoreKind::Redis
    }
}

// ── Selection ─────────────────────────────────────────────────────────────────

/// The stores a running app talks to, chosen once from [`Config`].
#[derive(Clone)]
pub struct Backends {
    cache: Arc<dyn KeyValueStore>,
    redis: Arc<RedisStore>,
    sessions: SessionStore,
}

impl Backends {
    pub fn from_config(config: &Config) -> Result<Self> {
        let redis = Arc::new(RedisStore::new(&config.backend)?);
        let cache: Arc<dyn KeyValueStore> = match config.cache_store {
            CacheStoreKind::Memory => Arc::new(MemoryStore::new()),
            CacheStoreKind::Null => Arc::new(NullStore),
            CacheStoreKind::Redis => redis.clone(),
        };
        Ok(Self { cache, redis, sessions: config.session_store })
    }

    pub fn cache(&self) -> &Arc<dyn KeyValueStore> { &self.cache }
    pub fn redis(&self) -> &Arc<RedisStore> { &self.redis }
    pub fn sessions(&self) -> SessionStore { self.sessions }
}
