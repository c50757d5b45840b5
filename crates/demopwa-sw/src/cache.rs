//! Cache Storage
//!
//! `CacheStorage` is the `caches` global: a set of named caches, each mapping
//! request identity to a stored response. The worker only talks to the
//! traits; [`MemoryCacheStorage`] is the in-process implementation.

use async_trait::async_trait;
use futures::future::join_all;
use hashbrown::HashMap;
use http::{header, Method, StatusCode};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, SwError};
use crate::net::Fetcher;
use crate::request::{CacheKey, Request, Response};

// ==================== Traits ====================

/// A single named cache.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Cache name.
    fn name(&self) -> &str;

    /// Find the stored response for a request.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>>;

    /// Store a response, replacing any previous entry for the request.
    async fn put(&self, request: &Request, response: Response) -> Result<()>;

    /// Store several entries. Either all are stored or none are.
    async fn put_all(&self, entries: Vec<(Request, Response)>) -> Result<()>;

    /// Remove the entry for a request.
    async fn delete(&self, request: &Request) -> Result<bool>;

    /// Stored requests, oldest first.
    async fn keys(&self) -> Result<Vec<Request>>;
}

/// Options for [`CacheStorage::match_request`].
#[derive(Debug, Clone, Default)]
pub struct MatchOptions {
    /// Only look in this cache. A missing cache is a miss, not an error.
    pub cache_name: Option<String>,
}

impl MatchOptions {
    pub fn in_cache(name: impl Into<String>) -> Self {
        Self {
            cache_name: Some(name.into()),
        }
    }
}

/// The set of named caches for an origin.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if it doesn't exist.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Delete a cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Cache names in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Look a request up across caches, in creation order.
    async fn match_request(
        &self,
        request: &Request,
        options: &MatchOptions,
    ) -> Result<Option<Response>>;
}

// ==================== Helpers ====================

/// Reject entries the Cache API refuses to store.
pub fn check_cacheable(request: &Request, response: &Response) -> Result<()> {
    if request.method != Method::GET {
        return Err(SwError::UnsupportedRequest(format!(
            "Request method '{}' is unsupported",
            request.method
        )));
    }
    if response.status == StatusCode::PARTIAL_CONTENT {
        return Err(SwError::UnsupportedRequest(
            "Partial response (status code 206) is unsupported".to_string(),
        ));
    }
    let vary_star = response
        .headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|f| f.trim() == "*"));
    if vary_star {
        return Err(SwError::UnsupportedRequest(
            "Vary header contains *".to_string(),
        ));
    }
    Ok(())
}

/// Fetch every request and store the results as one batch.
///
/// Any network failure or non-2xx response rejects the whole batch and leaves
/// the cache untouched.
pub async fn add_all(cache: &dyn Cache, fetcher: &dyn Fetcher, requests: Vec<Request>) -> Result<()> {
    if let Some(bad) = requests.iter().find(|r| r.method != Method::GET) {
        return Err(SwError::UnsupportedRequest(format!(
            "Request method '{}' is unsupported",
            bad.method
        )));
    }

    let responses = join_all(requests.iter().map(|r| fetcher.fetch(r))).await;

    let mut entries = Vec::with_capacity(requests.len());
    for (request, result) in requests.into_iter().zip(responses) {
        let response = result?;
        if !response.is_ok() {
            return Err(SwError::BadResponse {
                url: request.url.to_string(),
                status: response.status.as_u16(),
            });
        }
        entries.push((request, response));
    }

    cache.put_all(entries).await
}

// ==================== Quota ====================

/// Byte budget shared by every cache of one storage.
///
/// A cache gives its bytes back when the storage deletes it. Handles still
/// held after that point are closed, so a late write cannot take quota that
/// nothing would ever release.
#[derive(Debug)]
struct Quota {
    limit: Option<usize>,
    used: AtomicUsize,
}

impl Quota {
    fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// Swap `released` bytes for `acquired` bytes, failing past the limit.
    fn adjust(&self, released: usize, acquired: usize) -> Result<()> {
        let limit = self.limit;
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                let next = used.saturating_sub(released) + acquired;
                match limit {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            })
            .map(|_| ())
            .map_err(|used| {
                SwError::QuotaExceeded(format!(
                    "{} bytes requested with {} of {} bytes used",
                    acquired,
                    used,
                    limit.unwrap_or_default()
                ))
            })
    }

    fn release(&self, bytes: usize) {
        let _ = self.adjust(bytes, 0);
    }

    fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }
}

// ==================== Memory Cache ====================

#[derive(Debug, Clone)]
struct StoredEntry {
    request: Request,
    response: Response,
    seq: u64,
}

/// An in-memory cache.
#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<CacheKey, StoredEntry>>,
    quota: Arc<Quota>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl MemoryCache {
    fn new(name: &str, quota: Arc<Quota>) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            quota,
            next_seq: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether the owning storage has deleted this cache.
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SwError::cache(format!("Cache '{}' was deleted", self.name)));
        }
        Ok(())
    }

    /// Mark the cache deleted and hand its bytes back to the quota.
    async fn close(&self) {
        let mut entries = self.entries.write().await;
        self.closed.store(true, Ordering::SeqCst);
        let size: usize = entries.values().map(|e| e.response.size()).sum();
        entries.clear();
        self.quota.release(size);
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Bytes held by this cache.
    pub async fn size(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .map(|e| e.response.size())
            .sum()
    }

    fn seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        // Non-GET requests never match.
        if request.method != Method::GET {
            return Ok(None);
        }
        let entries = self.entries.read().await;
        Ok(entries
            .get(&request.cache_key())
            .map(|e| e.response.clone()))
    }

    async fn put(&self, request: &Request, response: Response) -> Result<()> {
        check_cacheable(request, &response)?;

        let key = request.cache_key();
        let mut entries = self.entries.write().await;
        self.ensure_open()?;
        let released = entries.get(&key).map(|e| e.response.size()).unwrap_or(0);
        self.quota.adjust(released, response.size())?;

        entries.insert(
            key,
            StoredEntry {
                request: request.clone(),
                response,
                seq: self.seq(),
            },
        );
        Ok(())
    }

    async fn put_all(&self, batch: Vec<(Request, Response)>) -> Result<()> {
        for (request, response) in &batch {
            check_cacheable(request, response)?;
        }

        // Later entries for the same key win, as with successive puts.
        let mut merged: Vec<(CacheKey, Request, Response)> = Vec::with_capacity(batch.len());
        for (request, response) in batch {
            let key = request.cache_key();
            match merged.iter_mut().find(|(k, _, _)| *k == key) {
                Some(slot) => *slot = (key, request, response),
                None => merged.push((key, request, response)),
            }
        }

        let mut entries = self.entries.write().await;
        self.ensure_open()?;
        let released: usize = merged
            .iter()
            .filter_map(|(key, _, _)| entries.get(key))
            .map(|e| e.response.size())
            .sum();
        let acquired: usize = merged.iter().map(|(_, _, response)| response.size()).sum();
        self.quota.adjust(released, acquired)?;

        for (key, request, response) in merged {
            let seq = self.seq();
            entries.insert(
                key,
                StoredEntry {
                    request,
                    response,
                    seq,
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, request: &Request) -> Result<bool> {
        let mut entries = self.entries.write().await;
        match entries.remove(&request.cache_key()) {
            Some(entry) => {
                self.quota.release(entry.response.size());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<Request>> {
        let entries = self.entries.read().await;
        let mut stored: Vec<&StoredEntry> = entries.values().collect();
        stored.sort_by_key(|e| e.seq);
        Ok(stored.into_iter().map(|e| e.request.clone()).collect())
    }
}

// ==================== Memory Cache Storage ====================

#[derive(Debug, Default)]
struct StorageInner {
    caches: HashMap<String, Arc<MemoryCache>>,
    order: Vec<String>,
}

/// In-memory cache storage.
#[derive(Debug)]
pub struct MemoryCacheStorage {
    inner: RwLock<StorageInner>,
    quota: Arc<Quota>,
}

impl Default for MemoryCacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacheStorage {
    /// Create storage with no size limit.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StorageInner::default()),
            quota: Arc::new(Quota::new(None)),
        }
    }

    /// Create storage that rejects writes beyond `bytes` in total.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            inner: RwLock::new(StorageInner::default()),
            quota: Arc::new(Quota::new(Some(bytes))),
        }
    }

    /// Bytes currently stored across all caches.
    pub fn usage(&self) -> usize {
        self.quota.used()
    }

    /// Concrete handle to a cache, if it exists.
    pub async fn get(&self, name: &str) -> Option<Arc<MemoryCache>> {
        self.inner.read().await.caches.get(name).cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        if let Some(cache) = self.get(name).await {
            return Ok(cache);
        }

        let mut inner = self.inner.write().await;
        // Another open may have raced us between the locks.
        if let Some(cache) = inner.caches.get(name) {
            return Ok(cache.clone());
        }
        let cache = Arc::new(MemoryCache::new(name, self.quota.clone()));
        inner.caches.insert(name.to_string(), cache.clone());
        inner.order.push(name.to_string());
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.inner.read().await.caches.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let removed = {
            let mut inner = self.inner.write().await;
            inner.order.retain(|n| n != name);
            inner.caches.remove(name)
        };
        match removed {
            Some(cache) => {
                cache.close().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().await.order.clone())
    }

    async fn match_request(
        &self,
        request: &Request,
        options: &MatchOptions,
    ) -> Result<Option<Response>> {
        let candidates: Vec<Arc<MemoryCache>> = {
            let inner = self.inner.read().await;
            match options.cache_name {
                Some(ref name) => inner.caches.get(name).cloned().into_iter().collect(),
                None => inner
                    .order
                    .iter()
                    .filter_map(|n| inner.caches.get(n).cloned())
                    .collect(),
            }
        };

        for cache in candidates {
            if let Some(response) = cache.match_request(request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}
