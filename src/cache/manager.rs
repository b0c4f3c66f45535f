//! Fetch cache manager.

use super::entry::{CacheEntry, Callback, EntryState, Subscriber, SubscriberFlag};
use super::key::{Fingerprint, FingerprintGenerator};
use super::SubscriptionHandle;
use crate::error::{Error, FetchError};
use crate::request::FetchRequest;
use crate::transport::Transport;
use crate::{FetchResult, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cache behavior configuration.
///
/// The baseline keeps entries until explicit invalidation; `ttl` and
/// `max_entries` opt into lazy expiry and LRU eviction of terminal entries.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Terminal entries older than this count as absent on the next
    /// subscribe. `None` means entries never expire.
    pub ttl: Option<Duration>,
    /// Soft bound on resident entries. Eviction only considers terminal
    /// entries and the incoming entry is always admitted, so Pending
    /// entries can push the store past the bound until they settle.
    pub max_entries: Option<usize>,
    pub fingerprints: FingerprintGenerator,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            max_entries: None,
            fingerprints: FingerprintGenerator::new(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn with_fingerprints(mut self, fingerprints: FingerprintGenerator) -> Self {
        self.fingerprints = fingerprints;
        self
    }
}

/// Point-in-time counters snapshot.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Terminal entries replayed to a new subscriber.
    pub hits: u64,
    /// Subscribes that started a network operation.
    pub misses: u64,
    /// Subscribes that joined an already in-flight operation.
    pub coalesced: u64,
    /// Entries dropped by TTL expiry or LRU eviction.
    pub evictions: u64,
    /// Operations settled as Failed.
    pub failures: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    failures: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

struct Inner<T> {
    config: CacheConfig,
    transport: Arc<dyn Transport>,
    entries: Mutex<HashMap<Fingerprint, CacheEntry<T>>>,
    stats: AtomicStats,
    next_subscriber: AtomicU64,
}

/// Request-deduplicating, cancelable fetch cache over an HTTP transport.
///
/// Keyed by request [`Fingerprint`]; at most one network operation runs per
/// fingerprint system-wide. Results (successes and failures alike) are cached
/// until explicitly invalidated and fan out to every registered subscriber.
///
/// `T` is the decoded payload type; bodies are decoded from JSON in
/// completion handling. Must be called from within a tokio runtime.
pub struct FetchCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for FetchCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> FetchCache<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    pub fn new(transport: Arc<dyn Transport>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                entries: Mutex::new(HashMap::new()),
                stats: AtomicStats::new(),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// Fingerprint this cache derives for `request`.
    pub fn fingerprint(&self, request: &FetchRequest) -> Fingerprint {
        self.inner.config.fingerprints.generate(request)
    }

    /// Registers interest in the outcome of `request`.
    ///
    /// A terminal entry replays its cached result; a Pending entry gains an
    /// additional subscriber; an absent one starts exactly one network
    /// operation. Delivery is always asynchronous, never in the caller's
    /// stack, so hits and misses are indistinguishable in timing discipline.
    pub fn subscribe<F>(&self, request: &FetchRequest, on_result: F) -> SubscriptionHandle
    where
        F: FnOnce(FetchResult<T>) + Send + 'static,
    {
        let fingerprint = self.fingerprint(request);
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let flag = Arc::new(SubscriberFlag::default());
        let handle = SubscriptionHandle::new(fingerprint.clone(), id, Arc::clone(&flag));
        let callback: Callback<T> = Box::new(on_result);

        let mut entries = self.inner.entries.lock().unwrap();

        // Lazy expiry: a terminal entry past its TTL counts as absent.
        if let Some(ttl) = self.inner.config.ttl {
            let expired = entries
                .get(&fingerprint)
                .map(|e| !e.is_pending() && e.is_expired(ttl))
                .unwrap_or(false);
            if expired {
                entries.remove(&fingerprint);
                self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint, "expired entry dropped");
            }
        }

        match entries.get_mut(&fingerprint) {
            Some(entry) => {
                entry.last_accessed = Instant::now();
                match &mut entry.state {
                    EntryState::Pending { subscribers, .. } => {
                        self.inner.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            fingerprint = %fingerprint,
                            waiting = subscribers.len() + 1,
                            "joining in-flight fetch"
                        );
                        subscribers.push(Subscriber { id, flag, callback });
                    }
                    EntryState::Resolved(value) => {
                        self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                        let result: FetchResult<T> = Ok(value.clone());
                        tokio::spawn(async move { deliver(&flag, callback, result) });
                    }
                    EntryState::Failed(err) => {
                        self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                        let result: FetchResult<T> = Err(err.clone());
                        tokio::spawn(async move { deliver(&flag, callback, result) });
                    }
                }
            }
            None => {
                self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.evict_if_needed(&mut entries);
                let abort = CancellationToken::new();
                debug!(fingerprint = %fingerprint, "starting network operation");
                entries.insert(
                    fingerprint.clone(),
                    CacheEntry::pending(Subscriber { id, flag, callback }, abort.clone()),
                );
                tokio::spawn(run_fetch(
                    Arc::clone(&self.inner),
                    fingerprint,
                    request.clone(),
                    abort,
                ));
            }
        }

        handle
    }

    /// One-shot convenience over [`subscribe`](Self::subscribe): awaits the
    /// outcome instead of taking a callback.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchResult<T> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _handle = self.subscribe(request, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(FetchError::Aborted))
    }

    /// Withdraws a subscriber's interest. Idempotent.
    ///
    /// Non-destructive: an in-flight operation keeps running and its result
    /// is still cached for later subscribers.
    pub fn cancel(&self, handle: &SubscriptionHandle) {
        if !handle.flag().cancel() {
            return;
        }
        let mut entries = self.inner.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(handle.fingerprint()) {
            if let EntryState::Pending { subscribers, .. } = &mut entry.state {
                subscribers.retain(|s| s.id != handle.id());
            }
        }
        debug!(fingerprint = %handle.fingerprint(), "subscriber canceled");
    }

    /// [`cancel`](Self::cancel) plus, when this was the last subscriber of a
    /// Pending entry, a best-effort signal to the transport to stop early.
    /// An aborted operation is not cached: its fingerprint returns to absent.
    pub fn abort(&self, handle: &SubscriptionHandle) {
        handle.flag().cancel();
        let token = {
            let mut entries = self.inner.entries.lock().unwrap();
            match entries.get_mut(handle.fingerprint()) {
                Some(entry) => match &mut entry.state {
                    EntryState::Pending { subscribers, abort } => {
                        subscribers.retain(|s| s.id != handle.id());
                        if subscribers.is_empty() {
                            Some(abort.clone())
                        } else {
                            None
                        }
                    }
                    _ => None,
                },
                None => None,
            }
        };
        if let Some(token) = token {
            debug!(fingerprint = %handle.fingerprint(), "aborting in-flight fetch");
            token.cancel();
        }
    }

    /// Removes the cached entry for `request` so the next subscribe triggers
    /// a fresh network operation. Returns whether an entry was removed.
    ///
    /// Invalidating a Pending entry is rejected: settle or abort it first.
    pub fn invalidate(&self, request: &FetchRequest) -> Result<bool> {
        self.invalidate_fingerprint(&self.fingerprint(request))
    }

    pub fn invalidate_fingerprint(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let mut entries = self.inner.entries.lock().unwrap();
        match entries.get(fingerprint) {
            Some(entry) if entry.is_pending() => {
                Err(Error::InvalidatePending(fingerprint.clone()))
            }
            Some(_) => {
                entries.remove(fingerprint);
                debug!(fingerprint = %fingerprint, "entry invalidated");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.to_stats()
    }

    /// Number of entries currently in the store, Pending included.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.name()
    }

    /// Makes room before inserting a new entry. Only terminal entries are
    /// candidates; Pending entries are never evicted.
    fn evict_if_needed(&self, entries: &mut HashMap<Fingerprint, CacheEntry<T>>) {
        let Some(max) = self.inner.config.max_entries else {
            return;
        };
        while entries.len() >= max {
            let oldest = entries
                .iter()
                .filter(|(_, e)| !e.is_pending())
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                entries.remove(&k);
                self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %k, "entry evicted");
            } else {
                break;
            }
        }
    }
}

/// Driver task for one network operation: sends, decodes, transitions the
/// entry and fans delivery out to its subscribers in registration order.
async fn run_fetch<T>(
    inner: Arc<Inner<T>>,
    fingerprint: Fingerprint,
    request: FetchRequest,
    abort: CancellationToken,
) where
    T: DeserializeOwned + Clone + Send + 'static,
{
    let settled: FetchResult<T> = match inner.transport.send(&request, abort).await {
        Ok(raw) if raw.is_success() => {
            serde_json::from_slice(&raw.body).map_err(|e| FetchError::Decode {
                message: e.to_string(),
            })
        }
        Ok(raw) => Err(FetchError::HttpStatus {
            status: raw.status,
            body: body_snippet(&raw.body),
        }),
        Err(err) => Err(FetchError::from(err)),
    };
    let aborted = matches!(settled, Err(FetchError::Aborted));

    let subscribers = {
        let mut entries = inner.entries.lock().unwrap();
        let subscribers = match entries.get_mut(&fingerprint) {
            Some(entry) => match &mut entry.state {
                EntryState::Pending { subscribers, .. } => std::mem::take(subscribers),
                // Only this driver settles the entry, so it can never already
                // be terminal here.
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        if aborted {
            entries.remove(&fingerprint);
        } else if let Some(entry) = entries.get_mut(&fingerprint) {
            let now = Instant::now();
            match &settled {
                Ok(value) => entry.state = EntryState::Resolved(value.clone()),
                Err(err) => {
                    inner.stats.failures.fetch_add(1, Ordering::Relaxed);
                    entry.state = EntryState::Failed(err.clone());
                }
            }
            entry.settled_at = Some(now);
            entry.last_accessed = now;
        }
        subscribers
    };

    debug!(
        fingerprint = %fingerprint,
        subscribers = subscribers.len(),
        ok = settled.is_ok(),
        aborted,
        "fetch settled"
    );
    for subscriber in subscribers {
        deliver(&subscriber.flag, subscriber.callback, settled.clone());
    }
}

/// Invokes one callback unless its subscriber was canceled. A panicking
/// callback must not take down the driver task or starve later subscribers
/// of the same entry.
fn deliver<T>(flag: &SubscriberFlag, callback: Callback<T>, result: FetchResult<T>) {
    if flag.is_canceled() {
        return;
    }
    if std::panic::catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
        warn!("subscriber callback panicked during delivery");
    }
}

/// Truncated body carried inside `FetchError::HttpStatus` for diagnostics.
fn body_snippet(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(body);
    let mut snippet: String = text.chars().take(256).collect();
    if snippet.len() < text.len() {
        snippet.push('…');
    }
    Some(snippet)
}
