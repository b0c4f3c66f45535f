//! Behavioral tests of the cache core over a gated in-test transport.
//!
//! The double counts calls and holds every send until the test releases a
//! permit, so settlement timing is fully under test control.

use async_trait::async_trait;
use bytes::Bytes;
use fetch_cache::{
    CacheConfig, Error, FetchCache, FetchError, FetchRequest, RawResponse, Transport,
    TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

struct GatedTransport {
    calls: AtomicUsize,
    gate: Semaphore,
    response: Mutex<RawResponse>,
}

impl GatedTransport {
    /// `permits` sends may proceed immediately; the rest block until
    /// [`release`](Self::release).
    fn new(status: u16, body: &str, permits: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(permits),
            response: Mutex::new(RawResponse {
                status,
                body: Bytes::from(body.to_owned()),
            }),
        })
    }

    fn open(status: u16, body: &str) -> Arc<Self> {
        Self::new(status, body, Semaphore::MAX_PERMITS)
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_response(&self, status: u16, body: &str) {
        *self.response.lock().unwrap() = RawResponse {
            status,
            body: Bytes::from(body.to_owned()),
        };
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(
        &self,
        _request: &FetchRequest,
        abort: CancellationToken,
    ) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            permit = self.gate.acquire() => {
                permit.expect("gate closed").forget();
                Ok(self.response.lock().unwrap().clone())
            }
            _ = abort.cancelled() => Err(TransportError::Aborted),
        }
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

/// Opt-in log output for debugging: `RUST_LOG=fetch_cache=debug cargo test`.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn cache_over(transport: Arc<GatedTransport>) -> FetchCache<serde_json::Value> {
    init_tracing();
    FetchCache::new(transport, CacheConfig::new())
}

fn cache_with_config(
    transport: Arc<GatedTransport>,
    config: CacheConfig,
) -> FetchCache<serde_json::Value> {
    init_tracing();
    FetchCache::new(transport, config)
}

fn request(path: &str) -> FetchRequest {
    FetchRequest::get(format!("https://example.com{path}")).unwrap()
}

#[tokio::test]
async fn concurrent_subscribes_share_one_network_operation() {
    let transport = GatedTransport::new(200, r#"{"id": 1}"#, 0);
    let cache = cache_over(Arc::clone(&transport));
    let req = request("/items");

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    cache.subscribe(&req, move |r| {
        tx1.send(r).unwrap();
    });
    cache.subscribe(&req, move |r| {
        tx2.send(r).unwrap();
    });

    transport.release();

    let v1 = rx1.recv().await.unwrap().unwrap();
    let v2 = rx2.recv().await.unwrap().unwrap();
    assert_eq!(v1, serde_json::json!({"id": 1}));
    assert_eq!(v1, v2);
    assert_eq!(transport.calls(), 1);

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.coalesced, 1);
}

#[tokio::test]
async fn resolved_entry_replays_without_network_call() {
    let transport = GatedTransport::open(200, r#"{"id": 2}"#);
    let cache = cache_over(Arc::clone(&transport));
    let req = request("/items/2");

    let first = cache.fetch(&req).await.unwrap();
    assert_eq!(transport.calls(), 1);

    let second = cache.fetch(&req).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(transport.calls(), 1);
    assert_eq!(cache.stats().hits, 1);
}

#[tokio::test]
async fn canceled_subscriber_never_hears_back() {
    let transport = GatedTransport::new(200, r#"{"id": 3}"#, 0);
    let cache = cache_over(Arc::clone(&transport));
    let req = request("/items/3");

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let handle = cache.subscribe(&req, move |r| {
        tx1.send(r).unwrap();
    });
    assert_eq!(handle.fingerprint(), &cache.fingerprint(&req));
    assert_eq!(cache.transport_name(), "gated");
    cache.cancel(&handle);
    assert!(handle.is_canceled());
    // Idempotent.
    cache.cancel(&handle);

    // A second, independent subscriber still shares the in-flight operation.
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    cache.subscribe(&req, move |r| {
        tx2.send(r).unwrap();
    });

    transport.release();

    let delivered = rx2.recv().await.unwrap().unwrap();
    assert_eq!(delivered, serde_json::json!({"id": 3}));
    assert_eq!(transport.calls(), 1);

    let silence = tokio::time::timeout(Duration::from_millis(50), rx1.recv()).await;
    assert!(silence.is_err(), "canceled subscriber received delivery");
}

#[tokio::test]
async fn invalidate_then_subscribe_refetches_once() {
    let transport = GatedTransport::open(200, r#"{"rev": 1}"#);
    let cache = cache_over(Arc::clone(&transport));
    let req = request("/doc");

    cache.fetch(&req).await.unwrap();
    assert_eq!(transport.calls(), 1);

    transport.set_response(200, r#"{"rev": 2}"#);
    assert!(cache.invalidate(&req).unwrap());
    // Second invalidation finds nothing.
    assert!(!cache
        .invalidate_fingerprint(&cache.fingerprint(&req))
        .unwrap());

    let fresh = cache.fetch(&req).await.unwrap();
    assert_eq!(fresh, serde_json::json!({"rev": 2}));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn non_success_status_is_cached_as_failure() {
    let transport = GatedTransport::open(404, "not found");
    let cache = cache_over(Arc::clone(&transport));
    let req = request("/missing");

    let err = cache.fetch(&req).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::HttpStatus {
            status: 404,
            body: Some("not found".into())
        }
    );

    // Replayed from cache, no retry.
    let err_again = cache.fetch(&req).await.unwrap_err();
    assert_eq!(err_again.status(), Some(404));
    assert_eq!(transport.calls(), 1);
    assert_eq!(cache.stats().failures, 1);
}

#[tokio::test]
async fn malformed_payload_is_cached_as_decode_failure() {
    let transport = GatedTransport::open(200, "<html>oops</html>");
    let cache = cache_over(Arc::clone(&transport));
    let req = request("/broken");

    let err = cache.fetch(&req).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode { .. }));

    let err_again = cache.fetch(&req).await.unwrap_err();
    assert!(matches!(err_again, FetchError::Decode { .. }));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn invalidating_pending_entry_is_rejected() {
    let transport = GatedTransport::new(200, r#"{"id": 4}"#, 0);
    let cache = cache_over(Arc::clone(&transport));
    let req = request("/slow");

    let (tx, mut rx) = mpsc::unbounded_channel();
    cache.subscribe(&req, move |r| {
        tx.send(r).unwrap();
    });

    let err = cache.invalidate(&req).unwrap_err();
    assert!(matches!(err, Error::InvalidatePending(_)));

    transport.release();
    rx.recv().await.unwrap().unwrap();

    // Settled now, so invalidation goes through.
    assert!(cache.invalidate(&req).unwrap());
}

#[tokio::test]
async fn abort_of_last_subscriber_releases_the_transport() {
    let transport = GatedTransport::new(200, r#"{"id": 5}"#, 0);
    let cache = cache_over(Arc::clone(&transport));
    let req = request("/abortable");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = cache.subscribe(&req, move |r| {
        tx.send(r).unwrap();
    });
    cache.abort(&handle);

    // The aborted operation is not cached; the entry returns to absent.
    for _ in 0..100 {
        if cache.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cache.is_empty());

    let silence = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(silence.is_err(), "aborted subscriber received delivery");

    // A later subscribe starts a fresh operation.
    transport.release();
    let value = cache.fetch(&req).await.unwrap();
    assert_eq!(value, serde_json::json!({"id": 5}));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn abort_with_remaining_subscribers_keeps_the_operation() {
    let transport = GatedTransport::new(200, r#"{"id": 6}"#, 0);
    let cache = cache_over(Arc::clone(&transport));
    let req = request("/shared");

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let h1 = cache.subscribe(&req, move |r| {
        tx1.send(r).unwrap();
    });
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    cache.subscribe(&req, move |r| {
        tx2.send(r).unwrap();
    });

    cache.abort(&h1);
    transport.release();

    let delivered = rx2.recv().await.unwrap().unwrap();
    assert_eq!(delivered, serde_json::json!({"id": 6}));
    assert_eq!(transport.calls(), 1);

    let silence = tokio::time::timeout(Duration::from_millis(50), rx1.recv()).await;
    assert!(silence.is_err());
}

#[tokio::test]
async fn delivery_follows_registration_order() {
    let transport = GatedTransport::new(200, r#"{"id": 7}"#, 0);
    let cache = cache_over(Arc::clone(&transport));
    let req = request("/ordered");

    let (tx, mut rx) = mpsc::unbounded_channel();
    for i in 0..3u32 {
        let tx = tx.clone();
        cache.subscribe(&req, move |_| {
            tx.send(i).unwrap();
        });
    }
    drop(tx);
    transport.release();

    let mut order = Vec::new();
    while let Some(i) = rx.recv().await {
        order.push(i);
    }
    assert_eq!(order, vec![0, 1, 2]);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn panicking_subscriber_does_not_starve_the_rest() {
    let transport = GatedTransport::new(200, r#"{"id": 8}"#, 0);
    let cache = cache_over(Arc::clone(&transport));
    let req = request("/panicky");

    cache.subscribe(&req, |_| panic!("subscriber bug"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    cache.subscribe(&req, move |r| {
        tx.send(r).unwrap();
    });

    transport.release();

    let delivered = rx.recv().await.unwrap().unwrap();
    assert_eq!(delivered, serde_json::json!({"id": 8}));
}

#[tokio::test]
async fn expired_entry_triggers_a_fresh_fetch() {
    let transport = GatedTransport::open(200, r#"{"rev": 1}"#);
    let cache = cache_with_config(
        Arc::clone(&transport),
        CacheConfig::new().with_ttl(Duration::from_millis(200)),
    );
    let req = request("/ttl");

    cache.fetch(&req).await.unwrap();
    assert_eq!(transport.calls(), 1);

    // Within the TTL: replayed.
    cache.fetch(&req).await.unwrap();
    assert_eq!(transport.calls(), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    transport.set_response(200, r#"{"rev": 2}"#);

    let fresh = cache.fetch(&req).await.unwrap();
    assert_eq!(fresh, serde_json::json!({"rev": 2}));
    assert_eq!(transport.calls(), 2);
    assert!(cache.stats().evictions >= 1);
}

#[tokio::test]
async fn entry_bound_evicts_least_recently_accessed() {
    let transport = GatedTransport::open(200, r#"{"ok": true}"#);
    let cache = cache_with_config(
        Arc::clone(&transport),
        CacheConfig::new().with_max_entries(1),
    );

    cache.fetch(&request("/a")).await.unwrap();
    cache.fetch(&request("/b")).await.unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(transport.calls(), 2);

    // `/a` was evicted to make room, so it fetches again.
    cache.fetch(&request("/a")).await.unwrap();
    assert_eq!(transport.calls(), 3);
    assert!(cache.stats().evictions >= 1);
}

#[tokio::test]
async fn entry_bound_is_soft_while_entries_are_pending() {
    let transport = GatedTransport::new(200, r#"{"ok": true}"#, 0);
    let cache = cache_with_config(
        Arc::clone(&transport),
        CacheConfig::new().with_max_entries(1),
    );

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    cache.subscribe(&request("/a"), move |r| {
        tx1.send(r).unwrap();
    });
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    cache.subscribe(&request("/b"), move |r| {
        tx2.send(r).unwrap();
    });

    // Pending entries are never evicted, so the store exceeds the bound
    // until they settle.
    assert_eq!(cache.len(), 2);

    transport.release();
    transport.release();
    rx1.recv().await.unwrap().unwrap();
    rx2.recv().await.unwrap().unwrap();

    // Once terminal they are eviction candidates again.
    cache.fetch(&request("/c")).await.unwrap();
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn zero_entry_bound_still_admits_the_active_fetch() {
    let transport = GatedTransport::open(200, r#"{"ok": true}"#);
    let cache = cache_with_config(
        Arc::clone(&transport),
        CacheConfig::new().with_max_entries(0),
    );

    cache.fetch(&request("/a")).await.unwrap();
    assert_eq!(cache.len(), 1);

    // A miss for another fingerprint evicts the resident before inserting.
    cache.fetch(&request("/b")).await.unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(transport.calls(), 2);
    assert!(cache.stats().evictions >= 1);
}

#[tokio::test]
async fn distinct_fingerprints_do_not_coalesce() {
    let transport = GatedTransport::open(200, r#"{"ok": true}"#);
    let cache = cache_over(Arc::clone(&transport));

    cache.fetch(&request("/a")).await.unwrap();
    cache
        .fetch(&request("/a").with_header("authorization", "Bearer other"))
        .await
        .unwrap();
    assert_eq!(transport.calls(), 2);
    assert_eq!(cache.len(), 2);
}
