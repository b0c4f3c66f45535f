//! # fetch-cache
//!
//! 请求去重与可取消的 HTTP 获取缓存：相同请求的并发调用共享一次网络操作。
//!
//! A request-deduplicating, cancelable HTTP fetch cache. Concurrent
//! subscribers to the same request fingerprint share a single in-flight
//! network operation; settled results are cached and replayed until
//! explicitly invalidated; each subscriber controls its own lifetime via a
//! [`SubscriptionHandle`].
//!
//! ## Core Properties
//!
//! - **Dedup**: at most one network operation per fingerprint system-wide.
//! - **Resolve once**: entries transition `pending → {resolved, failed}`
//!   exactly once; failures are cached too, never retried implicitly.
//! - **Per-subscriber cancellation**: withdrawing interest suppresses only
//!   that caller's delivery. [`FetchCache::abort`] additionally signals the
//!   transport when the last subscriber leaves.
//! - **Uniform delivery**: cache hits are delivered asynchronously, so
//!   callers cannot observe hit-vs-miss timing differences.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fetch_cache::{CacheConfig, FetchCache, FetchRequest, HttpTransport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> fetch_cache::Result<()> {
//!     let transport = Arc::new(HttpTransport::new()?);
//!     let cache: FetchCache<serde_json::Value> =
//!         FetchCache::new(transport, CacheConfig::new());
//!
//!     let request = FetchRequest::get("https://api.example.com/items")?;
//!
//!     // Await-style one-shot fetch...
//!     let items = cache.fetch(&request).await;
//!     println!("{items:?}");
//!
//!     // ...or callback-style with explicit lifetime control.
//!     let handle = cache.subscribe(&request, |result| {
//!         println!("delivered: {result:?}");
//!     });
//!     cache.cancel(&handle);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Entry store, fingerprinting, subscribe/cancel/invalidate |
//! | [`request`] | Request descriptors |
//! | [`transport`] | Abortable transport trait and the reqwest implementation |
//! | [`error`] | Unified error types |

pub mod cache;
pub mod error;
pub mod request;
pub mod transport;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheStats, FetchCache, Fingerprint, FingerprintGenerator, SubscriptionHandle,
};
pub use error::{Error, FetchError};
pub use request::{FetchRequest, Method};
pub use transport::{HttpTransport, RawResponse, Transport, TransportError};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome delivered to subscribers: decoded value or normalized failure
pub type FetchResult<T> = std::result::Result<T, FetchError>;
