//! 取缓存核心模块：按请求指纹合并在途请求、缓存最终结果并支持按订阅者取消。
//!
//! # Fetch Cache Module
//!
//! Deduplicating cache over an HTTP transport: concurrent interest in the
//! same request shares one network operation, settled results (successes and
//! failures alike) are cached until explicitly invalidated, and every caller
//! holds its own cancelable subscription.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`FetchCache`] | Subscribe/cancel/abort/invalidate over the entry store |
//! | [`CacheConfig`] | TTL, entry bound and fingerprinting options |
//! | [`CacheStats`] | Hit/miss/coalesce/eviction counters |
//! | [`Fingerprint`] | Deterministic request identity used as cache key |
//! | [`FingerprintGenerator`] | Canonical hashing with salt and header allowlist |
//! | [`SubscriptionHandle`] | Caller-held token for one subscriber's interest |
//!
//! ## Entry lifecycle
//!
//! `absent → pending → {resolved, failed}`; terminal states are immutable
//! until [`FetchCache::invalidate`] returns the fingerprint to absent.
//! Canceling a subscriber never removes the entry, and aborting only tears
//! the operation down when no other subscriber remains.

mod entry;
mod key;
mod manager;

pub use entry::SubscriptionHandle;
pub use key::{Fingerprint, FingerprintGenerator};
pub use manager::{CacheConfig, CacheStats, FetchCache};
