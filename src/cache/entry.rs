//! Per-fingerprint entry state machine and subscriber bookkeeping.

use super::key::Fingerprint;
use crate::error::FetchError;
use crate::FetchResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub(crate) type Callback<T> = Box<dyn FnOnce(FetchResult<T>) + Send + 'static>;

/// One caller's registered interest in a Pending entry.
pub(crate) struct Subscriber<T> {
    pub(crate) id: u64,
    pub(crate) flag: Arc<SubscriberFlag>,
    pub(crate) callback: Callback<T>,
}

/// Cancellation flag shared between a [`SubscriptionHandle`] and any queued
/// delivery for it. Set-once; delivery checks it immediately before invoking
/// the callback.
#[derive(Debug, Default)]
pub(crate) struct SubscriberFlag {
    canceled: AtomicBool,
}

impl SubscriberFlag {
    /// Marks the subscriber canceled. Returns `false` when it already was.
    pub(crate) fn cancel(&self) -> bool {
        !self.canceled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

/// State machine per entry: `absent → pending → {resolved, failed}`.
/// Terminal states are immutable until explicit invalidation.
pub(crate) enum EntryState<T> {
    Pending {
        // Registration order is delivery order.
        subscribers: Vec<Subscriber<T>>,
        abort: CancellationToken,
    },
    Resolved(T),
    Failed(FetchError),
}

pub(crate) struct CacheEntry<T> {
    pub(crate) state: EntryState<T>,
    pub(crate) last_accessed: Instant,
    pub(crate) settled_at: Option<Instant>,
}

impl<T> CacheEntry<T> {
    pub(crate) fn pending(first: Subscriber<T>, abort: CancellationToken) -> Self {
        Self {
            state: EntryState::Pending {
                subscribers: vec![first],
                abort,
            },
            last_accessed: Instant::now(),
            settled_at: None,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self.state, EntryState::Pending { .. })
    }

    /// Whether a terminal entry has outlived `ttl`. Pending entries never
    /// expire.
    pub(crate) fn is_expired(&self, ttl: Duration) -> bool {
        self.settled_at
            .map(|settled| settled.elapsed() > ttl)
            .unwrap_or(false)
    }
}

/// Caller-held token representing one subscriber's interest in one entry's
/// outcome.
///
/// Does not own the entry: dropping the handle changes nothing, and canceling
/// it never removes the entry (other subscribers may still be interested).
/// Pass it back to [`FetchCache::cancel`](super::FetchCache::cancel) or
/// [`FetchCache::abort`](super::FetchCache::abort).
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    fingerprint: Fingerprint,
    id: u64,
    flag: Arc<SubscriberFlag>,
}

impl SubscriptionHandle {
    pub(crate) fn new(fingerprint: Fingerprint, id: u64, flag: Arc<SubscriberFlag>) -> Self {
        Self {
            fingerprint,
            id,
            flag,
        }
    }

    /// Fingerprint of the entry this subscription is attached to.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.is_canceled()
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn flag(&self) -> &Arc<SubscriberFlag> {
        &self.flag
    }
}
