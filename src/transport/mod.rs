//! 传输层模块：定义缓存之上的可中止 HTTP 传输抽象。
//!
//! # Transport Module
//!
//! The cache is transport-agnostic: anything that can turn a
//! [`FetchRequest`] into a status code plus body bytes, and that honors a
//! best-effort abort signal, can sit underneath it.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Transport`] | Trait for sending a request with an abort token |
//! | [`HttpTransport`] | reqwest-backed implementation |
//! | [`RawResponse`] | Undecoded status + body handed back to the cache |
//! | [`TransportError`] | Failures below the decoding layer |
//!
//! Timeouts belong here, not in the cache: configure them on the concrete
//! transport (see [`HttpTransport::with_timeout`]).

mod http;

pub use http::HttpTransport;

use crate::request::FetchRequest;
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Undecoded HTTP response as seen by the cache.
///
/// Decoding into the caller's type happens in the cache's completion
/// handling, so transports stay payload-agnostic.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request aborted")]
    Aborted,

    #[error("Transport error: {0}")]
    Other(String),
}

/// Collaborator that performs the actual network operation.
///
/// Implementations must treat `abort` as best-effort: when the token fires
/// they should stop early and return [`TransportError::Aborted`], but a
/// response that races past the signal is also acceptable.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &FetchRequest,
        abort: CancellationToken,
    ) -> std::result::Result<RawResponse, TransportError>;

    fn name(&self) -> &'static str;
}
