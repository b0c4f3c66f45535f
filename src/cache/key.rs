//! Fingerprint generation.

use crate::request::FetchRequest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Deterministic cache key derived from request identity.
///
/// Two requests with the same fingerprint are identical for caching and
/// deduplication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    hash: String,
}

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

/// Derives [`Fingerprint`]s from (URL, method, headers-of-interest, body).
///
/// The request is rendered into a canonical `BTreeMap` and hashed with
/// SHA-256. By default every header participates in identity; an allowlist
/// narrows that to headers-of-interest. An optional salt partitions
/// otherwise-identical keys, e.g. per tenant.
#[derive(Debug, Clone, Default)]
pub struct FingerprintGenerator {
    header_allowlist: Option<Vec<String>>,
    salt: Option<String>,
}

impl FingerprintGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    /// Restricts identity to the named headers (case-insensitive).
    pub fn with_header_allowlist<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header_allowlist = Some(
            headers
                .into_iter()
                .map(|h| h.into().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    pub fn generate(&self, request: &FetchRequest) -> Fingerprint {
        let mut parts: BTreeMap<&str, String> = BTreeMap::new();
        parts.insert("method", request.method().as_str().to_string());
        parts.insert("url", request.url().as_str().to_string());

        let headers: BTreeMap<&String, &String> = request
            .headers()
            .iter()
            .filter(|(name, _)| match &self.header_allowlist {
                Some(allowed) => allowed.iter().any(|a| a == *name),
                None => true,
            })
            .collect();
        parts.insert(
            "headers",
            serde_json::to_string(&headers).unwrap_or_default(),
        );

        if let Some(body) = request.body() {
            parts.insert("body", hex_digest(body));
        }
        if let Some(ref salt) = self.salt {
            parts.insert("salt", salt.clone());
        }

        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        Fingerprint {
            hash: hex_digest(canonical.as_bytes()),
        }
    }
}

fn hex_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}
