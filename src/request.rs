//! Request descriptors.
//!
//! A [`FetchRequest`] captures everything that identifies an HTTP request for
//! caching purposes: method, URL, headers and body. The URL is validated at
//! construction so fingerprinting and the transport never see a malformed one.

use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use url::Url;

/// HTTP method of a [`FetchRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Descriptor of one HTTP request, used both as cache identity and as the
/// input handed to the transport.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    url: Url,
    // BTreeMap keeps header iteration order canonical for fingerprinting.
    headers: BTreeMap<String, String>,
    body: Option<Bytes>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl AsRef<str>) -> Result<Self> {
        let url = Url::parse(url.as_ref()).map_err(|source| Error::InvalidUrl {
            url: url.as_ref().to_string(),
            source,
        })?;
        Ok(Self {
            method,
            url,
            headers: BTreeMap::new(),
            body: None,
        })
    }

    /// Shorthand for the common case, a GET with no body.
    pub fn get(url: impl AsRef<str>) -> Result<Self> {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl AsRef<str>) -> Result<Self> {
        Self::new(Method::Post, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `body` as JSON and sets the matching content type.
    pub fn with_json_body<B: Serialize>(self, body: &B) -> Result<Self> {
        let data = serde_json::to_vec(body)?;
        Ok(self
            .with_header("content-type", "application/json")
            .with_body(data))
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}
