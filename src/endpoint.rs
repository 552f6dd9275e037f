//! Declarative REST endpoint descriptors.
//!
//! An [`Endpoint`] is an immutable description of one REST operation. Call
//! sites build one per request; the gateway turns it into a
//! [`PreparedRequest`] exactly once. Anything wrong with the descriptor
//! surfaces at that point as [`RestError::InvalidRequest`], before any
//! network access.

use crate::error::{RestError, RestResult};
use reqwest::{Method, Url};
use serde::Serialize;
use std::time::Duration;

/// Response caching behavior requested for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Let the HTTP stack apply its protocol defaults
    #[default]
    ProtocolDefault,
    /// Ask intermediaries not to store the response
    NoStore,
}

/// Immutable description of one REST operation.
#[derive(Debug, Clone)]
pub struct Endpoint {
    base_url: String,
    path: String,
    method: Method,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    cache_policy: CachePolicy,
    timeout: Option<Duration>,
}

impl Endpoint {
    /// Create a descriptor with an explicit method
    pub fn new(method: Method, base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: path.into(),
            method,
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            cache_policy: CachePolicy::default(),
            timeout: None,
        }
    }

    /// Create a GET descriptor
    pub fn get(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(Method::GET, base_url, path)
    }

    /// Create a POST descriptor
    pub fn post(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(Method::POST, base_url, path)
    }

    /// Append a query item
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a JSON body, setting the content type
    pub fn json_body<T: Serialize>(mut self, value: &T) -> RestResult<Self> {
        let bytes = serde_json::to_vec(value).map_err(|_| RestError::InvalidRequest)?;
        self.body = Some(bytes);
        self.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        Ok(self)
    }

    /// Attach raw body bytes
    pub fn body(mut self, bytes: Vec<u8>) -> Self {
        self.body = Some(bytes);
        self
    }

    /// Set the cache policy
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate the descriptor and produce the request to execute.
    ///
    /// Fails with [`RestError::InvalidRequest`] when the URL does not parse.
    pub fn prepare(&self) -> RestResult<PreparedRequest> {
        let base = Url::parse(&self.base_url).map_err(|_| RestError::InvalidRequest)?;
        let mut url = base.join(&self.path).map_err(|_| RestError::InvalidRequest)?;

        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query {
                pairs.append_pair(name, value);
            }
        }

        let mut headers = self.headers.clone();
        if self.cache_policy == CachePolicy::NoStore {
            headers.push(("Cache-Control".to_string(), "no-store".to_string()));
        }

        Ok(PreparedRequest {
            method: self.method.clone(),
            url,
            headers,
            body: self.body.clone(),
            timeout: self.timeout,
            bearer: None,
        })
    }
}

/// A validated request ready for the transport.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) bearer: Option<String>,
}

impl PreparedRequest {
    /// Attach a bearer credential to the request
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// The resolved request URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request body, if any
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// The bearer credential, if one was attached
    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }
}
