//! HTTP transport seam.
//!
//! The gateway and token authority talk to the backend through
//! [`HttpTransport`] so the HTTP stack can be swapped (or scripted in
//! tests). The transport is stateless and safe for concurrent use.

use crate::endpoint::PreparedRequest;
use crate::error::{RestError, RestResult};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tracing::{debug, warn};

/// Executes prepared requests against the backend.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request, attaching the bearer header when one is supplied,
    /// and yield the raw response body on success.
    async fn send(&self, request: PreparedRequest) -> RestResult<Bytes>;
}

/// Map an HTTP status to a typed failure, or `None` for success.
fn classify_status(status: StatusCode) -> Option<RestError> {
    match status {
        StatusCode::UNAUTHORIZED => Some(RestError::Unauthorized),
        StatusCode::FORBIDDEN => Some(RestError::Forbidden),
        status if status.is_success() => None,
        _ => Some(RestError::Unknown),
    }
}

/// [`HttpTransport`] implementation backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: PreparedRequest) -> RestResult<Bytes> {
        debug!(method = %request.method, url = %request.url, "sending request");

        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(bearer) = &request.bearer {
            builder = builder.bearer_auth(bearer);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(url = %request.url, "request failed: {e}");
            RestError::Unknown
        })?;

        let status = response.status();
        if let Some(error) = classify_status(status) {
            warn!(url = %request.url, status = status.as_u16(), "request rejected");
            return Err(error);
        }

        response.bytes().await.map_err(|_| RestError::Unknown)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_unauthorized() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            Some(RestError::Unauthorized)
        );
    }

    #[test]
    fn test_classify_status_forbidden() {
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            Some(RestError::Forbidden)
        );
    }

    #[test]
    fn test_classify_status_success_range() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(classify_status(StatusCode::CREATED), None);
        assert_eq!(classify_status(StatusCode::NO_CONTENT), None);
    }

    #[test]
    fn test_classify_status_other_failures() {
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST),
            Some(RestError::Unknown)
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            Some(RestError::Unknown)
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            Some(RestError::Unknown)
        );
    }
}
