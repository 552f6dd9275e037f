//! Authenticated REST request gateway.
//!
//! Executes endpoint descriptors through the transport, attaching a bearer
//! token from the [`TokenAuthority`]. An `unauthorized` failure is recovered
//! locally exactly once: one forced refresh, one retry. Everything else, and
//! a second failure, propagates unchanged.

use crate::auth::TokenAuthority;
use crate::endpoint::Endpoint;
use crate::error::{RestError, RestResult};
use crate::transport::HttpTransport;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Generic response envelope; every REST payload arrives under `data`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Builds, authenticates, and executes REST requests.
///
/// Holds no mutable state of its own; safe for unlimited concurrent callers.
pub struct RequestGateway {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenAuthority>,
}

impl RequestGateway {
    pub fn new(transport: Arc<dyn HttpTransport>, tokens: Arc<TokenAuthority>) -> Self {
        Self { transport, tokens }
    }

    /// Execute the endpoint and decode the payload out of its envelope.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        device_id: &str,
        endpoint: &Endpoint,
    ) -> RestResult<T> {
        let body = self.execute_raw(device_id, endpoint).await?;
        let envelope: Envelope<T> =
            serde_json::from_slice(&body).map_err(|_| RestError::InvalidResponse)?;
        Ok(envelope.data)
    }

    /// Execute the endpoint and return the raw response body.
    pub async fn execute_raw(&self, device_id: &str, endpoint: &Endpoint) -> RestResult<Bytes> {
        let request = endpoint.prepare()?;

        let token = self.tokens.valid_token(device_id, false).await?;
        let outcome = self
            .transport
            .send(request.clone().with_bearer(token.hash()))
            .await;

        match outcome {
            Err(RestError::Unauthorized) => {
                info!(url = %request.url(), "unauthorized, refreshing token and retrying once");
                let token = self.tokens.valid_token(device_id, true).await?;
                self.transport
                    .send(request.with_bearer(token.hash()))
                    .await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RestConfig;
    use crate::transport::mock::MockTransport;

    const TOKEN_1: &str = r#"{"token":"hash-1","expires_in":3600}"#;
    const TOKEN_2: &str = r#"{"token":"hash-2","expires_in":3600}"#;

    fn gateway(transport: Arc<MockTransport>) -> RequestGateway {
        let tokens = Arc::new(TokenAuthority::new(
            transport.clone(),
            RestConfig::new("https://api.example.com"),
        ));
        RequestGateway::new(transport, tokens)
    }

    fn profile_endpoint() -> Endpoint {
        Endpoint::get("https://api.example.com", "/api/v1/profile")
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Profile {
        name: String,
    }

    #[tokio::test]
    async fn test_execute_decodes_envelope() {
        let transport = Arc::new(MockTransport::new());
        transport.push(Ok(TOKEN_1));
        transport.push(Ok(r#"{"data":{"name":"punter"}}"#));
        let gateway = gateway(transport.clone());

        let profile: Profile = gateway
            .execute("device-1", &profile_endpoint())
            .await
            .unwrap();

        assert_eq!(profile, Profile { name: "punter".to_string() });
        // one auth round trip, one payload round trip
        assert_eq!(transport.call_count(), 2);
        assert_eq!(transport.seen_requests()[1].bearer(), Some("hash-1"));
    }

    #[tokio::test]
    async fn test_invalid_descriptor_fails_without_network() {
        let transport = Arc::new(MockTransport::new());
        let gateway = gateway(transport.clone());
        let endpoint = Endpoint::get("not a url", "/api/v1/profile");

        let result: RestResult<Profile> = gateway.execute("device-1", &endpoint).await;

        assert_eq!(result.unwrap_err(), RestError::InvalidRequest);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_triggers_one_refresh_and_one_retry() {
        let transport = Arc::new(MockTransport::new());
        transport.push(Ok(TOKEN_1));
        transport.push(Err(RestError::Unauthorized));
        transport.push(Ok(TOKEN_2));
        transport.push(Ok(r#"{"data":{"name":"punter"}}"#));
        let gateway = gateway(transport.clone());

        let profile: Profile = gateway
            .execute("device-1", &profile_endpoint())
            .await
            .unwrap();

        assert_eq!(profile.name, "punter");
        assert_eq!(transport.call_count(), 4);
        let seen = transport.seen_requests();
        assert_eq!(seen[1].bearer(), Some("hash-1"));
        assert_eq!(seen[3].bearer(), Some("hash-2"));
    }

    #[tokio::test]
    async fn test_second_unauthorized_propagates_without_third_attempt() {
        let transport = Arc::new(MockTransport::new());
        transport.push(Ok(TOKEN_1));
        transport.push(Err(RestError::Unauthorized));
        transport.push(Ok(TOKEN_2));
        transport.push(Err(RestError::Unauthorized));
        let gateway = gateway(transport.clone());

        let result: RestResult<Profile> = gateway.execute("device-1", &profile_endpoint()).await;

        assert_eq!(result.unwrap_err(), RestError::Unauthorized);
        assert_eq!(transport.call_count(), 4);
    }

    #[tokio::test]
    async fn test_retry_failure_propagates_unchanged() {
        let transport = Arc::new(MockTransport::new());
        transport.push(Ok(TOKEN_1));
        transport.push(Err(RestError::Unauthorized));
        transport.push(Ok(TOKEN_2));
        transport.push(Err(RestError::Forbidden));
        let gateway = gateway(transport.clone());

        let result: RestResult<Profile> = gateway.execute("device-1", &profile_endpoint()).await;

        assert_eq!(result.unwrap_err(), RestError::Forbidden);
        assert_eq!(transport.call_count(), 4);
    }

    #[tokio::test]
    async fn test_non_auth_failure_is_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.push(Ok(TOKEN_1));
        transport.push(Err(RestError::Forbidden));
        let gateway = gateway(transport.clone());

        let result: RestResult<Profile> = gateway.execute("device-1", &profile_endpoint()).await;

        assert_eq!(result.unwrap_err(), RestError::Forbidden);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_during_retry_propagates() {
        let transport = Arc::new(MockTransport::new());
        transport.push(Ok(TOKEN_1));
        transport.push(Err(RestError::Unauthorized));
        transport.push(Err(RestError::Unknown));
        let gateway = gateway(transport.clone());

        let result: RestResult<Profile> = gateway.execute("device-1", &profile_endpoint()).await;

        // the forced refresh itself failed; no retry request was sent
        assert_eq!(result.unwrap_err(), RestError::Unknown);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_undecodable_envelope() {
        let transport = Arc::new(MockTransport::new());
        transport.push(Ok(TOKEN_1));
        transport.push(Ok(r#"{"payload":{}}"#));
        let gateway = gateway(transport.clone());

        let result: RestResult<Profile> = gateway.execute("device-1", &profile_endpoint()).await;

        assert_eq!(result.unwrap_err(), RestError::InvalidResponse);
    }
}
