//! Session and transport core for a mobile sportsbook client.
//!
//! Three pieces, each usable on its own:
//!
//! - [`TokenAuthority`]: issues, caches, and refreshes anonymous-device
//!   bearer tokens; concurrent refreshes coalesce into one round trip.
//! - [`RequestGateway`]: executes declarative [`Endpoint`] descriptors,
//!   attaches the bearer token, and retries exactly once after a forced
//!   refresh when the backend answers 401.
//! - [`RealtimeSessionManager`]: one persistent socket session carrying
//!   call/reply and publish/subscribe traffic, with explicit
//!   destroy/reconnect semantics.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use oddsgate::{
//!     Endpoint, MemorySessionIdStore, Procedure, RealtimeConfig,
//!     RealtimeSessionManager, ReqwestTransport, RequestGateway, RestConfig,
//!     StaticUserAgent, TokenAuthority,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(ReqwestTransport::new());
//!     let tokens = Arc::new(TokenAuthority::new(
//!         transport.clone(),
//!         RestConfig::new("https://api.example.com"),
//!     ));
//!     let gateway = RequestGateway::new(transport, tokens);
//!
//!     let endpoint = Endpoint::get("https://api.example.com", "/api/v1/sports");
//!     let sports: serde_json::Value = gateway.execute("device-uuid", &endpoint).await?;
//!
//!     let manager = RealtimeSessionManager::new(
//!         RealtimeConfig::new("https://realtime.example.com:4433/rpc"),
//!         Arc::new(StaticUserAgent("App/1.0".to_string())),
//!         Arc::new(MemorySessionIdStore::default()),
//!     );
//!     manager.connect().await?;
//!     manager.watch_session_state().await?;
//!
//!     let profile: serde_json::Value = manager.call(&Procedure::GetProfile).await?;
//!
//!     Ok(())
//! }
//! ```

mod auth;
mod config;
mod endpoint;
mod error;
mod gateway;
mod identity;
mod transport;

pub mod rpc;

pub use auth::{AuthToken, TokenAuthority};
pub use config::{RealtimeConfig, RestConfig};
pub use endpoint::{CachePolicy, Endpoint, PreparedRequest};
pub use error::{RestError, RestResult, RpcError, RpcResult, NOT_LOGGED_IN_SIGNALS};
pub use gateway::RequestGateway;
pub use identity::{MemorySessionIdStore, SessionIdStore, StaticUserAgent, UserAgentSource};
pub use rpc::{
    Procedure, RealtimeSession, RealtimeSessionManager, RpcPayload, SessionEvent, SessionState,
    Subscription,
};
pub use transport::{HttpTransport, ReqwestTransport};
