//! Realtime session manager.
//!
//! Owns the one persistent session on behalf of the whole application.
//! The manager is an explicitly constructed, injectable value; callers
//! receive it through dependency injection rather than a hidden global.
//!
//! A session epoch is built lazily on `connect()`: the runtime user-agent
//! is derived once per epoch through the embedded-browser collaborator, and
//! the socket endpoint is scoped with the locally cached client-session id
//! when one exists. `destroy()` wipes the epoch including the derived
//! identity, so the next `connect()` rebuilds everything from scratch;
//! `disconnect()` only closes the socket.

use crate::config::RealtimeConfig;
use crate::error::{RpcError, RpcResult};
use crate::identity::{SessionIdStore, UserAgentSource};
use crate::rpc::messages::RpcPayload;
use crate::rpc::procedures::Procedure;
use crate::rpc::session::{RealtimeSession, SessionEvent, SessionState, Subscription};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Map the auxiliary event code of a session-state notification to the
/// lifecycle signal it stands for. Zero means the backend session is live;
/// every other code ends it.
fn session_event_for_code(code: Option<i64>) -> Option<SessionEvent> {
    match code {
        Some(0) => Some(SessionEvent::Connected),
        Some(_) => Some(SessionEvent::Ended),
        None => None,
    }
}

/// Owns and re-establishes the persistent realtime session.
pub struct RealtimeSessionManager {
    config: RealtimeConfig,
    user_agent_source: Arc<dyn UserAgentSource>,
    session_ids: Arc<dyn SessionIdStore>,

    // Serializes construction, teardown, and epoch access
    epoch: tokio::sync::Mutex<Option<RealtimeSession>>,

    // Derived once per epoch, wiped by destroy()
    cached_user_agent: parking_lot::Mutex<Option<String>>,

    events: broadcast::Sender<SessionEvent>,
}

impl RealtimeSessionManager {
    pub fn new(
        config: RealtimeConfig,
        user_agent_source: Arc<dyn UserAgentSource>,
        session_ids: Arc<dyn SessionIdStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            config,
            user_agent_source,
            session_ids,
            epoch: tokio::sync::Mutex::new(None),
            cached_user_agent: parking_lot::Mutex::new(None),
            events,
        }
    }

    /// Observe session lifecycle notifications.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current session state.
    pub async fn state(&self) -> SessionState {
        match self.epoch.lock().await.as_ref() {
            Some(session) => session.state(),
            None => SessionState::Disconnected,
        }
    }

    /// Establish the session, constructing a fresh epoch when necessary.
    pub async fn connect(&self) -> RpcResult<()> {
        let mut epoch = self.epoch.lock().await;

        if let Some(session) = epoch.as_ref() {
            if session.state() == SessionState::Connected {
                return Ok(());
            }
        }

        let user_agent = self.user_agent().await;
        let url = self.endpoint_url();
        info!(%url, "opening realtime session");

        let session = RealtimeSession::new(self.config.clone(), self.events.clone());
        session.connect(url, user_agent).await?;
        *epoch = Some(session);
        Ok(())
    }

    /// Invoke a catalog procedure and decode its reply.
    pub async fn call<T: DeserializeOwned>(&self, procedure: &Procedure) -> RpcResult<T> {
        let payload = self.call_raw(procedure).await?;
        payload.decode()
    }

    /// Invoke a catalog procedure and return the raw reply payload.
    pub async fn call_raw(&self, procedure: &Procedure) -> RpcResult<RpcPayload> {
        let session = self.current_session().await?;
        session
            .call(&procedure.uri(), procedure.args(), procedure.kwargs())
            .await
    }

    /// Subscribe to a topic with a raw payload handler.
    pub async fn subscribe<F>(
        &self,
        topic: &str,
        options: Option<Map<String, Value>>,
        handler: F,
    ) -> RpcResult<Subscription>
    where
        F: Fn(RpcPayload) + Send + Sync + 'static,
    {
        let session = self.current_session().await?;
        session.subscribe(topic, options, handler).await
    }

    /// Subscribe to backend session-state notifications.
    ///
    /// On success a `Connected` signal is broadcast; notifications whose
    /// auxiliary code marks the backend session as over broadcast `Ended`.
    pub async fn watch_session_state(&self) -> RpcResult<Subscription> {
        let session = self.current_session().await?;

        let events = self.events.clone();
        let subscription = session
            .subscribe(&Procedure::SessionStateChange.uri(), None, move |payload| {
                let code = payload
                    .kw_results
                    .as_ref()
                    .and_then(|kw| kw.get("code"))
                    .and_then(Value::as_i64);
                if let Some(event) = session_event_for_code(code) {
                    let _ = events.send(event);
                }
            })
            .await?;

        let _ = self.events.send(SessionEvent::Connected);
        Ok(subscription)
    }

    /// Best-effort logout; the result is ignored.
    pub async fn logout(&self, procedure: &Procedure) {
        let Ok(session) = self.current_session().await else {
            return;
        };
        let procedure = procedure.clone();
        tokio::spawn(async move {
            if let Err(e) = session
                .call(&procedure.uri(), procedure.args(), procedure.kwargs())
                .await
            {
                debug!("logout call failed: {e}");
            }
        });
    }

    /// Close the socket; the epoch and its derived identity survive.
    pub async fn disconnect(&self) {
        let epoch = self.epoch.lock().await;
        if let Some(session) = epoch.as_ref() {
            session.disconnect().await;
        }
    }

    /// Tear the session down entirely. The next `connect()` re-derives the
    /// user-agent and re-reads the cached client-session id.
    pub async fn destroy(&self) {
        let mut epoch = self.epoch.lock().await;
        if let Some(session) = epoch.take() {
            session.disconnect().await;
        }
        *self.cached_user_agent.lock() = None;
        info!("realtime session destroyed");
    }

    /// Destroy and immediately re-establish from a clean slate.
    pub async fn reconnect(&self) -> RpcResult<()> {
        self.destroy().await;
        self.connect().await
    }

    async fn current_session(&self) -> RpcResult<RealtimeSession> {
        let epoch = self.epoch.lock().await;
        match epoch.as_ref() {
            Some(session) if session.state() == SessionState::Connected => Ok(session.clone()),
            _ => Err(RpcError::NotConnected),
        }
    }

    async fn user_agent(&self) -> String {
        if let Some(cached) = self.cached_user_agent.lock().clone() {
            return cached;
        }
        let derived = self.user_agent_source.user_agent().await;
        debug!(user_agent = %derived, "derived runtime identity");
        *self.cached_user_agent.lock() = Some(derived.clone());
        derived
    }

    fn endpoint_url(&self) -> String {
        match self.session_ids.cached_session_id() {
            Some(cid) => format!("{}?cid={cid}", self.config.url),
            None => self.config.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{MemorySessionIdStore, StaticUserAgent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingUserAgent {
        count: AtomicUsize,
    }

    #[async_trait]
    impl UserAgentSource for CountingUserAgent {
        async fn user_agent(&self) -> String {
            self.count.fetch_add(1, Ordering::SeqCst);
            "App/1.0 (test)".to_string()
        }
    }

    fn manager_with(
        source: Arc<dyn UserAgentSource>,
        cid: Option<String>,
    ) -> RealtimeSessionManager {
        RealtimeSessionManager::new(
            RealtimeConfig::new("https://realtime.example.com:4433/rpc"),
            source,
            Arc::new(MemorySessionIdStore::new(cid)),
        )
    }

    fn manager() -> RealtimeSessionManager {
        manager_with(Arc::new(StaticUserAgent("App/1.0".to_string())), None)
    }

    #[test]
    fn test_session_event_for_code() {
        assert_eq!(session_event_for_code(Some(0)), Some(SessionEvent::Connected));
        assert_eq!(session_event_for_code(Some(1)), Some(SessionEvent::Ended));
        assert_eq!(session_event_for_code(Some(3)), Some(SessionEvent::Ended));
        assert_eq!(session_event_for_code(None), None);
    }

    #[tokio::test]
    async fn test_call_without_session_fails_fast() {
        let manager = manager();

        let result: RpcResult<serde_json::Value> = manager.call(&Procedure::GetProfile).await;

        assert_eq!(result.unwrap_err(), RpcError::NotConnected);
    }

    #[tokio::test]
    async fn test_subscribe_without_session_fails_fast() {
        let manager = manager();

        let result = manager.subscribe("/sessionStateChange", None, |_| {}).await;

        assert!(matches!(result, Err(RpcError::NotConnected)));
    }

    #[tokio::test]
    async fn test_watch_session_state_without_session_fails_fast() {
        let manager = manager();
        let mut events = manager.events();

        let result = manager.watch_session_state().await;

        assert!(matches!(result, Err(RpcError::NotConnected)));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_initial_state_is_disconnected() {
        let manager = manager();
        assert_eq!(manager.state().await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_logout_without_session_is_a_no_op() {
        let manager = manager();
        manager.logout(&Procedure::Logout).await;
    }

    #[tokio::test]
    async fn test_destroy_without_session_is_a_no_op() {
        let manager = manager();
        manager.destroy().await;
        assert_eq!(manager.state().await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_user_agent_derived_once_per_epoch() {
        let source = Arc::new(CountingUserAgent { count: AtomicUsize::new(0) });
        let manager = manager_with(source.clone(), None);

        manager.user_agent().await;
        manager.user_agent().await;

        assert_eq!(source.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_destroy_forces_identity_re_derivation() {
        let source = Arc::new(CountingUserAgent { count: AtomicUsize::new(0) });
        let manager = manager_with(source.clone(), None);

        manager.user_agent().await;
        manager.destroy().await;
        manager.user_agent().await;

        assert_eq!(source.count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_endpoint_url_scoped_by_cached_session_id() {
        let manager = manager_with(
            Arc::new(StaticUserAgent("App/1.0".to_string())),
            Some("cid-123".to_string()),
        );

        assert_eq!(
            manager.endpoint_url(),
            "https://realtime.example.com:4433/rpc?cid=cid-123"
        );
    }

    #[test]
    fn test_endpoint_url_without_cached_session_id() {
        let manager = manager();
        assert_eq!(manager.endpoint_url(), "https://realtime.example.com:4433/rpc");
    }
}
