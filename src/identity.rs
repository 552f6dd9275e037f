//! External collaborator seams for the realtime session.

use async_trait::async_trait;
use parking_lot::Mutex;

/// Supplies the runtime user-agent string.
///
/// In the application this is backed by an embedded browser that evaluates
/// and returns `navigator.userAgent`; the session manager invokes it once
/// per construction epoch.
#[async_trait]
pub trait UserAgentSource: Send + Sync {
    async fn user_agent(&self) -> String;
}

/// A fixed user-agent string, for tests and headless embeddings.
pub struct StaticUserAgent(pub String);

#[async_trait]
impl UserAgentSource for StaticUserAgent {
    async fn user_agent(&self) -> String {
        self.0.clone()
    }
}

/// Read-only access to the locally persisted client-session id that scopes
/// the socket endpoint. Written elsewhere in the application; this core
/// only consumes it.
pub trait SessionIdStore: Send + Sync {
    fn cached_session_id(&self) -> Option<String>;
}

/// In-memory store, for tests and embeddings that manage the id themselves.
#[derive(Default)]
pub struct MemorySessionIdStore {
    id: Mutex<Option<String>>,
}

impl MemorySessionIdStore {
    pub fn new(id: Option<String>) -> Self {
        Self { id: Mutex::new(id) }
    }
}

impl SessionIdStore for MemorySessionIdStore {
    fn cached_session_id(&self) -> Option<String> {
        self.id.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_user_agent() {
        let source = StaticUserAgent("App/1.0 (test)".to_string());
        assert_eq!(source.user_agent().await, "App/1.0 (test)");
    }

    #[test]
    fn test_memory_store() {
        let empty = MemorySessionIdStore::default();
        assert!(empty.cached_session_id().is_none());

        let primed = MemorySessionIdStore::new(Some("cid-123".to_string()));
        assert_eq!(primed.cached_session_id(), Some("cid-123".to_string()));
    }
}
