//! Realtime RPC session: wire frames, procedure catalog, session, manager.

mod manager;
mod messages;
mod procedures;
mod session;

pub use manager::RealtimeSessionManager;
pub use messages::{ClientFrame, RpcPayload, ServerFrame};
pub use procedures::Procedure;
pub use session::{EventHandler, RealtimeSession, SessionEvent, SessionState, Subscription};
