//! Wire frames for the realtime session protocol.
//!
//! JSON frames over one bidirectional stream. The handshake is
//! `Hello`/`Welcome`; calls and subscriptions are correlated by client-side
//! request ids; pushed events are correlated by server subscription ids.

use crate::error::{RpcError, RpcResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Frames sent from client to server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Open the session, announcing the runtime identity
    Hello { user_agent: String },

    /// Invoke a procedure
    Call {
        id: u64,
        procedure: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<Vec<Value>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        kwargs: Option<Map<String, Value>>,
    },

    /// Subscribe to a topic
    Subscribe {
        id: u64,
        topic: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        options: Option<Map<String, Value>>,
    },

    /// Drop a subscription
    Unsubscribe { id: u64, subscription: u64 },

    /// Keepalive
    Ping { seq: u64 },

    /// Close the session cleanly
    Goodbye { reason: String },
}

/// Frames received from server
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Session opened; carries the transport session id
    Welcome {
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Successful call reply
    Result {
        id: u64,
        #[serde(default)]
        results: Option<Vec<Value>>,
        #[serde(default)]
        kw_results: Option<Map<String, Value>>,
    },

    /// Application-level call failure
    CallError { id: u64, message: String },

    /// Subscription confirmed
    Subscribed { id: u64, subscription: u64 },

    /// Subscription denied
    SubscribeError { id: u64, message: String },

    /// Unsubscription confirmed
    Unsubscribed { id: u64 },

    /// Pushed notification on a subscribed topic
    Event {
        subscription: u64,
        #[serde(default)]
        results: Option<Vec<Value>>,
        #[serde(default)]
        kw_results: Option<Map<String, Value>>,
    },

    /// Keepalive reply
    Pong { seq: u64 },

    /// Server is closing the session
    Goodbye { reason: String },

    /// Server refused the session
    Abort {
        reason: String,
        #[serde(default)]
        code: Option<u16>,
    },
}

/// The keyed/positional payload pair carried by replies and events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcPayload {
    pub results: Option<Vec<Value>>,
    pub kw_results: Option<Map<String, Value>>,
}

impl RpcPayload {
    pub fn new(results: Option<Vec<Value>>, kw_results: Option<Map<String, Value>>) -> Self {
        Self { results, kw_results }
    }

    /// Decode into the requested type with the ordered fallback: keyed
    /// results first, positional results second, `NoResultsReceived` when
    /// neither is present.
    pub fn decode<T: DeserializeOwned>(self) -> RpcResult<T> {
        let value = if let Some(kw_results) = self.kw_results {
            Value::Object(kw_results)
        } else if let Some(results) = self.results {
            Value::Array(results)
        } else {
            return Err(RpcError::NoResultsReceived);
        };

        serde_json::from_value(value).map_err(|e| RpcError::Decoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_hello_serialization() {
        let frame = ClientFrame::Hello {
            user_agent: "App/1.0".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"type":"hello","user_agent":"App/1.0"}"#);
    }

    #[test]
    fn test_call_serialization_with_kwargs() {
        let mut kwargs = Map::new();
        kwargs.insert("slug".to_string(), Value::String("roulette".to_string()));
        let frame = ClientFrame::Call {
            id: 7,
            procedure: "/casino#getLaunchUrl".to_string(),
            args: None,
            kwargs: Some(kwargs),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            json,
            r#"{"type":"call","id":7,"procedure":"/casino#getLaunchUrl","kwargs":{"slug":"roulette"}}"#
        );
    }

    #[test]
    fn test_call_serialization_omits_empty_payloads() {
        let frame = ClientFrame::Call {
            id: 1,
            procedure: "/user/account#getProfile".to_string(),
            args: None,
            kwargs: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            json,
            r#"{"type":"call","id":1,"procedure":"/user/account#getProfile"}"#
        );
    }

    #[test]
    fn test_subscribe_serialization() {
        let frame = ClientFrame::Subscribe {
            id: 3,
            topic: "/sessionStateChange".to_string(),
            options: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            json,
            r#"{"type":"subscribe","id":3,"topic":"/sessionStateChange"}"#
        );
    }

    #[test]
    fn test_welcome_deserialization() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"welcome","session_id":"ts-42"}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Welcome {
                session_id: Some("ts-42".to_string())
            }
        );
    }

    #[test]
    fn test_welcome_without_session_id() {
        let frame: ServerFrame = serde_json::from_str(r#"{"type":"welcome"}"#).unwrap();
        assert_eq!(frame, ServerFrame::Welcome { session_id: None });
    }

    #[test]
    fn test_result_deserialization() {
        let frame: ServerFrame = serde_json::from_str(
            r#"{"type":"result","id":7,"kw_results":{"url":"https://play.example.com"}}"#,
        )
        .unwrap();
        match frame {
            ServerFrame::Result { id, results, kw_results } => {
                assert_eq!(id, 7);
                assert!(results.is_none());
                assert_eq!(
                    kw_results.unwrap().get("url"),
                    Some(&Value::String("https://play.example.com".to_string()))
                );
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_event_deserialization() {
        let frame: ServerFrame = serde_json::from_str(
            r#"{"type":"event","subscription":9,"kw_results":{"code":1}}"#,
        )
        .unwrap();
        match frame {
            ServerFrame::Event { subscription, kw_results, .. } => {
                assert_eq!(subscription, 9);
                assert_eq!(kw_results.unwrap().get("code"), Some(&Value::from(1)));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_abort_deserialization() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"abort","reason":"shutting down","code":503}"#)
                .unwrap();
        assert_eq!(
            frame,
            ServerFrame::Abort {
                reason: "shutting down".to_string(),
                code: Some(503),
            }
        );
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct LaunchInfo {
        url: String,
    }

    #[test]
    fn test_decode_prefers_keyed_results() {
        let mut kw = Map::new();
        kw.insert("url".to_string(), Value::String("https://a".to_string()));
        let payload = RpcPayload::new(
            Some(vec![Value::String("ignored".to_string())]),
            Some(kw),
        );

        let decoded: LaunchInfo = payload.decode().unwrap();
        assert_eq!(decoded.url, "https://a");
    }

    #[test]
    fn test_decode_falls_back_to_positional() {
        let payload = RpcPayload::new(Some(vec![Value::from(1), Value::from(2)]), None);
        let decoded: Vec<u32> = payload.decode().unwrap();
        assert_eq!(decoded, vec![1, 2]);
    }

    #[test]
    fn test_decode_without_any_payload() {
        let payload = RpcPayload::default();
        let result: RpcResult<Vec<u32>> = payload.decode();
        assert_eq!(result.unwrap_err(), RpcError::NoResultsReceived);
    }

    #[test]
    fn test_decode_type_mismatch() {
        let mut kw = Map::new();
        kw.insert("url".to_string(), Value::from(5));
        let payload = RpcPayload::new(None, Some(kw));

        let result: RpcResult<LaunchInfo> = payload.decode();
        assert!(matches!(result, Err(RpcError::Decoding(_))));
    }
}
