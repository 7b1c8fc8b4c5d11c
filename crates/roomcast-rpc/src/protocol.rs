//! JSON-RPC 2.0 protocol types and the roomcast method vocabulary.
//!
//! Every remote call is a JSON-RPC request whose params are an
//! [`Invocation`]: the target object name, the security session the call is
//! made under, and the method arguments.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::security::{Credentials, Identity};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const AUTHENTICATION_FAILED: i32 = -32010;
pub const NOT_AUTHENTICATED: i32 = -32011;
pub const NOT_A_MEMBER: i32 = -32012;
pub const OBJECT_NOT_FOUND: i32 = -32013;

/// Method names understood by the chat server, plus the client callback.
pub mod methods {
    pub const HANDSHAKE: &str = "handshake";
    pub const TEST: &str = "Test";
    pub const ENTER_TO_CHAT_ROOM: &str = "EnterToChatRoom";
    pub const SEND_MESSAGE: &str = "SendMessage";
    /// Server-to-client notification carrying one broadcast.
    pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
}

/// Well-known object the room entry point is published under.
pub const CHAT_SERVER_OBJECT: &str = "ChatServer.rem";

/// Object the shared room is published under once a member has entered.
pub const CHAT_ROOM_OBJECT: &str = "ChatRoom.rem";

/// JSON-RPC 2.0 Request ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: RequestId,
}

impl Response {
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    #[must_use]
    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC 2.0 Notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 Error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request")
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    #[must_use]
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::new(AUTHENTICATION_FAILED, reason)
    }

    #[must_use]
    pub fn not_authenticated() -> Self {
        Self::new(NOT_AUTHENTICATED, "Handshake required before invoking methods")
    }

    #[must_use]
    pub fn not_a_member() -> Self {
        Self::new(NOT_A_MEMBER, "Not a member of the chat room")
    }

    #[must_use]
    pub fn object_not_found(object: &str) -> Self {
        Self::new(OBJECT_NOT_FOUND, format!("Object not found: {object}"))
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Incoming message that could be a request, response, or notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    /// Method and params if this message is fire-and-forget.
    ///
    /// The untagged representation decodes an id-less request and a
    /// notification identically, so both are accepted.
    #[must_use]
    pub fn as_notification(&self) -> Option<(&str, Option<&Value>)> {
        match self {
            Message::Notification(n) => Some((n.method.as_str(), n.params.as_ref())),
            Message::Request(r) if r.id.is_none() => Some((r.method.as_str(), r.params.as_ref())),
            _ => None,
        }
    }
}

/// Parameters of the connection-level security handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandshakeParams {
    /// Security session the connection is established under; `None` asks
    /// for an anonymous connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    #[serde(default)]
    pub credentials: Credentials,
}

/// Handshake reply: who the server is and who it thinks we are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResult {
    /// Random id the server process picks at startup. A change between two
    /// connections to the same host means the server was restarted.
    pub server_instance: Uuid,
    pub identity: Identity,
}

/// Envelope for every object method call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation<A> {
    pub object: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_session: Option<String>,
    pub args: A,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterParams {
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageParams {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageResult {
    /// Members the broadcast reached, sender included.
    pub delivered: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveMessageParams {
    pub message: String,
    pub nickname: String,
}

/// Wire form of a room handle: the object the room is published under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRef {
    pub object: String,
    pub room: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::new("Test", Some(serde_json::json!({"object": "ChatServer.rem"})), 1.into());
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"Test\""));
        assert!(json.contains("\"id\":1"));
    }

    #[test]
    fn test_request_without_params_omits_field() {
        let req = Request::new("Test", None, 1.into());
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("\"params\""));
    }

    #[test]
    fn test_response_error_omits_result() {
        let resp = Response::error(1.into(), RpcError::method_not_found("Nope"));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"result\""));
        assert!(json.contains("-32601"));
        assert!(json.contains("Nope"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let notif = Notification::new(methods::RECEIVE_MESSAGE, None);
        let json = serde_json::to_string(&notif).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_as_notification_accepts_idless_request() {
        let raw = r#"{"jsonrpc":"2.0","method":"ReceiveMessage","params":{"message":"hi","nickname":"bob"}}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        let (method, params) = msg.as_notification().expect("notification");
        assert_eq!(method, methods::RECEIVE_MESSAGE);
        let params: ReceiveMessageParams =
            serde_json::from_value(params.unwrap().clone()).unwrap();
        assert_eq!(params.nickname, "bob");
    }

    #[test]
    fn test_as_notification_rejects_request_with_id() {
        let msg = Message::Request(Request::new("Test", None, 3.into()));
        assert!(msg.as_notification().is_none());
    }

    #[test]
    fn test_invocation_skips_absent_security_session() {
        let inv = Invocation {
            object: CHAT_SERVER_OBJECT.to_string(),
            security_session: None,
            args: EnterParams {
                nickname: "alice".into(),
            },
        };
        let json = serde_json::to_value(&inv).unwrap();
        assert_eq!(json["object"], "ChatServer.rem");
        assert_eq!(json["args"]["nickname"], "alice");
        assert!(json.get("security_session").is_none());
    }

    #[test]
    fn test_request_id_display() {
        assert_eq!(RequestId::Number(42).to_string(), "42");
        assert_eq!(RequestId::from("abc").to_string(), "abc");
    }

    #[test]
    fn test_rpc_error_display() {
        let err = RpcError::not_a_member();
        assert!(err.to_string().contains("-32012"));
    }
}
