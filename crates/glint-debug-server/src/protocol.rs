//! Protocol Codec (component E): message classification, JSON-RPC-style
//! framing, and the error-code table. Not DAP — a small bespoke
//! request/notification/response shape.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

/// A parsed inbound message, classified per the rules in
/// [`classify`]/[`Incoming::from_json`].
#[derive(Debug, Clone)]
pub enum Incoming {
    Request(RequestMessage),
    Notify(NotifyMessage),
    Response(ResponseMessage),
}

#[derive(Debug, Clone)]
pub struct RequestMessage {
    pub id: Json,
    pub method: String,
    pub params: Json,
}

#[derive(Debug, Clone)]
pub struct NotifyMessage {
    pub method: String,
    pub params: Json,
}

#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub id: Json,
    pub result: Json,
}

impl Incoming {
    /// Classification: request iff it has `method` and `id`; notification
    /// iff it has `method` and no `id`; response iff it has `id` and no
    /// `method`. Anything else doesn't classify and is treated as an
    /// invalid request by the caller.
    pub fn from_json(msg: &Json) -> Option<Self> {
        let obj = msg.as_object()?;
        let has_method = obj.get("method").is_some_and(Json::is_string);
        let has_id = obj.contains_key("id");

        if has_method && has_id {
            Some(Self::Request(RequestMessage {
                id: obj["id"].clone(),
                method: obj["method"].as_str().unwrap().to_string(),
                params: params_of(obj),
            }))
        } else if has_method {
            Some(Self::Notify(NotifyMessage {
                method: obj["method"].as_str().unwrap().to_string(),
                params: params_of(obj),
            }))
        } else if has_id {
            Some(Self::Response(ResponseMessage {
                id: obj["id"].clone(),
                result: obj.get("result").cloned().unwrap_or(Json::Null),
            }))
        } else {
            None
        }
    }
}

/// Accepts either `params` or the legacy key `param`.
fn params_of(obj: &serde_json::Map<String, Json>) -> Json {
    obj.get("params").or_else(|| obj.get("param")).cloned().unwrap_or(Json::Null)
}

/// JSON-RPC-style error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Json>,
}

impl ResponseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code: code.code(), message: message.into(), data: None }
    }
}

/// What a dispatcher handler can fail with, before it's flattened onto the
/// wire as a [`ResponseError`]. Library-internal failures inside
/// `glint-debugger` use its own `Error` type and are translated into one of
/// these at the dispatch boundary; neither ever panics across the hook
/// callback.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    InvalidParams(String),
    #[error("{0}")]
    MethodNotFound(String),
}

impl From<DispatchError> for ResponseError {
    fn from(e: DispatchError) -> Self {
        let code = match &e {
            DispatchError::InvalidParams(_) => ErrorCode::InvalidParams.code(),
            DispatchError::MethodNotFound(_) => ErrorCode::MethodNotFound.code(),
        };
        Self { code, message: e.to_string(), data: None }
    }
}

/// Builds the wire JSON for an outbound response echoing `id`.
pub fn serialize_response(id: &Json, result: Json, error: Option<ResponseError>) -> Json {
    let mut obj = serde_json::Map::new();
    obj.insert("jsonrpc".into(), Json::String("2.0".into()));
    obj.insert("result".into(), result);
    if let Some(err) = error {
        obj.insert("error".into(), serde_json::to_value(err).unwrap_or(Json::Null));
    }
    obj.insert("id".into(), id.clone());
    Json::Object(obj)
}

/// Builds the wire JSON for an outbound notification.
pub fn serialize_notify(method: &str, params: Option<Json>) -> Json {
    let mut obj = serde_json::Map::new();
    obj.insert("jsonrpc".into(), Json::String("2.0".into()));
    obj.insert("method".into(), Json::String(method.to_string()));
    if let Some(p) = params {
        obj.insert("params".into(), p);
    }
    Json::Object(obj)
}

/// Frames one message for the line-oriented socket transport: JSON
/// followed by `\r\n`.
pub fn frame_line(msg: &Json) -> String {
    format!("{msg}\r\n")
}

/// The stdio multiplexing prefix: distinguishes protocol traffic from the
/// debugged program's own stdout on a shared stream. A received line
/// lacking this prefix is foreign program output, not a protocol message.
pub const STDIO_FRAME_PREFIX: &str = "lrdb_stream_message:";

/// Frames one message for a multiplexed stdio transport.
pub fn frame_stdio(msg: &Json) -> String {
    format!("{STDIO_FRAME_PREFIX}{msg}\r\n")
}

/// Strips the stdio framing prefix, if present. Lines without it are not
/// protocol traffic.
pub fn unframe_stdio(line: &str) -> Option<&str> {
    line.strip_prefix(STDIO_FRAME_PREFIX)
}
