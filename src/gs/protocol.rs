//! GS WebSocket wire protocol (§6). JSON over text frames, with binary
//! frames used only for a `FramedContent`'s binary-typed content frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientHello {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HelloAck {
    pub message: &'static str,
    pub id: Uuid,
}

/// Attribution metadata attached to outbound requests (§4.F, §6) so the GS
/// can attribute who caused the action.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyHeader {
    pub origin: String,
    pub authenticated_user: Uuid,
}

/// A single content frame of a `FramedContent`, in declared order. The wire
/// type (text / binary / JSON) is preserved per §4.F/§6.
#[derive(Debug, Clone)]
pub enum ContentFrame {
    Text(String),
    Binary(Vec<u8>),
    Json(Value),
}

/// A multi-frame outbound payload: one JSON header naming how many content
/// frames follow, then exactly that many frames, in order.
#[derive(Debug, Clone)]
pub struct FramedContent {
    pub header_data: Value,
    pub frames: Vec<ContentFrame>,
}

/// What a session enqueues onto its outbox (§3 `GroundstationSession`).
#[derive(Debug, Clone)]
pub enum OutboundPayload {
    Dict(Value),
    Framed(FramedContent),
}

#[derive(Debug, Clone, Serialize)]
pub struct DictFrameHeader<'a> {
    pub request_id: Uuid,
    pub data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_header: Option<&'a ProxyHeader>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FramedFrameHeader<'a> {
    pub request_id: Uuid,
    pub frames: usize,
    pub data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_header: Option<&'a ProxyHeader>,
}

/// An inbound message that carries a response to a previously sent request.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundResponse {
    pub in_response_to: Uuid,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// GS-originated terminal control messages (§6); `type` is always
/// `terminal/<cmd>`.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub terminal_id: String,
    #[serde(default)]
    pub terminal_name: Option<String>,
    #[serde(default)]
    pub terminal_read_only: Option<bool>,
    #[serde(default)]
    pub response: Option<Value>,
}

pub const TERMINAL_PREFIX: &str = "terminal/";

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorTerminalHello {
    #[serde(rename = "type")]
    pub kind: String,
    pub token: String,
}

pub const CONNECT_RO: &str = "connect_ro";
pub const CONNECT_RW: &str = "connect_rw";
