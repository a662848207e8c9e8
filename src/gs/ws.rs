//! The GS and operator-terminal WebSocket duplex loops (§4.F, §6): the two
//! cooperating tasks §5 calls out for a GS session, a read task that owns
//! dispatch/correlation and a write task serializing the outbox, the
//! latter spawned with [`crate::task::ChildTask`] so it is aborted the
//! instant the read task returns.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::auth::token::{TokenAuthority, TokenType, Validated, TEST_AUTH_SUBJECT};
use crate::gs::protocol::{
    ClientHello, ContentFrame, DictFrameHeader, FramedFrameHeader, HelloAck, InboundResponse, OperatorTerminalHello,
    OutboundPayload, TerminalMessage, CONNECT_RW, TERMINAL_PREFIX,
};
use crate::gs::registry::GsRegistry;
use crate::gs::session::GroundstationSession;
use crate::gs::terminal::TerminalRegistry;
use crate::task::ChildTask;

const CLOSE_AUTH_ERROR: u16 = 3000;
const CLOSE_PROTOCOL_ERROR: u16 = 1002;

async fn close_with(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        })))
        .await;
}

/// Drives one GS WebSocket connection end to end: hello handshake, then the
/// read/write task pair, until disconnect. Never returns an error — every
/// failure path is a logged close.
#[instrument(skip_all)]
pub async fn handle_gs_socket(
    mut socket: WebSocket,
    registry: Arc<GsRegistry>,
    terminals: Arc<TerminalRegistry>,
    token_authority: Arc<TokenAuthority>,
) {
    let hello = match socket.recv().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            close_with(&mut socket, CLOSE_PROTOCOL_ERROR, "expected hello frame").await;
            return;
        }
    };

    let hello: ClientHello = match serde_json::from_str(&hello) {
        Ok(hello) if hello.kind == "hello" => hello,
        _ => {
            close_with(&mut socket, CLOSE_PROTOCOL_ERROR, "malformed hello").await;
            return;
        }
    };

    let sub = match token_authority.validate(&hello.token, TokenType::Access) {
        Ok(Validated::Token(claims)) => claims.sub,
        Ok(Validated::TestBypass { .. }) => TEST_AUTH_SUBJECT,
        Err(error) => {
            warn!(gs_name = %hello.name, %error, "GS hello rejected: invalid token");
            close_with(&mut socket, CLOSE_AUTH_ERROR, "invalid token").await;
            return;
        }
    };

    let (session, outbox_rx) = GroundstationSession::new(sub, hello.name.clone());
    let session = Arc::new(session);
    registry.register(Arc::clone(&session));

    let ack = HelloAck { message: "OK", id: sub };
    let Ok(ack_json) = serde_json::to_string(&ack) else {
        registry.deregister(sub);
        return;
    };
    if socket.send(Message::Text(Utf8Bytes::from(ack_json))).await.is_err() {
        registry.deregister(sub);
        return;
    }

    info!(gs_id = %sub, gs_name = %hello.name, "groundstation connected");

    let (sink, mut stream) = socket.split();
    let _write_task = ChildTask::spawn(write_loop(sink, outbox_rx));

    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => handle_gs_text_frame(&session, &terminals, &text),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {} // binary/ping/pong carry no standalone meaning inbound from a GS
            Some(Err(error)) => {
                warn!(gs_id = %sub, %error, "groundstation websocket error");
                break;
            }
        }
    }

    info!(gs_id = %sub, "groundstation disconnected");
    session.fail_all_pending();
    terminals.close_all_for_session(sub);
    registry.deregister(sub);
}

fn handle_gs_text_frame(session: &Arc<GroundstationSession>, terminals: &TerminalRegistry, text: &str) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        debug!("dropping non-JSON frame from groundstation");
        return;
    };

    if let Ok(response) = serde_json::from_value::<InboundResponse>(value.clone()) {
        session.resolve(response.in_response_to, response.data, response.error);
        return;
    }

    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        debug!("dropping frame with no type or in_response_to");
        return;
    };

    if !kind.starts_with(TERMINAL_PREFIX) {
        debug!(%kind, "dropping unrecognized groundstation message type");
        return;
    }

    let Ok(message) = serde_json::from_value::<TerminalMessage>(value) else {
        debug!(%kind, "malformed terminal control message");
        return;
    };

    match message.kind.as_str() {
        "terminal/open" => terminals.open(
            session.id,
            message.terminal_id,
            message.terminal_name.unwrap_or_default(),
            message.terminal_read_only.unwrap_or(false),
        ),
        "terminal/close" => terminals.close(session.id, &message.terminal_id),
        "terminal/stdout" => terminals.stdout(session.id, &message.terminal_id, message.response.unwrap_or(Value::Null)),
        other => debug!(kind = %other, "unrecognized terminal control message"),
    }
}

/// The write task (§4.F "Write task"): dequeues the outbox in order and
/// serializes each item to one or more frames, preserving order on the
/// wire (§5 ordering guarantees).
async fn write_loop(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbox_rx: tokio::sync::mpsc::UnboundedReceiver<crate::gs::session::OutboxItem>,
) {
    while let Some((request_id, payload, proxy_header)) = outbox_rx.recv().await {
        for message in serialize_outbound(request_id, payload, proxy_header.as_ref()) {
            if sink.send(message).await.is_err() {
                return;
            }
        }
    }
}

fn serialize_outbound(
    request_id: Uuid,
    payload: OutboundPayload,
    proxy_header: Option<&crate::gs::protocol::ProxyHeader>,
) -> Vec<Message> {
    match payload {
        OutboundPayload::Dict(data) => {
            let header = DictFrameHeader {
                request_id,
                data: &data,
                proxy_header,
            };
            vec![json_message(&header)]
        }
        OutboundPayload::Framed(framed) => {
            let header = FramedFrameHeader {
                request_id,
                frames: framed.frames.len(),
                data: &framed.header_data,
                proxy_header,
            };
            let mut messages = vec![json_message(&header)];
            for frame in framed.frames {
                messages.push(match frame {
                    ContentFrame::Text(text) => Message::Text(Utf8Bytes::from(text)),
                    ContentFrame::Binary(bytes) => Message::Binary(bytes.into()),
                    ContentFrame::Json(value) => json_message(&value),
                });
            }
            messages
        }
    }
}

fn json_message<T: serde::Serialize>(value: &T) -> Message {
    match serde_json::to_string(value) {
        Ok(json) => Message::Text(Utf8Bytes::from(json)),
        Err(error) => {
            error!(%error, "failed to serialize outbound frame");
            Message::Text(Utf8Bytes::from_static("{}"))
        }
    }
}

/// Drives one operator terminal attach: hello, then a single task
/// multiplexing inbound operator frames and outbound broadcast fan-out via
/// `tokio::select!`, since unlike a GS session a terminal client has no
/// independent correlation state requiring a dedicated read task.
#[instrument(skip_all, fields(%gs_id, %terminal_id))]
pub async fn handle_terminal_socket(
    mut socket: WebSocket,
    gs_id: Uuid,
    terminal_id: String,
    registry: Arc<GsRegistry>,
    terminals: Arc<TerminalRegistry>,
    token_authority: Arc<TokenAuthority>,
) {
    let hello = match socket.recv().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            close_with(&mut socket, CLOSE_PROTOCOL_ERROR, "expected hello frame").await;
            return;
        }
    };

    let hello: OperatorTerminalHello = match serde_json::from_str(&hello) {
        Ok(hello) if hello.kind == "connect_ro" || hello.kind == "connect_rw" => hello,
        _ => {
            close_with(&mut socket, CLOSE_PROTOCOL_ERROR, "expected connect_ro/connect_rw hello").await;
            return;
        }
    };

    let userid = match token_authority.validate(&hello.token, TokenType::Access) {
        Ok(Validated::Token(claims)) => claims.sub,
        Ok(Validated::TestBypass { .. }) => TEST_AUTH_SUBJECT,
        Err(error) => {
            warn!(%error, "terminal hello rejected: invalid token");
            close_with(&mut socket, CLOSE_AUTH_ERROR, "invalid token").await;
            return;
        }
    };

    let want_rw = hello.kind == CONNECT_RW;
    let mut handle = match terminals.attach(gs_id, &terminal_id, want_rw) {
        Ok(handle) => handle,
        Err(error) => {
            warn!(%error, "terminal attach failed");
            close_with(&mut socket, CLOSE_PROTOCOL_ERROR, "terminal not found").await;
            return;
        }
    };

    let ack = serde_json::json!({ "message": "OK", "access": if handle.access == crate::gs::terminal::Access::ReadWrite { "rw" } else { "ro" } });
    if socket.send(json_message(&ack)).await.is_err() {
        terminals.detach(gs_id, &terminal_id, handle.client_id);
        return;
    }

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let Some(session) = registry.get(gs_id) else {
                            let error = serde_json::json!({ "error": 503, "details": "groundstation not connected" });
                            let _ = socket.send(json_message(&error)).await;
                            continue;
                        };
                        let author = userid.to_string();
                        if let Err(error) = terminals.stdin(&session, &terminal_id, handle.client_id, &author, &text) {
                            let details = match error {
                                crate::error::Error::InsufficientPermissions => "Terminal is read-only",
                                _ => "terminal stdin rejected",
                            };
                            let body = serde_json::json!({ "error": 401, "details": details });
                            let _ = socket.send(json_message(&body)).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(%error, "terminal websocket error");
                        break;
                    }
                }
            }
            broadcast = handle.rx.recv() => {
                match broadcast {
                    Some(value) => {
                        if socket.send(json_message(&value)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    terminals.detach(gs_id, &terminal_id, handle.client_id);
}
