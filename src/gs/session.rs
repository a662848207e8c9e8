//! `GroundstationSession` (§3, §4.F): per-session outbox, pending-response
//! map, and the single busy slot that serializes client-originated control
//! calls. Sessions exclusively own their `outbox` and `pending` (§3's
//! ownership note); only the read task writes into `pending`, only the
//! call initiator deletes from it (§5).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::gs::protocol::{OutboundPayload, ProxyHeader};

const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum ResponseOutcome {
    Data(Value),
    Error(Value),
}

pub type OutboxItem = (Uuid, OutboundPayload, Option<ProxyHeader>);

pub struct GroundstationSession {
    pub id: Uuid,
    pub name: String,
    outbox_tx: mpsc::UnboundedSender<OutboxItem>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<ResponseOutcome>>>,
    /// A one-slot async mutex used only via `try_lock`: "busy" means held,
    /// not awaited-on, per §4.F step 1 ("already busy -> 503 immediately").
    busy: tokio::sync::Mutex<()>,
    pub terminals: Mutex<HashSet<String>>,
}

impl GroundstationSession {
    pub fn new(id: Uuid, name: String) -> (Self, mpsc::UnboundedReceiver<OutboxItem>) {
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let session = Self {
            id,
            name,
            outbox_tx,
            pending: Mutex::new(HashMap::new()),
            busy: tokio::sync::Mutex::new(()),
            terminals: Mutex::new(HashSet::new()),
        };
        (session, outbox_rx)
    }

    /// §4.F `send_control`: acquire `busy` atomically (503 if already
    /// held), enqueue, wait up to 60s, release `busy` on every exit path
    /// (via the guard's `Drop`).
    pub async fn send_control(&self, payload: OutboundPayload, proxy_header: Option<ProxyHeader>) -> Result<Value> {
        let _busy_guard = self
            .busy
            .try_lock()
            .map_err(|_| Error::ServiceUnavailable(format!("groundstation {} is busy", self.id)))?;

        let request_id = Uuid::new_v4();
        let (ready_tx, ready_rx) = oneshot::channel();
        self.pending.lock().insert(request_id, ready_tx);

        if self.outbox_tx.send((request_id, payload, proxy_header)).is_err() {
            self.pending.lock().remove(&request_id);
            return Err(Error::ServiceUnavailable(format!("groundstation {} is disconnected", self.id)));
        }

        match tokio::time::timeout(CONTROL_TIMEOUT, ready_rx).await {
            Ok(Ok(ResponseOutcome::Data(data))) => Ok(data),
            Ok(Ok(ResponseOutcome::Error(error))) => Err(Error::UpstreamError(error.to_string())),
            Ok(Err(_)) => Err(Error::UpstreamError(format!("groundstation {} disconnected mid-request", self.id))),
            Err(_elapsed) => {
                self.pending.lock().remove(&request_id);
                Err(Error::UpstreamError("timed out".to_owned()))
            }
        }
    }

    /// Called by the read task for every inbound `in_response_to` message.
    /// Unknown or already-resolved ids are dropped silently (§8
    /// "Correlation": not logged as errors).
    pub fn resolve(&self, in_response_to: Uuid, data: Option<Value>, error: Option<Value>) {
        let Some(sender) = self.pending.lock().remove(&in_response_to) else {
            return;
        };
        let outcome = match error {
            Some(error) => ResponseOutcome::Error(error),
            None => ResponseOutcome::Data(data.unwrap_or(Value::Null)),
        };
        let _ = sender.send(outcome);
    }

    /// Called on disconnect: every outstanding pending response resolves to
    /// a connection-lost error so callers don't hang (§4.F, §5).
    pub fn fail_all_pending(&self) {
        for (_, sender) in self.pending.lock().drain() {
            let _ = sender.send(ResponseOutcome::Error(json!({ "details": "groundstation disconnected" })));
        }
    }

    pub fn enqueue(&self, payload: OutboundPayload, proxy_header: Option<ProxyHeader>) {
        let request_id = Uuid::new_v4();
        let _ = self.outbox_tx.send((request_id, payload, proxy_header));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_control_calls_one_wins_busy() {
        let (session, mut outbox_rx) = GroundstationSession::new(Uuid::new_v4(), "gs-1".to_owned());
        let session = std::sync::Arc::new(session);

        // Drain the outbox and immediately resolve, so the first call can complete.
        let resolver = {
            let session = std::sync::Arc::clone(&session);
            tokio::spawn(async move {
                let (request_id, _, _) = outbox_rx.recv().await.unwrap();
                session.resolve(request_id, Some(json!({"pong": 1})), None);
            })
        };

        let first = session.send_control(OutboundPayload::Dict(json!({"type": "ping"})), None);
        let second = session.send_control(OutboundPayload::Dict(json!({"type": "ping"})), None);

        let (first, second) = tokio::join!(first, second);
        resolver.await.unwrap();

        let results = [first, second];
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        let busy_count = results.iter().filter(|r| matches!(r, Err(Error::ServiceUnavailable(_)))).count();
        assert_eq!(ok_count, 1);
        assert_eq!(busy_count, 1);
    }

    #[tokio::test]
    async fn disconnect_fails_pending_responses() {
        let (session, _outbox_rx) = GroundstationSession::new(Uuid::new_v4(), "gs-1".to_owned());
        let session = std::sync::Arc::new(session);

        let waiter = {
            let session = std::sync::Arc::clone(&session);
            tokio::spawn(async move { session.send_control(OutboundPayload::Dict(Value::Null), None).await })
        };

        tokio::task::yield_now().await;
        session.fail_all_pending();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::UpstreamError(_))));
    }

    #[tokio::test]
    async fn unknown_in_response_to_is_dropped_not_errored() {
        let (session, _outbox_rx) = GroundstationSession::new(Uuid::new_v4(), "gs-1".to_owned());
        session.resolve(Uuid::new_v4(), Some(Value::Null), None); // no panic, no pending entry
    }
}
