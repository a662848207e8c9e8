//! Terminal subsystem (§3 `Terminal`, §4.F "Terminal subsystem", §6 terminal
//! wire messages): GS-originated `terminal/open`/`terminal/close`/
//! `terminal/stdout`, and the operator-side read-only/read-write attach
//! protocol. Terminals are owned by their parent session (§3 ownership
//! note): closing a session closes every terminal keyed under its `gs_id`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::gs::protocol::ProxyHeader;
use crate::gs::session::GroundstationSession;

pub type ClientId = u64;

struct Client {
    id: ClientId,
    tx: mpsc::UnboundedSender<Value>,
}

struct Terminal {
    name: String,
    read_only: bool,
    rw_client: Option<ClientId>,
    clients: Vec<Client>,
}

/// Whether an operator's `connect_rw` request was actually granted, or
/// downgraded to read-only because the terminal is read-only or already has
/// a writer (§4.F, §8 "Terminal RW exclusivity").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
}

pub struct TerminalHandle {
    pub client_id: ClientId,
    pub access: Access,
    pub rx: mpsc::UnboundedReceiver<Value>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TerminalSummary {
    pub terminal_id: String,
    pub name: String,
    pub read_only: bool,
    pub has_writer: bool,
}

#[derive(Default)]
pub struct TerminalRegistry {
    terminals: RwLock<HashMap<(Uuid, String), Terminal>>,
    next_client_id: AtomicU64,
}

impl TerminalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// GS-originated `terminal/open` (§6). Re-opening an id already open for
    /// the same session replaces its metadata but keeps existing clients
    /// attached.
    pub fn open(&self, gs_id: Uuid, terminal_id: String, name: String, read_only: bool) {
        let mut terminals = self.terminals.write();
        terminals
            .entry((gs_id, terminal_id))
            .and_modify(|t| {
                t.name = name.clone();
                t.read_only = read_only;
            })
            .or_insert_with(|| Terminal {
                name,
                read_only,
                rw_client: None,
                clients: Vec::new(),
            });
    }

    /// GS-originated `terminal/close`, or called once per terminal when the
    /// parent session disconnects.
    pub fn close(&self, gs_id: Uuid, terminal_id: &str) {
        self.terminals.write().remove(&(gs_id, terminal_id.to_owned()));
    }

    /// Closes every terminal owned by `gs_id` (§3: "parent GS disconnect").
    pub fn close_all_for_session(&self, gs_id: Uuid) {
        self.terminals.write().retain(|(id, _), _| *id != gs_id);
    }

    /// Terminal discovery (§4.G): the open terminals belonging to `gs_id`,
    /// with whether a writer currently holds the RW slot.
    pub fn list_for_session(&self, gs_id: Uuid) -> Vec<TerminalSummary> {
        self.terminals
            .read()
            .iter()
            .filter(|((id, _), _)| *id == gs_id)
            .map(|((_, terminal_id), terminal)| TerminalSummary {
                terminal_id: terminal_id.clone(),
                name: terminal.name.clone(),
                read_only: terminal.read_only,
                has_writer: terminal.rw_client.is_some(),
            })
            .collect()
    }

    /// Operator attach (§4.F): `connect_rw` is granted iff the terminal is
    /// not read-only *and* no current writer exists; otherwise the client is
    /// treated as read-only (§8 "Terminal RW exclusivity").
    pub fn attach(&self, gs_id: Uuid, terminal_id: &str, want_rw: bool) -> Result<TerminalHandle> {
        let mut terminals = self.terminals.write();
        let terminal = terminals
            .get_mut(&(gs_id, terminal_id.to_owned()))
            .ok_or_else(|| Error::NotFound(format!("terminal {terminal_id} on groundstation {gs_id}")))?;

        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        terminal.clients.push(Client { id: client_id, tx });

        let access = if want_rw && !terminal.read_only && terminal.rw_client.is_none() {
            terminal.rw_client = Some(client_id);
            Access::ReadWrite
        } else {
            Access::ReadOnly
        };

        Ok(TerminalHandle { client_id, access, rx })
    }

    /// Detaches a client on disconnect, releasing the writer slot if it was
    /// held by this client.
    pub fn detach(&self, gs_id: Uuid, terminal_id: &str, client_id: ClientId) {
        let mut terminals = self.terminals.write();
        let Some(terminal) = terminals.get_mut(&(gs_id, terminal_id.to_owned())) else {
            return;
        };
        terminal.clients.retain(|c| c.id != client_id);
        if terminal.rw_client == Some(client_id) {
            terminal.rw_client = None;
        }
    }

    /// Broadcasts `message` to every client attached to the terminal,
    /// waiting for all per-client sends to settle before returning (§5:
    /// "the broadcaster waits for all to settle before returning"). A
    /// client whose receiver has been dropped is simply skipped.
    fn broadcast(&self, gs_id: Uuid, terminal_id: &str, message: Value) {
        let terminals = self.terminals.read();
        let Some(terminal) = terminals.get(&(gs_id, terminal_id.to_owned())) else {
            return;
        };
        for client in &terminal.clients {
            let _ = client.tx.send(message.clone());
        }
    }

    /// GS-originated `terminal/stdout` (§6): the response payload, with
    /// `direction:"output"` added, fanned out to every client.
    pub fn stdout(&self, gs_id: Uuid, terminal_id: &str, response: Value) {
        let mut message = response;
        if let Value::Object(map) = &mut message {
            map.insert("direction".to_owned(), json!("output"));
        } else {
            message = json!({ "direction": "output", "content": message });
        }
        self.broadcast(gs_id, terminal_id, message);
    }

    /// Operator-originated stdin (§4.F): only the writer's input is
    /// accepted. Pushes a `terminal/stdin` control message to the GS via
    /// `session.enqueue` (fire-and-forget, not a `send_control` round trip)
    /// and echoes `direction:"input"` to every attached client. A
    /// non-writer's input is rejected without reaching the GS.
    pub fn stdin(
        &self,
        session: &GroundstationSession,
        terminal_id: &str,
        client_id: ClientId,
        author: &str,
        content: &str,
    ) -> Result<()> {
        let is_writer = {
            let terminals = self.terminals.read();
            terminals
                .get(&(session.id, terminal_id.to_owned()))
                .is_some_and(|t| t.rw_client == Some(client_id))
        };

        if !is_writer {
            return Err(Error::InsufficientPermissions);
        }

        session.enqueue(
            crate::gs::protocol::OutboundPayload::Dict(json!({
                "type": "terminal/stdin",
                "terminal_id": terminal_id,
                "content": content,
            })),
            Some(ProxyHeader {
                origin: "terminal client input".to_owned(),
                authenticated_user: uuid::Uuid::parse_str(author).unwrap_or(uuid::Uuid::nil()),
            }),
        );

        self.broadcast(
            session.id,
            terminal_id,
            json!({ "direction": "input", "author": author, "content": content }),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_connect_rw_is_downgraded_to_read_only() {
        let registry = TerminalRegistry::new();
        let gs_id = Uuid::new_v4();
        registry.open(gs_id, "t1".to_owned(), "shell".to_owned(), false);

        let first = registry.attach(gs_id, "t1", true).unwrap();
        let second = registry.attach(gs_id, "t1", true).unwrap();

        assert_eq!(first.access, Access::ReadWrite);
        assert_eq!(second.access, Access::ReadOnly);
    }

    #[test]
    fn read_only_terminal_always_downgrades() {
        let registry = TerminalRegistry::new();
        let gs_id = Uuid::new_v4();
        registry.open(gs_id, "t1".to_owned(), "shell".to_owned(), true);

        let handle = registry.attach(gs_id, "t1", true).unwrap();
        assert_eq!(handle.access, Access::ReadOnly);
    }

    #[test]
    fn attach_unknown_terminal_is_not_found() {
        let registry = TerminalRegistry::new();
        let err = registry.attach(Uuid::new_v4(), "missing", false).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn detach_releases_writer_slot_for_next_attach() {
        let registry = TerminalRegistry::new();
        let gs_id = Uuid::new_v4();
        registry.open(gs_id, "t1".to_owned(), "shell".to_owned(), false);

        let first = registry.attach(gs_id, "t1", true).unwrap();
        registry.detach(gs_id, "t1", first.client_id);

        let second = registry.attach(gs_id, "t1", true).unwrap();
        assert_eq!(second.access, Access::ReadWrite);
    }

    #[test]
    fn non_writer_stdin_is_rejected() {
        let registry = TerminalRegistry::new();
        let (session, _rx) = GroundstationSession::new(Uuid::new_v4(), "gs-1".to_owned());
        registry.open(session.id, "t1".to_owned(), "shell".to_owned(), false);

        let writer = registry.attach(session.id, "t1", true).unwrap();
        let reader = registry.attach(session.id, "t1", true).unwrap();
        assert_eq!(reader.access, Access::ReadOnly);

        let err = registry.stdin(&session, "t1", reader.client_id, "alice", "ls\n").unwrap_err();
        assert!(matches!(err, Error::InsufficientPermissions));

        registry.stdin(&session, "t1", writer.client_id, "alice", "ls\n").unwrap();
    }

    #[test]
    fn list_for_session_reports_writer_presence() {
        let registry = TerminalRegistry::new();
        let gs_id = Uuid::new_v4();
        registry.open(gs_id, "t1".to_owned(), "shell".to_owned(), false);

        let before = registry.list_for_session(gs_id);
        assert_eq!(before.len(), 1);
        assert!(!before[0].has_writer);

        registry.attach(gs_id, "t1", true).unwrap();
        let after = registry.list_for_session(gs_id);
        assert!(after[0].has_writer);
    }

    #[test]
    fn close_all_for_session_drops_its_terminals() {
        let registry = TerminalRegistry::new();
        let gs_id = Uuid::new_v4();
        registry.open(gs_id, "t1".to_owned(), "shell".to_owned(), false);
        registry.open(gs_id, "t2".to_owned(), "shell2".to_owned(), false);

        registry.close_all_for_session(gs_id);

        assert!(registry.attach(gs_id, "t1", false).is_err());
        assert!(registry.attach(gs_id, "t2", false).is_err());
    }
}
