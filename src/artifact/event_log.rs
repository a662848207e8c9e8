//! Append-only RDF-like event log (§4.D second half). A user-supplied
//! [`Event`] expands into triples with a synthetic `Action` node standing in
//! for the event itself; triples are never updated or deleted.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

/// One relationship contributed by the caller: the action node fills
/// whichever side (`subject` or `object`) is left as `None`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Relationship {
    /// A fully specified triple, passed through unchanged.
    Triple(Triple),
    /// `(predicate, object)`: the action is the subject.
    ActionIsSubject { predicate: String, object: String },
    /// `(subject, predicate)`: the action is the object.
    ActionIsObject { subject: String, predicate: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub descriptor: String,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    pub timestamp: Option<i64>,
}

fn action_node(descriptor: &str) -> String {
    format!("Action:{descriptor}")
}

/// Expands `event` into its full set of triples, always including the
/// automatic `(action, loggedAt, timestamp)` triple.
pub fn expand(event: &Event, now: i64) -> Vec<Triple> {
    let action = action_node(&event.descriptor);
    let timestamp = event.timestamp.unwrap_or(now);

    let mut triples: Vec<Triple> = event
        .relationships
        .iter()
        .map(|relationship| match relationship {
            Relationship::Triple(triple) => triple.clone(),
            Relationship::ActionIsSubject { predicate, object } => Triple {
                subject: action.clone(),
                predicate: predicate.clone(),
                object: object.clone(),
            },
            Relationship::ActionIsObject { subject, predicate } => Triple {
                subject: subject.clone(),
                predicate: predicate.clone(),
                object: action.clone(),
            },
        })
        .collect();

    triples.push(Triple {
        subject: action,
        predicate: "loggedAt".to_owned(),
        object: timestamp.to_string(),
    });

    triples
}

/// Append-only in-process log. A real deployment backs this with the same
/// relational store as the record table; this in-memory form is what the
/// core ships and tests against (persistence driver out of scope, §1).
#[derive(Default)]
pub struct EventLog {
    triples: Mutex<Vec<Triple>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_event(&self, event: &Event, now: i64) -> Vec<Triple> {
        let triples = expand(event, now);
        self.triples.lock().extend(triples.iter().cloned());
        triples
    }

    pub fn snapshot(&self) -> Vec<Triple> {
        self.triples.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_fills_action_side() {
        let event = Event {
            descriptor: "plan.approved".to_owned(),
            relationships: vec![
                Relationship::ActionIsSubject {
                    predicate: "approvedBy".to_owned(),
                    object: "user:alice".to_owned(),
                },
                Relationship::ActionIsObject {
                    subject: "plan:7".to_owned(),
                    predicate: "hasAction".to_owned(),
                },
            ],
            timestamp: Some(1000),
        };

        let triples = expand(&event, 0);
        assert_eq!(triples.len(), 3);
        assert!(triples.contains(&Triple {
            subject: "Action:plan.approved".to_owned(),
            predicate: "approvedBy".to_owned(),
            object: "user:alice".to_owned(),
        }));
        assert!(triples.contains(&Triple {
            subject: "plan:7".to_owned(),
            predicate: "hasAction".to_owned(),
            object: "Action:plan.approved".to_owned(),
        }));
        assert!(triples.contains(&Triple {
            subject: "Action:plan.approved".to_owned(),
            predicate: "loggedAt".to_owned(),
            object: "1000".to_owned(),
        }));
    }

    #[test]
    fn prebuilt_triples_pass_through() {
        let event = Event {
            descriptor: "noop".to_owned(),
            relationships: vec![Relationship::Triple(Triple {
                subject: "a".to_owned(),
                predicate: "b".to_owned(),
                object: "c".to_owned(),
            })],
            timestamp: None,
        };

        let triples = expand(&event, 42);
        assert!(triples.iter().any(|t| t.subject == "a" && t.object == "c"));
        assert!(triples.iter().any(|t| t.predicate == "loggedAt" && t.object == "42"));
    }

    #[test]
    fn log_is_append_only() {
        let log = EventLog::new();
        log.log_event(
            &Event {
                descriptor: "x".to_owned(),
                relationships: vec![],
                timestamp: Some(1),
            },
            0,
        );
        log.log_event(
            &Event {
                descriptor: "y".to_owned(),
                relationships: vec![],
                timestamp: Some(2),
            },
            0,
        );
        assert_eq!(log.snapshot().len(), 2);
    }
}
