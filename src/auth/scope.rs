//! Scope matching (§4.C) and the process-wide "used scopes" multiset.
//!
//! The single-stored-scope rule is frozen per §9's Open Question: a set of
//! needed scopes is accepted iff *some one* stored scope matches *all* of
//! them (not "each needed scope individually has a matching stored scope").
//! This is what makes a wildcard role grant everything in one shot.

use std::collections::HashMap;

use parking_lot::Mutex;

/// `s` matches `n` when `s == n`, or `s` ends with `*` and `n` starts with
/// `s` minus its trailing `*`.
pub fn scope_matches(stored: &str, needed: &str) -> bool {
    if stored == needed {
        return true;
    }
    match stored.strip_suffix('*') {
        Some(prefix) => needed.starts_with(prefix),
        None => false,
    }
}

/// Accepts `needed` (a single scope, or a set) against `entity_scopes` iff
/// some single stored scope matches every needed scope.
pub fn accepts<'a>(entity_scopes: impl IntoIterator<Item = &'a str>, needed: &[&str]) -> bool {
    entity_scopes
        .into_iter()
        .any(|stored| needed.iter().all(|n| scope_matches(stored, n)))
}

/// Append-dominated multiset of scope sets that have been checked via
/// `require_scope`, surfaced for introspection per §4.C.
#[derive(Default)]
pub struct UsedScopes {
    counts: Mutex<HashMap<Vec<String>, u64>>,
}

impl UsedScopes {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, needed: &[&str]) {
        let mut key: Vec<String> = needed.iter().map(|s| (*s).to_owned()).collect();
        key.sort();
        *self.counts.lock().entry(key).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> Vec<(Vec<String>, u64)> {
        self.counts.lock().iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_stored_accepts_any_needed() {
        assert!(scope_matches("satop.auth.*", "satop.auth.entities.read"));
        assert!(!scope_matches("a.b", "a.c"));
        assert!(scope_matches("*", "anything.at.all"));
    }

    #[test]
    fn multi_needed_requires_single_stored_scope_covering_all() {
        let scopes = ["p.*"];
        assert!(accepts(scopes, &["p.x", "p.y"]));

        let scopes = ["p.x"];
        assert!(!accepts(scopes, &["p.x", "p.y"]));
    }

    #[test]
    fn used_scopes_accumulates() {
        let used = UsedScopes::new();
        used.record(&["a.b", "a.c"]);
        used.record(&["a.c", "a.b"]); // same set, different order
        used.record(&["z"]);

        let snapshot = used.snapshot();
        assert_eq!(snapshot.len(), 2);
        let total: u64 = snapshot.iter().map(|(_, c)| c).sum();
        assert_eq!(total, 3);
    }
}
