pub mod server;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use vigil_common::identity::TargetProcess;

use crate::action::{ActionResult, ErrorKind};
use crate::trigger::InstanceState;

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceKey {
    pub rule: String,
    pub pid: u32,
}

impl InstanceKey {
    pub fn new(rule: &str, pid: u32) -> Self {
        Self {
            rule: rule.to_string(),
            pid,
        }
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.rule, self.pid)
    }
}

/// Read-only projection of one rule instance, updated synchronously at every
/// transition.
#[derive(Debug, Clone, Serialize)]
pub struct RuleInstanceSnapshot {
    pub rule: String,
    pub pid: u32,
    pub process_name: String,
    pub state: InstanceState,
    pub started_at_ms: i64,
    pub fired_total: u64,
    pub admitted_total: u64,
    pub throttled_total: u64,
    pub missed_total: u64,
    pub last_error: Option<ErrorKind>,
    pub last_results: Vec<ActionResult>,
}

pub struct StatusStore {
    instances: DashMap<InstanceKey, RuleInstanceSnapshot>,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    pub fn insert_starting(&self, key: InstanceKey, process: &TargetProcess, now_ms: i64) {
        self.instances.insert(
            key.clone(),
            RuleInstanceSnapshot {
                rule: key.rule,
                pid: key.pid,
                process_name: process.process_name.clone(),
                state: InstanceState::Starting,
                started_at_ms: now_ms,
                fired_total: 0,
                admitted_total: 0,
                throttled_total: 0,
                missed_total: 0,
                last_error: None,
                last_results: Vec::new(),
            },
        );
    }

    /// Applies a state transition, enforcing the monotonicity rules. An
    /// invalid transition is dropped and logged rather than corrupting the
    /// projection.
    pub fn set_state(&self, key: &InstanceKey, next: InstanceState) {
        if let Some(mut snap) = self.instances.get_mut(key) {
            if snap.state.can_transition(next) {
                snap.state = next;
            } else {
                tracing::warn!(
                    instance = %key,
                    from = %snap.state,
                    to = %next,
                    "dropping invalid state transition"
                );
            }
        }
    }

    /// Terminal fault, recorded when the signal subscription cannot be
    /// acquired. A fresh instance is only created if the process reconnects.
    pub fn fault(&self, key: &InstanceKey, message: String) {
        if let Some(mut snap) = self.instances.get_mut(key) {
            if snap.state.can_transition(InstanceState::Faulted) {
                snap.state = InstanceState::Faulted;
            }
            snap.last_error = Some(ErrorKind::Subscription { message });
        }
    }

    pub fn record_fired(&self, key: &InstanceKey) {
        if let Some(mut snap) = self.instances.get_mut(key) {
            snap.fired_total += 1;
        }
    }

    pub fn record_admitted(&self, key: &InstanceKey) {
        if let Some(mut snap) = self.instances.get_mut(key) {
            snap.admitted_total += 1;
        }
    }

    pub fn record_throttled(&self, key: &InstanceKey) {
        if let Some(mut snap) = self.instances.get_mut(key) {
            snap.throttled_total += 1;
        }
    }

    pub fn record_missed(&self, key: &InstanceKey) {
        if let Some(mut snap) = self.instances.get_mut(key) {
            snap.missed_total += 1;
        }
    }

    /// Records one execution's results; `last_error` becomes the first error
    /// among them (the most specific known failure for this fire).
    pub fn record_results(&self, key: &InstanceKey, results: Vec<ActionResult>) {
        if let Some(mut snap) = self.instances.get_mut(key) {
            snap.last_error = results.iter().find_map(|r| r.error.clone());
            snap.last_results = results;
        }
    }

    pub fn remove(&self, key: &InstanceKey) {
        self.instances.remove(key);
    }

    pub fn get(&self, rule: &str, pid: u32) -> Option<RuleInstanceSnapshot> {
        self.instances
            .get(&InstanceKey::new(rule, pid))
            .map(|s| s.value().clone())
    }

    pub fn list(&self) -> Vec<RuleInstanceSnapshot> {
        self.instances.iter().map(|s| s.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: u32) -> TargetProcess {
        TargetProcess::new(pid, "worker".into(), "worker --serve".into(), 1000)
    }

    fn store_with_instance() -> (StatusStore, InstanceKey) {
        let store = StatusStore::new();
        let key = InstanceKey::new("r1", 7);
        store.insert_starting(key.clone(), &proc(7), 1000);
        (store, key)
    }

    #[test]
    fn starting_then_running() {
        let (store, key) = store_with_instance();
        store.set_state(&key, InstanceState::Running);
        assert_eq!(store.get("r1", 7).unwrap().state, InstanceState::Running);
    }

    #[test]
    fn invalid_transition_is_dropped() {
        let (store, key) = store_with_instance();
        store.set_state(&key, InstanceState::Running);
        store.set_state(&key, InstanceState::Expired);
        // Terminal; a later Running write must not resurrect the instance.
        store.set_state(&key, InstanceState::Running);
        assert_eq!(store.get("r1", 7).unwrap().state, InstanceState::Expired);
    }

    #[test]
    fn counters_accumulate() {
        let (store, key) = store_with_instance();
        store.record_fired(&key);
        store.record_fired(&key);
        store.record_admitted(&key);
        store.record_throttled(&key);
        let snap = store.get("r1", 7).unwrap();
        assert_eq!(snap.fired_total, 2);
        assert_eq!(snap.admitted_total, 1);
        assert_eq!(snap.throttled_total, 1);
    }

    #[test]
    fn results_set_most_specific_error() {
        let (store, key) = store_with_instance();
        store.record_results(
            &key,
            vec![
                ActionResult::success("collect_dump", Some("a".into()), 10),
                ActionResult::failure("collect_trace", ErrorKind::Timeout, 30_000),
            ],
        );
        let snap = store.get("r1", 7).unwrap();
        assert_eq!(snap.last_error, Some(ErrorKind::Timeout));
        assert_eq!(snap.last_results.len(), 2);
    }

    #[test]
    fn remove_clears_instance() {
        let (store, key) = store_with_instance();
        store.remove(&key);
        assert!(store.get("r1", 7).is_none());
        assert!(store.is_empty());
    }
}
