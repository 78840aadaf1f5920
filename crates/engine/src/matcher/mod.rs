mod filter;

pub use filter::{filter_matches, rule_matches};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use vigil_common::identity::TargetProcess;

use crate::config::RuleSet;
use crate::registry::{ProcessRegistry, RegistryChange};
use crate::status::{InstanceKey, StatusStore};
use crate::trigger::{spawn_instance, InstanceDeps, InstanceHandle};

/// Binds rules to processes. Owns every live instance handle; all binding
/// and teardown decisions flow through here, driven by registry change
/// events and rule-set generation swaps.
pub struct Matcher {
    registry: Arc<ProcessRegistry>,
    status: Arc<StatusStore>,
    instance_deps: InstanceDeps,
    rule_set: Arc<RuleSet>,
    instances: HashMap<InstanceKey, InstanceHandle>,
}

impl Matcher {
    pub fn new(
        rule_set: Arc<RuleSet>,
        registry: Arc<ProcessRegistry>,
        status: Arc<StatusStore>,
        instance_deps: InstanceDeps,
    ) -> Self {
        Self {
            registry,
            status,
            instance_deps,
            rule_set,
            instances: HashMap::new(),
        }
    }

    pub fn on_registry_change(&mut self, change: &RegistryChange) {
        match change {
            RegistryChange::Attached(process) => self.bind_process(process),
            RegistryChange::Detached { pid } => self.teardown_pid(*pid),
        }
    }

    /// Generation swap: retire every instance of the old generation, then
    /// rebind the new rules against the current registry snapshot. The
    /// matcher never runs a mix of generations.
    pub fn on_rule_set_change(&mut self, rule_set: Arc<RuleSet>) {
        tracing::info!(
            old_generation = self.rule_set.generation,
            new_generation = rule_set.generation,
            rules = rule_set.rules.len(),
            inert = rule_set.inert.len(),
            "swapping rule set"
        );
        let keys: Vec<InstanceKey> = self.instances.keys().cloned().collect();
        for key in keys {
            self.teardown_instance(&key);
        }
        self.rule_set = rule_set;
        self.sync();
    }

    /// Binds every matching (rule, process) pair from the registry snapshot.
    /// Idempotent: applying the same snapshot twice creates no duplicates.
    pub fn sync(&mut self) {
        for process in self.registry.list() {
            self.bind_process(&process);
        }
    }

    pub fn active_instances(&self) -> usize {
        self.instances.len()
    }

    fn bind_process(&mut self, process: &TargetProcess) {
        let rules = self.rule_set.rules.clone();
        for rule in rules {
            if !rule_matches(&rule, process) {
                continue;
            }
            let key = InstanceKey::new(&rule.name, process.pid);
            if self.instances.contains_key(&key) {
                continue;
            }
            tracing::info!(instance = %key, "binding rule to process");
            let handle = spawn_instance(rule, process.clone(), self.instance_deps.clone());
            self.instances.insert(key, handle);
        }
    }

    fn teardown_pid(&mut self, pid: u32) {
        let keys: Vec<InstanceKey> = self
            .instances
            .keys()
            .filter(|k| k.pid == pid)
            .cloned()
            .collect();
        for key in keys {
            self.teardown_instance(&key);
        }
    }

    fn teardown_instance(&mut self, key: &InstanceKey) {
        if let Some(handle) = self.instances.remove(key) {
            tracing::info!(instance = %key, "tearing down rule instance");
            handle.teardown();
            self.status.remove(key);
        }
    }
}

/// Drives a matcher from the registry change stream and the rule-set watch.
pub fn spawn_matcher(
    mut matcher: Matcher,
    mut registry_rx: broadcast::Receiver<RegistryChange>,
    mut rules_rx: watch::Receiver<Arc<RuleSet>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        matcher.sync();
        loop {
            tokio::select! {
                change = registry_rx.recv() => match change {
                    Ok(change) => matcher.on_registry_change(&change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "registry change stream lagged, resyncing");
                        matcher.sync();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = rules_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let rule_set = rules_rx.borrow_and_update().clone();
                    matcher.on_rule_set_change(rule_set);
                }
            }
        }
    })
}
