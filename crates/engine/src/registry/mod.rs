use dashmap::DashMap;
use tokio::sync::broadcast;

use vigil_common::identity::TargetProcess;

/// Change event published to the rule matcher. This stream is the only
/// integration point between discovery and rule binding.
#[derive(Debug, Clone)]
pub enum RegistryChange {
    Attached(TargetProcess),
    Detached { pid: u32 },
}

/// Single-writer registry of attached processes, keyed by pid. Everyone else
/// reads snapshots or subscribes to the change stream.
pub struct ProcessRegistry {
    processes: DashMap<u32, TargetProcess>,
    changes: broadcast::Sender<RegistryChange>,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            processes: DashMap::new(),
            changes,
        }
    }

    /// Re-attachment of a pid replaces the entry rather than duplicating it.
    pub fn upsert(&self, process: TargetProcess) {
        let pid = process.pid;
        let replaced = self.processes.insert(pid, process.clone()).is_some();
        if replaced {
            tracing::debug!(pid, "process re-attached, replacing entry");
            let _ = self.changes.send(RegistryChange::Detached { pid });
        }
        let _ = self.changes.send(RegistryChange::Attached(process));
    }

    pub fn remove(&self, pid: u32) -> Option<TargetProcess> {
        let removed = self.processes.remove(&pid).map(|(_, p)| p);
        if removed.is_some() {
            let _ = self.changes.send(RegistryChange::Detached { pid });
        }
        removed
    }

    pub fn get(&self, pid: u32) -> Option<TargetProcess> {
        self.processes.get(&pid).map(|p| p.value().clone())
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.processes.contains_key(&pid)
    }

    pub fn list(&self) -> Vec<TargetProcess> {
        self.processes.iter().map(|p| p.value().clone()).collect()
    }

    pub fn watch(&self) -> broadcast::Receiver<RegistryChange> {
        self.changes.subscribe()
    }
}
