mod filesystem;
mod memory;

pub use filesystem::FileSystemSink;
pub use memory::InMemorySink;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EgressConfig;

#[derive(Debug)]
pub struct EgressError(pub String);

impl std::fmt::Display for EgressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "egress: {}", self.0)
    }
}

impl std::error::Error for EgressError {}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Destination for produced diagnostic artifacts. Concrete backends beyond
/// the filesystem are external; they plug in through this trait.
#[async_trait]
pub trait EgressSink: Send + Sync {
    /// Persists the artifact and returns an opaque reference to it.
    async fn persist(&self, artifact: &Artifact) -> Result<String, EgressError>;
}

/// Named sinks resolved from configuration.
#[derive(Default)]
pub struct EgressTable {
    sinks: HashMap<String, Arc<dyn EgressSink>>,
}

impl EgressTable {
    pub fn from_config(config: &HashMap<String, EgressConfig>) -> Self {
        let mut sinks: HashMap<String, Arc<dyn EgressSink>> = HashMap::new();
        for (name, cfg) in config {
            match cfg {
                EgressConfig::Filesystem { directory } => {
                    sinks.insert(name.clone(), Arc::new(FileSystemSink::new(directory.into())));
                }
            }
        }
        Self { sinks }
    }

    pub fn insert(&mut self, name: &str, sink: Arc<dyn EgressSink>) {
        self.sinks.insert(name.to_string(), sink);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EgressSink>> {
        self.sinks.get(name).cloned()
    }

    pub fn names(&self) -> HashSet<String> {
        self.sinks.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_resolves_configured_sinks() {
        let mut config = HashMap::new();
        config.insert(
            "artifacts".to_string(),
            EgressConfig::Filesystem {
                directory: "/tmp/vigil-artifacts".into(),
            },
        );
        let table = EgressTable::from_config(&config);
        assert!(table.get("artifacts").is_some());
        assert!(table.get("other").is_none());
        assert!(table.names().contains("artifacts"));
    }
}
