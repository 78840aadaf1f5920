use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Artifact, EgressError, EgressSink};

/// Records artifacts in memory; used by tests in place of a real backend.
#[derive(Clone, Default)]
pub struct InMemorySink {
    artifacts: Arc<Mutex<Vec<Artifact>>>,
    count: Arc<AtomicUsize>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persisted_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub async fn persisted_artifacts(&self) -> Vec<Artifact> {
        self.artifacts.lock().await.clone()
    }
}

#[async_trait]
impl EgressSink for InMemorySink {
    async fn persist(&self, artifact: &Artifact) -> Result<String, EgressError> {
        self.artifacts.lock().await.push(artifact.clone());
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(format!("mem://{}", artifact.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persist_records_artifact() {
        let sink = InMemorySink::new();
        let artifact = Artifact {
            name: "t.bin".into(),
            bytes: vec![9],
        };
        let reference = sink.persist(&artifact).await.unwrap();
        assert_eq!(reference, "mem://t.bin");
        assert_eq!(sink.persisted_count(), 1);
        assert_eq!(sink.persisted_artifacts().await[0].bytes, vec![9]);
    }
}
