use std::path::PathBuf;

use async_trait::async_trait;

use super::{Artifact, EgressError, EgressSink};

pub struct FileSystemSink {
    directory: PathBuf,
}

impl FileSystemSink {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl EgressSink for FileSystemSink {
    async fn persist(&self, artifact: &Artifact) -> Result<String, EgressError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| EgressError(format!("create {}: {e}", self.directory.display())))?;
        let path = self.directory.join(&artifact.name);
        tokio::fs::write(&path, &artifact.bytes)
            .await
            .map_err(|e| EgressError(format!("write {}: {e}", path.display())))?;
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persists_artifact_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSystemSink::new(dir.path().join("artifacts"));
        let artifact = Artifact {
            name: "high-heap-7-dump.bin".into(),
            bytes: vec![1, 2, 3],
        };
        let reference = sink.persist(&artifact).await.unwrap();
        assert!(reference.ends_with("high-heap-7-dump.bin"));
        assert_eq!(std::fs::read(&reference).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unwritable_directory_is_an_egress_error() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("not-a-dir");
        std::fs::write(&file_path, b"x").unwrap();
        let sink = FileSystemSink::new(file_path);
        let artifact = Artifact {
            name: "a.bin".into(),
            bytes: vec![0],
        };
        assert!(sink.persist(&artifact).await.is_err());
    }
}
