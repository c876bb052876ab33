use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::db::enums::BackupKind;
use crate::db::{ArtifactStore, StoreError};

/// Filesystem artifact sink: `<root>/device_<id>/<filename>`.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store_artifact(
        &self,
        device_id: i64,
        kind: BackupKind,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StoreError> {
        let device_dir = self.root.join(format!("device_{device_id}"));
        tokio::fs::create_dir_all(&device_dir).await?;
        let path = device_dir.join(filename);
        tokio::fs::write(&path, bytes).await?;
        info!(device_id, kind = %kind, path = %path.display(), "Stored backup artifact.");
        Ok(path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_artifact_under_device_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        let path = store
            .store_artifact(7, BackupKind::Export, "cfg.rsc", b"/export".to_vec())
            .await
            .unwrap();

        assert!(path.ends_with("device_7/cfg.rsc") || path.ends_with("device_7\\cfg.rsc"));
        let stored = std::fs::read(dir.path().join("device_7").join("cfg.rsc")).unwrap();
        assert_eq!(stored, b"/export");
    }
}
