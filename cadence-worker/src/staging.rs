//! Artifact staging
//!
//! Copies an artifact out of the artifact store into a temporary file for
//! the duration of one execution. The file is removed when the
//! [`StagedArtifact`] is dropped, whatever way the execution ends.

use cadence_core::artifact::{ArtifactError, ArtifactStore};
use std::path::Path;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// A local copy of an artifact, deleted on drop
#[derive(Debug)]
pub struct StagedArtifact {
    path: TempPath,
}

impl StagedArtifact {
    /// Fetches `name` from `store` into a fresh file under `dir`
    pub async fn fetch(
        store: &dyn ArtifactStore,
        name: &str,
        dir: &Path,
    ) -> Result<Self, ArtifactError> {
        let mut source = store.fetch(name).await?;

        tokio::fs::create_dir_all(dir).await?;
        let (file, path) = tempfile::Builder::new()
            .prefix("cadence-")
            .suffix(&format!("-{name}"))
            .tempfile_in(dir)?
            .into_parts();

        // dropping `path` removes the file
        let mut file = tokio::fs::File::from_std(file);
        let bytes = tokio::io::copy(&mut source, &mut file).await?;
        file.flush().await?;
        drop(file);

        debug!("Staged artifact {} ({} bytes) at {}", name, bytes, path.display());

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
