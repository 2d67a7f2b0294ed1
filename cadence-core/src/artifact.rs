//! Artifact store
//!
//! Runnable artifacts addressable by name. The local implementation serves
//! files from a single directory; names are plain file names and never
//! paths.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Byte stream of an artifact's content
pub type ArtifactStream = Box<dyn AsyncRead + Send + Unpin>;

/// Errors raised by artifact stores
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact name: {0:?}")]
    InvalidName(String),

    #[error("artifact store I/O error: {0}")]
    Io(#[from] io::Error),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Names of the available artifacts, sorted
    async fn list(&self) -> Result<Vec<String>, ArtifactError>;

    /// Opens an artifact for reading
    async fn fetch(&self, name: &str) -> Result<ArtifactStream, ArtifactError>;

    async fn exists(&self, name: &str) -> Result<bool, ArtifactError>;
}

/// Artifact store over a local directory
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
    /// Extension `list` filters on, without the dot
    extension: Option<String>,
}

impl LocalArtifactStore {
    /// Store listing `.jar` files under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: Some("jar".to_string()),
        }
    }

    /// Changes the listed extension; `None` lists every file
    pub fn with_extension(mut self, extension: Option<String>) -> Self {
        self.extension = extension.filter(|e| !e.is_empty());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0');
        if invalid {
            return Err(ArtifactError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    fn is_listed(&self, path: &Path) -> bool {
        match &self.extension {
            Some(ext) => path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ext)),
            None => true,
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn list(&self) -> Result<Vec<String>, ArtifactError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if !self.is_listed(&path) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    async fn fetch(&self, name: &str) -> Result<ArtifactStream, ArtifactError> {
        let path = self.resolve(name)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, ArtifactError> {
        let path = self.resolve(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_list_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jar"), b"b").unwrap();
        std::fs::write(dir.path().join("a.JAR"), b"a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"n").unwrap();
        std::fs::create_dir(dir.path().join("nested.jar")).unwrap();

        let store = LocalArtifactStore::new(dir.path());
        assert_eq!(store.list().await.unwrap(), vec!["a.JAR", "b.jar"]);

        let all = store.clone().with_extension(None);
        assert_eq!(all.list().await.unwrap(), vec!["a.JAR", "b.jar", "notes.txt"]);
    }

    #[tokio::test]
    async fn test_missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("absent"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_reads_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("job.jar"), b"payload").unwrap();
        let store = LocalArtifactStore::new(dir.path());

        let mut stream = store.fetch("job.jar").await.unwrap();
        let mut content = Vec::new();
        stream.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"payload");

        assert!(store.exists("job.jar").await.unwrap());
        assert!(!store.exists("other.jar").await.unwrap());
        assert!(matches!(
            store.fetch("other.jar").await,
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_path_like_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        for name in ["", "..", "../etc/passwd", "a/b.jar", "a\\b.jar"] {
            assert!(
                matches!(store.exists(name).await, Err(ArtifactError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
    }
}
