//! Source of the files packed into an archive.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncRead;

/// Access to the files a build packs, addressed by relative path.
///
/// Implementations must surface cancellation as an error (for example
/// `io::ErrorKind::Interrupted`) rather than retrying on their own.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Whether `path` names a directory.
    async fn is_directory(&self, path: &str) -> io::Result<bool>;

    /// Open `path` for streaming its bytes.
    async fn open(&self, path: &str) -> io::Result<Box<dyn AsyncRead + Send + Unpin>>;

    /// Copy `path` verbatim to `dest`, replacing anything there.
    async fn copy_to(&self, path: &str, dest: &Path) -> io::Result<()>;

    /// Modification time of `path`, if the workspace tracks one.
    async fn last_modified(&self, _path: &str) -> io::Result<Option<SystemTime>> {
        Ok(None)
    }
}

/// Workspace backed by a directory on the local file system.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl Workspace for LocalWorkspace {
    async fn is_directory(&self, path: &str) -> io::Result<bool> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(meta) => Ok(meta.is_dir()),
            // a missing source is reported when it is opened
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn open(&self, path: &str) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        let file = tokio::fs::File::open(self.resolve(path)).await?;
        Ok(Box::new(tokio::io::BufReader::new(file)))
    }

    async fn copy_to(&self, path: &str, dest: &Path) -> io::Result<()> {
        tokio::fs::copy(self.resolve(path), dest).await.map(|_| ())
    }

    async fn last_modified(&self, path: &str) -> io::Result<Option<SystemTime>> {
        let meta = tokio::fs::metadata(self.resolve(path)).await?;
        Ok(meta.modified().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn reads_from_the_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), b"alpha").unwrap();

        let workspace = LocalWorkspace::new(dir.path());
        assert!(workspace.is_directory("sub").await.unwrap());
        assert!(!workspace.is_directory("sub/a.txt").await.unwrap());
        assert!(!workspace.is_directory("missing").await.unwrap());

        let mut content = String::new();
        workspace
            .open("sub/a.txt")
            .await
            .unwrap()
            .read_to_string(&mut content)
            .await
            .unwrap();
        assert_eq!(content, "alpha");

        assert!(workspace.last_modified("sub/a.txt").await.unwrap().is_some());

        let dest = dir.path().join("copy.txt");
        workspace.copy_to("sub/a.txt", &dest).await.unwrap();
        assert_eq!(std::fs::read(dest).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn missing_sources_fail_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = LocalWorkspace::new(dir.path());
        let err = workspace.open("nope.txt").await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
