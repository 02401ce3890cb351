#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zipstore::{LocalWorkspace, archiver};

/// A scratch workspace directory plus a place to put archives.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("ws")).unwrap();
        Self { dir }
    }

    pub fn workspace(&self) -> LocalWorkspace {
        LocalWorkspace::new(self.dir.path().join("ws"))
    }

    pub fn write(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join("ws").join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn mkdir(&self, rel: &str) {
        std::fs::create_dir_all(self.dir.path().join("ws").join(rel)).unwrap();
    }

    pub fn archive(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write each name as a workspace file and pack it under the same name.
    pub async fn build_with(&self, archive: &Path, names: &[&str]) {
        let mut artifacts = Vec::new();
        for name in names {
            self.write(name, format!("content of {name}").as_bytes());
            artifacts.push((name.to_string(), name.to_string()));
        }
        archiver::build(archive, &self.workspace(), &artifacts)
            .await
            .unwrap();
    }
}

pub fn mapping(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(src, dst)| (src.to_string(), dst.to_string()))
        .collect()
}
