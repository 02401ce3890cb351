//! Read-only file system view over the entries of a ZIP archive.
//!
//! A [`ZipStorage`] is a location inside an archive: the archive's path on
//! disk plus a `/`-separated path string. Archives have no real directory
//! nodes, so a path that is empty or ends with `/` is treated as a
//! directory, and it exists exactly when some entry name starts with it.
//!
//! Nodes are plain values. Every query opens the archive, reads its
//! central directory and closes it again before returning; nothing is
//! cached, so a node always reflects the archive currently on disk. A
//! missing archive file is an ordinary negative answer (`false`, `0`, an
//! empty set) for every query except [`ZipStorage::open`].

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::glob;
use crate::io::LocalFileReader;
use crate::zip::{EntryReader, ZipFileEntry, ZipParser};

/// Characters escaped in [`ZipStorage::to_uri`]: everything not allowed in
/// an RFC 2396 `abs_path`.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// One scoped opening of the archive file.
///
/// Owns the file descriptor; it is closed when the handle is dropped,
/// which happens before any query returns.
struct ArchiveHandle {
    parser: ZipParser<LocalFileReader>,
}

impl ArchiveHandle {
    /// Open `archive`, or `None` if there is no such file.
    fn open(archive: &Path) -> Result<Option<Self>> {
        match LocalFileReader::new(archive) {
            Ok(reader) => Ok(Some(Self {
                parser: ZipParser::new(Arc::new(reader)),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// A path inside a ZIP archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZipStorage {
    archive: PathBuf,
    path: String,
}

impl ZipStorage {
    /// The root directory of `archive`. No I/O happens here.
    pub fn root(archive: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
            path: String::new(),
        }
    }

    fn at(&self, path: impl Into<String>) -> Self {
        Self {
            archive: self.archive.clone(),
            path: path.into(),
        }
    }

    /// The archive file this node points into.
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// The path inside the archive; `""` for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Whether the path is shaped like a directory (empty or ending in `/`).
    pub fn looks_like_dir(&self) -> bool {
        self.path.is_empty() || self.path.ends_with('/')
    }

    /// Last path segment without its trailing slash; `""` for the root.
    pub fn name(&self) -> &str {
        let trimmed = self.path.strip_suffix('/').unwrap_or(&self.path);
        match trimmed.rfind('/') {
            Some(i) => &trimmed[i + 1..],
            None => trimmed,
        }
    }

    /// The path, percent-encoded, without scheme or authority.
    pub fn to_uri(&self) -> String {
        utf8_percent_encode(&self.path, PATH_ESCAPE).to_string()
    }

    /// The enclosing directory, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.path.is_empty() {
            return None;
        }

        let trimmed = self.path.strip_suffix('/').unwrap_or(&self.path);
        match trimmed.rfind('/') {
            Some(i) => Some(self.at(&trimmed[..=i])),
            None => Some(Self::root(self.archive.clone())),
        }
    }

    /// Always true: archives carry no permission model.
    pub fn can_read(&self) -> bool {
        true
    }

    /// Read the archive's entry table, or `None` if the archive is absent.
    async fn entries(&self) -> Result<Option<Vec<ZipFileEntry>>> {
        let Some(handle) = ArchiveHandle::open(&self.archive)? else {
            debug!(archive = %self.archive.display(), "archive does not exist");
            return Ok(None);
        };
        let entries = handle.parser.list_files().await?;
        debug!(
            archive = %self.archive.display(),
            path = %self.path,
            entries = entries.len(),
            "scanned archive"
        );
        Ok(Some(entries))
    }

    /// True iff the path is directory-shaped and some entry lies under it.
    pub async fn is_directory(&self) -> Result<bool> {
        if !self.looks_like_dir() {
            return Ok(false);
        }
        Ok(self
            .entries()
            .await?
            .is_some_and(|entries| entries.iter().any(|e| e.file_name.starts_with(&self.path))))
    }

    /// True iff the path is file-shaped and an entry has exactly this name.
    pub async fn is_file(&self) -> Result<bool> {
        if self.looks_like_dir() {
            return Ok(false);
        }
        Ok(self.stat().await?.is_some())
    }

    pub async fn exists(&self) -> Result<bool> {
        if self.looks_like_dir() {
            self.is_directory().await
        } else {
            self.is_file().await
        }
    }

    /// Immediate children of a directory node, in no particular order.
    ///
    /// Children with nested content come back directory-shaped (ending in
    /// `/`). File-shaped or missing nodes have no children.
    pub async fn list(&self) -> Result<HashSet<ZipStorage>> {
        if !self.looks_like_dir() {
            return Ok(HashSet::new());
        }
        let Some(entries) = self.entries().await? else {
            return Ok(HashSet::new());
        };

        let mut children = HashSet::new();
        for entry in &entries {
            let Some(rest) = entry.file_name.strip_prefix(self.path.as_str()) else {
                continue;
            };
            // an explicit entry for this directory is not its own child
            if rest.is_empty() {
                continue;
            }
            let child = match rest.find('/') {
                Some(i) => &rest[..=i],
                None => rest,
            };
            children.insert(self.at(format!("{}{}", self.path, child)));
        }
        Ok(children)
    }

    /// Relative names of all files below this directory matching `glob`.
    ///
    /// `None` behaves like the empty pattern, which matches nothing.
    /// Directory entries are never returned.
    pub async fn list_glob(&self, glob: Option<&str>) -> Result<HashSet<String>> {
        if !self.looks_like_dir() {
            return Ok(HashSet::new());
        }
        let Some(entries) = self.entries().await? else {
            return Ok(HashSet::new());
        };

        let pattern = glob.unwrap_or("");
        Ok(entries
            .iter()
            .filter(|e| !e.is_directory)
            .filter_map(|e| e.file_name.strip_prefix(self.path.as_str()))
            .filter(|rest| glob::match_path(pattern, rest))
            .map(str::to_string)
            .collect())
    }

    /// Navigate to `name` below this node.
    ///
    /// Probes the archive: if `name` has content beneath it, the
    /// directory-shaped node is returned, otherwise the file-shaped one.
    pub async fn child(&self, name: &str) -> Result<ZipStorage> {
        let dir = self.at(format!("{}{}/", self.path, name));
        if dir.is_directory().await? {
            return Ok(dir);
        }
        Ok(self.at(format!("{}{}", self.path, name)))
    }

    /// The entry named exactly by this path, if any.
    pub async fn stat(&self) -> Result<Option<ZipFileEntry>> {
        Ok(self
            .entries()
            .await?
            .and_then(|entries| entries.into_iter().find(|e| e.file_name == self.path)))
    }

    /// Uncompressed size, or 0 if there is no such entry.
    pub async fn length(&self) -> Result<u64> {
        Ok(self.stat().await?.map_or(0, |e| e.uncompressed_size))
    }

    /// Modification time in milliseconds since the epoch, or 0 if there is
    /// no such entry.
    pub async fn last_modified(&self) -> Result<i64> {
        Ok(self.stat().await?.map_or(0, |e| e.last_modified_millis()))
    }

    /// Stream the entry's decompressed content.
    ///
    /// The returned reader keeps the archive open until it is dropped.
    pub async fn open(&self) -> Result<EntryReader<LocalFileReader>> {
        let not_found = || Error::NotFound {
            path: self.path.clone(),
        };

        let Some(handle) = ArchiveHandle::open(&self.archive)? else {
            return Err(not_found());
        };
        if self.looks_like_dir() {
            return Err(Error::IsDirectory {
                path: self.to_string(),
            });
        }

        let entry = handle
            .parser
            .find_entry(&self.path)
            .await?
            .ok_or_else(not_found)?;
        let data_offset = handle.parser.get_data_offset(&entry).await?;
        debug!(
            archive = %self.archive.display(),
            path = %self.path,
            size = entry.uncompressed_size,
            "opened entry"
        );
        EntryReader::new(Arc::clone(handle.parser.reader()), &entry, data_offset)
    }
}

impl fmt::Display for ZipStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!/{}", self.archive.display(), self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(path: &str) -> ZipStorage {
        ZipStorage::root("/tmp/a.zip").at(path)
    }

    #[test]
    fn names() {
        assert_eq!(node("").name(), "");
        assert_eq!(node("a.txt").name(), "a.txt");
        assert_eq!(node("out/").name(), "out");
        assert_eq!(node("out/sub/a.txt").name(), "a.txt");
        assert_eq!(node("out/sub/").name(), "sub");
    }

    #[test]
    fn parents() {
        assert_eq!(node("").parent(), None);
        assert_eq!(node("a.txt").parent(), Some(node("")));
        assert_eq!(node("out/").parent(), Some(node("")));
        assert_eq!(node("out/a.txt").parent(), Some(node("out/")));
        assert_eq!(node("out/sub/").parent(), Some(node("out/")));
        assert!(node("").is_root());
    }

    #[test]
    fn uris_are_percent_encoded() {
        assert_eq!(node("out/a b.txt").to_uri(), "out/a%20b.txt");
        assert_eq!(node("100%/#1?.txt").to_uri(), "100%25/%231%3F.txt");
        assert_eq!(node("ü.txt").to_uri(), "%C3%BC.txt");
        assert_eq!(node("a+b=c;d@e.txt").to_uri(), "a+b=c;d@e.txt");
    }

    #[test]
    fn shape_follows_trailing_slash() {
        assert!(node("").looks_like_dir());
        assert!(node("out/").looks_like_dir());
        assert!(!node("out").looks_like_dir());
    }

    #[tokio::test]
    async fn missing_archive_answers_negatively() {
        let dir = tempfile::tempdir().unwrap();
        let root = ZipStorage::root(dir.path().join("absent.zip"));

        assert!(!root.exists().await.unwrap());
        assert!(!root.is_directory().await.unwrap());
        assert!(root.list().await.unwrap().is_empty());
        assert!(root.list_glob(Some("**")).await.unwrap().is_empty());

        let file = root.child("a.txt").await.unwrap();
        assert_eq!(file.path(), "a.txt");
        assert!(!file.is_file().await.unwrap());
        assert_eq!(file.length().await.unwrap(), 0);
        assert_eq!(file.last_modified().await.unwrap(), 0);
        assert!(file.can_read());

        let err = file.open().await.err().unwrap();
        assert!(matches!(err, Error::NotFound { ref path } if path == "a.txt"));
    }
}
