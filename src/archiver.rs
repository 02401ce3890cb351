//! Packing workspace files into an archive, atomically.
//!
//! The archive is written to a sibling staging file,
//! `<archive>.writing.zip`, and renamed over the target only once it is
//! complete and synced. Readers of the target therefore see either the
//! previous archive or the new one, never a partial write. A failed build
//! leaves the staging file behind for inspection and the target untouched.

use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::BufWriter;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::workspace::Workspace;
use crate::zip::ZipWriter;

/// Extension of the archives this crate produces.
pub const ARCHIVE_EXTENSION: &str = ".zip";

/// Path of the staging file a build writes before renaming onto `archive`.
pub fn staging_path(archive: &Path) -> PathBuf {
    let mut name = OsString::from(archive.as_os_str());
    name.push(".writing");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

/// Build `archive` from `artifacts`, pairs of workspace source path and
/// entry name, in order.
///
/// A mapping with a single source that is itself a `.zip` file is copied
/// verbatim instead of being wrapped in a new archive, so it stays
/// browsable as itself.
#[instrument(skip_all, fields(archive = %archive.display(), artifacts = artifacts.len()))]
pub async fn build<W>(archive: &Path, workspace: &W, artifacts: &[(String, String)]) -> Result<()>
where
    W: Workspace + ?Sized,
{
    let staging = staging_path(archive);

    let staged = match artifacts {
        [(source, _)] if source.ends_with(ARCHIVE_EXTENSION) => {
            info!(source = %source, "single archive artifact, copying verbatim");
            workspace
                .copy_to(source, &staging)
                .await
                .map(|()| 1)
                .map_err(Error::from)
        }
        _ => write_staged(&staging, workspace, artifacts).await,
    };

    let entries = match staged {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                staging = %staging.display(),
                error = %e,
                "build failed, staging file left in place"
            );
            return Err(e);
        }
    };

    tokio::fs::rename(&staging, archive).await?;
    info!(entries, "archive written");
    Ok(())
}

async fn write_staged<W>(
    staging: &Path,
    workspace: &W,
    artifacts: &[(String, String)],
) -> Result<usize>
where
    W: Workspace + ?Sized,
{
    let file = tokio::fs::File::create(staging).await?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let started = Utc::now();

    for (source, destination) in artifacts {
        if workspace.is_directory(source).await? {
            add_directories(&mut writer, destination, started).await?;
            continue;
        }

        let name = normalize_entry_name(destination)?;
        if name.is_empty() {
            return Err(Error::InvalidEntryName {
                name: destination.clone(),
                reason: "file entries need a name",
            });
        }
        let modified = workspace
            .last_modified(source)
            .await?
            .map(DateTime::<Utc>::from)
            .unwrap_or(started);

        let mut content = workspace.open(source).await?;
        let size = writer.add_file(&name, modified, &mut content).await?;
        debug!(source = %source, entry = %name, size, "packed file");
    }

    let entries = writer.len();
    let file = writer.finish().await?.into_inner();
    file.sync_all().await?;
    Ok(entries)
}

/// Emit a directory entry for `destination` and each of its ancestors that
/// is not in the archive yet.
async fn add_directories<S>(
    writer: &mut ZipWriter<S>,
    destination: &str,
    modified: DateTime<Utc>,
) -> Result<()>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    let name = normalize_entry_name(destination)?;
    let mut prefix = String::with_capacity(name.len() + 1);
    for segment in name.split('/').filter(|s| !s.is_empty()) {
        prefix.push_str(segment);
        prefix.push('/');
        if !writer.contains(&prefix) {
            writer.add_directory(&prefix, modified).await?;
            debug!(entry = %prefix, "packed directory");
        }
    }
    Ok(())
}

/// Canonical `/`-separated form of a destination name.
///
/// Backslashes count as separators, empty and `.` segments are dropped and
/// `..` is refused. The root normalizes to `""`.
pub fn normalize_entry_name(name: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in name.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(Error::InvalidEntryName {
                    name: name.to_string(),
                    reason: "'..' segments are not allowed",
                });
            }
            _ => segments.push(segment),
        }
    }
    Ok(segments.join("/"))
}

/// Remove `archive`. Returns whether a file was actually deleted.
#[instrument(skip_all, fields(archive = %archive.display()))]
pub async fn delete(archive: &Path) -> Result<bool> {
    match tokio::fs::remove_file(archive).await {
        Ok(()) => {
            info!("archive deleted");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_path_sits_next_to_the_archive() {
        assert_eq!(
            staging_path(Path::new("/jobs/1/archive.zip")),
            PathBuf::from("/jobs/1/archive.zip.writing.zip")
        );
    }

    #[test]
    fn normalizes_entry_names() {
        assert_eq!(normalize_entry_name("out/a.txt").unwrap(), "out/a.txt");
        assert_eq!(normalize_entry_name("/out//./a.txt").unwrap(), "out/a.txt");
        assert_eq!(normalize_entry_name("out\\sub\\a.txt").unwrap(), "out/sub/a.txt");
        assert_eq!(normalize_entry_name("out/").unwrap(), "out");
        assert_eq!(normalize_entry_name("").unwrap(), "");
        assert!(matches!(
            normalize_entry_name("out/../../etc/passwd"),
            Err(Error::InvalidEntryName { .. })
        ));
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        assert!(!delete(&archive).await.unwrap());

        std::fs::write(&archive, b"PK").unwrap();
        assert!(delete(&archive).await.unwrap());
        assert!(!archive.exists());
    }
}
