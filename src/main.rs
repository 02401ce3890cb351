//! Main entry point for the zipstore CLI application.
//!
//! This binary packs workspace files into archives and browses existing
//! archives through the read-only virtual file system.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

use zipstore::cli::Command;
use zipstore::{Cli, LocalWorkspace, ZipStorage, archiver};

/// Application entry point.
///
/// Parses command-line arguments, installs the log subscriber and
/// dispatches to the subcommand handler.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Pack {
            archive,
            root,
            mappings,
        } => pack(&archive, &root, &mappings).await,
        Command::Ls {
            archive,
            path,
            glob,
        } => list(&archive, &path, glob.as_deref()).await,
        Command::Cat { archive, path } => cat(&archive, &path).await,
        Command::Stat { archive, path } => stat(&archive, &path).await,
        Command::Rm { archive } => remove(&archive).await,
    }
}

async fn pack(archive: &Path, root: &Path, mappings: &[(String, String)]) -> Result<()> {
    let workspace = LocalWorkspace::new(root);
    archiver::build(archive, &workspace, mappings)
        .await
        .with_context(|| format!("failed to build {}", archive.display()))
}

/// Resolve a user-supplied path segment by segment, the way a browser
/// navigates, so directories come back directory-shaped.
async fn resolve(archive: &Path, path: &str) -> Result<ZipStorage> {
    let mut node = ZipStorage::root(archive);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        node = node.child(segment).await?;
    }
    Ok(node)
}

async fn list(archive: &Path, path: &str, glob: Option<&str>) -> Result<()> {
    let dir = resolve(archive, path).await?;
    if !dir.is_directory().await? {
        bail!("{}: not a directory", dir);
    }

    let mut names: Vec<String> = match glob {
        Some(pattern) => dir.list_glob(Some(pattern)).await?.into_iter().collect(),
        None => dir
            .list()
            .await?
            .iter()
            .map(|child| child.path()[dir.path().len()..].to_string())
            .collect(),
    };
    // the listing is a set; sort for stable output
    names.sort();
    for name in names {
        println!("{name}");
    }
    Ok(())
}

async fn cat(archive: &Path, path: &str) -> Result<()> {
    let node = resolve(archive, path).await?;
    let mut reader = node.open().await?;
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut reader, &mut stdout)
        .await
        .with_context(|| format!("failed to read {node}"))?;
    stdout.flush().await?;
    Ok(())
}

async fn stat(archive: &Path, path: &str) -> Result<()> {
    let node = resolve(archive, path).await?;
    if node.is_directory().await? {
        println!("{:>10}  {}", "directory", node.to_uri());
        return Ok(());
    }
    if !node.is_file().await? {
        bail!("{} (No such file or directory)", node.path());
    }

    let size = node.length().await?;
    let modified = DateTime::<Utc>::from_timestamp_millis(node.last_modified().await?)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    println!("{size:>10}  {modified}  {}", node.to_uri());
    Ok(())
}

async fn remove(archive: &Path) -> Result<()> {
    if archiver::delete(archive).await? {
        tracing::info!("removed {}", archive.display());
    } else {
        eprintln!("{}: nothing to remove", archive.display());
    }
    Ok(())
}
