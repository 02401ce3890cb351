//! # zipstore
//!
//! Browse ZIP archives as a read-only virtual file system, and build them
//! atomically from a set of workspace files.
//!
//! Archives have no real directories, only a flat list of `/`-separated
//! entry names. [`ZipStorage`] layers file system semantics on top of that
//! list: a path ending in `/` is a directory when some entry lives below
//! it, children are derived from shared prefixes, and file content is
//! streamed lazily without extracting anything to disk.
//!
//! [`archiver::build`] produces such archives. It writes to a staging file
//! next to the target and renames it into place once complete, so readers
//! never observe a half-written archive.
//!
//! ## Features
//!
//! - Per-query scoped access: every query opens and closes the archive
//! - Directory listing, Ant-style glob listing, size and mtime queries
//! - Streaming, CRC-checked reads of STORED and DEFLATE entries
//! - ZIP64 support on both the reading and the writing side
//! - Verbatim passthrough when the only artifact is already a `.zip`
//!
//! ## Example
//!
//! ```no_run
//! use zipstore::{LocalWorkspace, ZipStorage, archiver};
//! use tokio::io::AsyncReadExt;
//!
//! #[tokio::main]
//! async fn main() -> zipstore::Result<()> {
//!     let workspace = LocalWorkspace::new("target/site");
//!     let artifacts = vec![("index.html".to_string(), "site/index.html".to_string())];
//!     archiver::build("site.zip".as_ref(), &workspace, &artifacts).await?;
//!
//!     let root = ZipStorage::root("site.zip");
//!     let page = root.child("site").await?.child("index.html").await?;
//!
//!     let mut html = String::new();
//!     page.open().await?.read_to_string(&mut html).await?;
//!     println!("{} bytes", html.len());
//!     Ok(())
//! }
//! ```

pub mod archiver;
pub mod cli;
pub mod error;
pub mod glob;
pub mod io;
pub mod storage;
pub mod workspace;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{LocalFileReader, ReadAt};
pub use storage::ZipStorage;
pub use workspace::{LocalWorkspace, Workspace};
pub use zip::{EntryReader, ZipFileEntry, ZipParser, ZipWriter};
