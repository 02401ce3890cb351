//! Error type shared by the archive reader, writer and virtual file system.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by `zipstore`.
#[derive(Debug, Error)]
pub enum Error {
    /// The archive file, or the entry inside it, does not exist.
    #[error("{path} (No such file or directory)")]
    NotFound { path: String },

    /// A stream was requested for a directory-shaped path.
    #[error("{path} (Is a directory)")]
    IsDirectory { path: String },

    /// The archive structures could not be parsed.
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// A destination entry name cannot be stored in an archive.
    #[error("Invalid entry name {name:?}: {reason}")]
    InvalidEntryName { name: String, reason: &'static str },

    /// Two files in one build map to the same entry name.
    #[error("Duplicate entry {name:?}")]
    DuplicateEntry { name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArchive(msg.into())
    }

    /// Whether this error means "nothing to read at that path".
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } | Error::IsDirectory { .. } => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::NotFound { .. } => std::io::Error::new(std::io::ErrorKind::NotFound, err),
            Error::IsDirectory { .. } => {
                std::io::Error::new(std::io::ErrorKind::IsADirectory, err)
            }
            Error::InvalidArchive(_) | Error::UnsupportedCompression(_) => {
                std::io::Error::new(std::io::ErrorKind::InvalidData, err)
            }
            Error::InvalidEntryName { .. } | Error::DuplicateEntry { .. } => {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_path() {
        let err = Error::NotFound {
            path: "out/a.txt".to_string(),
        };
        assert_eq!(err.to_string(), "out/a.txt (No such file or directory)");
        assert!(err.is_not_found());
    }

    #[test]
    fn io_conversion_keeps_kind() {
        let err: std::io::Error = Error::IsDirectory {
            path: "out/".to_string(),
        }
        .into();
        assert_eq!(err.kind(), std::io::ErrorKind::IsADirectory);

        let interrupted = std::io::Error::from(std::io::ErrorKind::Interrupted);
        let err: std::io::Error = Error::from(interrupted).into();
        assert_eq!(err.kind(), std::io::ErrorKind::Interrupted);
    }
}
