use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("{} is not part of the current folder", .0.display())]
    FileNotInFolder(PathBuf),

    #[error("no writer registered for format '{0}'")]
    UnsupportedFormat(String),

    #[error("failure decoding {}: {cause}", .path.display())]
    Decode { path: PathBuf, cause: String },

    #[error("failure encoding {}: {cause}", .path.display())]
    Encode { path: PathBuf, cause: String },

    #[error("failure writing {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a save is already in progress for {}", .0.display())]
    SaveInProgress(PathBuf),

    #[error("{0}")]
    Manipulation(String),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that describe a missing file or folder rather than a failed operation.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::DirectoryNotFound(_) | Error::FileNotInFolder(_)
        )
    }
}
