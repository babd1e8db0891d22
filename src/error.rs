use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    /// Empty or malformed record key.
    InvalidKey(String),
    /// Write attempted against a frozen memtable.
    Frozen,
    /// Compaction requested on a level that holds no segments.
    EmptyLevel(u16),
    /// A metadata, filter or data file is missing on open.
    NotFound(PathBuf),
    Decode(&'static str, io::Error),
    Encode(&'static str, io::Error),
    ChecksumMismatch,
    InvalidState(String),
    InvalidOperation(String),
    LockError(io::Error),
}

impl Error {
    /// Maps a missing file to `NotFound`, anything else to `IoError`.
    pub(crate) fn from_open(path: impl Into<PathBuf>, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.into()),
            _ => Error::IoError(err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),
            Error::Frozen => write!(f, "Memtable is frozen"),
            Error::EmptyLevel(level) => write!(f, "Level {} has no tables to compact", level),
            Error::NotFound(path) => write!(f, "File not found: {}", path.display()),
            Error::Decode(field, err) => write!(f, "Failed to decode {}: {}", field, err),
            Error::Encode(field, err) => write!(f, "Failed to encode {}: {}", field, err),
            Error::ChecksumMismatch => write!(f, "Checksum mismatch"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
            Error::LockError(err) => write!(f, "Lock error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err)
            | Error::Decode(_, err)
            | Error::Encode(_, err)
            | Error::LockError(err) => Some(err),
            _ => None,
        }
    }
}
