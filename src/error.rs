use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    ReadError(&'static str, io::Error),
    WriteError(&'static str, io::Error),
    LockError(io::Error),
    ChecksumMismatch,
    InvalidHeader(String),
    IndexCorruption(String),
    // The producer half of a write completion was dropped without firing,
    // meaning the storage task died before reporting back.
    CompletionDropped,
    InvalidState(String),
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
            Error::ReadError(context, err) => write!(f, "Failed to read {}: {}", context, err),
            Error::WriteError(context, err) => write!(f, "Failed to write {}: {}", context, err),
            Error::LockError(err) => write!(f, "Lock error: {}", err),
            Error::ChecksumMismatch => write!(f, "Checksum mismatch"),
            Error::InvalidHeader(msg) => write!(f, "Invalid header: {}", msg),
            Error::IndexCorruption(msg) => write!(f, "Index corruption: {}", msg),
            Error::CompletionDropped => write!(f, "Write completion dropped before firing"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
