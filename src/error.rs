//! Error taxonomy shared by every layer of the crate.
//!
//! The set is deliberately flat: callers match on the variant, never on a
//! nested cause.  OS-level failures keep their [`io::Error`] as the source.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KcfError>;

#[derive(Error, Debug)]
pub enum KcfError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Invalid archive format: {0}")]
    InvalidFormat(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// The operation named here is not legal in the handle's current state.
    #[error("Invalid state for {0}")]
    InvalidState(&'static str),
    #[error("File not found: {0}")]
    FileNotFound(#[source] io::Error),
    #[error("Access denied: {0}")]
    AccessDenied(#[source] io::Error),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Read error: {0}")]
    Read(#[source] io::Error),
    #[error("Write error: {0}")]
    Write(#[source] io::Error),
    /// Clean end of stream at a record boundary.
    #[error("End of file")]
    Eof,
    /// The stream ended in the middle of a structure.
    #[error("Premature end of file")]
    PrematureEof,
    #[error("Unknown error: {0}")]
    Unknown(#[source] io::Error),
}

impl KcfError {
    /// Map a failure from opening or creating a file.
    pub fn from_os(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound         => KcfError::FileNotFound(err),
            io::ErrorKind::PermissionDenied => KcfError::AccessDenied(err),
            io::ErrorKind::OutOfMemory      => KcfError::OutOfMemory,
            io::ErrorKind::InvalidInput     => KcfError::InvalidParameter(err.to_string()),
            _                               => KcfError::Unknown(err),
        }
    }

    /// Shorthand for a `Write` error that has no OS cause.
    pub(crate) fn write_msg(kind: io::ErrorKind, msg: &str) -> Self {
        KcfError::Write(io::Error::new(kind, msg.to_owned()))
    }

    /// True for the clean end-of-archive condition.
    pub fn is_eof(&self) -> bool {
        matches!(self, KcfError::Eof)
    }
}

impl From<KcfError> for io::Error {
    fn from(err: KcfError) -> Self {
        match err {
            KcfError::Read(e)
            | KcfError::Write(e)
            | KcfError::FileNotFound(e)
            | KcfError::AccessDenied(e)
            | KcfError::Unknown(e) => e,
            KcfError::Eof | KcfError::PrematureEof => {
                io::Error::new(io::ErrorKind::UnexpectedEof, err)
            }
            KcfError::InvalidParameter(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            KcfError::OutOfMemory         => io::Error::new(io::ErrorKind::OutOfMemory, err),
            other                         => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
