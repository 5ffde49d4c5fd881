use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("packet too small")]
    PacketTooSmall,

    #[error("invalid question count {count} (max {max})")]
    InvalidCount { count: u16, max: u16 },

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("unknown class: {0}")]
    UnknownClass(String),

    #[error("domain name too long: {0} bytes encoded (max 255)")]
    NameTooLong(usize),

    #[error("label too long: {0} bytes (max 63)")]
    LabelTooLong(usize),

    #[error("too many questions: {0} (max 65535)")]
    TooManyQuestions(usize),

    #[error("empty label in domain name")]
    EmptyLabel,

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Maps a failed read into the codec's error space: running out of bytes
    /// is a short packet, everything else is the transport's own error.
    pub fn from_read(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::PacketTooSmall,
            _ => Error::Io(e),
        }
    }
}
