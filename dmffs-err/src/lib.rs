//! Shared error type for the dmffs packer and in-place reader.
//!
//! Mirrors the error kinds of the original flash filesystem module: there is
//! no global error state and every error is returned locally rather than set
//! in a shared slot.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument")]
    Invalid,
    #[error("not found")]
    NotFound,
    #[error("no space")]
    NoSpace,
    #[error("allocation failed")]
    General,
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while decoding the TLV wire format.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("short read at offset {offset}: need {needed} bytes but only {available} remain")]
    ShortRead {
        offset: u64,
        needed: u64,
        available: u64,
    },
    #[error("record at offset {offset} with length {length} exceeds the region bounds")]
    OutOfBounds { offset: u64, length: u64 },
}

pub type Result<T> = core::result::Result<T, Error>;
