//! Error taxonomy for the engine (§7).

use thiserror::Error;

/// Every way a [`crate::session::Session`] operation can fail.
///
/// Structural corruption (self-loop, intersection, bad cluster, unclosed
/// transaction) is repaired internally during [`crate::session::Session::open`]
/// and never surfaces here — see [`crate::session::Session::last_repairs`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("boot sector is invalid: data cluster count is not positive")]
    InvalidBoot,

    #[error("disambiguation callback returned out-of-range FAT copy index {0}")]
    WrongFatCopyIndex(usize),

    #[error("name {0:?} is invalid: too long or already used in this directory")]
    InvalidName(String),

    #[error("FAT entry value {value:#x} exceeds the {bits}-bit variant width")]
    InvalidValue { value: u32, bits: u32 },

    #[error("cannot swap cluster {0} with itself or a bad cluster")]
    InvalidSwap(u32),

    #[error("cannot relocate the fixed FAT12/16 root directory")]
    InvalidRootEdit,

    #[error("no free cluster available")]
    OutOfSpace,

    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("path component {0:?} is not a directory")]
    NotADirectory(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed journal record: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
