use std::fmt;
use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("insufficient data")]
    InsufficientData,

    #[error("unknown algorithm")]
    UnknownAlgorithm,

    #[error("invalid hash key")]
    InvalidHashKey,

    #[error("checksum mismatch; expected: {expected}, got: {got}")]
    ChecksumMismatch { expected: String, got: String },

    #[error("verification failed on encoded shards")]
    EncodeVerifyFailed,

    #[error("invalid data/parity shard count")]
    InvalidShardCount,

    #[error("part shard IDs do not match the disks of this group")]
    ShardDiskMismatch,

    #[error("upload ID already exist")]
    UploadIdAlreadyExist,

    #[error("upload ID not found")]
    UploadIdNotFound,

    #[error("part file not found")]
    PartNotFound,

    #[error("part checksum file not found")]
    PartChecksumNotFound,

    #[error("data ID already exist")]
    DataIdAlreadyExist,

    #[error("data ID not found")]
    DataIdNotFound,

    #[error("bucket already exist")]
    BucketAlreadyExist,

    #[error("bucket not found")]
    BucketNotFound,

    #[error("bucket not empty")]
    BucketNotEmpty,

    #[error("write quorum not reached; {0}")]
    WriteQuorum(MultiError),

    #[error("read quorum not reached; {0}")]
    ReadQuorum(MultiError),

    #[error("{0}")]
    Multi(MultiError),

    #[error("reed-solomon: {0:?}")]
    ReedSolomon(reed_solomon_erasure::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<reed_solomon_erasure::Error> for Error {
    fn from(err: reed_solomon_erasure::Error) -> Error {
        Error::ReedSolomon(err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(err) => err,
            err => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}

/// Per-slot error aggregation for fan-out operations. Slots that succeeded
/// hold `None`; failed slots keep the rendered error.
#[derive(Debug, Clone)]
pub struct MultiError {
    op: &'static str,
    slots: Vec<Option<String>>,
}

impl MultiError {
    pub fn new(op: &'static str, errs: &[Option<Error>]) -> MultiError {
        MultiError {
            op,
            slots: errs.iter().map(|e| e.as_ref().map(|e| e.to_string())).collect(),
        }
    }

    pub fn from_messages(op: &'static str, slots: Vec<Option<String>>) -> MultiError {
        MultiError { op, slots }
    }

    pub fn failed_slots(&self) -> impl Iterator<Item = (usize, &str)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| s.as_deref().map(|s| (i, s)))
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "too many {} errors; [", self.op)?;
        let mut first = true;
        for (i, msg) in self.failed_slots() {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "slot {i}: {msg}")?;
        }
        write!(f, "]")
    }
}
