//! Error types for the interval write and read paths.

/// Errors surfaced by the store, codec, aggregator and query service.
///
/// A missing interval is not an error: lookups return `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    /// A concurrent transaction touched a key this transaction fenced or wrote.
    ///
    /// Only the aggregator and sweeper retry this; it never leaves them.
    Conflict,
    /// Retry budget exhausted under concurrent writers to one entity.
    WriteContention { attempts: u32 },
    /// Storage medium failure.
    Io(String),
    /// A stored value could not be decoded.
    CorruptRecord(String),
    /// The heartbeat cannot be turned into a storage key.
    InvalidHeartbeat(String),
}

impl IntervalError {
    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            IntervalError::Conflict => "CONFLICT",
            IntervalError::WriteContention { .. } => "WRITE_CONTENTION",
            IntervalError::Io(_) => "IO_ERROR",
            IntervalError::CorruptRecord(_) => "CORRUPT_RECORD",
            IntervalError::InvalidHeartbeat(_) => "INVALID_HEARTBEAT",
        }
    }
}

impl std::fmt::Display for IntervalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntervalError::Conflict => write!(f, "Transaction conflict"),
            IntervalError::WriteContention { attempts } => {
                write!(f, "Write contention: gave up after {attempts} attempts")
            }
            IntervalError::Io(e) => write!(f, "Storage error: {e}"),
            IntervalError::CorruptRecord(e) => write!(f, "Corrupt record: {e}"),
            IntervalError::InvalidHeartbeat(e) => write!(f, "Invalid heartbeat: {e}"),
        }
    }
}

impl std::error::Error for IntervalError {}

impl From<rocksdb::Error> for IntervalError {
    fn from(e: rocksdb::Error) -> Self {
        match e.kind() {
            rocksdb::ErrorKind::Busy | rocksdb::ErrorKind::TryAgain => IntervalError::Conflict,
            _ => IntervalError::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, IntervalError>;
