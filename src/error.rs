use std::fmt;
use std::path::PathBuf;

/// Why a capture could not be analyzed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unreadable {
    /// No frames, or no frames that parsed into packets.
    NoPackets,
    /// Not a single housekeeping packet, so its domain cannot be derived.
    NoHousekeeping,
    /// Housekeeping packets exist but all are above the rollover ceiling.
    HousekeepingAboveCeiling,
}

impl fmt::Display for Unreadable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPackets => write!(f, "no packets"),
            Self::NoHousekeeping => write!(f, "no housekeeping packets"),
            Self::HousekeepingAboveCeiling => {
                write!(f, "no housekeeping packets at or below the rollover ceiling")
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Frame too short for the framing profile's header offsets.
    #[error("malformed frame: {actual} bytes, need at least {minimum}")]
    MalformedFrame { actual: usize, minimum: usize },

    #[error("unreadable capture: {0}")]
    UnreadableCapture(Unreadable),

    /// Command record carries a discriminant we do not know.
    #[error("unrecognized command discriminant {0}")]
    CodecMismatch(u8),

    #[error("Not enough bytes")]
    NotEnoughData {
        /// Number of bytes we got
        actual: usize,
        /// Minimum number of expected bytes
        minimum: usize,
    },

    /// Sequence value does not fit the 2-byte command range field.
    #[error("sequence {0} does not fit a command range field")]
    RangeOverflow(u32),

    #[error("invalid capture timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("ledger write to {path:?} failed")]
    LedgerWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
