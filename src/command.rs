//! Retransmission command codec.
//!
//! A command is a fixed 11 byte record:
//!
//! | bytes | field |
//! |---|---|
//! | 0 | year within century |
//! | 1 | month |
//! | 2 | day |
//! | 3..6 | seconds since midnight, big-endian |
//! | 6 | [CommandType] discriminant |
//! | 7..9 | range start, big-endian |
//! | 9..11 | range end, big-endian |
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{GapReport, SequenceRange};
use crate::capture::CaptureTimestamp;
use crate::framing::PacketKind;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandType {
    Housekeeping = 0,
    Image = 1,
    /// Capture fully received, no action needed.
    Complete = 2,
    /// Capture unreadable, full resend requested.
    Unreadable = 3,
}

impl CommandType {
    /// The fixed range carried by the types that do not address real sequences.
    #[must_use]
    pub fn sentinel(&self) -> Option<SequenceRange> {
        match self {
            Self::Complete => Some(SequenceRange::new(0, 0)),
            Self::Unreadable => Some(SequenceRange::new(0xffff, 0xffff)),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Housekeeping => "HK",
            Self::Image => "IM",
            Self::Complete => "OK",
            Self::Unreadable => "Error",
        }
    }
}

impl TryFrom<u8> for CommandType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Housekeeping),
            1 => Ok(Self::Image),
            2 => Ok(Self::Complete),
            3 => Ok(Self::Unreadable),
            x => Err(Error::CodecMismatch(x)),
        }
    }
}

impl TryFrom<PacketKind> for CommandType {
    type Error = Error;

    fn try_from(kind: PacketKind) -> Result<Self> {
        match kind {
            PacketKind::Image => Ok(Self::Image),
            PacketKind::Housekeeping => Ok(Self::Housekeeping),
            PacketKind::Unclassified => Err(Error::Config(
                "unclassified packets cannot be requested".to_string(),
            )),
        }
    }
}

/// Request addressing one sequence range of one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetransmissionCommand {
    pub timestamp: CaptureTimestamp,
    pub kind: CommandType,
    /// For [CommandType::Complete] and [CommandType::Unreadable] this is the type's
    /// [sentinel](CommandType::sentinel), not a real interval.
    pub range: SequenceRange,
}

impl Display for RetransmissionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.timestamp, self.kind.label())?;
        if self.kind.sentinel().is_none() {
            write!(f, " {}", self.range)?;
        }
        Ok(())
    }
}

impl RetransmissionCommand {
    /// Encoded length in bytes
    pub const LEN: usize = 11;

    /// Request a range of packets of the given kind.
    ///
    /// # Errors
    /// [Error::RangeOverflow] if either end does not fit the 2-byte wire field, or
    /// [Error::Config] for unclassified packets.
    pub fn request(timestamp: CaptureTimestamp, kind: PacketKind, range: SequenceRange) -> Result<Self> {
        check_range(range)?;
        Ok(RetransmissionCommand {
            timestamp,
            kind: CommandType::try_from(kind)?,
            range,
        })
    }

    /// Acknowledge a fully received capture.
    #[must_use]
    pub fn complete(timestamp: CaptureTimestamp) -> Self {
        Self::with_sentinel(timestamp, CommandType::Complete)
    }

    /// Ask for an unreadable capture to be sent again in full.
    #[must_use]
    pub fn unreadable(timestamp: CaptureTimestamp) -> Self {
        Self::with_sentinel(timestamp, CommandType::Unreadable)
    }

    fn with_sentinel(timestamp: CaptureTimestamp, kind: CommandType) -> Self {
        RetransmissionCommand {
            timestamp,
            kind,
            range: kind.sentinel().unwrap_or_default(),
        }
    }

    /// The requested range, or `None` for the sentinel types.
    #[must_use]
    pub fn sequence_range(&self) -> Option<SequenceRange> {
        match self.kind.sentinel() {
            Some(_) => None,
            None => Some(self.range),
        }
    }

    /// Encode into the 11 byte wire record.
    ///
    /// # Errors
    /// [Error::RangeOverflow] if the range does not fit the wire format.
    pub fn encode(&self) -> Result<[u8; Self::LEN]> {
        encode(&self.timestamp, self.kind, self.range)
    }

    /// Decode an 11 byte wire record.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `dat` is shorter than [Self::LEN],
    /// [Error::CodecMismatch] for an unknown discriminant, or
    /// [Error::InvalidTimestamp] if the timestamp fields are not a valid time.
    pub fn decode(dat: &[u8]) -> Result<Self> {
        let (timestamp, kind, range) = decode(dat)?;
        Ok(RetransmissionCommand {
            timestamp,
            kind,
            range,
        })
    }
}

fn check_range(range: SequenceRange) -> Result<()> {
    for seq in [range.start, range.end] {
        if seq > u32::from(u16::MAX) {
            return Err(Error::RangeOverflow(seq));
        }
    }
    Ok(())
}

/// Encode a command record.
///
/// For the sentinel types the given range is ignored and the type's sentinel is
/// written instead.
///
/// # Errors
/// [Error::RangeOverflow] if the range does not fit the 2-byte wire fields.
///
/// # Example
/// ```
/// use downlink::analysis::SequenceRange;
/// use downlink::capture::CaptureTimestamp;
/// use downlink::command::{encode, CommandType};
///
/// let ts = CaptureTimestamp::from_filename("F20240822162559.bin").unwrap();
/// let record = encode(&ts, CommandType::Image, SequenceRange::new(16000, 16619)).unwrap();
/// assert_eq!(record, [24, 8, 22, 0x00, 0xe7, 0x17, 1, 0x3e, 0x80, 0x40, 0xeb]);
/// ```
pub fn encode(
    timestamp: &CaptureTimestamp,
    kind: CommandType,
    range: SequenceRange,
) -> Result<[u8; RetransmissionCommand::LEN]> {
    let range = kind.sentinel().unwrap_or(range);
    check_range(range)?;

    let mut buf = [0u8; RetransmissionCommand::LEN];
    buf[0] = timestamp.year;
    buf[1] = timestamp.month;
    buf[2] = timestamp.day;
    buf[3..6].copy_from_slice(&timestamp.second_of_day.to_be_bytes()[1..]);
    buf[6] = kind as u8;
    // range checked above
    buf[7..9].copy_from_slice(&(range.start as u16).to_be_bytes());
    buf[9..11].copy_from_slice(&(range.end as u16).to_be_bytes());
    Ok(buf)
}

/// Decode a command record, the exact inverse of [encode].
///
/// # Errors
/// [Error::NotEnoughData] if `dat` is shorter than [RetransmissionCommand::LEN],
/// [Error::CodecMismatch] for an unknown discriminant, or [Error::InvalidTimestamp]
/// if the timestamp fields are not a valid time.
pub fn decode(dat: &[u8]) -> Result<(CaptureTimestamp, CommandType, SequenceRange)> {
    if dat.len() < RetransmissionCommand::LEN {
        return Err(Error::NotEnoughData {
            actual: dat.len(),
            minimum: RetransmissionCommand::LEN,
        });
    }
    let kind = CommandType::try_from(dat[6])?;
    let timestamp = CaptureTimestamp::from_parts(
        dat[0],
        dat[1],
        dat[2],
        u32::from_be_bytes([0, dat[3], dat[4], dat[5]]),
    )?;
    let range = SequenceRange::new(
        u32::from(u16::from_be_bytes([dat[7], dat[8]])),
        u32::from(u16::from_be_bytes([dat[9], dat[10]])),
    );
    Ok((timestamp, kind, range))
}

/// Commands requesting everything an analysis found missing.
///
/// An unreadable capture produces a single [CommandType::Unreadable] and a complete
/// one a single [CommandType::Complete]. Otherwise there is one command per image
/// range followed by one per housekeeping range.
///
/// # Errors
/// [Error::RangeOverflow] if a range cannot be encoded.
pub fn commands_for(
    timestamp: CaptureTimestamp,
    report: Option<&GapReport>,
) -> Result<Vec<RetransmissionCommand>> {
    let Some(report) = report else {
        return Ok(vec![RetransmissionCommand::unreadable(timestamp)]);
    };
    if report.is_complete() {
        return Ok(vec![RetransmissionCommand::complete(timestamp)]);
    }

    let mut commands = Vec::default();
    for kind in [PacketKind::Image, PacketKind::Housekeeping] {
        let Some(gaps) = report.gaps(kind) else {
            continue;
        };
        for range in &gaps.ranges {
            commands.push(RetransmissionCommand::request(timestamp, kind, *range)?);
        }
    }
    debug!(capture = %timestamp, count = commands.len(), "generated requests");
    Ok(commands)
}
